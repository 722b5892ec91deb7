use std::collections::HashMap;

use decant_common::types::{MetadataCode, MetadataSource, MetadataSpec, MetadataType, NodeMetadataEntry};
use decant_common::{NodeId, RegistryId};

use super::{Store, StoreError};

impl Store {
    /// Atomically replace a node's metadata set: existing junction rows
    /// are deleted, each `(type, code)` is resolved to a registry entry
    /// (created when missing), and the new rows inserted — all in one
    /// transaction. Calling twice with the same set is a no-op.
    pub async fn set_node_metadata(
        &self,
        node_id: NodeId,
        specs: &[MetadataSpec],
    ) -> Result<Vec<NodeMetadataEntry>, StoreError> {
        // Existence check keeps junction writes off deleted nodes.
        self.get_node(node_id).await?;

        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        replace_node_metadata(&mut tx, node_id, specs).await?;

        tx.commit().await.map_err(|e| StoreError::Query(e.to_string()))?;

        metrics::counter!("store.metadata.replacements").increment(1);
        self.get_node_metadata(node_id).await
    }

    /// A node's metadata assignments joined with their registry entries.
    pub async fn get_node_metadata(
        &self,
        node_id: NodeId,
    ) -> Result<Vec<NodeMetadataEntry>, StoreError> {
        let rows: Vec<(String, String, String, f64, String)> = sqlx::query_as(
            r#"
            SELECT r.id, r.code_type, r.code, nm.confidence, nm.source
            FROM node_metadata nm
            JOIN metadata_code_registry r ON r.id = nm.registry_id
            WHERE nm.node_id = ?
            ORDER BY r.code_type, r.code
            "#,
        )
        .bind(node_id.to_string())
        .fetch_all(self.pool())
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(rows
            .into_iter()
            .filter_map(|(id, ty, code, confidence, source)| {
                Some(NodeMetadataEntry {
                    registry_id: RegistryId::parse(&id)?,
                    code_type: MetadataType::parse(&ty)?,
                    code,
                    confidence,
                    source: MetadataSource::parse(&source)?,
                })
            })
            .collect())
    }

    /// Typed codes attached to one node.
    pub async fn metadata_codes_for(&self, node_id: NodeId) -> Result<Vec<MetadataCode>, StoreError> {
        Ok(self
            .get_node_metadata(node_id)
            .await?
            .into_iter()
            .map(|e| MetadataCode::new(e.code_type, e.code))
            .collect())
    }

    /// Typed codes for a batch of nodes in one query.
    pub async fn metadata_codes_for_many(
        &self,
        node_ids: &[NodeId],
    ) -> Result<HashMap<NodeId, Vec<MetadataCode>>, StoreError> {
        if node_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders = vec!["?"; node_ids.len()].join(", ");
        let sql = format!(
            r#"
            SELECT nm.node_id, r.code_type, r.code
            FROM node_metadata nm
            JOIN metadata_code_registry r ON r.id = nm.registry_id
            WHERE nm.node_id IN ({})
            "#,
            placeholders
        );

        let mut query = sqlx::query_as::<_, (String, String, String)>(&sql);
        for id in node_ids {
            query = query.bind(id.to_string());
        }

        let rows = query
            .fetch_all(self.pool())
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut out: HashMap<NodeId, Vec<MetadataCode>> = HashMap::new();
        for (node_id, ty, code) in rows {
            let (Some(node_id), Some(ty)) = (NodeId::parse(&node_id), MetadataType::parse(&ty))
            else {
                continue;
            };
            out.entry(node_id).or_default().push(MetadataCode::new(ty, code));
        }
        Ok(out)
    }

    /// Ids of non-deleted nodes that carry at least one metadata code.
    pub async fn nodes_with_metadata(&self) -> Result<Vec<NodeId>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT nm.node_id
            FROM node_metadata nm
            JOIN nodes n ON n.id = nm.node_id
            WHERE n.is_deleted = 0
            ORDER BY nm.node_id
            "#,
        )
        .fetch_all(self.pool())
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(rows.into_iter().filter_map(|(id,)| NodeId::parse(&id)).collect())
    }

    /// Number of registry entries two nodes share.
    pub async fn shared_metadata_count(&self, a: NodeId, b: NodeId) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM node_metadata x
            JOIN node_metadata y ON y.registry_id = x.registry_id
            WHERE x.node_id = ? AND y.node_id = ?
            "#,
        )
        .bind(a.to_string())
        .bind(b.to_string())
        .fetch_one(self.pool())
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(count)
    }
}

/// Delete-then-insert replacement of a node's metadata, resolving each
/// spec against the registry. Runs inside the caller's transaction.
pub(crate) async fn replace_node_metadata(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    node_id: NodeId,
    specs: &[MetadataSpec],
) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM node_metadata WHERE node_id = ?")
        .bind(node_id.to_string())
        .execute(&mut **tx)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

    for spec in specs {
        let registry_id = resolve_registry_entry(tx, spec).await?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO node_metadata (node_id, registry_id, confidence, source)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(node_id.to_string())
        .bind(registry_id.to_string())
        .bind(spec.confidence.clamp(0.0, 1.0))
        .bind(spec.source.as_str())
        .execute(&mut **tx)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;
    }

    Ok(())
}

/// Resolve `(type, code)` to a registry id, inserting a new entry when
/// missing and bumping `usage_count` either way.
async fn resolve_registry_entry(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    spec: &MetadataSpec,
) -> Result<RegistryId, StoreError> {
    let existing: Option<(String,)> = sqlx::query_as(
        "SELECT id FROM metadata_code_registry WHERE code_type = ? AND code = ?",
    )
    .bind(spec.code_type.as_str())
    .bind(&spec.code)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| StoreError::Query(e.to_string()))?;

    if let Some((id,)) = existing {
        sqlx::query("UPDATE metadata_code_registry SET usage_count = usage_count + 1 WHERE id = ?")
            .bind(&id)
            .execute(&mut **tx)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        return RegistryId::parse(&id)
            .ok_or_else(|| StoreError::Query(format!("Malformed registry id {}", id)));
    }

    let id = RegistryId::new();
    let display_name = spec
        .display_name
        .clone()
        .unwrap_or_else(|| spec.code.replace('_', " "));

    sqlx::query(
        r#"
        INSERT INTO metadata_code_registry (id, code_type, code, display_name, usage_count)
        VALUES (?, ?, ?, ?, 1)
        "#,
    )
    .bind(id.to_string())
    .bind(spec.code_type.as_str())
    .bind(&spec.code)
    .bind(&display_name)
    .execute(&mut **tx)
    .await
    .map_err(|e| StoreError::Query(e.to_string()))?;

    Ok(id)
}
