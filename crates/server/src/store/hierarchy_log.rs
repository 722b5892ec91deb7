use decant_common::types::{ChangeTrigger, ChangeType, HierarchyCodeChange, HierarchyView};
use decant_common::{ChangeId, NodeId};

use super::{Store, StoreError};

impl Store {
    /// Audit rows touching one node, newest first.
    pub async fn hierarchy_changes_for(
        &self,
        node_id: NodeId,
        limit: u32,
    ) -> Result<Vec<HierarchyCodeChange>, StoreError> {
        let rows: Vec<ChangeRow> = sqlx::query_as(
            r#"
            SELECT id, change_type, hierarchy_type, triggered_by,
                   old_code, new_code, node_id, related_node_ids, metadata, created_at
            FROM hierarchy_code_changes
            WHERE node_id = ?
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(node_id.to_string())
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(rows.into_iter().filter_map(ChangeRow::into_change).collect())
    }
}

/// Insert inside the caller's transaction.
pub(crate) async fn insert_change(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    change: &HierarchyCodeChange,
) -> Result<(), StoreError> {
    let related = serde_json::to_string(
        &change
            .related_node_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>(),
    )
    .unwrap_or_else(|_| "[]".into());

    sqlx::query(
        r#"
        INSERT INTO hierarchy_code_changes (
            id, change_type, hierarchy_type, triggered_by,
            old_code, new_code, node_id, related_node_ids, metadata, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(change.id.to_string())
    .bind(change.change_type.as_str())
    .bind(change.hierarchy_type.as_str())
    .bind(change.triggered_by.as_str())
    .bind(&change.old_code)
    .bind(&change.new_code)
    .bind(change.node_id.map(|id| id.to_string()))
    .bind(related)
    .bind(if change.metadata.is_null() {
        "{}".to_string()
    } else {
        change.metadata.to_string()
    })
    .bind(change.created_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| StoreError::Query(e.to_string()))?;

    metrics::counter!(
        "store.hierarchy_changes",
        "trigger" => change.triggered_by.as_str()
    )
    .increment(1);
    Ok(())
}

#[derive(sqlx::FromRow)]
struct ChangeRow {
    id: String,
    change_type: String,
    hierarchy_type: String,
    triggered_by: String,
    old_code: Option<String>,
    new_code: Option<String>,
    node_id: Option<String>,
    related_node_ids: String,
    metadata: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl ChangeRow {
    fn into_change(self) -> Option<HierarchyCodeChange> {
        let related: Vec<String> = serde_json::from_str(&self.related_node_ids).unwrap_or_default();
        Some(HierarchyCodeChange {
            id: ChangeId::parse(&self.id)?,
            change_type: ChangeType::parse(&self.change_type)?,
            hierarchy_type: HierarchyView::parse(&self.hierarchy_type)?,
            triggered_by: ChangeTrigger::parse(&self.triggered_by)?,
            old_code: self.old_code,
            new_code: self.new_code,
            node_id: self.node_id.as_deref().and_then(NodeId::parse),
            related_node_ids: related.iter().filter_map(|s| NodeId::parse(s)).collect(),
            metadata: serde_json::from_str(&self.metadata).unwrap_or(serde_json::Value::Null),
            created_at: self.created_at,
        })
    }
}
