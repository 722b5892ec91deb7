use chrono::{DateTime, Utc};
use serde_json::Value;

use decant_common::types::{
    ChangeTrigger, ChangeType, HierarchyCodeChange, HierarchyView, MergeOptions, MetadataSpec,
    Node, NodeInput, NodePatch,
};
use decant_common::NodeId;

use super::{Store, StoreError};

pub(crate) const NODE_COLUMNS: &str = "id, title, url, source_domain, company, \
     phrase_description, short_description, ai_summary, logo_url, \
     extracted_fields, metadata_tags, segment, category, content_type, \
     function_parent_id, function_hierarchy_code, \
     organization_parent_id, organization_hierarchy_code, \
     is_deleted, phase2_completed, date_added, date_modified";

/// Internal row type for sqlx deserialization. JSON columns are TEXT and
/// parsed at the conversion boundary.
#[derive(sqlx::FromRow)]
pub(crate) struct NodeRow {
    pub id: String,
    pub title: String,
    pub url: String,
    pub source_domain: String,
    pub company: Option<String>,
    pub phrase_description: Option<String>,
    pub short_description: Option<String>,
    pub ai_summary: Option<String>,
    pub logo_url: Option<String>,
    pub extracted_fields: String,
    pub metadata_tags: String,
    pub segment: Option<String>,
    pub category: Option<String>,
    pub content_type: Option<String>,
    pub function_parent_id: Option<String>,
    pub function_hierarchy_code: Option<String>,
    pub organization_parent_id: Option<String>,
    pub organization_hierarchy_code: Option<String>,
    pub is_deleted: bool,
    pub phase2_completed: bool,
    pub date_added: DateTime<Utc>,
    pub date_modified: DateTime<Utc>,
}

impl NodeRow {
    pub(crate) fn into_node(self, key_concepts: Vec<String>) -> Node {
        Node {
            id: parse_id(&self.id),
            title: self.title,
            url: self.url,
            source_domain: self.source_domain,
            company: self.company,
            phrase_description: self.phrase_description,
            short_description: self.short_description,
            ai_summary: self.ai_summary,
            logo_url: self.logo_url,
            extracted_fields: serde_json::from_str(&self.extracted_fields)
                .unwrap_or(Value::Object(Default::default())),
            metadata_tags: serde_json::from_str(&self.metadata_tags).unwrap_or_default(),
            segment: self.segment,
            category: self.category,
            content_type: self.content_type,
            function_parent_id: self.function_parent_id.as_deref().and_then(NodeId::parse),
            function_hierarchy_code: self.function_hierarchy_code,
            organization_parent_id: self.organization_parent_id.as_deref().and_then(NodeId::parse),
            organization_hierarchy_code: self.organization_hierarchy_code,
            is_deleted: self.is_deleted,
            phase2_completed: self.phase2_completed,
            key_concepts,
            date_added: self.date_added,
            date_modified: self.date_modified,
        }
    }
}

fn parse_id(s: &str) -> NodeId {
    NodeId::parse(s).unwrap_or_else(|| {
        tracing::error!(id = s, "Malformed node id in database");
        NodeId::from_uuid(uuid::Uuid::nil())
    })
}

impl Store {
    /// Insert a node and its key concepts in a single transaction.
    /// Fails with `DuplicateUrl` if the URL exists among non-deleted nodes.
    pub async fn create_node(&self, input: &NodeInput) -> Result<Node, StoreError> {
        if self.get_node_by_url(&input.url).await?.is_some() {
            return Err(StoreError::DuplicateUrl(input.url.clone()));
        }

        let id = NodeId::new();
        let now = Utc::now();

        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        insert_node(&mut tx, id, input, now).await?;
        insert_key_concepts(&mut tx, id, &input.key_concepts).await?;

        tx.commit().await.map_err(|e| StoreError::Query(e.to_string()))?;

        // Any new node shows up somewhere in both trees.
        self.invalidate_all_trees();

        metrics::counter!("store.nodes.created").increment(1);
        self.get_node(id).await
    }

    /// Persist a full import in one transaction: node, key concepts,
    /// metadata junction rows (with registry resolution), and the
    /// hierarchy audit rows. Either everything lands or nothing does.
    pub async fn persist_import(
        &self,
        id: NodeId,
        input: &NodeInput,
        metadata: &[MetadataSpec],
        changes: &[HierarchyCodeChange],
    ) -> Result<Node, StoreError> {
        if self.get_node_by_url(&input.url).await?.is_some() {
            return Err(StoreError::DuplicateUrl(input.url.clone()));
        }

        let now = Utc::now();

        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        insert_node(&mut tx, id, input, now).await?;
        insert_key_concepts(&mut tx, id, &input.key_concepts).await?;
        super::metadata::replace_node_metadata(&mut tx, id, metadata).await?;
        for change in changes {
            let mut change = change.clone();
            change.node_id = Some(id);
            super::hierarchy_log::insert_change(&mut tx, &change).await?;
        }

        tx.commit().await.map_err(|e| StoreError::Query(e.to_string()))?;

        self.invalidate_all_trees();
        metrics::counter!("store.nodes.created").increment(1);
        self.get_node(id).await
    }

    /// Read a node with parsed JSON fields and key concepts attached.
    /// Soft-deleted nodes are invisible here.
    pub async fn get_node(&self, id: NodeId) -> Result<Node, StoreError> {
        let row = sqlx::query_as::<_, NodeRow>(&format!(
            "SELECT {} FROM nodes WHERE id = ? AND is_deleted = 0",
            NODE_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(self.pool())
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?
        .ok_or_else(|| StoreError::NotFound(format!("Node {}", id)))?;

        let concepts = self.key_concepts_for(id).await?;
        Ok(row.into_node(concepts))
    }

    /// Non-deleted node with the given URL, if any.
    pub async fn get_node_by_url(&self, url: &str) -> Result<Option<Node>, StoreError> {
        let row = sqlx::query_as::<_, NodeRow>(&format!(
            "SELECT {} FROM nodes WHERE url = ? AND is_deleted = 0",
            NODE_COLUMNS
        ))
        .bind(url)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let id = parse_id(&row.id);
                let concepts = self.key_concepts_for(id).await?;
                Ok(Some(row.into_node(concepts)))
            }
            None => Ok(None),
        }
    }

    /// All non-deleted nodes, newest first. `limit = None` returns the
    /// full list.
    pub async fn list_nodes(
        &self,
        limit: Option<u32>,
        offset: u32,
    ) -> Result<Vec<Node>, StoreError> {
        let sql = match limit {
            Some(_) => format!(
                "SELECT {} FROM nodes WHERE is_deleted = 0 \
                 ORDER BY date_added DESC LIMIT ? OFFSET ?",
                NODE_COLUMNS
            ),
            None => format!(
                "SELECT {} FROM nodes WHERE is_deleted = 0 ORDER BY date_added DESC",
                NODE_COLUMNS
            ),
        };

        let mut query = sqlx::query_as::<_, NodeRow>(&sql);
        if let Some(limit) = limit {
            query = query.bind(limit).bind(offset);
        }

        let rows = query
            .fetch_all(self.pool())
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        self.attach_key_concepts(rows).await
    }

    pub async fn count_nodes(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM nodes WHERE is_deleted = 0")
            .fetch_one(self.pool())
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(count)
    }

    /// Merge scalar and JSON fields from a patch into a node.
    pub async fn update_node(&self, id: NodeId, patch: &NodePatch) -> Result<Node, StoreError> {
        let current = self.get_node(id).await?;
        let now = Utc::now();

        let title = patch.title.clone().unwrap_or(current.title);
        let company = patch.company.clone().or(current.company);
        let phrase = patch
            .phrase_description
            .clone()
            .or(current.phrase_description);
        let short = patch
            .short_description
            .clone()
            .or(current.short_description);
        let summary = patch.ai_summary.clone().or(current.ai_summary);
        let logo = patch.logo_url.clone().or(current.logo_url);
        let extracted = match &patch.extracted_fields {
            Some(incoming) => merge_json_objects(&current.extracted_fields, incoming),
            None => current.extracted_fields.clone(),
        };
        let tags = patch
            .metadata_tags
            .clone()
            .unwrap_or(current.metadata_tags);
        let segment = patch.segment.clone().or(current.segment);
        let category = patch.category.clone().or(current.category);
        let content_type = patch.content_type.clone().or(current.content_type);
        let phase2 = patch.phase2_completed.unwrap_or(current.phase2_completed);

        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        sqlx::query(
            r#"
            UPDATE nodes SET
                title = ?, company = ?, phrase_description = ?,
                short_description = ?, ai_summary = ?, logo_url = ?,
                extracted_fields = ?, metadata_tags = ?,
                segment = ?, category = ?, content_type = ?,
                phase2_completed = ?, date_modified = ?
            WHERE id = ?
            "#,
        )
        .bind(&title)
        .bind(&company)
        .bind(&phrase)
        .bind(&short)
        .bind(&summary)
        .bind(&logo)
        .bind(extracted.to_string())
        .bind(serde_json::to_string(&tags).unwrap_or_else(|_| "[]".into()))
        .bind(&segment)
        .bind(&category)
        .bind(&content_type)
        .bind(phase2)
        .bind(now)
        .bind(id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        if let Some(concepts) = &patch.key_concepts {
            sqlx::query("DELETE FROM key_concepts WHERE node_id = ?")
                .bind(id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;
            insert_key_concepts(&mut tx, id, concepts).await?;
        }

        tx.commit().await.map_err(|e| StoreError::Query(e.to_string()))?;

        // Cached trees hold node snapshots; edits make them stale.
        self.invalidate_all_trees();

        metrics::counter!("store.nodes.updated").increment(1);
        self.get_node(id).await
    }

    /// Soft-delete: the node disappears from every read path.
    pub async fn delete_node(&self, id: NodeId) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE nodes SET is_deleted = 1, date_modified = ? WHERE id = ? AND is_deleted = 0",
        )
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(self.pool())
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("Node {}", id)));
        }

        self.invalidate_all_trees();
        metrics::counter!("store.nodes.deleted").increment(1);
        Ok(())
    }

    /// Merge `secondary` into `primary` in one transaction: copy non-null
    /// fields the primary lacks, optionally absorb metadata and append
    /// the summary, re-parent children, then soft-delete the secondary.
    pub async fn merge_nodes(
        &self,
        primary_id: NodeId,
        secondary_id: NodeId,
        opts: MergeOptions,
    ) -> Result<Node, StoreError> {
        if primary_id == secondary_id {
            return Err(StoreError::Conflict("Cannot merge a node into itself".into()));
        }

        let primary = self.get_node(primary_id).await?;
        let secondary = self.get_node(secondary_id).await?;
        let now = Utc::now();

        let company = primary.company.clone().or(secondary.company.clone());
        let phrase = primary
            .phrase_description
            .clone()
            .or(secondary.phrase_description.clone());
        let short = primary
            .short_description
            .clone()
            .or(secondary.short_description.clone());
        let logo = primary.logo_url.clone().or(secondary.logo_url.clone());
        let summary = if opts.append_summary {
            match (&primary.ai_summary, &secondary.ai_summary) {
                (Some(p), Some(s)) => Some(format!("{}\n\n{}", p, s)),
                (Some(p), None) => Some(p.clone()),
                (None, s) => s.clone(),
            }
        } else {
            primary.ai_summary.clone().or(secondary.ai_summary.clone())
        };
        let extracted = merge_json_objects(&secondary.extracted_fields, &primary.extracted_fields);
        let mut tags = primary.metadata_tags.clone();
        for tag in &secondary.metadata_tags {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }

        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        sqlx::query(
            r#"
            UPDATE nodes SET
                company = ?, phrase_description = ?, short_description = ?,
                ai_summary = ?, logo_url = ?, extracted_fields = ?,
                metadata_tags = ?, date_modified = ?
            WHERE id = ?
            "#,
        )
        .bind(&company)
        .bind(&phrase)
        .bind(&short)
        .bind(&summary)
        .bind(&logo)
        .bind(extracted.to_string())
        .bind(serde_json::to_string(&tags).unwrap_or_else(|_| "[]".into()))
        .bind(now)
        .bind(primary_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        // Absorb the secondary's key concepts, keeping primary ordering.
        let offset = primary.key_concepts.len() as i64;
        for (i, concept) in secondary.key_concepts.iter().enumerate() {
            sqlx::query(
                "INSERT OR IGNORE INTO key_concepts (node_id, concept, position) VALUES (?, ?, ?)",
            )
            .bind(primary_id.to_string())
            .bind(concept)
            .bind(offset + i as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        }

        if !opts.keep_metadata {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO node_metadata (node_id, registry_id, confidence, source)
                SELECT ?, registry_id, confidence, source
                FROM node_metadata WHERE node_id = ?
                "#,
            )
            .bind(primary_id.to_string())
            .bind(secondary_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        }

        // Re-parent the secondary's children in both hierarchies.
        for column in ["function_parent_id", "organization_parent_id"] {
            sqlx::query(&format!(
                "UPDATE nodes SET {col} = ?, date_modified = ? WHERE {col} = ?",
                col = column
            ))
            .bind(primary_id.to_string())
            .bind(now)
            .bind(secondary_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        }

        sqlx::query("UPDATE nodes SET is_deleted = 1, date_modified = ? WHERE id = ?")
            .bind(now)
            .bind(secondary_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut change = HierarchyCodeChange::new(
            ChangeType::Updated,
            HierarchyView::Function,
            ChangeTrigger::Merge,
        );
        change.node_id = Some(primary_id);
        change.related_node_ids = vec![secondary_id];
        change.old_code = secondary.function_hierarchy_code.clone();
        change.new_code = primary.function_hierarchy_code.clone();
        super::hierarchy_log::insert_change(&mut tx, &change).await?;

        tx.commit().await.map_err(|e| StoreError::Query(e.to_string()))?;

        self.invalidate_all_trees();
        metrics::counter!("store.nodes.merged").increment(1);
        self.get_node(primary_id).await
    }

    pub(crate) async fn key_concepts_for(&self, id: NodeId) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT concept FROM key_concepts WHERE node_id = ? ORDER BY position",
        )
        .bind(id.to_string())
        .fetch_all(self.pool())
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(rows.into_iter().map(|(c,)| c).collect())
    }

    /// Convert rows to nodes, attaching key concepts one query per page.
    pub(crate) async fn attach_key_concepts(
        &self,
        rows: Vec<NodeRow>,
    ) -> Result<Vec<Node>, StoreError> {
        let mut nodes = Vec::with_capacity(rows.len());
        for row in rows {
            let id = parse_id(&row.id);
            let concepts = self.key_concepts_for(id).await?;
            nodes.push(row.into_node(concepts));
        }
        Ok(nodes)
    }
}

async fn insert_node(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    id: NodeId,
    input: &NodeInput,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    let extracted = input
        .extracted_fields
        .clone()
        .unwrap_or(Value::Object(Default::default()));

    sqlx::query(
        r#"
        INSERT INTO nodes (
            id, title, url, source_domain, company,
            phrase_description, short_description, ai_summary, logo_url,
            extracted_fields, metadata_tags, segment, category, content_type,
            function_parent_id, function_hierarchy_code,
            organization_parent_id, organization_hierarchy_code,
            is_deleted, phase2_completed, date_added, date_modified
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 0, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(&input.title)
    .bind(&input.url)
    .bind(&input.source_domain)
    .bind(&input.company)
    .bind(&input.phrase_description)
    .bind(&input.short_description)
    .bind(&input.ai_summary)
    .bind(&input.logo_url)
    .bind(extracted.to_string())
    .bind(serde_json::to_string(&input.metadata_tags).unwrap_or_else(|_| "[]".into()))
    .bind(&input.segment)
    .bind(&input.category)
    .bind(&input.content_type)
    .bind(input.function_parent_id.map(|p| p.to_string()))
    .bind(&input.function_hierarchy_code)
    .bind(input.organization_parent_id.map(|p| p.to_string()))
    .bind(&input.organization_hierarchy_code)
    .bind(now)
    .bind(now)
    .execute(&mut **tx)
    .await
    .map_err(|e| StoreError::Query(e.to_string()))?;

    Ok(())
}

async fn insert_key_concepts(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    id: NodeId,
    concepts: &[String],
) -> Result<(), StoreError> {
    for (i, concept) in concepts.iter().enumerate() {
        sqlx::query(
            "INSERT OR IGNORE INTO key_concepts (node_id, concept, position) VALUES (?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(concept)
        .bind(i as i64)
        .execute(&mut **tx)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;
    }
    Ok(())
}

/// Shallow object merge: `overlay` keys win over `base` keys.
fn merge_json_objects(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            let mut merged = base.clone();
            for (k, v) in overlay {
                merged.insert(k.clone(), v.clone());
            }
            Value::Object(merged)
        }
        (_, overlay) if !overlay.is_null() => overlay.clone(),
        (base, _) => base.clone(),
    }
}
