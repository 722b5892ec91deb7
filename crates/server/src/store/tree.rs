use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use decant_common::types::{
    ancestor_codes, parent_code, ChangeTrigger, ChangeType, HierarchyCodeChange, HierarchyView,
    Node,
};
use decant_common::NodeId;

use super::nodes::{NodeRow, NODE_COLUMNS};
use super::{Store, StoreError};

/// One node with its attached children in a hierarchy tree.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub node: Node,
    #[serde(default)]
    pub children: Vec<TreeNode>,
}

/// A full tree for one view.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeResponse {
    pub view: HierarchyView,
    pub roots: Vec<TreeNode>,
}

#[derive(Clone)]
pub(crate) struct CachedTree {
    pub roots: Vec<TreeNode>,
}

impl Store {
    /// Full tree for a view. Coded nodes assemble in O(n) from a single
    /// code-sorted scan; nodes without a code fall back to the legacy
    /// parent-id walk. Results are cached until a hierarchy mutation.
    pub async fn get_tree(&self, view: HierarchyView) -> Result<TreeResponse, StoreError> {
        if let Some(cached) = self.tree_cache.lock().unwrap().get(&view) {
            metrics::counter!("store.tree_cache.hits", "view" => view.as_str()).increment(1);
            return Ok(TreeResponse {
                view,
                roots: cached.roots.clone(),
            });
        }
        metrics::counter!("store.tree_cache.misses", "view" => view.as_str()).increment(1);

        let start = std::time::Instant::now();
        let code_column = code_column(view);

        // Code-sorted scan: parents sort before children, so one pass
        // suffices.
        let sql = format!(
            "SELECT {} FROM nodes WHERE is_deleted = 0 ORDER BY \
             CASE WHEN {col} IS NULL THEN 1 ELSE 0 END, {col} ASC",
            NODE_COLUMNS,
            col = code_column
        );
        let rows = sqlx::query_as::<_, NodeRow>(&sql)
            .fetch_all(self.pool())
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let nodes = self.attach_key_concepts(rows).await?;

        let roots = assemble_tree(nodes, view);

        metrics::histogram!("store.tree.build_latency", "view" => view.as_str())
            .record(start.elapsed().as_secs_f64());

        self.tree_cache
            .lock()
            .unwrap()
            .insert(view, CachedTree { roots: roots.clone() });

        Ok(TreeResponse { view, roots })
    }

    /// Subtree rooted at the node whose code equals `path`, assembled
    /// from a prefix query.
    pub async fn get_subtree(
        &self,
        view: HierarchyView,
        path: &str,
    ) -> Result<TreeNode, StoreError> {
        let code_column = code_column(view);
        let sql = format!(
            "SELECT {} FROM nodes WHERE is_deleted = 0 \
             AND ({col} = ? OR {col} LIKE ? || '.%') ORDER BY {col} ASC",
            NODE_COLUMNS,
            col = code_column
        );
        let rows = sqlx::query_as::<_, NodeRow>(&sql)
            .bind(path)
            .bind(path)
            .fetch_all(self.pool())
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let nodes = self.attach_key_concepts(rows).await?;

        let roots = assemble_tree(nodes, view);
        roots
            .into_iter()
            .find(|t| hierarchy_code(&t.node, view).as_deref() == Some(path))
            .ok_or_else(|| StoreError::NotFound(format!("Subtree at {}", path)))
    }

    /// Single node by hierarchy code.
    pub async fn get_node_by_code(
        &self,
        view: HierarchyView,
        code: &str,
    ) -> Result<Node, StoreError> {
        let sql = format!(
            "SELECT {} FROM nodes WHERE is_deleted = 0 AND {} = ?",
            NODE_COLUMNS,
            code_column(view)
        );
        let row = sqlx::query_as::<_, NodeRow>(&sql)
            .bind(code)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?
            .ok_or_else(|| StoreError::NotFound(format!("Node at code {}", code)))?;

        let id = NodeId::parse(&row.id);
        let concepts = match id {
            Some(id) => self.key_concepts_for(id).await?,
            None => Vec::new(),
        };
        Ok(row.into_node(concepts))
    }

    /// Ancestor chain of a node, root first, the node itself last.
    /// Ancestor codes with no backing node are skipped (taxonomy roots).
    pub async fn get_ancestry_path(
        &self,
        view: HierarchyView,
        node_id: NodeId,
    ) -> Result<Vec<Node>, StoreError> {
        let node = self.get_node(node_id).await?;
        let Some(code) = hierarchy_code(&node, view) else {
            return Ok(vec![node]);
        };

        let ancestors = ancestor_codes(&code);
        if ancestors.is_empty() {
            return Ok(vec![node]);
        }

        // One batched fetch for every ancestor code.
        let placeholders = vec!["?"; ancestors.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM nodes WHERE is_deleted = 0 AND {} IN ({})",
            NODE_COLUMNS,
            code_column(view),
            placeholders
        );
        let mut query = sqlx::query_as::<_, NodeRow>(&sql);
        for code in &ancestors {
            query = query.bind(code);
        }
        let rows = query
            .fetch_all(self.pool())
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let fetched = self.attach_key_concepts(rows).await?;

        let mut by_code: HashMap<String, Node> = fetched
            .into_iter()
            .filter_map(|n| hierarchy_code(&n, view).map(|c| (c, n)))
            .collect();

        let mut path = Vec::new();
        for code in ancestors.iter().rev() {
            if let Some(ancestor) = by_code.remove(code) {
                path.push(ancestor);
            }
        }
        path.push(node);
        Ok(path)
    }

    /// Codes of direct children under a prefix (one more segment, no
    /// deeper), used to pick a distinguishing differentiator.
    pub async fn sibling_codes(
        &self,
        view: HierarchyView,
        prefix: &str,
    ) -> Result<Vec<String>, StoreError> {
        let sql = format!(
            "SELECT {col} FROM nodes WHERE is_deleted = 0 AND {col} LIKE ? || '.%'",
            col = code_column(view)
        );
        let rows: Vec<(String,)> = sqlx::query_as(&sql)
            .bind(prefix)
            .fetch_all(self.pool())
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(rows
            .into_iter()
            .filter_map(|(code,)| {
                let tail = code.strip_prefix(prefix)?.strip_prefix('.')?;
                if tail.contains('.') {
                    None
                } else {
                    Some(code)
                }
            })
            .collect())
    }

    /// Re-home a node in one hierarchy: update parent + code, record the
    /// audit row, and drop the affected tree cache — one transaction.
    pub async fn update_hierarchy_placement(
        &self,
        node_id: NodeId,
        view: HierarchyView,
        new_parent: Option<NodeId>,
        new_code: &str,
        trigger: ChangeTrigger,
    ) -> Result<Node, StoreError> {
        let node = self.get_node(node_id).await?;
        let old_code = hierarchy_code(&node, view);

        let (parent_column, code_col) = match view {
            HierarchyView::Function => ("function_parent_id", "function_hierarchy_code"),
            HierarchyView::Organization => ("organization_parent_id", "organization_hierarchy_code"),
        };

        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        sqlx::query(&format!(
            "UPDATE nodes SET {} = ?, {} = ?, date_modified = ? WHERE id = ?",
            parent_column, code_col
        ))
        .bind(new_parent.map(|p| p.to_string()))
        .bind(new_code)
        .bind(chrono::Utc::now())
        .bind(node_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut change = HierarchyCodeChange::new(ChangeType::Moved, view, trigger);
        change.node_id = Some(node_id);
        change.old_code = old_code;
        change.new_code = Some(new_code.to_string());
        super::hierarchy_log::insert_change(&mut tx, &change).await?;

        tx.commit().await.map_err(|e| StoreError::Query(e.to_string()))?;

        self.invalidate_tree(view);
        self.get_node(node_id).await
    }
}

fn code_column(view: HierarchyView) -> &'static str {
    match view {
        HierarchyView::Function => "function_hierarchy_code",
        HierarchyView::Organization => "organization_hierarchy_code",
    }
}

pub(crate) fn hierarchy_code(node: &Node, view: HierarchyView) -> Option<String> {
    match view {
        HierarchyView::Function => node.function_hierarchy_code.clone(),
        HierarchyView::Organization => node.organization_hierarchy_code.clone(),
    }
}

/// Single-pass assembly. Input is sorted by code ASC (coded nodes first),
/// so a coded node's parent — when it exists — has already been placed.
/// Uncoded nodes attach by parent id.
fn assemble_tree(nodes: Vec<Node>, view: HierarchyView) -> Vec<TreeNode> {
    let mut children_of: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    let mut id_by_code: HashMap<String, NodeId> = HashMap::new();
    let mut store: HashMap<NodeId, Node> = HashMap::new();
    let mut order: Vec<NodeId> = Vec::new();
    let mut roots: Vec<NodeId> = Vec::new();

    for node in nodes {
        let id = node.id;
        if let Some(code) = hierarchy_code(&node, view) {
            id_by_code.insert(code, id);
        }
        order.push(id);
        store.insert(id, node);
    }

    for &id in &order {
        let node = &store[&id];
        let attached = if let Some(code) = hierarchy_code(node, view) {
            parent_code(&code)
                .and_then(|p| id_by_code.get(p))
                .copied()
                .filter(|parent| *parent != id)
        } else {
            // Legacy walk: parent id, when the parent was loaded.
            let parent = match view {
                HierarchyView::Function => node.function_parent_id,
                HierarchyView::Organization => node.organization_parent_id,
            };
            parent.filter(|p| store.contains_key(p) && *p != id)
        };

        match attached {
            Some(parent) => children_of.entry(parent).or_default().push(id),
            None => roots.push(id),
        }
    }

    fn materialize(
        id: NodeId,
        store: &HashMap<NodeId, Node>,
        children_of: &HashMap<NodeId, Vec<NodeId>>,
    ) -> TreeNode {
        let children = children_of
            .get(&id)
            .map(|ids| {
                ids.iter()
                    .map(|&child| materialize(child, store, children_of))
                    .collect()
            })
            .unwrap_or_default();
        TreeNode {
            node: store[&id].clone(),
            children,
        }
    }

    roots
        .into_iter()
        .map(|id| materialize(id, &store, &children_of))
        .collect()
}
