use std::collections::HashMap;

use decant_common::types::{normalize_node_pair, CommonSimilarNode, SimilarNode, SimilarityEdge};
use decant_common::NodeId;

use super::{Store, StoreError};

impl Store {
    /// Store a batch of edges, normalizing each pair key. Self-pairs are
    /// rejected outright; re-storing a pair replaces its score.
    pub async fn upsert_similarity_edges(
        &self,
        edges: &[SimilarityEdge],
    ) -> Result<(), StoreError> {
        if edges.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        for edge in edges {
            if edge.node_a_id == edge.node_b_id {
                return Err(StoreError::Conflict(format!(
                    "Self-similarity edge for node {}",
                    edge.node_a_id
                )));
            }
            let (a, b) = normalize_node_pair(edge.node_a_id, edge.node_b_id);

            sqlx::query(
                r#"
                INSERT OR REPLACE INTO node_similarity
                    (node_a_id, node_b_id, score, method, computed_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(a.to_string())
            .bind(b.to_string())
            .bind(edge.score.clamp(0.0, 1.0))
            .bind(&edge.method)
            .bind(edge.computed_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        }

        tx.commit().await.map_err(|e| StoreError::Query(e.to_string()))?;
        metrics::counter!("store.similarity.upserts").increment(edges.len() as u64);
        Ok(())
    }

    /// Remove every edge touching the node.
    pub async fn delete_similarity_for(&self, node_id: NodeId) -> Result<u64, StoreError> {
        let result =
            sqlx::query("DELETE FROM node_similarity WHERE node_a_id = ? OR node_b_id = ?")
                .bind(node_id.to_string())
                .bind(node_id.to_string())
                .execute(self.pool())
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(result.rows_affected())
    }

    /// Remove every edge touching any of the nodes, in one transaction.
    pub async fn delete_similarity_for_many(&self, node_ids: &[NodeId]) -> Result<(), StoreError> {
        if node_ids.is_empty() {
            return Ok(());
        }

        let placeholders = vec!["?"; node_ids.len()].join(", ");
        let sql = format!(
            "DELETE FROM node_similarity WHERE node_a_id IN ({p}) OR node_b_id IN ({p})",
            p = placeholders
        );

        let mut query = sqlx::query(&sql);
        for id in node_ids.iter().chain(node_ids.iter()) {
            query = query.bind(id.to_string());
        }

        query
            .execute(self.pool())
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    /// Neighbors of a node ordered by score, from either side of the
    /// normalized pair key.
    pub async fn get_similar(
        &self,
        node_id: NodeId,
        limit: u32,
    ) -> Result<Vec<SimilarNode>, StoreError> {
        let rows: Vec<(String, f64)> = sqlx::query_as(
            r#"
            SELECT other_id, score FROM (
                SELECT node_b_id AS other_id, score
                FROM node_similarity WHERE node_a_id = ?
                UNION ALL
                SELECT node_a_id AS other_id, score
                FROM node_similarity WHERE node_b_id = ?
            )
            ORDER BY score DESC
            LIMIT ?
            "#,
        )
        .bind(node_id.to_string())
        .bind(node_id.to_string())
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(rows
            .into_iter()
            .filter_map(|(id, score)| {
                Some(SimilarNode {
                    node_id: NodeId::parse(&id)?,
                    score,
                })
            })
            .collect())
    }

    /// Candidates similar to several inputs at once, aggregated by total
    /// score then match count, excluding the input set itself.
    pub async fn find_common_similar(
        &self,
        node_ids: &[NodeId],
        min_score: f64,
        limit: u32,
    ) -> Result<Vec<CommonSimilarNode>, StoreError> {
        if node_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut aggregate: HashMap<NodeId, (f64, u32)> = HashMap::new();
        for &id in node_ids {
            for similar in self.get_similar(id, u32::MAX).await? {
                if similar.score < min_score || node_ids.contains(&similar.node_id) {
                    continue;
                }
                let entry = aggregate.entry(similar.node_id).or_insert((0.0, 0));
                entry.0 += similar.score;
                entry.1 += 1;
            }
        }

        let mut candidates: Vec<CommonSimilarNode> = aggregate
            .into_iter()
            .map(|(node_id, (total_score, match_count))| CommonSimilarNode {
                node_id,
                total_score,
                match_count,
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.total_score
                .partial_cmp(&a.total_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.match_count.cmp(&a.match_count))
        });
        candidates.truncate(limit as usize);
        Ok(candidates)
    }

    pub async fn count_similarity_edges(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM node_similarity")
            .fetch_one(self.pool())
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(count)
    }
}
