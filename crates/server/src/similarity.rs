//! Weighted-Jaccard similarity over typed metadata codes.
//!
//! score = Σ min(wA, wB) / Σ max(wA, wB) over the union of both nodes'
//! codes, where a code contributes its type weight on the side that has
//! it and 0 on the side that doesn't. Pairs with no metadata on either
//! side, or an empty intersection, yield no score at all.

use std::collections::HashSet;
use std::sync::Arc;

use decant_common::config::SimilarityConfig;
use decant_common::types::{MetadataCode, SimilarityBatchStats, SimilarityEdge};
use decant_common::{DecantError, NodeId};

use crate::store::Store;

pub struct SimilarityEngine {
    store: Arc<Store>,
    config: SimilarityConfig,
}

impl SimilarityEngine {
    pub fn new(store: Arc<Store>, config: SimilarityConfig) -> Self {
        Self { store, config }
    }

    /// Weighted Jaccard between two code sets, clamped into [0, 1].
    /// None when either side is empty or nothing is shared.
    pub fn score(a: &[MetadataCode], b: &[MetadataCode]) -> Option<f64> {
        if a.is_empty() || b.is_empty() {
            return None;
        }

        let set_a: HashSet<&MetadataCode> = a.iter().collect();
        let set_b: HashSet<&MetadataCode> = b.iter().collect();

        if set_a.is_disjoint(&set_b) {
            return None;
        }

        let mut min_sum = 0.0;
        let mut max_sum = 0.0;
        for code in set_a.union(&set_b) {
            let w_a = if set_a.contains(*code) { code.weight() } else { 0.0 };
            let w_b = if set_b.contains(*code) { code.weight() } else { 0.0 };
            min_sum += w_a.min(w_b);
            max_sum += w_a.max(w_b);
        }

        if max_sum <= 0.0 {
            return None;
        }
        Some((min_sum / max_sum).clamp(0.0, 1.0))
    }

    /// Compare one node to every other node carrying metadata, storing
    /// pairs at or above the threshold. Returns the stored edges.
    pub async fn compute_for(&self, node_id: NodeId) -> Result<Vec<SimilarityEdge>, DecantError> {
        let start = std::time::Instant::now();
        let own_codes = self.store.metadata_codes_for(node_id).await?;
        if own_codes.is_empty() {
            return Ok(Vec::new());
        }

        let candidates: Vec<NodeId> = self
            .store
            .nodes_with_metadata()
            .await?
            .into_iter()
            .filter(|&other| other != node_id)
            .collect();

        let mut edges = Vec::new();
        for chunk in candidates.chunks(self.config.batch_size.max(1)) {
            let code_map = self.store.metadata_codes_for_many(chunk).await?;
            for &other in chunk {
                let codes = code_map.get(&other).map(Vec::as_slice).unwrap_or_default();
                if let Some(score) = Self::score(&own_codes, codes) {
                    if score >= self.config.min_threshold {
                        edges.push(SimilarityEdge::new(node_id, other, score));
                    }
                }
            }
        }

        self.store.upsert_similarity_edges(&edges).await?;

        metrics::histogram!("similarity.compute_latency").record(start.elapsed().as_secs_f64());
        metrics::counter!("similarity.edges_stored").increment(edges.len() as u64);
        Ok(edges)
    }

    /// Drop a node's edges, then recompute them. Called after any
    /// metadata mutation, once the metadata is committed.
    pub async fn update_for_node(
        &self,
        node_id: NodeId,
    ) -> Result<Vec<SimilarityEdge>, DecantError> {
        self.store.delete_similarity_for(node_id).await?;
        self.compute_for(node_id).await
    }

    /// Compare every `a < b` pair within the input set, chunked for
    /// metadata fetches and edge writes. Per-pair scoring never aborts
    /// the batch.
    pub async fn batch_compute(
        &self,
        node_ids: &[NodeId],
    ) -> Result<SimilarityBatchStats, DecantError> {
        let start = std::time::Instant::now();
        let mut stats = SimilarityBatchStats::default();

        // Fetch metadata in batch_size chunks.
        let mut code_map = std::collections::HashMap::new();
        for chunk in node_ids.chunks(self.config.batch_size.max(1)) {
            match self.store.metadata_codes_for_many(chunk).await {
                Ok(partial) => code_map.extend(partial),
                Err(e) => {
                    tracing::error!(error = %e, "Metadata fetch failed during batch compute");
                    stats.errors += chunk.len() as u64;
                }
            }
        }

        let mut pending: Vec<SimilarityEdge> = Vec::new();
        for (i, &a) in node_ids.iter().enumerate() {
            for &b in &node_ids[i + 1..] {
                if a == b {
                    continue;
                }
                let codes_a = code_map.get(&a).map(Vec::as_slice).unwrap_or_default();
                let codes_b = code_map.get(&b).map(Vec::as_slice).unwrap_or_default();

                match Self::score(codes_a, codes_b) {
                    Some(score) => {
                        stats.computed += 1;
                        if score >= self.config.min_threshold {
                            pending.push(SimilarityEdge::new(a, b, score));
                            stats.stored += 1;
                        }
                    }
                    None => stats.skipped += 1,
                }

                if pending.len() >= self.config.batch_size.max(1) {
                    if let Err(e) = self.store.upsert_similarity_edges(&pending).await {
                        tracing::error!(error = %e, "Edge write failed during batch compute");
                        stats.errors += pending.len() as u64;
                        stats.stored -= pending.len() as u64;
                    }
                    pending.clear();
                }
            }
        }

        if !pending.is_empty() {
            if let Err(e) = self.store.upsert_similarity_edges(&pending).await {
                tracing::error!(error = %e, "Edge write failed during batch compute");
                stats.errors += pending.len() as u64;
                stats.stored -= pending.len() as u64;
            }
        }

        stats.duration_ms = start.elapsed().as_millis() as u64;
        metrics::counter!("similarity.batch_runs").increment(1);
        Ok(stats)
    }

    /// Operator action: clear and rebuild similarities for every node
    /// carrying metadata.
    pub async fn recompute_all(&self) -> Result<SimilarityBatchStats, DecantError> {
        let node_ids = self.store.nodes_with_metadata().await?;
        self.store.delete_similarity_for_many(&node_ids).await?;
        self.batch_compute(&node_ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use decant_common::types::MetadataType;

    fn code(ty: MetadataType, c: &str) -> MetadataCode {
        MetadataCode::new(ty, c)
    }

    #[test]
    fn test_identical_sets_score_one() {
        let codes = vec![
            code(MetadataType::Dom, "AI_ML"),
            code(MetadataType::Tec, "PYTHON"),
            code(MetadataType::Org, "OPENAI"),
        ];
        let score = SimilarityEngine::score(&codes, &codes).unwrap();
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_disjoint_sets_yield_none() {
        let a = vec![code(MetadataType::Dom, "AI_ML")];
        let b = vec![code(MetadataType::Dom, "WEB")];
        assert!(SimilarityEngine::score(&a, &b).is_none());
    }

    #[test]
    fn test_empty_side_yields_none() {
        let a = vec![code(MetadataType::Dom, "AI_ML")];
        assert!(SimilarityEngine::score(&a, &[]).is_none());
        assert!(SimilarityEngine::score(&[], &a).is_none());
    }

    #[test]
    fn test_weighted_example_from_shared_org() {
        // Shared ORG (2.0); each side its own LIC (0.5):
        // 2.0 / (2.0 + 0.5 + 0.5) = 0.667
        let a = vec![code(MetadataType::Org, "OPENAI"), code(MetadataType::Lic, "MIT")];
        let b = vec![
            code(MetadataType::Org, "OPENAI"),
            code(MetadataType::Lic, "APACHE_2"),
        ];
        let score = SimilarityEngine::score(&a, &b).unwrap();
        assert!((score - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_partial_overlap_weights() {
        // Shared DOM (1.5) + TEC (1.0); a-only ORG (2.0):
        // (1.5 + 1.0) / (1.5 + 1.0 + 2.0) = 2.5 / 4.5
        let a = vec![
            code(MetadataType::Dom, "AI_ML"),
            code(MetadataType::Tec, "PYTHON"),
            code(MetadataType::Org, "OPENAI"),
        ];
        let b = vec![
            code(MetadataType::Dom, "AI_ML"),
            code(MetadataType::Tec, "PYTHON"),
        ];
        let score = SimilarityEngine::score(&a, &b).unwrap();
        assert!((score - 2.5 / 4.5).abs() < 1e-9);
    }
}
