use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::NodeId;

/// Default scoring method tag stored on similarity edges.
pub const SIMILARITY_METHOD_JACCARD_WEIGHTED: &str = "jaccard_weighted";

/// Undirected similarity edge between two nodes.
///
/// The pair key is always normalized so `node_a < node_b` in the
/// lexicographic UUID-string order; self-edges are rejected at the store
/// boundary.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityEdge {
    pub node_a_id: NodeId,
    pub node_b_id: NodeId,
    pub score: f64,
    pub method: String,
    pub computed_at: DateTime<Utc>,
}

impl SimilarityEdge {
    pub fn new(a: NodeId, b: NodeId, score: f64) -> Self {
        let (node_a_id, node_b_id) = normalize_node_pair(a, b);
        Self {
            node_a_id,
            node_b_id,
            score,
            method: SIMILARITY_METHOD_JACCARD_WEIGHTED.to_string(),
            computed_at: Utc::now(),
        }
    }
}

/// Normalize an unordered node pair into the canonical `(min, max)` key.
pub fn normalize_node_pair(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Aggregate statistics from a batch similarity computation.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityBatchStats {
    /// Pairs whose score was computed.
    pub computed: u64,
    /// Pairs stored (score at or above threshold).
    pub stored: u64,
    /// Pairs skipped (no metadata or empty intersection).
    pub skipped: u64,
    pub errors: u64,
    pub duration_ms: u64,
}

/// A neighbor of a node in the similarity graph.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarNode {
    pub node_id: NodeId,
    pub score: f64,
}

/// A candidate similar to several input nodes at once.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonSimilarNode {
    pub node_id: NodeId,
    pub total_score: f64,
    pub match_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_is_commutative() {
        let a = NodeId::new();
        let b = NodeId::new();
        assert_eq!(normalize_node_pair(a, b), normalize_node_pair(b, a));
    }

    #[test]
    fn test_normalize_orders_lexicographically() {
        let a = NodeId::new();
        let b = NodeId::new();
        let (lo, hi) = normalize_node_pair(a, b);
        assert!(lo.to_string() <= hi.to_string());
    }

    #[test]
    fn test_edge_constructor_normalizes() {
        let a = NodeId::new();
        let b = NodeId::new();
        let edge = SimilarityEdge::new(b, a, 0.5);
        assert!(edge.node_a_id.to_string() < edge.node_b_id.to_string());
        assert_eq!(edge.method, SIMILARITY_METHOD_JACCARD_WEIGHTED);
    }
}
