//! Similarity engine integration: scoring over live metadata, pair-key
//! normalization, batch recomputation, and neighbor queries.

use std::sync::Arc;

use decant_common::config::SimilarityConfig;
use decant_common::types::{
    normalize_node_pair, MetadataSource, MetadataSpec, MetadataType, NodeInput, SimilarityEdge,
};
use decant_common::NodeId;
use decant_server::similarity::SimilarityEngine;
use decant_server::store::Store;

async fn setup() -> (Arc<Store>, SimilarityEngine) {
    let store = Arc::new(Store::connect_memory().await.unwrap());
    store.migrate().await.unwrap();
    store.ensure_taxonomy_seeded().await.unwrap();

    let engine = SimilarityEngine::new(Arc::clone(&store), SimilarityConfig::default());
    (store, engine)
}

fn spec(ty: MetadataType, code: &str) -> MetadataSpec {
    MetadataSpec {
        code_type: ty,
        code: code.into(),
        display_name: None,
        confidence: 0.9,
        source: MetadataSource::Ai,
    }
}

async fn node_with_metadata(store: &Store, url: &str, specs: &[MetadataSpec]) -> NodeId {
    let node = store
        .create_node(&NodeInput::new(url, url))
        .await
        .unwrap();
    store.set_node_metadata(node.id, specs).await.unwrap();
    node.id
}

// -----------------------------------------------------------------------
// 1. compute_for — identical sets score 1.0, stored normalized
// -----------------------------------------------------------------------

#[tokio::test]
async fn test_identical_metadata_scores_one_and_normalizes_pair() {
    let (store, engine) = setup().await;

    let shared = [
        spec(MetadataType::Dom, "AI_ML"),
        spec(MetadataType::Tec, "PYTHON"),
        spec(MetadataType::Org, "OPENAI"),
    ];
    let n1 = node_with_metadata(&store, "https://e.com/1", &shared).await;
    let n2 = node_with_metadata(&store, "https://e.com/2", &shared).await;

    let edges = engine.compute_for(n1).await.unwrap();
    assert_eq!(edges.len(), 1);
    assert!((edges[0].score - 1.0).abs() < 1e-9);

    // Stored pair key is (min, max) lexicographically.
    let (lo, hi) = normalize_node_pair(n1, n2);
    assert_eq!(edges[0].node_a_id, lo);
    assert_eq!(edges[0].node_b_id, hi);
    assert!(edges[0].node_a_id.to_string() < edges[0].node_b_id.to_string());
}

#[tokio::test]
async fn test_disjoint_metadata_stores_nothing() {
    let (store, engine) = setup().await;

    let n1 = node_with_metadata(&store, "https://e.com/1", &[spec(MetadataType::Dom, "AI_ML")])
        .await;
    let _n2 = node_with_metadata(&store, "https://e.com/2", &[spec(MetadataType::Dom, "WEB")])
        .await;

    let edges = engine.compute_for(n1).await.unwrap();
    assert!(edges.is_empty());
    assert_eq!(store.count_similarity_edges().await.unwrap(), 0);
}

#[tokio::test]
async fn test_nodes_without_metadata_are_skipped() {
    let (store, engine) = setup().await;

    let n1 = node_with_metadata(&store, "https://e.com/1", &[spec(MetadataType::Dom, "AI_ML")])
        .await;
    store
        .create_node(&NodeInput::new("bare", "https://e.com/bare"))
        .await
        .unwrap();

    let edges = engine.compute_for(n1).await.unwrap();
    assert!(edges.is_empty());
}

// -----------------------------------------------------------------------
// 2. Self-edge rejection at the store boundary
// -----------------------------------------------------------------------

#[tokio::test]
async fn test_self_edge_rejected() {
    let (store, _) = setup().await;
    let n1 = node_with_metadata(&store, "https://e.com/1", &[spec(MetadataType::Dom, "AI_ML")])
        .await;

    let err = store
        .upsert_similarity_edges(&[SimilarityEdge {
            node_a_id: n1,
            node_b_id: n1,
            score: 0.5,
            method: "jaccard_weighted".into(),
            computed_at: chrono::Utc::now(),
        }])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Self-similarity"));
}

// -----------------------------------------------------------------------
// 3. update_for_node refreshes edges after metadata change
// -----------------------------------------------------------------------

#[tokio::test]
async fn test_update_for_node_after_metadata_change() {
    let (store, engine) = setup().await;

    let shared = [spec(MetadataType::Org, "OPENAI")];
    let n1 = node_with_metadata(&store, "https://e.com/1", &shared).await;
    let n2 = node_with_metadata(&store, "https://e.com/2", &shared).await;

    engine.update_for_node(n1).await.unwrap();
    assert_eq!(store.get_similar(n1, 10).await.unwrap().len(), 1);

    // Retag n1 disjointly; edges disappear on the next update.
    store
        .set_node_metadata(n1, &[spec(MetadataType::Dom, "WEB")])
        .await
        .unwrap();
    engine.update_for_node(n1).await.unwrap();

    assert!(store.get_similar(n1, 10).await.unwrap().is_empty());
    assert!(store.get_similar(n2, 10).await.unwrap().is_empty());
}

// -----------------------------------------------------------------------
// 4. batch_compute and recompute_all
// -----------------------------------------------------------------------

#[tokio::test]
async fn test_batch_compute_stats() {
    let (store, engine) = setup().await;

    let ai = [
        spec(MetadataType::Dom, "AI_ML"),
        spec(MetadataType::Org, "OPENAI"),
    ];
    let web = [spec(MetadataType::Dom, "WEB")];

    let n1 = node_with_metadata(&store, "https://e.com/1", &ai).await;
    let n2 = node_with_metadata(&store, "https://e.com/2", &ai).await;
    let n3 = node_with_metadata(&store, "https://e.com/3", &web).await;

    let stats = engine.batch_compute(&[n1, n2, n3]).await.unwrap();

    // (n1,n2) scores 1.0; the two pairs against n3 share nothing.
    assert_eq!(stats.computed, 1);
    assert_eq!(stats.stored, 1);
    assert_eq!(stats.skipped, 2);
    assert_eq!(stats.errors, 0);
    assert_eq!(store.count_similarity_edges().await.unwrap(), 1);
}

#[tokio::test]
async fn test_recompute_all_clears_then_rebuilds() {
    let (store, engine) = setup().await;

    let shared = [spec(MetadataType::Org, "OPENAI")];
    let n1 = node_with_metadata(&store, "https://e.com/1", &shared).await;
    let n2 = node_with_metadata(&store, "https://e.com/2", &shared).await;

    // Plant a stale edge with a bogus score; recompute replaces it.
    store
        .upsert_similarity_edges(&[SimilarityEdge::new(n1, n2, 0.123)])
        .await
        .unwrap();

    let stats = engine.recompute_all().await.unwrap();
    assert_eq!(stats.stored, 1);

    let similar = store.get_similar(n1, 10).await.unwrap();
    assert_eq!(similar.len(), 1);
    assert!((similar[0].score - 1.0).abs() < 1e-9);
}

// -----------------------------------------------------------------------
// 5. Neighbor queries
// -----------------------------------------------------------------------

#[tokio::test]
async fn test_get_similar_orders_by_score() {
    let (store, engine) = setup().await;

    // n1 shares everything with n2, only DOM with n3.
    let full = [
        spec(MetadataType::Dom, "AI_ML"),
        spec(MetadataType::Org, "OPENAI"),
    ];
    let partial = [spec(MetadataType::Dom, "AI_ML")];

    let n1 = node_with_metadata(&store, "https://e.com/1", &full).await;
    let n2 = node_with_metadata(&store, "https://e.com/2", &full).await;
    let n3 = node_with_metadata(&store, "https://e.com/3", &partial).await;

    engine.compute_for(n1).await.unwrap();

    let similar = store.get_similar(n1, 10).await.unwrap();
    assert_eq!(similar.len(), 2);
    assert_eq!(similar[0].node_id, n2);
    assert!(similar[0].score > similar[1].score);
    assert_eq!(similar[1].node_id, n3);
}

#[tokio::test]
async fn test_find_common_similar_excludes_inputs() {
    let (store, engine) = setup().await;

    let shared = [spec(MetadataType::Org, "OPENAI")];
    let n1 = node_with_metadata(&store, "https://e.com/1", &shared).await;
    let n2 = node_with_metadata(&store, "https://e.com/2", &shared).await;
    let n3 = node_with_metadata(&store, "https://e.com/3", &shared).await;

    engine.batch_compute(&[n1, n2, n3]).await.unwrap();

    let common = store.find_common_similar(&[n1, n2], 0.1, 10).await.unwrap();
    assert_eq!(common.len(), 1);
    assert_eq!(common[0].node_id, n3);
    assert_eq!(common[0].match_count, 2);
    assert!((common[0].total_score - 2.0).abs() < 1e-9);
}

// -----------------------------------------------------------------------
// 6. Edge invariants after cascade delete
// -----------------------------------------------------------------------

#[tokio::test]
async fn test_delete_similarity_for_node() {
    let (store, engine) = setup().await;

    let shared = [spec(MetadataType::Org, "OPENAI")];
    let n1 = node_with_metadata(&store, "https://e.com/1", &shared).await;
    let _n2 = node_with_metadata(&store, "https://e.com/2", &shared).await;

    engine.compute_for(n1).await.unwrap();
    assert_eq!(store.count_similarity_edges().await.unwrap(), 1);

    let removed = store.delete_similarity_for(n1).await.unwrap();
    assert_eq!(removed, 1);
    assert_eq!(store.count_similarity_edges().await.unwrap(), 0);
}
