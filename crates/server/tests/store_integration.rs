//! Integration tests for the SQLite store: CRUD, search, tree
//! traversal, metadata junction, and hierarchy audit. All tests run on
//! an in-memory database.

use decant_common::types::{
    HierarchyView, MergeOptions, MetadataSource, MetadataSpec, MetadataType, NodeInput, NodePatch,
    Pagination, SearchFilters,
};
use decant_common::NodeId;
use decant_server::store::Store;

async fn setup() -> Store {
    let store = Store::connect_memory().await.expect("open memory db");
    store.migrate().await.expect("migrate");
    store.ensure_taxonomy_seeded().await.expect("seed taxonomy");
    store
}

fn node_input(title: &str, url: &str) -> NodeInput {
    NodeInput::new(title, url)
}

fn coded_input(title: &str, url: &str, seg: &str, cat: &str, ct: &str, code: &str) -> NodeInput {
    let mut input = NodeInput::new(title, url);
    input.segment = Some(seg.into());
    input.category = Some(cat.into());
    input.content_type = Some(ct.into());
    input.function_hierarchy_code = Some(code.into());
    input
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

// -----------------------------------------------------------------------
// 1. Node CRUD
// -----------------------------------------------------------------------

#[tokio::test]
async fn test_create_read_round_trip() {
    let store = setup().await;

    let mut input = node_input("Rust Book", "https://doc.rust-lang.org/book/");
    input.metadata_tags = vec!["DOM:RUST".into(), "CON:OWNERSHIP".into()];
    input.key_concepts = vec!["ownership".into(), "borrowing".into(), "lifetimes".into()];
    input.extracted_fields = Some(serde_json::json!({"language": "Rust"}));

    let created = store.create_node(&input).await.unwrap();
    let fetched = store.get_node(created.id).await.unwrap();

    assert_eq!(fetched.title, "Rust Book");
    assert_eq!(fetched.url, "https://doc.rust-lang.org/book/");
    assert_eq!(fetched.source_domain, "doc.rust-lang.org");
    // Insertion order of tags and concepts is preserved.
    assert_eq!(fetched.metadata_tags, vec!["DOM:RUST", "CON:OWNERSHIP"]);
    assert_eq!(
        fetched.key_concepts,
        vec!["ownership", "borrowing", "lifetimes"]
    );
    assert_eq!(fetched.extracted_fields["language"], "Rust");
    assert!(!fetched.is_deleted);
    assert!(!fetched.phase2_completed);
}

#[tokio::test]
async fn test_duplicate_url_rejected() {
    let store = setup().await;
    store
        .create_node(&node_input("First", "https://example.com/a"))
        .await
        .unwrap();

    let err = store
        .create_node(&node_input("Second", "https://example.com/a"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Duplicate URL"));
}

#[tokio::test]
async fn test_soft_delete_hides_and_frees_url() {
    let store = setup().await;
    let node = store
        .create_node(&node_input("Gone", "https://example.com/gone"))
        .await
        .unwrap();

    store.delete_node(node.id).await.unwrap();

    assert!(store.get_node(node.id).await.is_err());
    assert!(store
        .get_node_by_url("https://example.com/gone")
        .await
        .unwrap()
        .is_none());
    assert!(store.list_nodes(None, 0).await.unwrap().is_empty());

    // The URL is reusable once its holder is soft-deleted.
    store
        .create_node(&node_input("Again", "https://example.com/gone"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_update_merges_fields() {
    let store = setup().await;
    let node = store
        .create_node(&node_input("Old Title", "https://example.com/u"))
        .await
        .unwrap();

    let patch = NodePatch {
        title: Some("New Title".into()),
        ai_summary: Some("A summary.".into()),
        key_concepts: Some(vec!["one".into(), "two".into()]),
        phase2_completed: Some(true),
        ..NodePatch::default()
    };
    let updated = store.update_node(node.id, &patch).await.unwrap();

    assert_eq!(updated.title, "New Title");
    assert_eq!(updated.ai_summary.as_deref(), Some("A summary."));
    assert_eq!(updated.key_concepts, vec!["one", "two"]);
    assert!(updated.phase2_completed);
    assert!(updated.date_modified >= node.date_modified);
}

// -----------------------------------------------------------------------
// 2. Merge
// -----------------------------------------------------------------------

#[tokio::test]
async fn test_merge_absorbs_and_reparents() {
    let store = setup().await;

    let mut primary_input = node_input("Primary", "https://example.com/p");
    primary_input.ai_summary = Some("Primary summary.".into());
    let primary = store.create_node(&primary_input).await.unwrap();

    let mut secondary_input = node_input("Secondary", "https://example.com/s");
    secondary_input.company = Some("Acme".into());
    secondary_input.ai_summary = Some("Secondary summary.".into());
    secondary_input.key_concepts = vec!["extra".into()];
    let secondary = store.create_node(&secondary_input).await.unwrap();

    store
        .set_node_metadata(secondary.id, &[spec(MetadataType::Dom, "AI_ML")])
        .await
        .unwrap();

    let mut child_input = node_input("Child", "https://example.com/c");
    child_input.function_parent_id = Some(secondary.id);
    let child = store.create_node(&child_input).await.unwrap();

    let merged = store
        .merge_nodes(
            primary.id,
            secondary.id,
            MergeOptions {
                keep_metadata: false,
                append_summary: true,
            },
        )
        .await
        .unwrap();

    // Non-null fields copied, summary appended, concepts absorbed.
    assert_eq!(merged.company.as_deref(), Some("Acme"));
    assert_eq!(
        merged.ai_summary.as_deref(),
        Some("Primary summary.\n\nSecondary summary.")
    );
    assert!(merged.key_concepts.contains(&"extra".to_string()));

    // Secondary metadata absorbed.
    let metadata = store.get_node_metadata(primary.id).await.unwrap();
    assert_eq!(metadata.len(), 1);
    assert_eq!(metadata[0].code, "AI_ML");

    // Secondary soft-deleted, child re-parented.
    assert!(store.get_node(secondary.id).await.is_err());
    let child = store.get_node(child.id).await.unwrap();
    assert_eq!(child.function_parent_id, Some(primary.id));

    // Merge recorded in the audit log.
    let changes = store.hierarchy_changes_for(primary.id, 10).await.unwrap();
    assert!(!changes.is_empty());
}

// -----------------------------------------------------------------------
// 3. Metadata junction
// -----------------------------------------------------------------------

#[tokio::test]
async fn test_set_node_metadata_replaces_exactly() {
    let store = setup().await;
    let node = store
        .create_node(&node_input("Tagged", "https://example.com/t"))
        .await
        .unwrap();

    store
        .set_node_metadata(
            node.id,
            &[spec(MetadataType::Dom, "AI_ML"), spec(MetadataType::Tec, "PYTHON")],
        )
        .await
        .unwrap();

    let replacement = [spec(MetadataType::Org, "OPENAI"), spec(MetadataType::Lic, "MIT")];
    let entries = store.set_node_metadata(node.id, &replacement).await.unwrap();

    // The stored set equals the replacement: no leftovers, no dupes.
    let mut codes: Vec<(String, String)> = entries
        .iter()
        .map(|e| (e.code_type.as_str().to_string(), e.code.clone()))
        .collect();
    codes.sort();
    assert_eq!(
        codes,
        vec![
            ("LIC".to_string(), "MIT".to_string()),
            ("ORG".to_string(), "OPENAI".to_string())
        ]
    );
}

#[tokio::test]
async fn test_set_node_metadata_is_idempotent() {
    let store = setup().await;
    let node = store
        .create_node(&node_input("Tagged", "https://example.com/t2"))
        .await
        .unwrap();

    let specs = [spec(MetadataType::Dom, "AI_ML"), spec(MetadataType::Con, "AGENTS")];
    let first = store.set_node_metadata(node.id, &specs).await.unwrap();
    let second = store.set_node_metadata(node.id, &specs).await.unwrap();

    assert_eq!(first.len(), second.len());
    let ids_first: Vec<_> = first.iter().map(|e| e.registry_id).collect();
    let ids_second: Vec<_> = second.iter().map(|e| e.registry_id).collect();
    assert_eq!(ids_first, ids_second);
}

// -----------------------------------------------------------------------
// 4. Search
// -----------------------------------------------------------------------

async fn seed_search_nodes(store: &Store) {
    let mut a = coded_input(
        "Machine learning with transformers",
        "https://example.com/ml1",
        "A",
        "LLM",
        "T",
        "A.LLM.T.one",
    );
    a.short_description = Some("Deep learning guide for transformer models.".into());
    store.create_node(&a).await.unwrap();

    let mut b = coded_input(
        "Reinforcement learning basics",
        "https://example.com/ml2",
        "A",
        "LLM",
        "T",
        "A.LLM.T.two",
    );
    b.short_description = Some("Learning agents from reward signals.".into());
    b.company = Some("DeepMind".into());
    store.create_node(&b).await.unwrap();

    let mut c = coded_input(
        "Learning web development",
        "https://example.com/web",
        "E",
        "WEB",
        "T",
        "E.WEB.T.three",
    );
    c.short_description = Some("A learning path for the modern web.".into());
    store.create_node(&c).await.unwrap();
}

#[tokio::test]
async fn test_simple_search_like() {
    let store = setup().await;
    seed_search_nodes(&store).await;

    let hits = store.search_nodes("transformers", 20, 0).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].title.contains("transformers"));
}

#[tokio::test]
async fn test_filtered_search_with_facets() {
    let store = setup().await;
    seed_search_nodes(&store).await;

    let filters = SearchFilters {
        segments: vec!["A".into()],
        ..Default::default()
    };
    let response = store
        .search_nodes_advanced(
            "learning",
            &filters,
            Pagination::default(),
            &decant_common::config::SearchConfig::default(),
        )
        .await
        .unwrap();

    // Two of the three "learning" nodes sit in segment A.
    assert_eq!(response.total, 2);
    assert_eq!(response.results.len(), 2);
    assert_eq!(response.facets.segments.get("A"), Some(&2));
    assert!(response.facets.segments.get("E").is_none());

    // Snippets carry highlight markers; matched fields name the columns.
    let hit = &response.results[0];
    assert!(!hit.matched_fields.is_empty());
}

#[tokio::test]
async fn test_filter_only_search_counts_everything() {
    let store = setup().await;
    seed_search_nodes(&store).await;

    let response = store
        .search_nodes_advanced(
            "",
            &SearchFilters::default(),
            Pagination { page: 1, limit: 2 },
            &decant_common::config::SearchConfig::default(),
        )
        .await
        .unwrap();

    assert_eq!(response.total, 3);
    assert_eq!(response.results.len(), 2);
}

#[tokio::test]
async fn test_organization_filter_and_facet() {
    let store = setup().await;
    seed_search_nodes(&store).await;

    let filters = SearchFilters {
        organizations: vec!["deepmind".into()],
        ..Default::default()
    };
    let response = store
        .search_nodes_advanced(
            "learning",
            &filters,
            Pagination::default(),
            &decant_common::config::SearchConfig::default(),
        )
        .await
        .unwrap();

    assert_eq!(response.total, 1);
    assert_eq!(response.facets.organizations.get("DeepMind"), Some(&1));
}

// -----------------------------------------------------------------------
// 5. Tree traversal
// -----------------------------------------------------------------------

#[tokio::test]
async fn test_tree_builds_four_level_chain_from_codes() {
    let store = setup().await;

    store
        .create_node(&coded_input("Root", "https://e.com/1", "A", "", "", "A"))
        .await
        .unwrap();
    store
        .create_node(&coded_input("LLM", "https://e.com/2", "A", "LLM", "", "A.LLM"))
        .await
        .unwrap();
    store
        .create_node(&coded_input("Tools", "https://e.com/3", "A", "LLM", "T", "A.LLM.T"))
        .await
        .unwrap();
    store
        .create_node(&coded_input(
            "Claude",
            "https://e.com/4",
            "A",
            "LLM",
            "T",
            "A.LLM.T.anthropic_claude",
        ))
        .await
        .unwrap();

    let tree = store.get_tree(HierarchyView::Function).await.unwrap();

    assert_eq!(tree.roots.len(), 1);
    let level1 = &tree.roots[0];
    assert_eq!(
        level1.node.function_hierarchy_code.as_deref(),
        Some("A")
    );
    let level2 = &level1.children[0];
    assert_eq!(level2.node.function_hierarchy_code.as_deref(), Some("A.LLM"));
    let level3 = &level2.children[0];
    assert_eq!(
        level3.node.function_hierarchy_code.as_deref(),
        Some("A.LLM.T")
    );
    let level4 = &level3.children[0];
    assert_eq!(
        level4.node.function_hierarchy_code.as_deref(),
        Some("A.LLM.T.anthropic_claude")
    );
    assert!(level4.children.is_empty());
}

#[tokio::test]
async fn test_subtree_by_prefix() {
    let store = setup().await;

    store
        .create_node(&coded_input("LLM", "https://e.com/2", "A", "LLM", "", "A.LLM"))
        .await
        .unwrap();
    store
        .create_node(&coded_input("Tools", "https://e.com/3", "A", "LLM", "T", "A.LLM.T"))
        .await
        .unwrap();
    store
        .create_node(&coded_input("Other", "https://e.com/5", "E", "WEB", "T", "E.WEB.T"))
        .await
        .unwrap();

    let subtree = store
        .get_subtree(HierarchyView::Function, "A.LLM")
        .await
        .unwrap();
    assert_eq!(
        subtree.node.function_hierarchy_code.as_deref(),
        Some("A.LLM")
    );
    assert_eq!(subtree.children.len(), 1);
}

#[tokio::test]
async fn test_legacy_parent_id_fallback() {
    let store = setup().await;

    let parent = store
        .create_node(&node_input("Uncoded parent", "https://e.com/p"))
        .await
        .unwrap();
    let mut child_input = node_input("Uncoded child", "https://e.com/c");
    child_input.function_parent_id = Some(parent.id);
    store.create_node(&child_input).await.unwrap();

    let tree = store.get_tree(HierarchyView::Function).await.unwrap();
    assert_eq!(tree.roots.len(), 1);
    assert_eq!(tree.roots[0].node.id, parent.id);
    assert_eq!(tree.roots[0].children.len(), 1);
}

#[tokio::test]
async fn test_ancestry_path() {
    let store = setup().await;

    store
        .create_node(&coded_input("Root", "https://e.com/1", "A", "", "", "A"))
        .await
        .unwrap();
    store
        .create_node(&coded_input("Mid", "https://e.com/2", "A", "LLM", "", "A.LLM"))
        .await
        .unwrap();
    let leaf = store
        .create_node(&coded_input("Leaf", "https://e.com/3", "A", "LLM", "T", "A.LLM.T"))
        .await
        .unwrap();

    let path = store
        .get_ancestry_path(HierarchyView::Function, leaf.id)
        .await
        .unwrap();

    let codes: Vec<_> = path
        .iter()
        .map(|n| n.function_hierarchy_code.clone().unwrap())
        .collect();
    assert_eq!(codes, vec!["A", "A.LLM", "A.LLM.T"]);
}

#[tokio::test]
async fn test_tree_cache_invalidated_on_move() {
    let store = setup().await;

    store
        .create_node(&coded_input("Root", "https://e.com/1", "A", "", "", "A"))
        .await
        .unwrap();
    let node = store
        .create_node(&coded_input("Leaf", "https://e.com/2", "A", "LLM", "T", "A.LLM.T.x"))
        .await
        .unwrap();

    // Prime the cache.
    let before = store.get_tree(HierarchyView::Function).await.unwrap();
    assert_eq!(before.roots.len(), 2);

    store
        .update_hierarchy_placement(
            node.id,
            HierarchyView::Function,
            None,
            "A.x",
            decant_common::types::ChangeTrigger::UserMove,
        )
        .await
        .unwrap();

    let after = store.get_tree(HierarchyView::Function).await.unwrap();
    assert_eq!(after.roots.len(), 1);
    assert_eq!(after.roots[0].children.len(), 1);

    // The move landed in the audit log with the old and new codes.
    let changes = store.hierarchy_changes_for(node.id, 10).await.unwrap();
    assert_eq!(changes[0].old_code.as_deref(), Some("A.LLM.T.x"));
    assert_eq!(changes[0].new_code.as_deref(), Some("A.x"));
}

#[tokio::test]
async fn test_sibling_codes_direct_children_only() {
    let store = setup().await;

    store
        .create_node(&coded_input("One", "https://e.com/1", "A", "LLM", "T", "A.LLM.T.one"))
        .await
        .unwrap();
    store
        .create_node(&coded_input(
            "Deep",
            "https://e.com/2",
            "A",
            "LLM",
            "T",
            "A.LLM.T.one.deep",
        ))
        .await
        .unwrap();

    let siblings = store
        .sibling_codes(HierarchyView::Function, "A.LLM.T")
        .await
        .unwrap();
    assert_eq!(siblings, vec!["A.LLM.T.one".to_string()]);
}

// -----------------------------------------------------------------------
// 6. Taxonomy seeding
// -----------------------------------------------------------------------

#[tokio::test]
async fn test_taxonomy_seeded_once() {
    let store = setup().await;

    let first = store.list_segments().await.unwrap();
    let second = store.list_segments().await.unwrap();
    assert_eq!(first.len(), second.len());
    assert!(first.iter().any(|s| s.code == "U"));

    let orgs = store.list_organizations().await.unwrap();
    assert!(orgs.iter().any(|o| o.code == "PERSONAL"));

    assert!(store
        .is_taxonomy_root(HierarchyView::Function, "A")
        .await
        .unwrap());
    assert!(!store
        .is_taxonomy_root(HierarchyView::Function, "ZZ")
        .await
        .unwrap());
}

// -----------------------------------------------------------------------
// 7. List pagination
// -----------------------------------------------------------------------

#[tokio::test]
async fn test_list_nodes_full_and_paged() {
    let store = setup().await;
    for i in 0..5 {
        store
            .create_node(&node_input(&format!("N{}", i), &format!("https://e.com/{}", i)))
            .await
            .unwrap();
    }

    assert_eq!(store.list_nodes(None, 0).await.unwrap().len(), 5);
    assert_eq!(store.list_nodes(Some(2), 0).await.unwrap().len(), 2);
    assert_eq!(store.list_nodes(Some(2), 4).await.unwrap().len(), 1);
    assert_eq!(store.count_nodes().await.unwrap(), 5);
}

// -----------------------------------------------------------------------
// 8. Hierarchy invariant: ancestors of a stored code resolve
// -----------------------------------------------------------------------

#[tokio::test]
async fn test_node_id_absent_after_wrong_parse() {
    let store = setup().await;
    let missing = NodeId::new();
    assert!(store.get_node(missing).await.is_err());
}
