//! End-to-end import pipeline tests: in-memory store, mock LLM through
//! the `LlmCaller` seam, and keyless extractors (which fall back without
//! touching the network).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use decant_common::config::{ExtractionConfig, LlmConfig, SimilarityConfig};
use decant_common::types::{ExtractOptions, ExtractionMethod, ImportRequest};
use decant_common::DecantError;

use decant_server::circuit_breaker::CircuitBreakerRegistry;
use decant_server::classify::Classifier;
use decant_server::extract::ExtractorFactory;
use decant_server::import::{ImportCache, ImportPipeline};
use decant_server::llm::{ChatMessage, ChatOptions, Completion, LlmCaller, StructuredCompletion, TokenUsage};
use decant_server::similarity::SimilarityEngine;
use decant_server::store::Store;

/// Canned classifier: every URL is an Anthropic LLM video.
struct MockLlm;

impl LlmCaller for MockLlm {
    fn complete<'a>(
        &'a self,
        _messages: &'a [ChatMessage],
        _opts: ChatOptions,
    ) -> Pin<Box<dyn Future<Output = Result<Completion, DecantError>> + Send + 'a>> {
        Box::pin(async {
            Ok(Completion {
                content: "ok".into(),
                model: "mock".into(),
                usage: TokenUsage::default(),
            })
        })
    }

    fn complete_with_schema<'a>(
        &'a self,
        _messages: &'a [ChatMessage],
        _schema: &'a Value,
        _opts: ChatOptions,
    ) -> Pin<Box<dyn Future<Output = Result<StructuredCompletion, DecantError>> + Send + 'a>>
    {
        Box::pin(async {
            let value = json!({
                "segment": "A",
                "category": "LLM",
                "contentType": "V",
                "organization": "Anthropic",
                "confidence": 0.9,
                "keyConcepts": ["agents", "claude"],
                "summary": "A video about LLM agents."
            });
            Ok(StructuredCompletion {
                raw: value.to_string(),
                value,
                usage: TokenUsage::default(),
            })
        })
    }
}

/// A classifier that always errors, to exercise the fallback path.
struct FailingLlm;

impl LlmCaller for FailingLlm {
    fn complete<'a>(
        &'a self,
        _messages: &'a [ChatMessage],
        _opts: ChatOptions,
    ) -> Pin<Box<dyn Future<Output = Result<Completion, DecantError>> + Send + 'a>> {
        Box::pin(async { Err(DecantError::LlmEmptyResponse) })
    }

    fn complete_with_schema<'a>(
        &'a self,
        _messages: &'a [ChatMessage],
        _schema: &'a Value,
        _opts: ChatOptions,
    ) -> Pin<Box<dyn Future<Output = Result<StructuredCompletion, DecantError>> + Send + 'a>>
    {
        Box::pin(async { Err(DecantError::LlmEmptyResponse) })
    }
}

async fn setup(llm: Option<Arc<dyn LlmCaller>>) -> (Arc<Store>, ImportPipeline) {
    let store = Arc::new(Store::connect_memory().await.unwrap());
    store.migrate().await.unwrap();
    store.ensure_taxonomy_seeded().await.unwrap();

    let breakers = Arc::new(CircuitBreakerRegistry::new());
    let factory = Arc::new(ExtractorFactory::new(
        reqwest::Client::new(),
        breakers,
        ExtractionConfig::default(),
    ));
    let similarity = Arc::new(SimilarityEngine::new(
        Arc::clone(&store),
        SimilarityConfig::default(),
    ));

    let pipeline = ImportPipeline::new(
        Arc::clone(&store),
        factory,
        Classifier::new(llm, LlmConfig::default()),
        Arc::new(ImportCache::new(Duration::from_secs(300))),
        similarity,
        None,
        ExtractOptions::default(),
    );

    (store, pipeline)
}

fn request(url: &str) -> ImportRequest {
    ImportRequest {
        url: Some(url.into()),
        force_refresh: false,
        priority: None,
    }
}

// -----------------------------------------------------------------------
// 1. Idempotent import
// -----------------------------------------------------------------------

#[tokio::test]
async fn test_second_import_within_ttl_is_cached() {
    let (_, pipeline) = setup(Some(Arc::new(MockLlm))).await;
    let url = "https://youtu.be/dQw4w9WgXcQ";

    let first = pipeline.import(&request(url)).await.unwrap();
    assert!(!first.cached);

    let second = pipeline.import(&request(url)).await.unwrap();
    assert!(second.cached);
    assert_eq!(second.node_id, first.node_id);
    assert_eq!(second.classification.segment, first.classification.segment);
}

#[tokio::test]
async fn test_duplicate_check_survives_cache_invalidation() {
    let (_, pipeline) = setup(Some(Arc::new(MockLlm))).await;
    let url = "https://youtu.be/dQw4w9WgXcQ";

    let first = pipeline.import(&request(url)).await.unwrap();
    pipeline.cache().clear();

    // Cache is cold, but the URL already has a node: still a hit.
    let second = pipeline.import(&request(url)).await.unwrap();
    assert!(second.cached);
    assert_eq!(second.node_id, first.node_id);
}

// -----------------------------------------------------------------------
// 2. Validation and SSRF
// -----------------------------------------------------------------------

#[tokio::test]
async fn test_missing_and_empty_url() {
    let (_, pipeline) = setup(None).await;

    let err = pipeline
        .import(&ImportRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "URL_REQUIRED");

    let err = pipeline.import(&request("   ")).await.unwrap_err();
    assert_eq!(err.code(), "URL_EMPTY");

    let err = pipeline.import(&request("nonsense")).await.unwrap_err();
    assert_eq!(err.code(), "URL_INVALID");

    let err = pipeline
        .import(&request("ftp://example.com/x"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "URL_INVALID_PROTOCOL");
}

#[tokio::test]
async fn test_ssrf_refusal() {
    let (_, pipeline) = setup(None).await;

    let err = pipeline
        .import(&request("http://169.254.169.254/latest/"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SSRF_BLOCKED");
    assert_eq!(err.http_status(), 403);
    assert!(!err.recoverable());

    for blocked in [
        "http://localhost:8080/admin",
        "http://10.0.0.8/internal",
        "http://[fc00::1]/x",
        "http://metadata.google.internal/computeMetadata/v1/",
    ] {
        let err = pipeline.import(&request(blocked)).await.unwrap_err();
        assert_eq!(err.code(), "SSRF_BLOCKED", "{}", blocked);
    }
}

// -----------------------------------------------------------------------
// 3. Keyless extraction falls back, classification still runs
// -----------------------------------------------------------------------

#[tokio::test]
async fn test_youtube_fallback_extraction() {
    let (store, pipeline) = setup(Some(Arc::new(MockLlm))).await;

    let outcome = pipeline
        .import(&request("https://youtu.be/dQw4w9WgXcQ"))
        .await
        .unwrap();

    assert_eq!(
        outcome.metadata.extraction_method,
        ExtractionMethod::Fallback
    );
    assert!(outcome.metadata.confidence <= 0.3);

    // Classification came from the (mock) LLM despite the fallback.
    assert_eq!(outcome.classification.segment, "A");
    assert_eq!(outcome.classification.organization.as_deref(), Some("Anthropic"));

    // Persisted node carries the classification and hierarchy codes.
    let node = store.get_node(outcome.node_id).await.unwrap();
    assert_eq!(node.segment.as_deref(), Some("A"));
    assert!(outcome.hierarchy_codes.function.starts_with("A.LLM.V."));
    assert!(outcome
        .hierarchy_codes
        .organization
        .starts_with("PERSONAL.anthropic"));

    // Metadata junction rows: ORG + DOM + PLT + concepts, source ai.
    let metadata = store.get_node_metadata(outcome.node_id).await.unwrap();
    let tags: Vec<String> = metadata
        .iter()
        .map(|m| format!("{}:{}", m.code_type.as_str(), m.code))
        .collect();
    assert!(tags.contains(&"ORG:ANTHROPIC".to_string()));
    assert!(tags.contains(&"DOM:LLM".to_string()));
    assert!(tags.contains(&"PLT:YOUTUBE".to_string()));
    assert!(metadata
        .iter()
        .all(|m| m.source == decant_common::types::MetadataSource::Ai));
}

#[tokio::test]
async fn test_llm_failure_uses_uncategorized_fallback() {
    let (_, pipeline) = setup(Some(Arc::new(FailingLlm))).await;

    let outcome = pipeline
        .import(&request("https://youtu.be/dQw4w9WgXcQ"))
        .await
        .unwrap();

    assert_eq!(outcome.classification.segment, "U");
    assert_eq!(outcome.classification.category, "INBOX");
    assert!((outcome.classification.confidence - 0.3).abs() < f64::EPSILON);
    assert!(outcome.hierarchy_codes.function.starts_with("U.INBOX.O."));
}

// -----------------------------------------------------------------------
// 4. Differentiator behavior across sibling imports
// -----------------------------------------------------------------------

#[tokio::test]
async fn test_sibling_differentiators_are_distinct() {
    let (_, pipeline) = setup(Some(Arc::new(MockLlm))).await;

    let first = pipeline
        .import(&request("https://youtu.be/dQw4w9WgXcQ"))
        .await
        .unwrap();
    let second = pipeline
        .import(&request("https://youtu.be/abcdefgh123"))
        .await
        .unwrap();

    // Same classification prefix, distinct full codes.
    assert!(first.hierarchy_codes.function.starts_with("A.LLM.V."));
    assert!(second.hierarchy_codes.function.starts_with("A.LLM.V."));
    assert_ne!(
        first.hierarchy_codes.function,
        second.hierarchy_codes.function
    );
}

// -----------------------------------------------------------------------
// 5. Similarity seeded inline
// -----------------------------------------------------------------------

#[tokio::test]
async fn test_import_seeds_similarity() {
    let (store, pipeline) = setup(Some(Arc::new(MockLlm))).await;

    let first = pipeline
        .import(&request("https://youtu.be/dQw4w9WgXcQ"))
        .await
        .unwrap();
    let second = pipeline
        .import(&request("https://youtu.be/abcdefgh123"))
        .await
        .unwrap();

    // Identical mock metadata sets score 1.0.
    let similar = store.get_similar(second.node_id, 10).await.unwrap();
    assert_eq!(similar.len(), 1);
    assert_eq!(similar[0].node_id, first.node_id);
    assert!((similar[0].score - 1.0).abs() < 1e-9);
}

// -----------------------------------------------------------------------
// 6. forceRefresh
// -----------------------------------------------------------------------

#[tokio::test]
async fn test_force_refresh_reimports_existing_node() {
    let (store, pipeline) = setup(Some(Arc::new(MockLlm))).await;
    let url = "https://youtu.be/dQw4w9WgXcQ";

    let first = pipeline.import(&request(url)).await.unwrap();

    let refreshed = pipeline
        .import(&ImportRequest {
            url: Some(url.into()),
            force_refresh: true,
            priority: None,
        })
        .await
        .unwrap();

    assert!(!refreshed.cached);
    assert_eq!(refreshed.node_id, first.node_id);

    let node = store.get_node(first.node_id).await.unwrap();
    assert_eq!(node.company.as_deref(), Some("Anthropic"));
}

// -----------------------------------------------------------------------
// 7. Check endpoint support
// -----------------------------------------------------------------------

#[tokio::test]
async fn test_check_reports_existence_and_cache() {
    let (_, pipeline) = setup(Some(Arc::new(MockLlm))).await;
    let url = "https://youtu.be/dQw4w9WgXcQ";

    let before = pipeline.check(Some(url)).await.unwrap();
    assert!(!before.exists);
    assert!(!before.cached);

    let outcome = pipeline.import(&request(url)).await.unwrap();

    let after = pipeline.check(Some(url)).await.unwrap();
    assert!(after.exists);
    assert!(after.cached);
    assert_eq!(after.node_id, Some(outcome.node_id));
    assert!(after.classification.is_some());
}

// -----------------------------------------------------------------------
// 8. Batch extraction fan-out
// -----------------------------------------------------------------------

#[tokio::test]
async fn test_extract_batch_covers_every_url() {
    let factory = Arc::new(ExtractorFactory::new(
        reqwest::Client::new(),
        Arc::new(CircuitBreakerRegistry::new()),
        ExtractionConfig::default(),
    ));

    let urls = vec![
        "https://youtu.be/dQw4w9WgXcQ".to_string(),
        "https://youtu.be/abcdefgh123".to_string(),
        "https://x.com/user/status/1234567890".to_string(),
    ];

    let results = factory
        .extract_batch(&urls, &ExtractOptions::default())
        .await;

    assert_eq!(results.len(), 3);
    for url in &urls {
        let extraction = results[url].as_ref().unwrap();
        assert_eq!(
            extraction.metadata.extraction_method,
            ExtractionMethod::Fallback
        );
    }
}
