mod article;
mod github;
mod twitter;
mod youtube;

pub use article::extract_html_content;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::task::JoinSet;

use decant_common::config::ExtractionConfig;
use decant_common::types::{ContentKind, ExtractOptions, Extraction, ExtractionMethod};
use decant_common::{types::domain_of, DecantError};

use crate::circuit_breaker::{BreakerConfig, CircuitBreakerRegistry};
use crate::llm::{ChatMessage, ChatOptions, LlmCaller};
use crate::retry::{with_retry, RetryPolicy};

/// Per-USD estimate added when the LLM enhancement pass runs.
const ENHANCEMENT_COST_USD: f64 = 0.002;

/// One content-type extractor. `extract` performs a single raw attempt —
/// the factory supplies retry and breaker protection around it.
pub trait Extractor: Send + Sync {
    fn content_kind(&self) -> ContentKind;

    fn requires_api_key(&self) -> bool;

    /// Whether this extractor claims the URL.
    fn can_handle(&self, url: &str) -> bool;

    fn extract<'a>(
        &'a self,
        http: &'a reqwest::Client,
        url: &'a str,
        opts: &'a ExtractOptions,
    ) -> Pin<Box<dyn Future<Output = Result<Extraction, DecantError>> + Send + 'a>>;
}

/// Registry of extractors keyed by content type, with URL-shape dispatch.
/// Registration order encodes priority; the article extractor is the
/// universal fallback.
pub struct ExtractorFactory {
    http: reqwest::Client,
    extractors: Vec<Arc<dyn Extractor>>,
    breakers: Arc<CircuitBreakerRegistry>,
    llm: Option<Arc<dyn LlmCaller>>,
    config: ExtractionConfig,
}

impl ExtractorFactory {
    pub fn new(
        http: reqwest::Client,
        breakers: Arc<CircuitBreakerRegistry>,
        config: ExtractionConfig,
    ) -> Self {
        let extractors: Vec<Arc<dyn Extractor>> = vec![
            Arc::new(youtube::YoutubeExtractor),
            Arc::new(github::GithubExtractor),
            Arc::new(twitter::TwitterExtractor),
            Arc::new(article::ArticleExtractor),
        ];

        Self {
            http,
            extractors,
            breakers,
            llm: None,
            config,
        }
    }

    /// Attach an LLM for the post-enhancement pass.
    pub fn with_llm(mut self, llm: Option<Arc<dyn LlmCaller>>) -> Self {
        self.llm = llm;
        self
    }

    /// Host-based content-type detection; everything unrecognized is an
    /// article.
    pub fn detect_content_type(&self, url: &str) -> ContentKind {
        let host = domain_of(url).to_ascii_lowercase();
        if host.contains("youtube.com") || host.contains("youtu.be") {
            ContentKind::Youtube
        } else if host == "github.com" || host.ends_with(".github.com") {
            ContentKind::Github
        } else if host.contains("twitter.com") || host == "x.com" || host == "www.x.com" {
            ContentKind::Twitter
        } else {
            ContentKind::Article
        }
    }

    /// The extractor for the detected tag when it claims the URL, else
    /// the article extractor.
    pub fn get_extractor(&self, url: &str) -> Arc<dyn Extractor> {
        let kind = self.detect_content_type(url);
        self.extractors
            .iter()
            .find(|e| e.content_kind() == kind && e.can_handle(url))
            .or_else(|| {
                self.extractors
                    .iter()
                    .find(|e| e.content_kind() == ContentKind::Article)
            })
            .cloned()
            .expect("article extractor is always registered")
    }

    /// Extract one URL: raw extractor call under its service breaker,
    /// the whole thing under retry, then optional LLM enhancement.
    pub async fn extract(
        &self,
        url: &str,
        opts: &ExtractOptions,
    ) -> Result<Extraction, DecantError> {
        let start = std::time::Instant::now();
        let extractor = self.get_extractor(url);
        let kind = extractor.content_kind();
        let breaker = self
            .breakers
            .get_or_create_with(kind.as_str(), BreakerConfig::standard);

        let result = with_retry(&RetryPolicy::standard(), kind.as_str(), || {
            breaker.call(|| extractor.extract(&self.http, url, opts))
        })
        .await;

        let mut extraction = match result {
            Ok(extraction) => extraction,
            Err(e) => {
                metrics::counter!(
                    "extract.failures",
                    "kind" => kind.as_str(),
                    "code" => e.code()
                )
                .increment(1);
                return Err(e);
            }
        };

        extraction.metadata.processing_time_ms = start.elapsed().as_millis() as u64;

        self.maybe_enhance(url, &mut extraction).await;

        metrics::counter!("extract.successes", "kind" => kind.as_str()).increment(1);
        metrics::histogram!("extract.latency", "kind" => kind.as_str())
            .record(start.elapsed().as_secs_f64());

        Ok(extraction)
    }

    /// Fan out over URLs with bounded parallelism. Per-URL failures land
    /// in the result map; they never abort the batch.
    pub async fn extract_batch(
        self: &Arc<Self>,
        urls: &[String],
        opts: &ExtractOptions,
    ) -> HashMap<String, Result<Extraction, DecantError>> {
        let mut results = HashMap::with_capacity(urls.len());
        let concurrency = self.config.batch_concurrency.max(1);

        for chunk in urls.chunks(concurrency) {
            let mut join_set = JoinSet::new();
            for url in chunk {
                let factory = Arc::clone(self);
                let url = url.clone();
                let opts = opts.clone();
                join_set.spawn(async move {
                    let result = factory.extract(&url, &opts).await;
                    (url, result)
                });
            }

            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((url, result)) => {
                        results.insert(url, result);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Batch extraction task panicked");
                    }
                }
            }
        }

        results
    }

    /// LLM post-enhancement: summary, taxonomy, key concepts, optional
    /// mermaid diagram. Any failure is swallowed and the base extraction
    /// stands.
    async fn maybe_enhance(&self, url: &str, extraction: &mut Extraction) {
        let Some(llm) = &self.llm else {
            return;
        };
        let Some(body) = extraction.body_text() else {
            return;
        };
        if body.len() <= self.config.enhancement_min_chars {
            return;
        }

        let body: String = body.chars().take(6_000).collect();
        let title = extraction.title().unwrap_or(url).to_string();

        let schema = json!({
            "type": "object",
            "required": ["summary", "taxonomy", "keyConcepts"],
            "properties": {
                "summary": {"type": "string", "minLength": 1},
                "taxonomy": {"type": "array", "items": {"type": "string"}},
                "keyConcepts": {"type": "array", "maxItems": 8, "items": {"type": "string"}},
                "mermaidDiagram": {"type": "string"}
            }
        });

        let messages = [
            ChatMessage::system(
                "You enrich bookmarked web content. Reply with JSON only: a concise \
                 summary, a taxonomy path (general to specific), up to 8 key concepts, \
                 and optionally a mermaid diagram when the content describes a system.",
            ),
            ChatMessage::user(format!(
                "Title: {}\nURL: {}\n\nContent:\n{}",
                title, url, body
            )),
        ];

        match llm
            .complete_with_schema(&messages, &schema, ChatOptions::default())
            .await
        {
            Ok(structured) => {
                if let Value::Object(fields) = structured.value {
                    for key in ["summary", "taxonomy", "keyConcepts", "mermaidDiagram"] {
                        if let Some(v) = fields.get(key) {
                            extraction.data.insert(key.to_string(), v.clone());
                        }
                    }
                }
                extraction.metadata.extraction_method = ExtractionMethod::ApiPremium;
                extraction.metadata.cost += ENHANCEMENT_COST_USD;
                metrics::counter!("extract.enhancements").increment(1);
            }
            Err(e) => {
                tracing::debug!(error = %e, url, "LLM enhancement failed — keeping base extraction");
                metrics::counter!("extract.enhancement_failures").increment(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory() -> ExtractorFactory {
        ExtractorFactory::new(
            reqwest::Client::new(),
            Arc::new(CircuitBreakerRegistry::new()),
            ExtractionConfig::default(),
        )
    }

    #[test]
    fn test_detect_content_type() {
        let f = factory();
        assert_eq!(
            f.detect_content_type("https://www.youtube.com/watch?v=abc"),
            ContentKind::Youtube
        );
        assert_eq!(
            f.detect_content_type("https://youtu.be/abc"),
            ContentKind::Youtube
        );
        assert_eq!(
            f.detect_content_type("https://github.com/rust-lang/rust"),
            ContentKind::Github
        );
        assert_eq!(
            f.detect_content_type("https://x.com/user/status/1"),
            ContentKind::Twitter
        );
        assert_eq!(
            f.detect_content_type("https://example.com/post"),
            ContentKind::Article
        );
    }

    #[test]
    fn test_unclaimed_url_falls_back_to_article() {
        let f = factory();
        // github.com root page has no owner/repo path, so the github
        // extractor declines it.
        let extractor = f.get_extractor("https://github.com/");
        assert_eq!(extractor.content_kind(), ContentKind::Article);
    }

    #[test]
    fn test_claimed_url_gets_tagged_extractor() {
        let f = factory();
        let extractor = f.get_extractor("https://github.com/rust-lang/rust");
        assert_eq!(extractor.content_kind(), ContentKind::Github);
    }
}
