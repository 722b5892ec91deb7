use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Content type an extractor is registered for. Registration order in the
/// factory encodes dispatch priority.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Youtube,
    Github,
    Twitter,
    Article,
    Podcast,
    Paper,
    Tweet,
    Image,
    Tool,
    Website,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Youtube => "youtube",
            Self::Github => "github",
            Self::Twitter => "twitter",
            Self::Article => "article",
            Self::Podcast => "podcast",
            Self::Paper => "paper",
            Self::Tweet => "tweet",
            Self::Image => "image",
            Self::Tool => "tool",
            Self::Website => "website",
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an extraction was produced, from richest to poorest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// Native API plus LLM post-enhancement.
    ApiPremium,
    /// Native API only.
    ApiStandard,
    /// HTML scraping.
    Scraping,
    /// Minimal metadata derived from the URL alone.
    Fallback,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApiPremium => "api_premium",
            Self::ApiStandard => "api_standard",
            Self::Scraping => "scraping",
            Self::Fallback => "fallback",
        }
    }
}

/// Provenance block attached to every extraction.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionMetadata {
    pub extraction_method: ExtractionMethod,
    #[serde(default)]
    pub api_used: Option<String>,
    /// Confidence in the extracted data, in [0, 1].
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    /// Additive cost estimate in USD.
    pub cost: f64,
    pub processing_time_ms: u64,
}

impl ExtractionMetadata {
    pub fn new(method: ExtractionMethod, confidence: f64) -> Self {
        Self {
            extraction_method: method,
            api_used: None,
            confidence,
            timestamp: Utc::now(),
            cost: 0.0,
            processing_time_ms: 0,
        }
    }
}

/// A successful extraction: a content-type-specific data map plus
/// provenance. Failures travel as `DecantError` and are converted to a
/// fallback extraction when recoverable.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extraction {
    pub content_kind: ContentKind,
    pub data: Map<String, Value>,
    pub metadata: ExtractionMetadata,
}

impl Extraction {
    /// Minimal fallback payload so classification can still run.
    pub fn fallback(kind: ContentKind, url: &str, title: Option<String>) -> Self {
        let mut data = Map::new();
        data.insert("url".into(), Value::String(url.to_string()));
        if let Some(title) = title {
            data.insert("title".into(), Value::String(title));
        }
        Self {
            content_kind: kind,
            data,
            metadata: ExtractionMetadata::new(ExtractionMethod::Fallback, 0.3),
        }
    }

    /// Best available title from the data map.
    pub fn title(&self) -> Option<&str> {
        for key in ["title", "name", "full_name"] {
            if let Some(Value::String(s)) = self.data.get(key) {
                if !s.is_empty() {
                    return Some(s);
                }
            }
        }
        None
    }

    /// Longest textual body available for classification/enhancement.
    pub fn body_text(&self) -> Option<&str> {
        for key in ["content", "readme", "description", "text", "transcript"] {
            if let Some(Value::String(s)) = self.data.get(key) {
                if !s.is_empty() {
                    return Some(s);
                }
            }
        }
        None
    }
}

/// Per-call options threaded from the orchestrator into extractors.
#[derive(Clone, Debug, Default)]
pub struct ExtractOptions {
    pub youtube_api_key: Option<String>,
    pub github_token: Option<String>,
    pub twitter_bearer_token: Option<String>,
    pub timeout: Option<std::time::Duration>,
}
