use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Process configuration resolved from environment variables.
///
/// Secrets and deployment knobs come from the environment; tuning
/// parameters live in the optional `decant.toml` system file
/// ([`SystemConfig`]). Everything has a default so the server boots with
/// no file and no keys.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub env: RuntimeEnv,
    pub log_level: String,
    pub database_path: PathBuf,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,
    /// Master key for the encrypted at-rest API keystore. When absent,
    /// provider keys are held in-process only and never persisted.
    pub master_key: Option<String>,
    /// Allowed CORS origins; entries may end in `*` for prefix matching.
    pub cors_allowed_origins: Vec<String>,
    pub youtube_api_key: Option<String>,
    pub github_token: Option<String>,
    pub twitter_bearer_token: Option<String>,
    pub rate_limit: RateLimitConfig,
}

/// Deployment environment. Production redacts internal error messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuntimeEnv {
    Dev,
    Prod,
    Test,
}

impl RuntimeEnv {
    fn parse(s: &str) -> Self {
        match s {
            "prod" | "production" => Self::Prod,
            "test" => Self::Test,
            _ => Self::Dev,
        }
    }
}

/// Per-window request budgets for the HTTP surface.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub global_per_minute: u32,
    pub import_per_minute: u32,
    pub settings_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global_per_minute: 100,
            import_per_minute: 10,
            settings_per_minute: 5,
        }
    }
}

impl ServerConfig {
    /// Resolve configuration from the process environment.
    pub fn from_env() -> Self {
        let database_path = env_var("DATABASE_PATH")
            .map(|p| expand_home(&p))
            .unwrap_or_else(default_database_path);

        Self {
            port: env_parse("PORT").unwrap_or(8080),
            env: RuntimeEnv::parse(env_var("DECANT_ENV").as_deref().unwrap_or("dev")),
            log_level: env_var("LOG_LEVEL").unwrap_or_else(|| "info".into()),
            database_path,
            openai_api_key: env_var("OPENAI_API_KEY"),
            openai_model: env_var("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o-mini".into()),
            openai_base_url: env_var("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".into()),
            master_key: env_var("DECANT_MASTER_KEY"),
            cors_allowed_origins: env_var("CORS_ALLOWED_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            youtube_api_key: env_var("YOUTUBE_API_KEY"),
            github_token: env_var("GITHUB_TOKEN"),
            twitter_bearer_token: env_var("TWITTER_BEARER_TOKEN"),
            rate_limit: RateLimitConfig {
                global_per_minute: env_parse("RATE_LIMIT_GLOBAL_PER_MINUTE").unwrap_or(100),
                import_per_minute: env_parse("RATE_LIMIT_IMPORT_PER_MINUTE").unwrap_or(10),
                settings_per_minute: env_parse("RATE_LIMIT_SETTINGS_PER_MINUTE").unwrap_or(5),
            },
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_var(name).and_then(|v| v.parse().ok())
}

fn default_database_path() -> PathBuf {
    expand_home("~/.decant/data/decant.db")
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

/// Tuning parameters, deserialized from `decant.toml` when present.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SystemConfig {
    pub cache: CacheConfig,
    pub extraction: ExtractionConfig,
    pub llm: LlmConfig,
    pub similarity: SimilarityConfig,
    pub search: SearchConfig,
}

/// Import cache TTL.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Import result cache TTL in seconds.
    pub import_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            import_ttl_seconds: 300,
        }
    }
}

/// Extractor framework knobs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Bounded parallelism for batch extraction.
    pub batch_concurrency: usize,
    /// Per-request timeout for outbound extractor calls, in seconds.
    pub request_timeout_seconds: u64,
    /// Minimum extracted-content length before LLM post-enhancement runs.
    pub enhancement_min_chars: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            batch_concurrency: 5,
            request_timeout_seconds: 30,
            enhancement_min_chars: 100,
        }
    }
}

/// LLM call defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub temperature: f64,
    pub max_tokens: u32,
    /// Extracted content is truncated to this many characters before
    /// classification.
    pub classify_content_chars: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 2000,
            classify_content_chars: 4000,
        }
    }
}

/// Similarity engine thresholds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    /// Pairs scoring below this are not stored.
    pub min_threshold: f64,
    /// Node ids per chunk in batch computation.
    pub batch_size: usize,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            min_threshold: 0.01,
            batch_size: 100,
        }
    }
}

/// Search cost caps.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Facet aggregation scans at most this many matching rows.
    pub facet_row_cap: u32,
    /// Top-N organizations reported in facets.
    pub organization_facet_limit: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            facet_row_cap: 10_000,
            organization_facet_limit: 20,
        }
    }
}

/// Load the system file, or defaults when the path does not exist.
pub fn load_system_config(path: &std::path::Path) -> Result<SystemConfig, ConfigError> {
    if !path.exists() {
        return Ok(SystemConfig::default());
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {detail}")]
    Parse { path: PathBuf, detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_defaults() {
        let cfg = SystemConfig::default();
        assert_eq!(cfg.cache.import_ttl_seconds, 300);
        assert_eq!(cfg.extraction.batch_concurrency, 5);
        assert_eq!(cfg.llm.max_tokens, 2000);
        assert!((cfg.llm.temperature - 0.3).abs() < f64::EPSILON);
        assert!((cfg.similarity.min_threshold - 0.01).abs() < f64::EPSILON);
        assert_eq!(cfg.search.facet_row_cap, 10_000);
    }

    #[test]
    fn test_partial_toml_overlays_defaults() {
        let cfg: SystemConfig = toml::from_str(
            r#"
            [similarity]
            min_threshold = 0.05
            "#,
        )
        .unwrap();
        assert!((cfg.similarity.min_threshold - 0.05).abs() < f64::EPSILON);
        assert_eq!(cfg.similarity.batch_size, 100);
        assert_eq!(cfg.cache.import_ttl_seconds, 300);
    }

    #[test]
    fn test_expand_home() {
        std::env::set_var("HOME", "/home/tester");
        assert_eq!(
            expand_home("~/.decant/data/decant.db"),
            PathBuf::from("/home/tester/.decant/data/decant.db")
        );
        assert_eq!(expand_home("/abs/path.db"), PathBuf::from("/abs/path.db"));
    }
}
