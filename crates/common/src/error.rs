use thiserror::Error;

/// Top-level error type for Decant operations.
///
/// Every variant maps to a stable wire code (`code()`), an HTTP status
/// (`http_status()`), and a recoverability class (`recoverable()`). A
/// recoverable error inside the import pipeline downgrades that step
/// (extraction falls back, classification uses defaults) without aborting
/// the whole import; a non-recoverable error short-circuits.
#[derive(Debug, Error)]
pub enum DecantError {
    // --- URL validation ---
    #[error("URL is required")]
    UrlRequired,

    #[error("URL is empty")]
    UrlEmpty,

    #[error("Invalid URL: {0}")]
    UrlInvalid(String),

    #[error("Unsupported URL protocol: {0}")]
    UrlInvalidProtocol(String),

    #[error("URL has no hostname")]
    UrlNoHostname,

    #[error("Validation failed: {0}")]
    Validation(String),

    // --- Safety ---
    #[error("Blocked URL target: {0}")]
    SsrfBlocked(String),

    // --- Extraction ---
    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Parsing error: {0}")]
    Parsing(String),

    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("Content not found: {0}")]
    ContentNotFound(String),

    #[error("Content too large: {0}")]
    ContentTooLarge(String),

    // --- Auth ---
    #[error("Invalid API key for {0}")]
    InvalidApiKey(String),

    #[error("API key missing for {0}")]
    ApiKeyMissing(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    // --- Transport ---
    #[error("Network timeout: {0}")]
    NetworkTimeout(String),

    #[error("Fetch failed: {message}")]
    FetchFailed {
        message: String,
        /// HTTP status from the upstream service, when one was received.
        status: Option<u16>,
        /// Parsed Retry-After, in seconds.
        retry_after: Option<u64>,
    },

    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after: Option<u64> },

    // --- Storage ---
    #[error("Duplicate URL: {0}")]
    DuplicateUrl(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    // --- LLM ---
    #[error("LLM returned an empty response")]
    LlmEmptyResponse,

    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    #[error("LLM response schema error: {0}")]
    LlmSchema(String),

    // --- Circuit ---
    #[error("Circuit breaker open for {0}")]
    CircuitOpen(String),

    // --- Internal ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Internal(String),
}

impl DecantError {
    /// Stable wire code reported in HTTP error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UrlRequired => "URL_REQUIRED",
            Self::UrlEmpty => "URL_EMPTY",
            Self::UrlInvalid(_) => "URL_INVALID",
            Self::UrlInvalidProtocol(_) => "URL_INVALID_PROTOCOL",
            Self::UrlNoHostname => "URL_NO_HOSTNAME",
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::SsrfBlocked(_) => "SSRF_BLOCKED",
            Self::ExtractionFailed(_) => "EXTRACTION_FAILED",
            Self::Parsing(_) => "PARSING_ERROR",
            Self::UnsupportedContentType(_) => "UNSUPPORTED_CONTENT_TYPE",
            Self::ContentNotFound(_) => "CONTENT_NOT_FOUND",
            Self::ContentTooLarge(_) => "CONTENT_TOO_LARGE",
            Self::InvalidApiKey(_) => "INVALID_API_KEY",
            Self::ApiKeyMissing(_) => "API_KEY_MISSING",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NetworkTimeout(_) => "NETWORK_TIMEOUT",
            Self::FetchFailed { .. } => "FETCH_FAILED",
            Self::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            Self::DuplicateUrl(_) => "DUPLICATE_URL",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::Database(_) => "DATABASE_ERROR",
            Self::LlmEmptyResponse => "LLM_EMPTY_RESPONSE",
            Self::LlmParse(_) => "LLM_PARSE_ERROR",
            Self::LlmSchema(_) => "LLM_SCHEMA_ERROR",
            Self::CircuitOpen(_) => "CIRCUIT_OPEN",
            Self::Serialization(_) | Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status the error maps to on the wire.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::UrlRequired
            | Self::UrlEmpty
            | Self::UrlInvalid(_)
            | Self::UrlInvalidProtocol(_)
            | Self::UrlNoHostname
            | Self::Validation(_)
            | Self::ExtractionFailed(_)
            | Self::Parsing(_)
            | Self::UnsupportedContentType(_) => 400,
            Self::Unauthorized(_) | Self::InvalidApiKey(_) => 401,
            Self::SsrfBlocked(_) | Self::Forbidden(_) => 403,
            Self::NotFound(_) | Self::ContentNotFound(_) => 404,
            Self::NetworkTimeout(_) => 408,
            Self::Conflict(_) | Self::DuplicateUrl(_) => 409,
            Self::ContentTooLarge(_) => 413,
            Self::RateLimitExceeded { .. } => 429,
            Self::Database(_)
            | Self::LlmEmptyResponse
            | Self::LlmParse(_)
            | Self::LlmSchema(_)
            | Self::Serialization(_)
            | Self::Internal(_) => 500,
            Self::FetchFailed { .. } => 502,
            Self::ApiKeyMissing(_) | Self::CircuitOpen(_) => 503,
        }
    }

    /// Whether an import step hitting this error may proceed with a
    /// degraded result instead of aborting the pipeline.
    pub fn recoverable(&self) -> bool {
        matches!(
            self,
            Self::NetworkTimeout(_)
                | Self::FetchFailed { .. }
                | Self::RateLimitExceeded { .. }
                | Self::ExtractionFailed(_)
                | Self::Parsing(_)
                | Self::LlmEmptyResponse
                | Self::LlmParse(_)
                | Self::LlmSchema(_)
                | Self::CircuitOpen(_)
                | Self::ApiKeyMissing(_)
        )
    }

    /// Seconds the caller should wait before retrying, when the upstream
    /// told us.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::RateLimitExceeded { retry_after } => *retry_after,
            Self::FetchFailed { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Upstream HTTP status carried by the error, if any.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            Self::FetchFailed { status, .. } => *status,
            Self::RateLimitExceeded { .. } => Some(429),
            Self::NetworkTimeout(_) => Some(408),
            _ => None,
        }
    }
}

/// Result type alias for Decant operations.
pub type Result<T> = std::result::Result<T, DecantError>;
