mod health;
mod import_routes;
mod node_routes;
mod rate_limit;
mod search_routes;
mod settings_routes;
mod tree_routes;

pub use rate_limit::{ApiRateLimiter, RateClass};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{AllowOrigin, CorsLayer};

use decant_common::DecantError;

use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::import::ImportPipeline;
use crate::keystore::Keystore;
use crate::similarity::SimilarityEngine;
use crate::store::Store;

/// Shared application state accessible from axum handlers.
pub struct AppState {
    pub store: Arc<Store>,
    pub pipeline: Arc<ImportPipeline>,
    pub similarity: Arc<SimilarityEngine>,
    pub keystore: Arc<Keystore>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub rate_limiter: Arc<ApiRateLimiter>,
    pub metrics_handle: Option<PrometheusHandle>,
    pub search_config: decant_common::config::SearchConfig,
    pub production: bool,
}

/// Redact internal error messages in responses. Set once at router build.
static REDACT_INTERNAL_ERRORS: AtomicBool = AtomicBool::new(false);

/// Build the full API router.
pub fn build_router(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    REDACT_INTERNAL_ERRORS.store(state.production, Ordering::Relaxed);

    let api = Router::new()
        // Import
        .route("/api/import", post(import_routes::import))
        .route("/api/import/check", get(import_routes::check))
        .route("/api/import/cache", delete(import_routes::invalidate_cache))
        .route("/api/import/cache/stats", get(import_routes::cache_stats))
        // Nodes
        .route(
            "/api/nodes",
            get(node_routes::list).post(node_routes::create),
        )
        .route(
            "/api/nodes/{id}",
            get(node_routes::get_one)
                .put(node_routes::update)
                .delete(node_routes::delete_one),
        )
        .route("/api/nodes/{id}/merge", post(node_routes::merge))
        .route("/api/nodes/{id}/move", post(node_routes::move_node))
        .route("/api/nodes/{id}/related", get(node_routes::related))
        .route("/api/nodes/{id}/backlinks", get(node_routes::backlinks))
        // Search
        .route("/api/search", get(search_routes::simple))
        .route("/api/search/filtered", post(search_routes::filtered))
        // Tree
        .route("/api/tree/{view}", get(tree_routes::full_tree))
        .route(
            "/api/tree/{view}/subtree/{path}",
            get(tree_routes::subtree),
        )
        .route("/api/tree/{view}/node/{code}", get(tree_routes::by_code))
        // Similarity maintenance (operator actions)
        .route(
            "/api/similarity/recompute",
            post(node_routes::recompute_similarity),
        )
        .route(
            "/api/similarity/common",
            get(node_routes::common_related),
        )
        // Settings
        .route(
            "/api/settings/api-key",
            post(settings_routes::set_api_key)
                .get(settings_routes::list_api_keys)
                .delete(settings_routes::delete_api_key),
        )
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            global_rate_limit,
        ));

    Router::new()
        .merge(api)
        .route("/health", get(health::health))
        .route("/health/live", get(health::live))
        .route("/health/ready", get(health::ready))
        .route("/metrics", get(health::metrics))
        .layer(middleware::from_fn(request_id))
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

/// Client address as seen by the rate limiter.
#[derive(Clone, Debug)]
pub struct ClientIp(pub String);

async fn global_rate_limit(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    if let Err(retry_after) = state.rate_limiter.check(&ip, RateClass::Global) {
        return rate_limited_response(retry_after);
    }

    request.extensions_mut().insert(ClientIp(ip));
    next.run(request).await
}

/// Stamp every response with a request id.
async fn request_id(request: Request, next: Next) -> Response {
    let id = uuid::Uuid::new_v4().to_string();
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    let patterns: Vec<String> = origins.to_vec();
    let allow = AllowOrigin::predicate(move |origin, _| {
        let Ok(origin) = origin.to_str() else {
            return false;
        };
        patterns.iter().any(|pattern| {
            match pattern.strip_suffix('*') {
                Some(prefix) => origin.starts_with(prefix),
                None => origin == pattern,
            }
        })
    });

    CorsLayer::new()
        .allow_origin(allow)
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}

pub(crate) fn rate_limited_response(retry_after: u64) -> Response {
    let error = DecantError::RateLimitExceeded {
        retry_after: Some(retry_after),
    };
    ApiError::from(error).into_response()
}

/// Error envelope: `{error, code, retryAfter?, timestamp}` with the HTTP
/// status from the error taxonomy and a `Retry-After` header on 429/503.
pub struct ApiError(pub DecantError);

impl From<DecantError> for ApiError {
    fn from(error: DecantError) -> Self {
        Self(error)
    }
}

impl From<crate::store::StoreError> for ApiError {
    fn from(error: crate::store::StoreError) -> Self {
        Self(DecantError::from(error))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = self.0;
        let status =
            StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let retry_after = error.retry_after();

        let message = if status.is_server_error() && REDACT_INTERNAL_ERRORS.load(Ordering::Relaxed)
        {
            "An internal error occurred".to_string()
        } else {
            error.to_string()
        };

        metrics::counter!("http.errors", "code" => error.code()).increment(1);

        let mut body = serde_json::json!({
            "error": message,
            "code": error.code(),
            "timestamp": chrono::Utc::now(),
        });
        if let Some(seconds) = retry_after {
            body["retryAfter"] = serde_json::json!(seconds);
        }

        let mut response = (status, Json(body)).into_response();
        if let Some(seconds) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert("retry-after", value);
            }
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            response
                .headers_mut()
                .insert("retry-after", HeaderValue::from_static("60"));
        }
        response
    }
}

pub(crate) type ApiResult<T> = Result<Json<T>, ApiError>;
