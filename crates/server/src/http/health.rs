use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use super::AppState;

/// `GET /health` — overall service health.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store_ok = state.store.health_check().await.is_ok();
    let open_breaker = state.breakers.any_open();

    let healthy = store_ok && open_breaker.is_none();
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = serde_json::json!({
        "status": if healthy { "healthy" } else { "unhealthy" },
        "services": {
            "sqlite": if store_ok { "healthy" } else { "unhealthy" },
            "openBreaker": open_breaker,
        }
    });

    (status, Json(body))
}

/// `GET /health/live` — process is up.
pub async fn live() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "alive" })))
}

/// `GET /health/ready` — migrations ran and the store answers.
pub async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let migrations_ok = state
        .store
        .applied_migrations()
        .await
        .map(|applied| applied.len() >= crate::store::MIGRATIONS.len())
        .unwrap_or(false);

    let status = if migrations_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(serde_json::json!({
            "status": if migrations_ok { "ready" } else { "not_ready" }
        })),
    )
}

/// `GET /metrics` — Prometheus text exposition.
pub async fn metrics(State(state): State<Arc<AppState>>) -> String {
    state
        .metrics_handle
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default()
}
