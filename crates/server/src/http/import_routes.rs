use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Extension, Query, State};
use axum::Json;
use serde_json::{json, Value};

use decant_common::types::{ImportCacheStats, ImportCheck, ImportRequest};

use super::{ApiError, ApiResult, AppState, ClientIp, RateClass};
use crate::import::normalize_url;

/// `POST /api/import` — run the full pipeline for one URL.
pub async fn import(
    State(state): State<Arc<AppState>>,
    Extension(ip): Extension<ClientIp>,
    Json(request): Json<ImportRequest>,
) -> Result<Json<Value>, ApiError> {
    if let Err(retry_after) = state.rate_limiter.check(&ip.0, RateClass::Import) {
        return Err(ApiError(decant_common::DecantError::RateLimitExceeded {
            retry_after: Some(retry_after),
        }));
    }

    let outcome = state.pipeline.import(&request).await?;

    Ok(Json(json!({
        "success": true,
        "nodeId": outcome.node_id,
        "cached": outcome.cached,
        "node": outcome.node,
        "classification": outcome.classification,
        "hierarchyCodes": outcome.hierarchy_codes,
        "metadata": outcome.metadata,
        "phase2": outcome.phase2,
    })))
}

#[derive(serde::Deserialize)]
pub struct UrlQuery {
    url: Option<String>,
}

/// `GET /api/import/check?url=` — existence and cache state for a URL.
pub async fn check(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UrlQuery>,
) -> ApiResult<ImportCheck> {
    let check = state.pipeline.check(query.url.as_deref()).await?;
    Ok(Json(check))
}

/// `DELETE /api/import/cache?url=` — drop one cache entry (or every
/// entry matching `pattern=`).
pub async fn invalidate_cache(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let invalidated = if let Some(url) = query.get("url") {
        u64::from(state.pipeline.cache().invalidate(&normalize_url(url)))
    } else if let Some(pattern) = query.get("pattern") {
        state.pipeline.cache().invalidate_pattern(pattern)
    } else {
        state.pipeline.cache().clear()
    };

    Ok(Json(json!({ "success": true, "invalidated": invalidated })))
}

/// `GET /api/import/cache/stats`.
pub async fn cache_stats(State(state): State<Arc<AppState>>) -> ApiResult<ImportCacheStats> {
    Ok(Json(state.pipeline.cache().stats()))
}
