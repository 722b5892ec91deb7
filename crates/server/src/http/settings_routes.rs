use std::sync::Arc;

use axum::extract::{Extension, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use decant_common::DecantError;

use super::{ApiError, AppState, ClientIp, RateClass};

fn settings_rate_check(state: &AppState, ip: &str) -> Result<(), ApiError> {
    state
        .rate_limiter
        .check(ip, RateClass::Settings)
        .map_err(|retry_after| {
            ApiError(DecantError::RateLimitExceeded {
                retry_after: Some(retry_after),
            })
        })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetKeyRequest {
    provider: String,
    api_key: String,
}

/// `POST /api/settings/api-key` — store a provider key in the encrypted
/// keystore. `persisted: false` means no master key is configured and
/// the key lives in-process only.
pub async fn set_api_key(
    State(state): State<Arc<AppState>>,
    Extension(ip): Extension<ClientIp>,
    Json(request): Json<SetKeyRequest>,
) -> Result<Json<Value>, ApiError> {
    settings_rate_check(&state, &ip.0)?;

    let persisted = state.keystore.set(&request.provider, &request.api_key)?;
    Ok(Json(json!({ "success": true, "persisted": persisted })))
}

/// `GET /api/settings/api-key` — configured provider names. Key values
/// never leave the keystore.
pub async fn list_api_keys(
    State(state): State<Arc<AppState>>,
    Extension(ip): Extension<ClientIp>,
) -> Result<Json<Value>, ApiError> {
    settings_rate_check(&state, &ip.0)?;
    Ok(Json(json!({ "providers": state.keystore.providers() })))
}

#[derive(Deserialize)]
pub struct DeleteKeyQuery {
    provider: Option<String>,
}

/// `DELETE /api/settings/api-key?provider=`.
pub async fn delete_api_key(
    State(state): State<Arc<AppState>>,
    Extension(ip): Extension<ClientIp>,
    Query(query): Query<DeleteKeyQuery>,
) -> Result<Json<Value>, ApiError> {
    settings_rate_check(&state, &ip.0)?;

    let provider = query
        .provider
        .ok_or_else(|| ApiError(DecantError::Validation("provider is required".into())))?;

    let deleted = state.keystore.delete(&provider)?;
    Ok(Json(json!({ "success": true, "deleted": deleted })))
}
