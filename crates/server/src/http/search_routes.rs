use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use decant_common::types::{Pagination, SearchFilters, SearchResponse};

use super::{ApiError, ApiResult, AppState};

#[derive(Deserialize)]
pub struct SimpleQuery {
    q: Option<String>,
    limit: Option<u32>,
    offset: Option<u32>,
}

/// `GET /api/search?q=&limit=&offset=` — LIKE-based search, newest
/// first.
pub async fn simple(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SimpleQuery>,
) -> Result<Json<Value>, ApiError> {
    let q = query.q.unwrap_or_default();
    let limit = query.limit.unwrap_or(20).min(100);
    let offset = query.offset.unwrap_or(0);

    let nodes = state.store.search_nodes(&q, limit, offset).await?;

    Ok(Json(json!({
        "query": q,
        "results": nodes,
        "limit": limit,
        "offset": offset,
    })))
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilteredRequest {
    query: String,
    filters: SearchFilters,
    page: Option<u32>,
    limit: Option<u32>,
}

/// `POST /api/search/filtered` — FTS5-ranked search with AND-ed facet
/// filters, snippets, matched fields, and facet counts.
pub async fn filtered(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FilteredRequest>,
) -> ApiResult<SearchResponse> {
    let pagination = Pagination {
        page: request.page.unwrap_or(1).max(1),
        limit: request.limit.unwrap_or(20).min(100),
    };

    let response = state
        .store
        .search_nodes_advanced(
            &request.query,
            &request.filters,
            pagination,
            &state.search_config,
        )
        .await?;

    Ok(Json(response))
}
