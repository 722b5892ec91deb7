use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use decant_common::types::{HierarchyView, Node};
use decant_common::DecantError;

use super::{ApiError, ApiResult, AppState};

fn parse_view(raw: &str) -> Result<HierarchyView, ApiError> {
    HierarchyView::parse(raw).ok_or_else(|| {
        ApiError(DecantError::Validation(format!(
            "view must be function or organization, got {}",
            raw
        )))
    })
}

/// `GET /api/tree/{view}` — the full tree plus the taxonomy roots for
/// the view.
pub async fn full_tree(
    State(state): State<Arc<AppState>>,
    Path(view): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let view = parse_view(&view)?;
    let tree = state.store.get_tree(view).await?;

    let roots = match view {
        HierarchyView::Function => serde_json::to_value(state.store.list_segments().await?),
        HierarchyView::Organization => {
            serde_json::to_value(state.store.list_organizations().await?)
        }
    }
    .map_err(DecantError::from)?;

    Ok(Json(json!({
        "view": view,
        "taxonomy": roots,
        "tree": tree.roots,
    })))
}

/// `GET /api/tree/{view}/subtree/{path}` — prefix subtree rooted at the
/// node holding the code.
pub async fn subtree(
    State(state): State<Arc<AppState>>,
    Path((view, path)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let view = parse_view(&view)?;
    let subtree = state.store.get_subtree(view, &path).await?;
    Ok(Json(json!({ "view": view, "path": path, "subtree": subtree })))
}

/// `GET /api/tree/{view}/node/{code}` — single node by hierarchy code.
pub async fn by_code(
    State(state): State<Arc<AppState>>,
    Path((view, code)): Path<(String, String)>,
) -> ApiResult<Node> {
    let view = parse_view(&view)?;
    let node = state.store.get_node_by_code(view, &code).await?;
    Ok(Json(node))
}
