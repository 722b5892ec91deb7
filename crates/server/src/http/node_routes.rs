use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use decant_common::types::{
    ChangeTrigger, HierarchyView, MergeOptions, MetadataCode, MetadataSource, MetadataSpec, Node,
    NodeInput, NodePatch,
};
use decant_common::{DecantError, NodeId};

use super::{ApiError, ApiResult, AppState};
use crate::hierarchy::DEFAULT_ORGANIZATION_ROOT;

/// Similarity floor for a "similar" backlink.
const BACKLINK_SIMILAR_THRESHOLD: f64 = 0.8;
/// Similarity floor for a "sibling" backlink, combined with shared tags.
const BACKLINK_SIBLING_THRESHOLD: f64 = 0.6;
const BACKLINK_SIBLING_SHARED_TAGS: i64 = 3;

fn parse_node_id(raw: &str) -> Result<NodeId, ApiError> {
    NodeId::parse(raw)
        .ok_or_else(|| ApiError(DecantError::Validation(format!("Invalid node id: {}", raw))))
}

#[derive(Deserialize)]
pub struct ListQuery {
    page: Option<u32>,
    limit: Option<u32>,
}

/// `GET /api/nodes` — paged when `page`/`limit` given, full list
/// otherwise.
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let total = state.store.count_nodes().await?;

    let nodes = match (query.page, query.limit) {
        (None, None) => state.store.list_nodes(None, 0).await?,
        (page, limit) => {
            let limit = limit.unwrap_or(50).min(500);
            let offset = page.unwrap_or(1).saturating_sub(1) * limit;
            state.store.list_nodes(Some(limit), offset).await?
        }
    };

    Ok(Json(json!({ "nodes": nodes, "total": total })))
}

/// `POST /api/nodes` — direct node creation (no import pipeline).
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(input): Json<NodeInput>,
) -> ApiResult<Node> {
    if input.url.trim().is_empty() {
        return Err(ApiError(DecantError::UrlEmpty));
    }
    if input.title.trim().is_empty() {
        return Err(ApiError(DecantError::Validation("title is required".into())));
    }

    let mut input = input;
    if input.source_domain.is_empty() {
        input.source_domain = decant_common::types::domain_of(&input.url);
    }

    let node = state.store.create_node(&input).await?;
    Ok(Json(node))
}

/// `GET /api/nodes/{id}`.
pub async fn get_one(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Node> {
    let id = parse_node_id(&id)?;
    let node = state.store.get_node(id).await?;
    Ok(Json(node))
}

/// `PUT /api/nodes/{id}` — scalar/JSON patch; a metadata_tags change
/// also rewrites the junction rows and refreshes similarity.
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(patch): Json<NodePatch>,
) -> ApiResult<Node> {
    let id = parse_node_id(&id)?;

    let metadata_changed = patch.metadata_tags.is_some();
    let node = state.store.update_node(id, &patch).await?;

    if metadata_changed {
        let specs: Vec<MetadataSpec> = node
            .metadata_tags
            .iter()
            .filter_map(|tag| MetadataCode::parse_tag(tag))
            .map(|code| MetadataSpec {
                code_type: code.code_type,
                code: code.code,
                display_name: None,
                confidence: 1.0,
                source: MetadataSource::User,
            })
            .collect();
        state.store.set_node_metadata(id, &specs).await?;

        if let Err(e) = state.similarity.update_for_node(id).await {
            tracing::warn!(node_id = %id, error = %e, "Similarity refresh after edit failed");
        }
    }

    Ok(Json(node))
}

/// `DELETE /api/nodes/{id}` — soft delete.
pub async fn delete_one(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_node_id(&id)?;
    state.store.delete_node(id).await?;
    state.store.delete_similarity_for(id).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    secondary_id: String,
    #[serde(default)]
    options: MergeOptions,
}

/// `POST /api/nodes/{id}/merge`.
pub async fn merge(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<MergeRequest>,
) -> ApiResult<Node> {
    let primary = parse_node_id(&id)?;
    let secondary = parse_node_id(&request.secondary_id)?;

    let node = state
        .store
        .merge_nodes(primary, secondary, request.options)
        .await?;

    // The secondary's edges are stale; the primary's may have changed.
    state.store.delete_similarity_for(secondary).await?;
    if let Err(e) = state.similarity.update_for_node(primary).await {
        tracing::warn!(node_id = %primary, error = %e, "Similarity refresh after merge failed");
    }

    Ok(Json(node))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRequest {
    #[serde(default)]
    target_parent_id: Option<String>,
    target_hierarchy: String,
}

/// `POST /api/nodes/{id}/move` — re-home a node under a new parent in
/// one hierarchy. The code keeps its tail unless it would collide.
pub async fn move_node(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<MoveRequest>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_node_id(&id)?;
    let view = HierarchyView::parse(&request.target_hierarchy).ok_or_else(|| {
        ApiError(DecantError::Validation(format!(
            "targetHierarchy must be function or organization, got {}",
            request.target_hierarchy
        )))
    })?;

    let node = state.store.get_node(id).await?;
    let old_code = match view {
        HierarchyView::Function => node.function_hierarchy_code.clone(),
        HierarchyView::Organization => node.organization_hierarchy_code.clone(),
    };
    let tail = old_code
        .as_deref()
        .and_then(|code| code.rsplit('.').next())
        .map(String::from)
        .unwrap_or_else(|| id.short_prefix());

    let target_parent = match &request.target_parent_id {
        Some(raw) => Some(parse_node_id(raw)?),
        None => None,
    };

    let prefix = match target_parent {
        Some(parent_id) => {
            let parent = state.store.get_node(parent_id).await?;
            let parent_code = match view {
                HierarchyView::Function => parent.function_hierarchy_code.clone(),
                HierarchyView::Organization => parent.organization_hierarchy_code.clone(),
            };
            parent_code.ok_or_else(|| {
                ApiError(DecantError::Validation(
                    "Target parent has no hierarchy code".into(),
                ))
            })?
        }
        None => match view {
            HierarchyView::Function => node.segment.clone().unwrap_or_else(|| "U".into()),
            HierarchyView::Organization => DEFAULT_ORGANIZATION_ROOT.to_string(),
        },
    };

    // Keep the tail unless a sibling already holds it.
    let siblings = state.store.sibling_codes(view, &prefix).await?;
    let taken: Vec<&str> = siblings
        .iter()
        .filter_map(|c| c.rsplit('.').next())
        .collect();
    let mut tail = tail;
    if taken.contains(&tail.as_str()) {
        tail = id.short_prefix();
        let base = tail.clone();
        let mut n = 2u32;
        while taken.contains(&tail.as_str()) {
            tail = format!("{}_{}", base, n);
            n += 1;
        }
    }
    let new_code = format!("{}.{}", prefix, tail);

    let node = state
        .store
        .update_hierarchy_placement(id, view, target_parent, &new_code, ChangeTrigger::UserMove)
        .await?;

    Ok(Json(json!({
        "success": true,
        "node": node,
        "oldCode": old_code,
        "newCode": new_code,
    })))
}

#[derive(Deserialize)]
pub struct LimitQuery {
    limit: Option<u32>,
}

/// `GET /api/nodes/{id}/related?limit=` — similarity neighbors.
pub async fn related(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_node_id(&id)?;
    state.store.get_node(id).await?;

    let limit = query.limit.unwrap_or(10).min(100);
    let similar = state.store.get_similar(id, limit).await?;

    let mut entries = Vec::with_capacity(similar.len());
    for edge in similar {
        if let Ok(node) = state.store.get_node(edge.node_id).await {
            entries.push(json!({ "node": node, "score": edge.score }));
        }
    }

    Ok(Json(json!({ "related": entries })))
}

/// `GET /api/nodes/{id}/backlinks?limit=` — neighbors grouped by
/// reference type: similar (≥ 0.8), sibling (≥ 0.6 with ≥ 3 shared
/// tags), manual, related.
pub async fn backlinks(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_node_id(&id)?;
    state.store.get_node(id).await?;

    let limit = query.limit.unwrap_or(10).min(100) as usize;
    let neighbors = state.store.get_similar(id, 200).await?;

    let mut similar = Vec::new();
    let mut sibling = Vec::new();
    let mut related = Vec::new();

    for edge in neighbors {
        let Ok(node) = state.store.get_node(edge.node_id).await else {
            continue;
        };
        let entry = json!({ "node": node, "score": edge.score });

        if edge.score >= BACKLINK_SIMILAR_THRESHOLD && similar.len() < limit {
            similar.push(entry);
        } else if edge.score >= BACKLINK_SIBLING_THRESHOLD && sibling.len() < limit {
            let shared = state.store.shared_metadata_count(id, edge.node_id).await?;
            if shared >= BACKLINK_SIBLING_SHARED_TAGS {
                sibling.push(json!({ "node": entry["node"], "score": edge.score, "sharedTags": shared }));
            } else if related.len() < limit {
                related.push(entry);
            }
        } else if related.len() < limit {
            related.push(entry);
        }
    }

    Ok(Json(json!({
        "similar": similar,
        "sibling": sibling,
        "manual": [],
        "related": related,
    })))
}

/// `POST /api/similarity/recompute` — operator action: rebuild every
/// similarity edge from current metadata.
pub async fn recompute_similarity(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    let stats = state.similarity.recompute_all().await?;
    Ok(Json(json!({ "success": true, "stats": stats })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonQuery {
    ids: String,
    min_score: Option<f64>,
    limit: Option<u32>,
}

/// `GET /api/similarity/common?ids=a,b` — candidates similar to several
/// nodes at once, by total score then match count.
pub async fn common_related(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CommonQuery>,
) -> Result<Json<Value>, ApiError> {
    let ids: Vec<NodeId> = query
        .ids
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|raw| {
            NodeId::parse(raw).ok_or_else(|| {
                ApiError(DecantError::Validation(format!("Invalid node id: {}", raw)))
            })
        })
        .collect::<Result<_, _>>()?;

    if ids.is_empty() {
        return Err(ApiError(DecantError::Validation(
            "ids query parameter is required".into(),
        )));
    }

    let candidates = state
        .store
        .find_common_similar(&ids, query.min_score.unwrap_or(0.1), query.limit.unwrap_or(10))
        .await?;

    Ok(Json(json!({ "candidates": candidates })))
}
