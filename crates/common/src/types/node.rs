use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::NodeId;

/// The unit of curation: one imported URL with its extracted and
/// classified state, attached to two orthogonal hierarchies.
///
/// Current state only — the history of hierarchy placement lives in the
/// `hierarchy_code_changes` audit table.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    pub title: String,
    /// Canonical URL, unique among non-deleted nodes.
    pub url: String,
    pub source_domain: String,
    #[serde(default)]
    pub company: Option<String>,
    /// One free-text phrase describing the node.
    #[serde(default)]
    pub phrase_description: Option<String>,
    #[serde(default)]
    pub short_description: Option<String>,
    #[serde(default)]
    pub ai_summary: Option<String>,
    #[serde(default)]
    pub logo_url: Option<String>,
    /// Content-type-specific payload produced by the extractor.
    #[serde(default)]
    pub extracted_fields: Value,
    /// Ordered metadata tags in `TYPE:CODE` form.
    #[serde(default)]
    pub metadata_tags: Vec<String>,
    /// Denormalized classification codes for fast filtering.
    #[serde(default)]
    pub segment: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub function_parent_id: Option<NodeId>,
    #[serde(default)]
    pub function_hierarchy_code: Option<String>,
    #[serde(default)]
    pub organization_parent_id: Option<NodeId>,
    #[serde(default)]
    pub organization_hierarchy_code: Option<String>,
    #[serde(default)]
    pub is_deleted: bool,
    /// Set once the Phase-2 enrichment pass has completed for this node.
    #[serde(default)]
    pub phase2_completed: bool,
    #[serde(default)]
    pub key_concepts: Vec<String>,
    pub date_added: DateTime<Utc>,
    pub date_modified: DateTime<Utc>,
}

/// Input for creating a node. Ids and timestamps are assigned by the store.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeInput {
    pub title: String,
    pub url: String,
    pub source_domain: String,
    pub company: Option<String>,
    pub phrase_description: Option<String>,
    pub short_description: Option<String>,
    pub ai_summary: Option<String>,
    pub logo_url: Option<String>,
    pub extracted_fields: Option<Value>,
    pub metadata_tags: Vec<String>,
    pub segment: Option<String>,
    pub category: Option<String>,
    pub content_type: Option<String>,
    pub function_parent_id: Option<NodeId>,
    pub function_hierarchy_code: Option<String>,
    pub organization_parent_id: Option<NodeId>,
    pub organization_hierarchy_code: Option<String>,
    pub key_concepts: Vec<String>,
}

impl NodeInput {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        let url = url.into();
        let source_domain = domain_of(&url);
        Self {
            title: title.into(),
            url,
            source_domain,
            ..Self::default()
        }
    }
}

/// Partial update for a node. `None` fields are left untouched.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodePatch {
    pub title: Option<String>,
    pub company: Option<String>,
    pub phrase_description: Option<String>,
    pub short_description: Option<String>,
    pub ai_summary: Option<String>,
    pub logo_url: Option<String>,
    pub extracted_fields: Option<Value>,
    pub metadata_tags: Option<Vec<String>>,
    pub segment: Option<String>,
    pub category: Option<String>,
    pub content_type: Option<String>,
    pub key_concepts: Option<Vec<String>>,
    pub phase2_completed: Option<bool>,
}

/// Options for merging a secondary node into a primary one.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MergeOptions {
    /// Keep the primary node's metadata set instead of absorbing the
    /// secondary's.
    pub keep_metadata: bool,
    /// Append the secondary's AI summary to the primary's.
    pub append_summary: bool,
}

/// Host portion of a URL, without scheme or path.
pub fn domain_of(url: &str) -> String {
    url.split("//")
        .nth(1)
        .unwrap_or(url)
        .split('/')
        .next()
        .unwrap_or("unknown")
        .split('@')
        .next_back()
        .unwrap_or("unknown")
        .split(':')
        .next()
        .unwrap_or("unknown")
        .to_string()
}
