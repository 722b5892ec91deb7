use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{JobId, NodeId};

use super::{Classification, ExtractionMetadata, Node};

/// Body of `POST /api/import`. A missing `url` maps to URL_REQUIRED, an
/// empty one to URL_EMPTY.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub force_refresh: bool,
    #[serde(default)]
    pub priority: Option<ImportPriority>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportPriority {
    Low,
    Normal,
    High,
}

/// Both hierarchy codes assigned to a node at import.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyCodes {
    pub function: String,
    pub organization: String,
}

/// Phase-2 enrichment enqueue status.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Phase2Status {
    pub queued: bool,
    #[serde(default)]
    pub job_id: Option<JobId>,
}

/// Result of a completed import.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub node_id: NodeId,
    /// True when the response was served from the import cache or an
    /// existing node with the same URL.
    pub cached: bool,
    pub node: Node,
    pub classification: Classification,
    pub hierarchy_codes: HierarchyCodes,
    pub metadata: ExtractionMetadata,
    pub phase2: Phase2Status,
}

/// Response of `GET /api/import/check`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportCheck {
    pub exists: bool,
    pub cached: bool,
    #[serde(default)]
    pub node_id: Option<NodeId>,
    #[serde(default)]
    pub classification: Option<Classification>,
    #[serde(default)]
    pub cached_at: Option<DateTime<Utc>>,
}

/// Import cache counters for `GET /api/import/cache/stats`.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportCacheStats {
    pub entries: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}
