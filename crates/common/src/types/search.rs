use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Node;

/// Filters AND-ed together by advanced search.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchFilters {
    pub segments: Vec<String>,
    pub categories: Vec<String>,
    pub content_types: Vec<String>,
    /// Matched against `company` with a contains predicate.
    pub organizations: Vec<String>,
    pub date_range: Option<DateRange>,
    /// Only nodes whose Phase-2 enrichment has completed.
    pub has_complete_metadata: Option<bool>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
            && self.categories.is_empty()
            && self.content_types.is_empty()
            && self.organizations.is_empty()
            && self.date_range.is_none()
            && self.has_complete_metadata.is_none()
    }
}

/// Inclusive date range over `date_added`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

/// Page-number pagination used by advanced search.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { page: 1, limit: 20 }
    }
}

impl Pagination {
    pub fn offset(&self) -> u32 {
        self.page.saturating_sub(1) * self.limit
    }
}

/// One search hit with highlighting context.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub node: Node,
    /// Field names whose snippet carried a highlight marker.
    #[serde(default)]
    pub matched_fields: Vec<String>,
    /// First non-empty snippet among short/phrase/ai-summary.
    #[serde(default)]
    pub snippet: Option<String>,
}

/// Grouped counts over the matching set, used to drive UI filters.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFacets {
    pub segments: HashMap<String, i64>,
    pub categories: HashMap<String, i64>,
    pub content_types: HashMap<String, i64>,
    /// Top organizations by count.
    pub organizations: HashMap<String, i64>,
}

/// Advanced search response: hits, facets, and paging.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub facets: SearchFacets,
    /// Unclamped total number of matches.
    pub total: i64,
    pub page: u32,
    pub limit: u32,
}
