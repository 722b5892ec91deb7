use serde::{Deserialize, Serialize};

use crate::ids::{OrganizationId, SegmentId};

/// Which of the two orthogonal hierarchies a tree operation targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HierarchyView {
    Function,
    Organization,
}

impl HierarchyView {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Organization => "organization",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "function" => Some(Self::Function),
            "organization" => Some(Self::Organization),
            _ => None,
        }
    }
}

impl std::fmt::Display for HierarchyView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Function-hierarchy taxonomy root (a segment).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Segment {
    pub id: SegmentId,
    /// Short unique code, e.g. `A` or `AI_ML`.
    pub code: String,
    pub name: String,
    pub color: String,
}

/// Organization-hierarchy taxonomy root, e.g. `WORK` or `PERSONAL`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub code: String,
    pub name: String,
    pub color: String,
}
