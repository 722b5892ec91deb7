use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ChangeId, NodeId};

use super::HierarchyView;

/// Kind of mutation recorded in the hierarchy audit log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Created,
    Updated,
    Moved,
    Restructured,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Moved => "moved",
            Self::Restructured => "restructured",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "updated" => Some(Self::Updated),
            "moved" => Some(Self::Moved),
            "restructured" => Some(Self::Restructured),
            _ => None,
        }
    }
}

/// What caused a hierarchy mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeTrigger {
    Import,
    UserMove,
    Restructure,
    Merge,
}

impl ChangeTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Import => "import",
            Self::UserMove => "user_move",
            Self::Restructure => "restructure",
            Self::Merge => "merge",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "import" => Some(Self::Import),
            "user_move" => Some(Self::UserMove),
            "restructure" => Some(Self::Restructure),
            "merge" => Some(Self::Merge),
            _ => None,
        }
    }
}

/// Append-only audit row for a hierarchy code mutation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HierarchyCodeChange {
    pub id: ChangeId,
    pub change_type: ChangeType,
    pub hierarchy_type: HierarchyView,
    pub triggered_by: ChangeTrigger,
    #[serde(default)]
    pub old_code: Option<String>,
    #[serde(default)]
    pub new_code: Option<String>,
    #[serde(default)]
    pub node_id: Option<NodeId>,
    #[serde(default)]
    pub related_node_ids: Vec<NodeId>,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl HierarchyCodeChange {
    pub fn new(
        change_type: ChangeType,
        hierarchy_type: HierarchyView,
        triggered_by: ChangeTrigger,
    ) -> Self {
        Self {
            id: ChangeId::new(),
            change_type,
            hierarchy_type,
            triggered_by,
            old_code: None,
            new_code: None,
            node_id: None,
            related_node_ids: Vec::new(),
            metadata: Value::Null,
            created_at: Utc::now(),
        }
    }
}

/// The dotted prefix before the last `.`, or None for a root code.
pub fn parent_code(code: &str) -> Option<&str> {
    code.rsplit_once('.').map(|(prefix, _)| prefix)
}

/// Proper-prefix ancestor codes of `code`, nearest first.
///
/// `A.LLM.T.1` yields `["A.LLM.T", "A.LLM", "A"]`.
pub fn ancestor_codes(code: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = code;
    while let Some(parent) = parent_code(current) {
        out.push(parent.to_string());
        current = parent;
    }
    out
}

/// Canonicalize one code segment: lowercase, non-alphanumerics collapsed
/// to `_`, leading/trailing underscores trimmed.
pub fn normalize_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut prev_underscore = false;
    for c in raw.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            prev_underscore = false;
        } else if !prev_underscore && !out.is_empty() {
            out.push('_');
            prev_underscore = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_code() {
        assert_eq!(parent_code("A.LLM.T.1"), Some("A.LLM.T"));
        assert_eq!(parent_code("A"), None);
    }

    #[test]
    fn test_ancestor_codes() {
        assert_eq!(
            ancestor_codes("A.LLM.T.1"),
            vec!["A.LLM.T".to_string(), "A.LLM".to_string(), "A".to_string()]
        );
        assert!(ancestor_codes("A").is_empty());
    }

    #[test]
    fn test_normalize_segment() {
        assert_eq!(normalize_segment("Anthropic Claude"), "anthropic_claude");
        assert_eq!(normalize_segment("  GPT-4o (mini)  "), "gpt_4o_mini");
        assert_eq!(normalize_segment("v2.1.0"), "v2_1_0");
        assert_eq!(normalize_segment("___"), "");
    }
}
