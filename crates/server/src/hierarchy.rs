//! Hierarchy code assembly and the sibling differentiator.
//!
//! A function code is `SEGMENT.CATEGORY.CONTENT_TYPE.differentiator`; an
//! organization code is `ORG_ROOT[.company].differentiator`. The
//! differentiator walks a fixed priority list — brand, version, variant,
//! creator, date, unique_id — until one value distinguishes the node from
//! every sibling at the same prefix.

use serde_json::Value;

use decant_common::types::{normalize_segment, Classification, Extraction, HierarchyView};
use decant_common::NodeId;

use crate::store::Store;

/// Organization root nodes attach under when nothing better is known.
pub const DEFAULT_ORGANIZATION_ROOT: &str = "PERSONAL";

/// Differentiator priority order.
const PRIORITIES: [DifferentiatorKind; 6] = [
    DifferentiatorKind::Brand,
    DifferentiatorKind::Version,
    DifferentiatorKind::Variant,
    DifferentiatorKind::Creator,
    DifferentiatorKind::Date,
    DifferentiatorKind::UniqueId,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DifferentiatorKind {
    Brand,
    Version,
    Variant,
    Creator,
    Date,
    UniqueId,
}

impl DifferentiatorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Brand => "brand",
            Self::Version => "version",
            Self::Variant => "variant",
            Self::Creator => "creator",
            Self::Date => "date",
            Self::UniqueId => "unique_id",
        }
    }
}

/// One assigned code plus how its tail was chosen.
#[derive(Clone, Debug)]
pub struct AssignedCode {
    pub code: String,
    pub parent_id: Option<NodeId>,
    pub differentiator: DifferentiatorKind,
    /// True when every priority level tied and the UUID prefix decided.
    pub collision: bool,
}

/// Assigns hierarchy codes against the live sibling sets in the store.
pub struct HierarchyAssigner<'a> {
    store: &'a Store,
}

impl<'a> HierarchyAssigner<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Function code: classification prefix + differentiator tail.
    pub async fn assign_function_code(
        &self,
        node_id: NodeId,
        title: &str,
        classification: &Classification,
        extraction: &Extraction,
    ) -> Result<AssignedCode, decant_common::DecantError> {
        let prefix = format!(
            "{}.{}.{}",
            classification.segment, classification.category, classification.content_type
        );
        self.assign(HierarchyView::Function, &prefix, node_id, title, classification, extraction)
            .await
    }

    /// Organization code: organization root, the normalized company when
    /// known, then a differentiator tail.
    pub async fn assign_organization_code(
        &self,
        node_id: NodeId,
        title: &str,
        classification: &Classification,
        extraction: &Extraction,
    ) -> Result<AssignedCode, decant_common::DecantError> {
        let company = classification
            .organization
            .as_deref()
            .map(normalize_segment)
            .filter(|c| !c.is_empty());

        let prefix = match company {
            Some(company) => format!("{}.{}", DEFAULT_ORGANIZATION_ROOT, company),
            None => DEFAULT_ORGANIZATION_ROOT.to_string(),
        };

        self.assign(
            HierarchyView::Organization,
            &prefix,
            node_id,
            title,
            classification,
            extraction,
        )
        .await
    }

    async fn assign(
        &self,
        view: HierarchyView,
        prefix: &str,
        node_id: NodeId,
        title: &str,
        classification: &Classification,
        extraction: &Extraction,
    ) -> Result<AssignedCode, decant_common::DecantError> {
        let sibling_codes = self.store.sibling_codes(view, prefix).await?;
        let taken: Vec<String> = sibling_codes
            .iter()
            .filter_map(|code| code.rsplit('.').next().map(String::from))
            .collect();

        let (tail, differentiator, collision) =
            differentiate(node_id, title, classification, extraction, &taken);

        // Attach to the node holding the prefix code, when one exists.
        let parent_id = match self.store.get_node_by_code(view, prefix).await {
            Ok(parent) => Some(parent.id),
            Err(_) => None,
        };

        Ok(AssignedCode {
            code: format!("{}.{}", prefix, tail),
            parent_id,
            differentiator,
            collision,
        })
    }
}

/// Walk the priority list until a candidate distinguishes the node from
/// every taken sibling tail; fall back to the UUID prefix.
fn differentiate(
    node_id: NodeId,
    title: &str,
    classification: &Classification,
    extraction: &Extraction,
    taken: &[String],
) -> (String, DifferentiatorKind, bool) {
    for kind in PRIORITIES {
        let candidate = match kind {
            DifferentiatorKind::Brand => brand_candidate(classification, extraction),
            DifferentiatorKind::Version => version_candidate(title),
            DifferentiatorKind::Variant => variant_candidate(extraction),
            DifferentiatorKind::Creator => creator_candidate(extraction),
            DifferentiatorKind::Date => date_candidate(extraction),
            DifferentiatorKind::UniqueId => Some(node_id.short_prefix()),
        };

        let Some(candidate) = candidate else {
            continue;
        };
        let normalized = if kind == DifferentiatorKind::Date {
            candidate
        } else {
            normalize_segment(&candidate)
        };
        if normalized.is_empty() {
            continue;
        }

        if !taken.iter().any(|t| t == &normalized) {
            let collision = kind == DifferentiatorKind::UniqueId;
            return (normalized, kind, collision);
        }
    }

    // Every level tied, unique_id included (astronomically unlikely):
    // suffix the UUID prefix with a counter until free.
    let base = node_id.short_prefix();
    let mut n = 2u32;
    let mut tail = base.clone();
    while taken.iter().any(|t| t == &tail) {
        tail = format!("{}_{}", base, n);
        n += 1;
    }
    (tail, DifferentiatorKind::UniqueId, true)
}

fn brand_candidate(classification: &Classification, extraction: &Extraction) -> Option<String> {
    classification
        .organization
        .clone()
        .or_else(|| string_field(extraction, "siteName"))
        .or_else(|| string_field(extraction, "channelTitle"))
        .or_else(|| string_field(extraction, "owner"))
}

/// A version-shaped token in the title: `v2`, `3.5`, `v1.0.4`.
fn version_candidate(title: &str) -> Option<String> {
    for token in title.split_whitespace() {
        let token = token.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '.');
        let looks_versioned = token
            .strip_prefix(['v', 'V'])
            .map(|rest| rest.chars().next().is_some_and(|c| c.is_ascii_digit()))
            .unwrap_or(false)
            || (token.contains('.')
                && token
                    .chars()
                    .all(|c| c.is_ascii_digit() || c == '.')
                && token.chars().any(|c| c.is_ascii_digit()));
        if looks_versioned {
            return Some(token.to_string());
        }
    }
    None
}

fn variant_candidate(extraction: &Extraction) -> Option<String> {
    string_field(extraction, "variant")
        .or_else(|| first_array_entry(extraction, "topics"))
        .or_else(|| first_array_entry(extraction, "tags"))
        .or_else(|| string_field(extraction, "repo"))
}

fn creator_candidate(extraction: &Extraction) -> Option<String> {
    string_field(extraction, "authorUsername")
        .or_else(|| string_field(extraction, "channelTitle"))
        .or_else(|| string_field(extraction, "owner"))
        .or_else(|| string_field(extraction, "authorName"))
}

/// Published/created timestamps normalized to `YYYYMMDD`.
fn date_candidate(extraction: &Extraction) -> Option<String> {
    let raw = string_field(extraction, "publishedAt")
        .or_else(|| string_field(extraction, "createdAt"))
        .or_else(|| string_field(extraction, "updatedAt"))?;

    let digits: String = raw
        .chars()
        .take(10)
        .filter(|c| c.is_ascii_digit())
        .collect();
    if digits.len() == 8 {
        Some(digits)
    } else {
        None
    }
}

fn string_field(extraction: &Extraction, key: &str) -> Option<String> {
    match extraction.data.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn first_array_entry(extraction: &Extraction, key: &str) -> Option<String> {
    match extraction.data.get(key) {
        Some(Value::Array(items)) => items.iter().find_map(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            _ => None,
        }),
        _ => None,
    }
}
