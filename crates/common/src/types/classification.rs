use serde::{Deserialize, Serialize};

/// Fallback codes used when the LLM is unavailable or returns an invalid
/// classification.
pub const FALLBACK_SEGMENT: &str = "U";
pub const FALLBACK_CATEGORY: &str = "INBOX";
pub const FALLBACK_CONTENT_TYPE: &str = "O";
pub const FALLBACK_CONFIDENCE: f64 = 0.3;

/// LLM-produced classification of an imported node.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    /// Single-character segment code from the closed taxonomy.
    pub segment: String,
    /// Short mnemonic category, e.g. `LLM` or `WEB`.
    pub category: String,
    /// Single-character content-type code.
    pub content_type: String,
    #[serde(default)]
    pub organization: Option<String>,
    pub confidence: f64,
    #[serde(default)]
    pub key_concepts: Vec<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

impl Classification {
    /// The Uncategorized/Inbox/other default.
    pub fn fallback() -> Self {
        Self {
            segment: FALLBACK_SEGMENT.to_string(),
            category: FALLBACK_CATEGORY.to_string(),
            content_type: FALLBACK_CONTENT_TYPE.to_string(),
            organization: None,
            confidence: FALLBACK_CONFIDENCE,
            key_concepts: Vec::new(),
            summary: None,
        }
    }

    /// Replace missing or malformed fields with the fallback values and
    /// clamp confidence into [0, 1]. Key concepts are capped at five.
    pub fn sanitized(mut self) -> Self {
        if self.segment.trim().is_empty() {
            self.segment = FALLBACK_SEGMENT.to_string();
        }
        if self.category.trim().is_empty() {
            self.category = FALLBACK_CATEGORY.to_string();
        }
        if self.content_type.trim().is_empty() {
            self.content_type = FALLBACK_CONTENT_TYPE.to_string();
        }
        self.segment = self.segment.trim().to_ascii_uppercase();
        self.category = self.category.trim().to_ascii_uppercase();
        self.content_type = self.content_type.trim().to_ascii_uppercase();
        if !self.confidence.is_finite() {
            self.confidence = FALLBACK_CONFIDENCE;
        }
        self.confidence = self.confidence.clamp(0.0, 1.0);
        self.key_concepts.retain(|c| !c.trim().is_empty());
        self.key_concepts.truncate(5);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback() {
        let c = Classification::fallback();
        assert_eq!(c.segment, "U");
        assert_eq!(c.category, "INBOX");
        assert_eq!(c.content_type, "O");
        assert!((c.confidence - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn test_sanitize_clamps_and_caps() {
        let c = Classification {
            segment: " a ".into(),
            category: "llm".into(),
            content_type: "".into(),
            organization: None,
            confidence: 3.5,
            key_concepts: (0..8).map(|i| format!("c{}", i)).collect(),
            summary: None,
        }
        .sanitized();
        assert_eq!(c.segment, "A");
        assert_eq!(c.category, "LLM");
        assert_eq!(c.content_type, "O");
        assert!((c.confidence - 1.0).abs() < f64::EPSILON);
        assert_eq!(c.key_concepts.len(), 5);
    }
}
