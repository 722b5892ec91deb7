use serde::{Deserialize, Serialize};

use crate::ids::RegistryId;

/// Typed vocabulary class for metadata codes. The type determines the
/// weight a code contributes to weighted-Jaccard similarity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetadataType {
    #[serde(rename = "ORG")]
    Org,
    #[serde(rename = "DOM")]
    Dom,
    #[serde(rename = "FNC")]
    Fnc,
    #[serde(rename = "TEC")]
    Tec,
    #[serde(rename = "CON")]
    Con,
    #[serde(rename = "IND")]
    Ind,
    #[serde(rename = "AUD")]
    Aud,
    #[serde(rename = "PRC")]
    Prc,
    #[serde(rename = "LIC")]
    Lic,
    #[serde(rename = "LNG")]
    Lng,
    #[serde(rename = "PLT")]
    Plt,
}

impl MetadataType {
    pub const ALL: [MetadataType; 11] = [
        Self::Org,
        Self::Dom,
        Self::Fnc,
        Self::Tec,
        Self::Con,
        Self::Ind,
        Self::Aud,
        Self::Prc,
        Self::Lic,
        Self::Lng,
        Self::Plt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Org => "ORG",
            Self::Dom => "DOM",
            Self::Fnc => "FNC",
            Self::Tec => "TEC",
            Self::Con => "CON",
            Self::Ind => "IND",
            Self::Aud => "AUD",
            Self::Prc => "PRC",
            Self::Lic => "LIC",
            Self::Lng => "LNG",
            Self::Plt => "PLT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ORG" => Some(Self::Org),
            "DOM" => Some(Self::Dom),
            "FNC" => Some(Self::Fnc),
            "TEC" => Some(Self::Tec),
            "CON" => Some(Self::Con),
            "IND" => Some(Self::Ind),
            "AUD" => Some(Self::Aud),
            "PRC" => Some(Self::Prc),
            "LIC" => Some(Self::Lic),
            "LNG" => Some(Self::Lng),
            "PLT" => Some(Self::Plt),
            _ => None,
        }
    }

    /// Similarity weight contributed by a code of this type.
    pub fn weight(&self) -> f64 {
        match self {
            Self::Org => 2.0,
            Self::Dom | Self::Fnc | Self::Ind => 1.5,
            Self::Tec | Self::Con | Self::Aud | Self::Plt => 1.0,
            Self::Prc | Self::Lic | Self::Lng => 0.5,
        }
    }
}

impl std::fmt::Display for MetadataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed metadata code, e.g. `DOM:AI_ML`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetadataCode {
    pub code_type: MetadataType,
    pub code: String,
}

impl MetadataCode {
    pub fn new(code_type: MetadataType, code: impl Into<String>) -> Self {
        Self {
            code_type,
            code: code.into(),
        }
    }

    /// Parse the `TYPE:CODE` tag form.
    pub fn parse_tag(tag: &str) -> Option<Self> {
        let (ty, code) = tag.split_once(':')?;
        let code = code.trim();
        if code.is_empty() {
            return None;
        }
        Some(Self {
            code_type: MetadataType::parse(ty.trim())?,
            code: code.to_string(),
        })
    }

    pub fn tag(&self) -> String {
        format!("{}:{}", self.code_type.as_str(), self.code)
    }

    pub fn weight(&self) -> f64 {
        self.code_type.weight()
    }
}

/// A row in the metadata code registry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub id: RegistryId,
    pub code_type: MetadataType,
    pub code: String,
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub usage_count: i64,
}

/// Where a node's metadata assignment came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataSource {
    Ai,
    User,
    Import,
}

impl MetadataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ai => "ai",
            Self::User => "user",
            Self::Import => "import",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ai" => Some(Self::Ai),
            "user" => Some(Self::User),
            "import" => Some(Self::Import),
            _ => None,
        }
    }
}

/// One metadata assignment on a node, joined with its registry entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeMetadataEntry {
    pub registry_id: RegistryId,
    pub code_type: MetadataType,
    pub code: String,
    pub confidence: f64,
    pub source: MetadataSource,
}

/// Input for `set_node_metadata`: the full replacement set for a node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetadataSpec {
    pub code_type: MetadataType,
    pub code: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub confidence: f64,
    pub source: MetadataSource,
}

impl MetadataSpec {
    pub fn ai(code: MetadataCode, confidence: f64) -> Self {
        Self {
            code_type: code.code_type,
            code: code.code,
            display_name: None,
            confidence,
            source: MetadataSource::Ai,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights() {
        assert!((MetadataType::Org.weight() - 2.0).abs() < f64::EPSILON);
        assert!((MetadataType::Dom.weight() - 1.5).abs() < f64::EPSILON);
        assert!((MetadataType::Tec.weight() - 1.0).abs() < f64::EPSILON);
        assert!((MetadataType::Lic.weight() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_tag_round_trip() {
        let code = MetadataCode::new(MetadataType::Dom, "AI_ML");
        assert_eq!(code.tag(), "DOM:AI_ML");
        assert_eq!(MetadataCode::parse_tag("DOM:AI_ML"), Some(code));
    }

    #[test]
    fn test_parse_tag_rejects_garbage() {
        assert_eq!(MetadataCode::parse_tag("no-colon"), None);
        assert_eq!(MetadataCode::parse_tag("XXX:CODE"), None);
        assert_eq!(MetadataCode::parse_tag("ORG:"), None);
    }
}
