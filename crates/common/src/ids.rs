use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! define_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            pub fn parse(s: &str) -> Option<Self> {
                Uuid::parse_str(s).ok().map(Self)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id!(NodeId, "Typed wrapper for node UUIDs in the knowledge store.");
define_id!(SegmentId, "Typed wrapper for segment taxonomy root UUIDs.");
define_id!(
    OrganizationId,
    "Typed wrapper for organization taxonomy root UUIDs."
);
define_id!(
    RegistryId,
    "Typed wrapper for metadata code registry entry UUIDs."
);
define_id!(ChangeId, "Typed wrapper for hierarchy change audit row UUIDs.");
define_id!(JobId, "Typed wrapper for enrichment job UUIDs.");

impl NodeId {
    /// First 8 hex characters of the UUID, used as the last-resort
    /// hierarchy differentiator.
    pub fn short_prefix(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl PartialOrd for NodeId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeId {
    /// Lexicographic order over the canonical hyphenated form — the order
    /// similarity pair keys are normalized by.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.to_string().cmp(&other.to_string())
    }
}
