//! Typed identifiers for pages and blocks.
//!
//! Both wrap UUIDv7 (time-ordered, globally unique) and display as standard
//! UUID text. The `short()` form (first 8 hex chars) is for log lines and
//! human-facing UI only, never used as a lookup key.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A page identifier (UUIDv7).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(uuid::Uuid);

/// A block identifier (UUIDv7).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(uuid::Uuid);

// ── Shared behavior ─────────────────────────────────────────────────────────

macro_rules! impl_typed_id {
    ($T:ident, $name:literal) => {
        impl $T {
            /// Create a new time-ordered ID (UUIDv7).
            pub fn new() -> Self {
                Self(uuid::Uuid::now_v7())
            }

            /// First 8 hex characters, for log lines only. Never a lookup key.
            pub fn short(&self) -> String {
                self.0.as_simple().to_string()[..8].to_string()
            }

            /// Parse from a hex string (32 chars, no hyphens) or standard UUID format.
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                uuid::Uuid::parse_str(s).map(Self)
            }

            /// The underlying UUID.
            pub fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }
        }

        impl Default for $T {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<uuid::Uuid> for $T {
            fn from(u: uuid::Uuid) -> Self {
                Self(u)
            }
        }

        impl From<$T> for uuid::Uuid {
            fn from(id: $T) -> uuid::Uuid {
                id.0
            }
        }

        impl std::str::FromStr for $T {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                // Full UUID with hyphens for log readability
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $name, self.short())
            }
        }
    };
}

impl_typed_id!(PageId, "PageId");
impl_typed_id!(BlockId, "BlockId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_time_ordered() {
        let ids: Vec<PageId> = (0..10).map(|_| PageId::new()).collect();
        for pair in ids.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
    }

    #[test]
    fn test_parse_both_forms() {
        let id = BlockId::new();
        let hyphenated = id.to_string();
        let simple = id.as_uuid().as_simple().to_string();
        assert_eq!(BlockId::parse(&hyphenated).unwrap(), id);
        assert_eq!(BlockId::parse(&simple).unwrap(), id);
        assert!(BlockId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn test_debug_uses_short_form() {
        let id = PageId::new();
        assert_eq!(format!("{:?}", id), format!("PageId({})", id.short()));
        assert_eq!(id.short().len(), 8);
    }

    #[test]
    fn test_serde_is_transparent() {
        let id = PageId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }
}
