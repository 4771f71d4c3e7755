//! Share links and access levels.
//!
//! A share link is a capability: whoever holds the token gets the link's
//! access level on one page, no account required. Links never expire; the
//! owner revokes them. Access is fixed at creation; to change it, revoke
//! and create a new link.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::ids::PageId;

/// Access a caller asks for, or a share link carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum AccessLevel {
    View,
    Edit,
}

impl AccessLevel {
    /// Whether a link carrying `self` satisfies a `required` level.
    ///
    /// Edit satisfies view; view never satisfies edit.
    pub fn satisfies(self, required: AccessLevel) -> bool {
        match required {
            AccessLevel::View => true,
            AccessLevel::Edit => self == AccessLevel::Edit,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::View => "view",
            AccessLevel::Edit => "edit",
        }
    }

    /// Parse from string (case-insensitive).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }
}

/// What access resolution granted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grant {
    Owner,
    Edit,
    View,
}

impl Grant {
    pub fn can_edit(self) -> bool {
        matches!(self, Grant::Owner | Grant::Edit)
    }

    pub fn is_owner(self) -> bool {
        self == Grant::Owner
    }
}

impl From<AccessLevel> for Grant {
    fn from(level: AccessLevel) -> Self {
        match level {
            AccessLevel::View => Grant::View,
            AccessLevel::Edit => Grant::Edit,
        }
    }
}

/// A revocable capability token for one page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareLink {
    pub token: String,
    pub page_id: PageId,
    pub access: AccessLevel,
    pub created_by: String,
    /// One-way: once revoked, a link stays revoked.
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
}

impl ShareLink {
    /// Whether this link currently opens `page_id`.
    pub fn opens(&self, page_id: &PageId) -> bool {
        !self.revoked && &self.page_id == page_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_satisfies() {
        assert!(AccessLevel::Edit.satisfies(AccessLevel::View));
        assert!(AccessLevel::Edit.satisfies(AccessLevel::Edit));
        assert!(AccessLevel::View.satisfies(AccessLevel::View));
        assert!(!AccessLevel::View.satisfies(AccessLevel::Edit));
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!(AccessLevel::from_str("EDIT"), Some(AccessLevel::Edit));
        assert_eq!(AccessLevel::from_str("view"), Some(AccessLevel::View));
        assert_eq!(AccessLevel::from_str("admin"), None);
        assert_eq!(AccessLevel::Edit.to_string(), "edit");
        assert_eq!(serde_json::to_string(&AccessLevel::View).unwrap(), "\"view\"");
    }

    #[test]
    fn test_grant() {
        assert!(Grant::Owner.can_edit());
        assert!(Grant::Edit.can_edit());
        assert!(!Grant::View.can_edit());
        assert_eq!(Grant::from(AccessLevel::Edit), Grant::Edit);
    }

    #[test]
    fn test_link_opens() {
        let page = PageId::new();
        let mut link = ShareLink {
            token: "t".into(),
            page_id: page,
            access: AccessLevel::View,
            created_by: "amy".into(),
            revoked: false,
            created_at: Utc::now(),
        };
        assert!(link.opens(&page));
        assert!(!link.opens(&PageId::new()));
        link.revoked = true;
        assert!(!link.opens(&page));
    }
}
