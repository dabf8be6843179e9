//! Access-control claims and attribute matching
//!
//! Authenticated requests carry a set of attributes granted to the user.
//! Operations declare the attributes they require; an attribute is satisfied
//! either literally or through a wildcard ancestor (e.g. `storage:aips:*`
//! covers `storage:aips:download`). A bare `*` grants everything.

use serde::{Deserialize, Serialize};

// Attributes recognized by the storage API.
pub const AIPS_LIST_ATTR: &str = "storage:aips:list";
pub const AIPS_READ_ATTR: &str = "storage:aips:read";
pub const AIPS_CREATE_ATTR: &str = "storage:aips:create";
pub const AIPS_SUBMIT_ATTR: &str = "storage:aips:submit";
pub const AIPS_DOWNLOAD_ATTR: &str = "storage:aips:download";
pub const AIPS_MOVE_ATTR: &str = "storage:aips:move";
pub const AIPS_REVIEW_ATTR: &str = "storage:aips:review";
pub const AIPS_WORKFLOWS_LIST_ATTR: &str = "storage:aips:workflows:list";
pub const LOCATIONS_LIST_ATTR: &str = "storage:locations:list";
pub const LOCATIONS_READ_ATTR: &str = "storage:locations:read";
pub const LOCATIONS_CREATE_ATTR: &str = "storage:locations:create";
pub const LOCATIONS_AIPS_LIST_ATTR: &str = "storage:locations:aips:list";

/// Claims extracted from a verified access token.
///
/// `iss` and `sub` together identify the user; the deletion review flow
/// relies on that pair to tell requester and reviewer apart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub iss: String,
    #[serde(default)]
    pub sub: String,
    /// Granted attributes. `None` means attribute checks are disabled for
    /// this principal and every operation is allowed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Vec<String>>,
}

impl Claims {
    /// Reports whether these claims satisfy all of the required attributes.
    ///
    /// Matching walks each required attribute up its `:`-separated ancestry,
    /// so `storage:aips:list` is satisfied by itself, `storage:aips:*`, or
    /// `storage:*`.
    pub fn check_attributes(&self, required: &[&str]) -> bool {
        let Some(attrs) = &self.attributes else {
            return true;
        };
        if attrs.iter().any(|a| a == "*") {
            return true;
        }
        for req in required {
            let mut attr = (*req).to_string();
            while !attrs.iter().any(|a| *a == attr) {
                let trimmed = attr.strip_suffix(":*").unwrap_or(&attr);
                match trimmed.rfind(':') {
                    Some(i) => attr = format!("{}:*", &trimmed[..i]),
                    None => return false,
                }
            }
        }
        true
    }
}

/// Attribute check over an optional claims value. Absent claims (auth
/// disabled) allow everything.
pub fn check_attributes(claims: Option<&Claims>, required: &[&str]) -> bool {
    match claims {
        Some(c) => c.check_attributes(required),
        None => true,
    }
}
