//! Identifiers for approvals and approvers

use serde::{Deserialize, Serialize};

const APPROVAL_PREFIX: &str = "APR-";

/// Unique identifier for an approval request.
///
/// Rendered as `APR-` followed by 32 hex digits so it survives a round
/// trip through a mail subject line.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApprovalId(pub String);

impl ApprovalId {
    pub fn generate() -> Self {
        Self(format!(
            "{}{}",
            APPROVAL_PREFIX,
            uuid::Uuid::new_v4().simple()
        ))
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parse an identifier in its canonical `APR-<hex>` form.
    ///
    /// The prefix is matched case-insensitively; the result is normalized
    /// to an upper-case prefix and lower-case hex.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.len() != APPROVAL_PREFIX.len() + 32 {
            return None;
        }
        let (prefix, hex) = raw.split_at(APPROVAL_PREFIX.len());
        if !prefix.eq_ignore_ascii_case(APPROVAL_PREFIX) {
            return None;
        }
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        Some(Self(format!("{}{}", APPROVAL_PREFIX, hex.to_ascii_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        let end = (APPROVAL_PREFIX.len() + 8).min(self.0.len());
        &self.0[..end]
    }
}

impl std::fmt::Display for ApprovalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A contact handle for one approver in a chain (mail address, chat handle, ...)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApproverId(pub String);

impl ApproverId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Approver handles compare case-insensitively; mail addresses arrive
    /// in whatever case the sender's client chose.
    pub fn matches(&self, other: &ApproverId) -> bool {
        self.0.trim().eq_ignore_ascii_case(other.0.trim())
    }
}

impl std::fmt::Display for ApproverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ApproverId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ApproverId {
    fn from(value: String) -> Self {
        Self(value)
    }
}
