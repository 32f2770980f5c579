//! Audit entries: one per committed transition
//!
//! Entries are append-only. The store numbers them per approval and
//! links each to its predecessor by hash; see `approval-store`.

use crate::{ApprovalId, ApprovalState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a transition happened
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCause {
    Created,
    Decision,
    /// An SLA lapsed
    Timeout,
    /// An operator escalated by hand
    Manual,
    Cancel,
}

impl AuditCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditCause::Created => "created",
            AuditCause::Decision => "decision",
            AuditCause::Timeout => "timeout",
            AuditCause::Manual => "manual",
            AuditCause::Cancel => "cancel",
        }
    }
}

impl std::fmt::Display for AuditCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An audit entry before the store assigns its sequence and hash
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditDraft {
    pub cause: AuditCause,
    /// `None` only for `Created`
    pub from_state: Option<ApprovalState>,
    pub to_state: ApprovalState,
    /// Chain level after the transition
    pub level: usize,
    pub actor: Option<String>,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditDraft {
    pub fn into_entry(
        self,
        approval_id: ApprovalId,
        sequence: u64,
        previous_hash: Option<String>,
        hash: String,
    ) -> AuditEntry {
        AuditEntry {
            approval_id,
            sequence,
            from_state: self.from_state,
            to_state: self.to_state,
            level: self.level,
            timestamp: self.timestamp,
            cause: self.cause,
            actor: self.actor,
            detail: self.detail,
            previous_hash,
            hash,
        }
    }
}

/// Persistent, tamper-evident record of one transition
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub approval_id: ApprovalId,
    /// 1-based position in this approval's history
    pub sequence: u64,
    pub from_state: Option<ApprovalState>,
    pub to_state: ApprovalState,
    pub level: usize,
    pub timestamp: DateTime<Utc>,
    pub cause: AuditCause,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub previous_hash: Option<String>,
    pub hash: String,
}

impl AuditEntry {
    /// Canonical JSON of everything the hash covers (all but `hash`).
    pub fn hash_material(&self) -> serde_json::Value {
        serde_json::json!({
            "approval_id": self.approval_id.as_str(),
            "sequence": self.sequence,
            "from_state": self.from_state,
            "to_state": self.to_state,
            "level": self.level,
            "timestamp": self.timestamp,
            "cause": self.cause,
            "actor": self.actor,
            "detail": self.detail,
            "previous_hash": self.previous_hash,
        })
    }
}
