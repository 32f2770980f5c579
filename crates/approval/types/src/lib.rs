//! Approval domain types
//!
//! An approval request walks an ordered chain of approvers. Each level
//! has its own SLA; when it lapses without a decision the request moves
//! to the next approver, and when the last level lapses it times out.
//!
//! # Core Concepts
//!
//! - **ApprovalRequest**: The persisted unit of work
//! - **ApprovalState**: Two awaiting states and four terminal ones
//! - **Transition**: The only way a request changes, applied under a [`StateGuard`]
//! - **AuditEntry**: One append-only record per committed transition
//!
//! Everything here is synchronous and storage-agnostic. The store crate
//! decides how a transition is made atomic; this crate decides whether it
//! is legal.

#![deny(unsafe_code)]

pub mod audit;
pub mod errors;
pub mod ids;
pub mod request;

pub use audit::{AuditCause, AuditDraft, AuditEntry};
pub use errors::{ApprovalError, ApprovalResult};
pub use ids::{ApprovalId, ApproverId};
pub use request::{
    ApprovalRequest, ApprovalState, Decision, NewApproval, Outcome, SlaPolicy, StateGuard,
    Transition, MAX_SLA_SECS,
};
