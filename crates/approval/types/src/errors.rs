//! Error types for the approval domain

use crate::{ApprovalId, ApprovalState, ApproverId};

/// Errors that can occur when creating or transitioning an approval
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("Approval not found: {0}")]
    NotFound(ApprovalId),

    /// Benign: the request already reached a terminal state.
    #[error("Approval {id} already resolved as {state}")]
    AlreadyResolved { id: ApprovalId, state: ApprovalState },

    #[error("Approver {approver} is not authorized for approval {id}")]
    UnauthorizedApprover { id: ApprovalId, approver: ApproverId },

    #[error("Invalid approver chain: {0}")]
    InvalidChain(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

impl ApprovalError {
    /// `AlreadyResolved` is an idempotent no-op from the caller's side.
    pub fn is_already_resolved(&self) -> bool {
        matches!(self, ApprovalError::AlreadyResolved { .. })
    }
}

/// Result type alias for approval operations
pub type ApprovalResult<T> = Result<T, ApprovalError>;
