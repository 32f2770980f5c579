//! Engine error types

use crate::intake::IntakeError;
use approval_store::StorageError;
use approval_types::ApprovalError;

/// Errors surfaced by the orchestrator and its collaborators
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Domain rule violated: unknown id, terminal request, wrong approver, bad chain
    #[error(transparent)]
    Approval(#[from] ApprovalError),

    #[error("storage error: {0}")]
    Storage(StorageError),

    /// Timer or store unavailable while re-arming after a restart
    #[error("recovery failed: {0}")]
    Recovery(String),

    #[error(transparent)]
    Intake(#[from] IntakeError),

    #[error("orchestrator is shutting down")]
    ShuttingDown,
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Rejected(inner) => EngineError::Approval(inner),
            other => EngineError::Storage(other),
        }
    }
}

impl EngineError {
    /// The domain error underneath, if any.
    pub fn approval(&self) -> Option<&ApprovalError> {
        match self {
            EngineError::Approval(inner) => Some(inner),
            _ => None,
        }
    }

    pub fn is_already_resolved(&self) -> bool {
        self.approval().is_some_and(ApprovalError::is_already_resolved)
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
