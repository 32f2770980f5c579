use crate::StorageResult;
use approval_types::{
    ApprovalId, ApprovalRequest, ApprovalState, AuditEntry, StateGuard, Transition,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Generic query window for paged reads. `limit == 0` means unbounded.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryWindow {
    pub limit: usize,
    pub offset: usize,
}

impl QueryWindow {
    pub fn page(limit: usize, offset: usize) -> Self {
        Self { limit, offset }
    }
}

/// Filter for listing approval requests.
#[derive(Debug, Clone, Default)]
pub struct ApprovalFilter {
    pub state: Option<ApprovalState>,
    pub window: QueryWindow,
}

/// A transition that won its guard, with the audit entry written for it.
#[derive(Debug, Clone)]
pub struct CommittedTransition {
    pub request: ApprovalRequest,
    pub entry: AuditEntry,
}

/// Storage interface for approval request records.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    /// Insert a new request and its `created` audit entry.
    async fn create(&self, request: ApprovalRequest) -> StorageResult<AuditEntry>;

    /// Atomically apply `transition` if the stored request still matches `guard`.
    ///
    /// Returns `Ok(None)` when the guard no longer matches: someone else
    /// transitioned first and the caller must not act. Returns
    /// `Err(StorageError::NotFound)` for an unknown id and
    /// `Err(StorageError::Rejected)` when the guard matched but the
    /// transition is illegal for the request.
    async fn compare_and_transition(
        &self,
        id: &ApprovalId,
        guard: StateGuard,
        transition: &Transition,
        at: DateTime<Utc>,
    ) -> StorageResult<Option<CommittedTransition>>;

    /// Get one request by id.
    async fn get(&self, id: &ApprovalId) -> StorageResult<Option<ApprovalRequest>>;

    /// List requests newest-first.
    async fn list(&self, filter: &ApprovalFilter) -> StorageResult<Vec<ApprovalRequest>>;

    /// Every request still PENDING or ESCALATED, for timer recovery.
    async fn list_awaiting(&self) -> StorageResult<Vec<ApprovalRequest>>;
}

/// Read access to the per-approval audit trail.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Read one approval's entries oldest-first.
    async fn list_audit(
        &self,
        id: &ApprovalId,
        window: QueryWindow,
    ) -> StorageResult<Vec<AuditEntry>>;
}

/// Storage bundle used by the approval engine.
pub trait ApprovalStorage: ApprovalStore + AuditLog + Send + Sync {}

impl<T> ApprovalStorage for T where T: ApprovalStore + AuditLog + Send + Sync {}
