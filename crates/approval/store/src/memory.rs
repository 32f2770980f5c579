//! In-memory reference implementation of the approval store.
//!
//! Deterministic and test-friendly. One lock covers requests and audit
//! entries, so a transition and its entry always commit together. State
//! does not survive the process; use the PostgreSQL adapter for that.

use crate::chain::seal;
use crate::traits::{
    ApprovalFilter, ApprovalStore, AuditLog, CommittedTransition, QueryWindow,
};
use crate::{StorageError, StorageResult};
use approval_types::{ApprovalId, ApprovalRequest, AuditEntry, StateGuard, Transition};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Default)]
struct State {
    requests: HashMap<ApprovalId, ApprovalRequest>,
    audit: HashMap<ApprovalId, Vec<AuditEntry>>,
}

/// In-memory approval store.
#[derive(Default)]
pub struct InMemoryApprovalStore {
    state: RwLock<State>,
}

impl InMemoryApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApprovalStore for InMemoryApprovalStore {
    async fn create(&self, request: ApprovalRequest) -> StorageResult<AuditEntry> {
        let mut guard = self
            .state
            .write()
            .map_err(|_| StorageError::Backend("approval store lock poisoned".to_string()))?;

        if guard.requests.contains_key(&request.id) {
            return Err(StorageError::Conflict(format!(
                "approval {} already exists",
                request.id
            )));
        }

        let entry = seal(request.creation_draft(), &request.id, 1, None)?;
        guard.audit.insert(request.id.clone(), vec![entry.clone()]);
        guard.requests.insert(request.id.clone(), request);
        Ok(entry)
    }

    async fn compare_and_transition(
        &self,
        id: &ApprovalId,
        expected: StateGuard,
        transition: &Transition,
        at: DateTime<Utc>,
    ) -> StorageResult<Option<CommittedTransition>> {
        let mut guard = self
            .state
            .write()
            .map_err(|_| StorageError::Backend("approval store lock poisoned".to_string()))?;
        let state = &mut *guard;

        let current = state
            .requests
            .get(id)
            .ok_or_else(|| StorageError::NotFound(format!("approval {} not found", id)))?;

        if !expected.matches(current) {
            tracing::debug!(
                approval_id = %id,
                expected = %expected.state,
                actual = %current.state,
                "Guard mismatch, transition not applied"
            );
            return Ok(None);
        }

        // Mutate a copy so a rejected transition leaves the record untouched.
        let mut updated = current.clone();
        let draft = updated.apply(transition, at)?;

        let entries = state.audit.entry(id.clone()).or_default();
        let previous_hash = entries.last().map(|e| e.hash.clone());
        let entry = seal(draft, id, entries.len() as u64 + 1, previous_hash)?;
        entries.push(entry.clone());
        state.requests.insert(id.clone(), updated.clone());

        Ok(Some(CommittedTransition {
            request: updated,
            entry,
        }))
    }

    async fn get(&self, id: &ApprovalId) -> StorageResult<Option<ApprovalRequest>> {
        let guard = self
            .state
            .read()
            .map_err(|_| StorageError::Backend("approval store lock poisoned".to_string()))?;
        Ok(guard.requests.get(id).cloned())
    }

    async fn list(&self, filter: &ApprovalFilter) -> StorageResult<Vec<ApprovalRequest>> {
        let guard = self
            .state
            .read()
            .map_err(|_| StorageError::Backend("approval store lock poisoned".to_string()))?;
        let mut values = guard
            .requests
            .values()
            .filter(|r| filter.state.map_or(true, |s| r.state == s))
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(apply_window(values, filter.window))
    }

    async fn list_awaiting(&self) -> StorageResult<Vec<ApprovalRequest>> {
        let guard = self
            .state
            .read()
            .map_err(|_| StorageError::Backend("approval store lock poisoned".to_string()))?;
        Ok(guard
            .requests
            .values()
            .filter(|r| r.state.is_awaiting())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AuditLog for InMemoryApprovalStore {
    async fn list_audit(
        &self,
        id: &ApprovalId,
        window: QueryWindow,
    ) -> StorageResult<Vec<AuditEntry>> {
        let guard = self
            .state
            .read()
            .map_err(|_| StorageError::Backend("audit lock poisoned".to_string()))?;
        let values = guard.audit.get(id).cloned().unwrap_or_default();
        Ok(apply_window(values, window))
    }
}

fn apply_window<T>(items: Vec<T>, window: QueryWindow) -> Vec<T> {
    let iter = items.into_iter().skip(window.offset);
    if window.limit == 0 {
        iter.collect()
    } else {
        iter.take(window.limit).collect()
    }
}
