//! Audit ledger: read-side view over the store's audit trail.
//!
//! History is streamed page by page, replay folds it up to an instant,
//! and verification recomputes the hash chain.

use crate::error::{EngineError, EngineResult};
use approval_store::{verify_chain, ApprovalStorage, QueryWindow};
use approval_types::{ApprovalError, ApprovalId, ApprovalState, AuditEntry};
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Where an approval stood at some instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayPoint {
    pub state: ApprovalState,
    pub level: usize,
    /// Last audit entry at or before the instant
    pub sequence: u64,
    pub since: DateTime<Utc>,
}

/// Outcome of recomputing one approval's hash chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerVerification {
    pub approval_id: ApprovalId,
    pub entries: usize,
    pub intact: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broken_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Read access to audit history.
#[derive(Clone)]
pub struct AuditLedger {
    store: Arc<dyn ApprovalStorage>,
    page_size: usize,
}

impl AuditLedger {
    pub fn new(store: Arc<dyn ApprovalStorage>, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }

    /// Lazy history of `id`, oldest first. Does not check that `id` exists.
    pub fn history(&self, id: &ApprovalId) -> AuditHistory {
        AuditHistory {
            store: Arc::clone(&self.store),
            approval_id: id.clone(),
            page_size: self.page_size,
        }
    }

    /// State and level `id` had at `at`; `None` if it did not exist yet.
    pub async fn replay_at(
        &self,
        id: &ApprovalId,
        at: DateTime<Utc>,
    ) -> EngineResult<Option<ReplayPoint>> {
        self.ensure_exists(id).await?;

        let mut point = None;
        let mut entries = self.history(id).stream();
        while let Some(entry) = entries.try_next().await? {
            if entry.timestamp > at {
                break;
            }
            point = Some(ReplayPoint {
                state: entry.to_state,
                level: entry.level,
                sequence: entry.sequence,
                since: entry.timestamp,
            });
        }
        Ok(point)
    }

    /// Recompute the hash chain of `id` and report the first broken link.
    pub async fn verify(&self, id: &ApprovalId) -> EngineResult<LedgerVerification> {
        self.ensure_exists(id).await?;
        let entries = self.history(id).collect().await?;

        let (intact, broken_at, reason) = match verify_chain(&entries) {
            Ok(()) => (true, None, None),
            Err(broken) => (false, Some(broken.sequence), Some(broken.reason)),
        };
        Ok(LedgerVerification {
            approval_id: id.clone(),
            entries: entries.len(),
            intact,
            broken_at,
            reason,
        })
    }

    async fn ensure_exists(&self, id: &ApprovalId) -> EngineResult<()> {
        match self.store.get(id).await? {
            Some(_) => Ok(()),
            None => Err(ApprovalError::NotFound(id.clone()).into()),
        }
    }
}

/// Restartable, finite sequence of one approval's audit entries.
///
/// Each call to [`AuditHistory::stream`] starts again from the first entry.
#[derive(Clone)]
pub struct AuditHistory {
    store: Arc<dyn ApprovalStorage>,
    approval_id: ApprovalId,
    page_size: usize,
}

struct Cursor {
    store: Arc<dyn ApprovalStorage>,
    approval_id: ApprovalId,
    page_size: usize,
    offset: usize,
    buffered: VecDeque<AuditEntry>,
    exhausted: bool,
}

impl AuditHistory {
    pub fn approval_id(&self) -> &ApprovalId {
        &self.approval_id
    }

    pub fn stream(&self) -> BoxStream<'static, EngineResult<AuditEntry>> {
        let cursor = Cursor {
            store: Arc::clone(&self.store),
            approval_id: self.approval_id.clone(),
            page_size: self.page_size,
            offset: 0,
            buffered: VecDeque::new(),
            exhausted: false,
        };

        stream::unfold(cursor, |mut cursor| async move {
            loop {
                if let Some(entry) = cursor.buffered.pop_front() {
                    return Some((Ok(entry), cursor));
                }
                if cursor.exhausted {
                    return None;
                }

                let window = QueryWindow::page(cursor.page_size, cursor.offset);
                match cursor.store.list_audit(&cursor.approval_id, window).await {
                    Ok(page) => {
                        cursor.exhausted = page.len() < cursor.page_size;
                        cursor.offset += page.len();
                        cursor.buffered.extend(page);
                    }
                    Err(e) => {
                        cursor.exhausted = true;
                        return Some((Err(EngineError::from(e)), cursor));
                    }
                }
            }
        })
        .boxed()
    }

    pub async fn collect(&self) -> EngineResult<Vec<AuditEntry>> {
        self.stream().try_collect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approval_store::{ApprovalStore, InMemoryApprovalStore};
    use approval_types::{ApprovalRequest, NewApproval, SlaPolicy, Transition};
    use chrono::Duration;

    async fn escalated_twice(
        store: &InMemoryApprovalStore,
        t0: DateTime<Utc>,
    ) -> ApprovalRequest {
        let request = ApprovalRequest::create(
            NewApproval::new(["a", "b", "c"], SlaPolicy::Uniform(3600)),
            t0,
        )
        .unwrap();
        let id = request.id.clone();
        let mut guard = request.guard();
        store.create(request).await.unwrap();

        for hour in 1..=2 {
            let committed = store
                .compare_and_transition(
                    &id,
                    guard,
                    &Transition::Escalate { manual: false },
                    t0 + Duration::hours(hour),
                )
                .await
                .unwrap()
                .unwrap();
            guard = committed.request.guard();
        }
        store.get(&id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn history_pages_through_every_entry() {
        let store = Arc::new(InMemoryApprovalStore::new());
        let request = escalated_twice(&store, Utc::now()).await;
        let ledger = AuditLedger::new(store, 2);

        let history = ledger.history(&request.id);
        let first = history.collect().await.unwrap();
        let sequences: Vec<u64> = first.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);

        // restartable
        let again = history.collect().await.unwrap();
        assert_eq!(again, first);
    }

    #[tokio::test]
    async fn replay_reports_state_at_instant() {
        let store = Arc::new(InMemoryApprovalStore::new());
        let t0 = Utc::now() - Duration::hours(5);
        let request = escalated_twice(&store, t0).await;
        let ledger = AuditLedger::new(store, 100);

        let before = ledger
            .replay_at(&request.id, t0 - Duration::minutes(1))
            .await
            .unwrap();
        assert!(before.is_none());

        let mid = ledger
            .replay_at(&request.id, t0 + Duration::minutes(90))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(mid.state, ApprovalState::Escalated);
        assert_eq!(mid.level, 1);
        assert_eq!(mid.sequence, 2);

        let latest = ledger.replay_at(&request.id, Utc::now()).await.unwrap().unwrap();
        assert_eq!(latest.level, 2);
    }

    #[tokio::test]
    async fn verify_and_unknown_ids() {
        let store = Arc::new(InMemoryApprovalStore::new());
        let request = escalated_twice(&store, Utc::now()).await;
        let ledger = AuditLedger::new(store, 100);

        let report = ledger.verify(&request.id).await.unwrap();
        assert!(report.intact);
        assert_eq!(report.entries, 3);

        let missing = ledger.verify(&ApprovalId::generate()).await;
        assert!(matches!(
            missing,
            Err(EngineError::Approval(ApprovalError::NotFound(_)))
        ));
    }
}
