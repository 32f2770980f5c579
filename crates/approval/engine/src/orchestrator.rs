//! Approval Orchestrator: drives each request to exactly one terminal state.
//!
//! Every write goes through the store's compare-and-transition. The
//! orchestrator reads the request, builds the transition it wants, and
//! lets the store decide whether the observation still holds. A decision,
//! a timer and a cancel racing on one request therefore commit at most
//! one transition per `(state, level)`; the losers re-read and either
//! retry against the new state or report `AlreadyResolved`.

use crate::clock::{Clock, RuntimeClock};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::ledger::{AuditHistory, AuditLedger};
use crate::notify::{ApprovalNotice, NoticeKind, NotificationPort};
use crate::timer::TimerRegistry;
use approval_store::{ApprovalFilter, ApprovalStorage, CommittedTransition, StorageError};
use approval_types::{
    ApprovalError, ApprovalId, ApprovalRequest, ApproverId, AuditEntry, NewApproval, Outcome,
    Transition,
};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, instrument, warn};

/// A committed transition, as published to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalEvent {
    /// The request right after the transition
    pub approval: ApprovalRequest,
    pub entry: AuditEntry,
}

/// What [`ApprovalOrchestrator::recover`] did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// Timers armed for the time left on their level
    pub rearmed: usize,
    /// Requests whose SLA had already lapsed, escalated on the spot
    pub fired: usize,
}

struct Inner {
    store: Arc<dyn ApprovalStorage>,
    notifier: Arc<dyn NotificationPort>,
    clock: Arc<dyn Clock>,
    timers: TimerRegistry,
    events: broadcast::Sender<ApprovalEvent>,
    ledger: AuditLedger,
    config: EngineConfig,
}

/// The approval state machine. Cheap to clone; clones share timers and events.
#[derive(Clone)]
pub struct ApprovalOrchestrator {
    inner: Arc<Inner>,
}

impl ApprovalOrchestrator {
    pub fn new(
        store: Arc<dyn ApprovalStorage>,
        notifier: Arc<dyn NotificationPort>,
        config: EngineConfig,
    ) -> Self {
        Self::with_clock(store, notifier, Arc::new(RuntimeClock::new()), config)
    }

    pub fn with_clock(
        store: Arc<dyn ApprovalStorage>,
        notifier: Arc<dyn NotificationPort>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let ledger = AuditLedger::new(Arc::clone(&store), config.history_page_size);

        Self {
            inner: Arc::new(Inner {
                store,
                notifier,
                clock,
                timers: TimerRegistry::new(),
                events,
                ledger,
                config,
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn ledger(&self) -> &AuditLedger {
        &self.inner.ledger
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// Subscribe to committed transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<ApprovalEvent> {
        self.inner.events.subscribe()
    }

    /// Number of requests with a live in-process timer.
    pub fn armed_timers(&self) -> usize {
        self.inner.timers.len()
    }

    /// Level whose timer is armed for `id`, if any.
    pub fn armed_level(&self, id: &ApprovalId) -> Option<usize> {
        self.inner.timers.armed_level(id)
    }

    // ── Entry points ──────────────────────────────────────────────────

    /// Create a request, start the level-0 timer and hand the first
    /// approver's notice to a background task. Returns as soon as the
    /// request is persisted and armed; delivery is never awaited.
    #[instrument(skip(self, new), fields(levels = new.chain.len()))]
    pub async fn request_approval(&self, new: NewApproval) -> EngineResult<ApprovalId> {
        let request = ApprovalRequest::create(new, self.now())?;
        let id = request.id.clone();

        let entry = self.inner.store.create(request.clone()).await?;
        info!(
            approval_id = %id,
            approver = %request.current_approver(),
            sla_secs = request.current_sla().as_secs(),
            "Approval requested"
        );
        self.publish(&request, entry);

        self.arm(&request);
        self.notify(&request, NoticeKind::Request);
        Ok(id)
    }

    /// Blocking mode of [`request_approval`](Self::request_approval):
    /// resolves once the request reaches a terminal state.
    pub async fn request_approval_and_wait(
        &self,
        new: NewApproval,
    ) -> EngineResult<ApprovalRequest> {
        // Subscribe first so the terminal event cannot slip past.
        let events = self.subscribe();
        let id = self.request_approval(new).await?;
        self.await_terminal(&id, events).await
    }

    /// Wait until `id` is terminal and return its final snapshot.
    pub async fn wait_for_resolution(&self, id: &ApprovalId) -> EngineResult<ApprovalRequest> {
        let events = self.subscribe();
        self.await_terminal(id, events).await
    }

    /// Record an approver's decision.
    ///
    /// Fails with `AlreadyResolved` on a terminal request and with
    /// `UnauthorizedApprover` for anyone outside `chain[0..=current_level]`.
    #[instrument(skip(self, approver, comments), fields(approval_id = %id, approver = %approver))]
    pub async fn record_decision(
        &self,
        id: &ApprovalId,
        approver: ApproverId,
        outcome: Outcome,
        comments: impl Into<String>,
    ) -> EngineResult<ApprovalRequest> {
        let transition = Transition::Decide {
            approver,
            outcome,
            comments: comments.into(),
        };
        let committed = self.transition(id, &transition).await?;
        info!(approval_id = %id, outcome = %outcome, "Decision recorded");
        Ok(committed.request)
    }

    /// Withdraw an awaiting request.
    #[instrument(skip(self, reason), fields(approval_id = %id))]
    pub async fn cancel(
        &self,
        id: &ApprovalId,
        reason: Option<String>,
    ) -> EngineResult<ApprovalRequest> {
        let committed = self.transition(id, &Transition::Cancel { reason }).await?;
        info!(approval_id = %id, "Approval canceled");
        Ok(committed.request)
    }

    /// Operator escalation: move to the next approver now instead of
    /// waiting out the SLA. Times out at the last level.
    ///
    /// Not retried: if a timer or another operator moved the request
    /// first, the fresh snapshot is returned as is.
    #[instrument(skip(self), fields(approval_id = %id))]
    pub async fn escalate(&self, id: &ApprovalId) -> EngineResult<ApprovalRequest> {
        let current = self.load(id).await?;
        let escalate = Transition::Escalate { manual: true };
        match self.try_transition(id, &current, &escalate).await? {
            Some(committed) => {
                info!(approval_id = %id, state = %committed.request.state, "Escalated by operator");
                self.after_escalation(&committed.request).await;
                Ok(committed.request)
            }
            None => {
                let latest = self.load(id).await?;
                if latest.is_terminal() {
                    return Err(ApprovalError::AlreadyResolved {
                        id: id.clone(),
                        state: latest.state,
                    }
                    .into());
                }
                Ok(latest)
            }
        }
    }

    /// Timer callback for `(id, level)`.
    ///
    /// Returns `Ok(false)` when the timer is stale: the request is
    /// terminal, has moved past `level`, or another writer got there
    /// first.
    #[instrument(skip(self), fields(approval_id = %id))]
    pub async fn fire_timeout(&self, id: &ApprovalId, level: usize) -> EngineResult<bool> {
        let current = self.load(id).await?;
        if !current.state.is_awaiting() || current.current_level != level {
            debug!(
                state = %current.state,
                current_level = current.current_level,
                "Ignoring stale timer"
            );
            return Ok(false);
        }

        let escalate = Transition::Escalate { manual: false };
        let Some(committed) = self.try_transition(id, &current, &escalate).await? else {
            debug!("Timer lost the race to another transition");
            return Ok(false);
        };

        info!(
            from_level = level,
            state = %committed.request.state,
            "SLA lapsed"
        );
        self.after_escalation(&committed.request).await;
        Ok(true)
    }

    /// Current snapshot of `id`. Never blocks on timers.
    pub async fn check_approval_status(&self, id: &ApprovalId) -> EngineResult<ApprovalRequest> {
        self.load(id).await
    }

    /// Audit history of `id`, oldest first.
    pub async fn get_approval_history(&self, id: &ApprovalId) -> EngineResult<AuditHistory> {
        self.load(id).await?;
        Ok(self.inner.ledger.history(id))
    }

    /// List requests newest-first.
    pub async fn list(&self, filter: &ApprovalFilter) -> EngineResult<Vec<ApprovalRequest>> {
        Ok(self.inner.store.list(filter).await?)
    }

    /// Re-arm timers for every awaiting request after a restart.
    ///
    /// Each timer gets `level SLA - (now - updated_at)`. A request whose
    /// SLA already lapsed is escalated before this returns.
    #[instrument(skip(self))]
    pub async fn recover(&self) -> EngineResult<RecoveryReport> {
        let awaiting = self
            .inner
            .store
            .list_awaiting()
            .await
            .map_err(|e| EngineError::Recovery(format!("cannot list awaiting approvals: {e}")))?;

        let now = self.now();
        let mut report = RecoveryReport::default();

        for request in awaiting {
            let remaining = request.remaining_sla(now);
            if remaining.is_zero() {
                self.fire_timeout(&request.id, request.current_level)
                    .await
                    .map_err(|e| {
                        EngineError::Recovery(format!("escalating {} failed: {e}", request.id))
                    })?;
                report.fired += 1;
            } else {
                self.arm_after(&request.id, request.current_level, remaining);
                report.rearmed += 1;
            }
        }

        info!(
            rearmed = report.rearmed,
            fired = report.fired,
            "Approval timers recovered"
        );
        Ok(report)
    }

    /// Stop every in-process timer. Persisted state is untouched; a
    /// later [`recover`](Self::recover) picks up where this left off.
    pub fn shutdown(&self) {
        let stopped = self.inner.timers.shutdown();
        info!(stopped, "Approval orchestrator stopped");
    }

    // ── Internals ─────────────────────────────────────────────────────

    async fn load(&self, id: &ApprovalId) -> EngineResult<ApprovalRequest> {
        self.inner
            .store
            .get(id)
            .await?
            .ok_or_else(|| ApprovalError::NotFound(id.clone()).into())
    }

    /// Read, then compare-and-transition against what was read. A lost
    /// race re-reads: the transition either applies to the new state or
    /// is refused by it.
    async fn transition(
        &self,
        id: &ApprovalId,
        transition: &Transition,
    ) -> EngineResult<CommittedTransition> {
        loop {
            let current = self.load(id).await?;
            if let Some(committed) = self.try_transition(id, &current, transition).await? {
                return Ok(committed);
            }
            debug!(approval_id = %id, "Lost transition race, re-reading");
        }
    }

    /// One compare-and-transition against `observed`. `Ok(None)` means
    /// another writer moved the request first.
    async fn try_transition(
        &self,
        id: &ApprovalId,
        observed: &ApprovalRequest,
        transition: &Transition,
    ) -> EngineResult<Option<CommittedTransition>> {
        let result = self
            .inner
            .store
            .compare_and_transition(id, observed.guard(), transition, self.now())
            .await;

        match result {
            Ok(Some(committed)) => {
                if committed.request.is_terminal() {
                    self.inner.timers.disarm(id);
                }
                self.publish(&committed.request, committed.entry.clone());
                Ok(Some(committed))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                let err = self.storage_error(id, e);
                if err.is_already_resolved() {
                    warn!(approval_id = %id, "Discarding late {}", transition_name(transition));
                }
                Err(err)
            }
        }
    }

    /// Follow-up once an escalation committed: notify and arm the next
    /// level, or settle a final-level timeout.
    async fn after_escalation(&self, request: &ApprovalRequest) {
        if !request.state.is_awaiting() {
            self.inner.timers.disarm(&request.id);
            warn!(
                approval_id = %request.id,
                last_approver = %request.current_approver(),
                "Approval timed out at final level"
            );
            return;
        }

        self.arm(request);

        // Another writer may have moved the request between our commit and
        // the arm above. Its own follow-up owns the notice; the timer must
        // match whatever is stored now.
        match self.inner.store.get(&request.id).await {
            Ok(Some(latest)) if latest.guard() != request.guard() => {
                if latest.is_terminal() {
                    self.inner.timers.disarm(&request.id);
                } else {
                    self.arm(&latest);
                }
                debug!(
                    approval_id = %request.id,
                    state = %latest.state,
                    level = latest.current_level,
                    "Request moved on while arming, escalation notice skipped"
                );
                return;
            }
            Ok(_) => {}
            Err(e) => warn!(approval_id = %request.id, error = %e, "Re-read after escalation failed"),
        }

        self.notify(request, NoticeKind::Escalation);
    }

    fn storage_error(&self, id: &ApprovalId, err: StorageError) -> EngineError {
        if let StorageError::Backend(reason) = &err {
            error!(approval_id = %id, %reason, "Approval store failure");
        }
        match err {
            StorageError::NotFound(_) => ApprovalError::NotFound(id.clone()).into(),
            other => other.into(),
        }
    }

    fn publish(&self, request: &ApprovalRequest, entry: AuditEntry) {
        // No subscribers is fine.
        let _ = self.inner.events.send(ApprovalEvent {
            approval: request.clone(),
            entry,
        });
    }

    /// Arm the timer for the request's current level.
    fn arm(&self, request: &ApprovalRequest) {
        let remaining = request.remaining_sla(self.now());
        self.arm_after(&request.id, request.current_level, remaining);
    }

    fn arm_after(&self, id: &ApprovalId, level: usize, delay: Duration) {
        debug!(approval_id = %id, level, delay_secs = delay.as_secs(), "Arming SLA timer");
        let fire = timer_task(Arc::downgrade(&self.inner), id.clone(), level);
        self.inner.timers.arm(id.clone(), level, delay, fire);
    }

    /// Send a notice in the background, bounded by `notify_timeout`.
    /// Delivery failures are logged; the SLA timer is the backstop.
    fn notify(&self, request: &ApprovalRequest, kind: NoticeKind) {
        let Some(notice) = ApprovalNotice::for_request(request, kind) else {
            return;
        };
        let notifier = Arc::clone(&self.inner.notifier);
        let limit = self.inner.config.notify_timeout();

        tokio::spawn(async move {
            match tokio::time::timeout(limit, notifier.notify(&notice)).await {
                Ok(Ok(())) => debug!(
                    approval_id = %notice.approval_id,
                    approver = %notice.approver,
                    "Approver notified"
                ),
                Ok(Err(e)) => warn!(
                    approval_id = %notice.approval_id,
                    approver = %notice.approver,
                    error = %e,
                    "Notification failed; SLA timer still armed"
                ),
                Err(_) => warn!(
                    approval_id = %notice.approval_id,
                    approver = %notice.approver,
                    "Notification timed out; SLA timer still armed"
                ),
            }
        });
    }

    async fn await_terminal(
        &self,
        id: &ApprovalId,
        mut events: broadcast::Receiver<ApprovalEvent>,
    ) -> EngineResult<ApprovalRequest> {
        let current = self.load(id).await?;
        if current.is_terminal() {
            return Ok(current);
        }

        loop {
            match events.recv().await {
                Ok(event) if event.approval.id == *id && event.approval.is_terminal() => {
                    return Ok(event.approval);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!(approval_id = %id, skipped, "Event stream lagged, re-reading");
                    let current = self.load(id).await?;
                    if current.is_terminal() {
                        return Ok(current);
                    }
                }
                Err(RecvError::Closed) => return Err(EngineError::ShuttingDown),
            }
        }
    }
}

/// The future a level timer runs when its SLA lapses. Holds the
/// orchestrator weakly so pending timers do not keep it alive.
fn timer_task(inner: Weak<Inner>, id: ApprovalId, level: usize) -> BoxFuture<'static, ()> {
    async move {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let orchestrator = ApprovalOrchestrator { inner };
        if let Err(e) = orchestrator.fire_timeout(&id, level).await {
            error!(approval_id = %id, level, error = %e, "SLA timer failed to escalate");
        }
    }
    .boxed()
}

fn transition_name(transition: &Transition) -> &'static str {
    match transition {
        Transition::Decide { .. } => "decision",
        Transition::Escalate { .. } => "escalation",
        Transition::Cancel { .. } => "cancel",
    }
}
