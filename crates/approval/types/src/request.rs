//! Approval requests and the transitions that move them
//!
//! An [`ApprovalRequest`] only changes through [`ApprovalRequest::apply`].
//! Stores call it under a [`StateGuard`] so that a decision, a timeout and
//! a cancel racing on the same request cannot all land.

use crate::{ApprovalError, ApprovalId, ApprovalResult, ApproverId, AuditCause, AuditDraft};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

const DEFAULT_CANCEL_REASON: &str = "Request withdrawn";

/// Longest SLA a level may carry: one hundred years, in seconds.
pub const MAX_SLA_SECS: u64 = 100 * 366 * 24 * 3600;

// ── State ────────────────────────────────────────────────────────────

/// Lifecycle state of an approval request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    /// Waiting on the first approver
    Pending,
    /// Waiting on an approver past the first level
    Escalated,
    Approved,
    Rejected,
    /// The last level's SLA lapsed with no decision
    TimedOut,
    Canceled,
}

impl ApprovalState {
    pub fn is_terminal(&self) -> bool {
        !self.is_awaiting()
    }

    /// Awaiting states accept a decision, a timeout or a cancel.
    pub fn is_awaiting(&self) -> bool {
        matches!(self, ApprovalState::Pending | ApprovalState::Escalated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalState::Pending => "pending",
            ApprovalState::Escalated => "escalated",
            ApprovalState::Approved => "approved",
            ApprovalState::Rejected => "rejected",
            ApprovalState::TimedOut => "timed_out",
            ApprovalState::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for ApprovalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ApprovalState {
    type Err = ApprovalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(ApprovalState::Pending),
            "escalated" => Ok(ApprovalState::Escalated),
            "approved" => Ok(ApprovalState::Approved),
            "rejected" => Ok(ApprovalState::Rejected),
            "timed_out" => Ok(ApprovalState::TimedOut),
            "canceled" | "cancelled" => Ok(ApprovalState::Canceled),
            other => Err(ApprovalError::InvalidTransition(format!(
                "unknown approval state '{}'",
                other
            ))),
        }
    }
}

// ── Decision ─────────────────────────────────────────────────────────

/// What an approver decided
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Approved,
    Rejected,
}

impl Outcome {
    pub fn terminal_state(&self) -> ApprovalState {
        match self {
            Outcome::Approved => ApprovalState::Approved,
            Outcome::Rejected => ApprovalState::Rejected,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Approved => f.write_str("approved"),
            Outcome::Rejected => f.write_str("rejected"),
        }
    }
}

impl std::str::FromStr for Outcome {
    type Err = ApprovalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approve" | "approved" => Ok(Outcome::Approved),
            "reject" | "rejected" | "deny" | "denied" => Ok(Outcome::Rejected),
            other => Err(ApprovalError::InvalidTransition(format!(
                "unknown decision outcome '{}'",
                other
            ))),
        }
    }
}

/// The final decision on a request. Set once, on APPROVED/REJECTED only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub approver: ApproverId,
    pub outcome: Outcome,
    #[serde(default)]
    pub comments: String,
    pub decided_at: DateTime<Utc>,
}

// ── SLA ──────────────────────────────────────────────────────────────

/// How long each chain level waits before escalating.
///
/// Serialized untagged: a bare number of seconds applies to every level,
/// a list gives one value per level.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SlaPolicy {
    Uniform(u64),
    PerLevel(Vec<u64>),
}

impl SlaPolicy {
    pub fn uniform(sla: Duration) -> Self {
        SlaPolicy::Uniform(sla.as_secs())
    }

    pub fn per_level(slas: impl IntoIterator<Item = Duration>) -> Self {
        SlaPolicy::PerLevel(slas.into_iter().map(|d| d.as_secs()).collect())
    }

    /// Expand into one SLA (in seconds) per chain level.
    pub fn resolve(&self, chain_len: usize) -> ApprovalResult<Vec<u64>> {
        let secs = match self {
            SlaPolicy::Uniform(secs) => vec![*secs; chain_len],
            SlaPolicy::PerLevel(secs) => {
                if secs.len() == 1 {
                    vec![secs[0]; chain_len]
                } else if secs.len() != chain_len {
                    return Err(ApprovalError::InvalidChain(format!(
                        "{} SLA values for a chain of {} approvers",
                        secs.len(),
                        chain_len
                    )));
                } else {
                    secs.clone()
                }
            }
        };

        if let Some(level) = secs.iter().position(|s| *s == 0) {
            return Err(ApprovalError::InvalidChain(format!(
                "SLA for level {} must be greater than zero",
                level
            )));
        }
        if let Some(level) = secs.iter().position(|s| *s > MAX_SLA_SECS) {
            return Err(ApprovalError::InvalidChain(format!(
                "SLA for level {} exceeds {} seconds",
                level, MAX_SLA_SECS
            )));
        }
        Ok(secs)
    }
}

// ── Creation ─────────────────────────────────────────────────────────

/// Caller input for a new approval request
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewApproval {
    pub chain: Vec<ApproverId>,
    pub sla: SlaPolicy,
    /// Opaque caller payload, never interpreted by the engine
    #[serde(default)]
    pub context: Value,
}

impl NewApproval {
    pub fn new<I, A>(chain: I, sla: SlaPolicy) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<ApproverId>,
    {
        Self {
            chain: chain.into_iter().map(Into::into).collect(),
            sla,
            context: Value::Null,
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }
}

// ── Guard & Transition ───────────────────────────────────────────────

/// The `(state, level)` a writer observed before deciding to transition.
///
/// A transition commits only if the stored request still matches. Level
/// is part of the guard because ESCALATED → ESCALATED keeps the state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateGuard {
    pub state: ApprovalState,
    pub level: usize,
}

impl StateGuard {
    pub fn new(state: ApprovalState, level: usize) -> Self {
        Self { state, level }
    }

    pub fn matches(&self, request: &ApprovalRequest) -> bool {
        request.state == self.state && request.current_level == self.level
    }
}

/// A requested change to an awaiting approval
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transition {
    /// An approver decided
    Decide {
        approver: ApproverId,
        outcome: Outcome,
        #[serde(default)]
        comments: String,
    },
    /// The current level gave up: move to the next approver, or time out
    /// when there is none. `manual` distinguishes an operator action from
    /// an SLA lapse.
    Escalate { manual: bool },
    Cancel { reason: Option<String> },
}

// ── Approval Request ─────────────────────────────────────────────────

/// One approval request and where it stands in its chain
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: ApprovalId,
    /// Ordered approvers; never empty
    pub chain: Vec<ApproverId>,
    /// Index into `chain`; only ever grows, one step at a time
    pub current_level: usize,
    /// One SLA per level, in seconds
    pub sla_per_level_secs: Vec<u64>,
    pub state: ApprovalState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    #[serde(default)]
    pub context: Value,
    pub created_at: DateTime<Utc>,
    /// Time of the last committed transition; the current level's SLA
    /// runs from here
    pub updated_at: DateTime<Utc>,
}

impl ApprovalRequest {
    /// Validate caller input and build a PENDING request at level 0.
    pub fn create(new: NewApproval, at: DateTime<Utc>) -> ApprovalResult<Self> {
        if new.chain.is_empty() {
            return Err(ApprovalError::InvalidChain(
                "approver chain must not be empty".into(),
            ));
        }
        if let Some(level) = new.chain.iter().position(|a| a.as_str().trim().is_empty()) {
            return Err(ApprovalError::InvalidChain(format!(
                "approver at level {} is blank",
                level
            )));
        }
        let sla_per_level_secs = new.sla.resolve(new.chain.len())?;

        Ok(Self {
            id: ApprovalId::generate(),
            chain: new.chain,
            current_level: 0,
            sla_per_level_secs,
            state: ApprovalState::Pending,
            decision: None,
            cancel_reason: None,
            context: new.context,
            created_at: at,
            updated_at: at,
        })
    }

    pub fn guard(&self) -> StateGuard {
        StateGuard::new(self.state, self.current_level)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_last_level(&self) -> bool {
        self.current_level + 1 >= self.chain.len()
    }

    pub fn current_approver(&self) -> &ApproverId {
        &self.chain[self.current_level]
    }

    pub fn current_sla(&self) -> Duration {
        Duration::from_secs(self.sla_per_level_secs[self.current_level])
    }

    /// Levels climbed so far
    pub fn escalation_count(&self) -> usize {
        self.current_level
    }

    /// When the current level lapses; `None` once terminal.
    pub fn level_deadline(&self) -> Option<DateTime<Utc>> {
        if self.is_terminal() {
            return None;
        }
        let sla = chrono::Duration::from_std(self.current_sla()).ok()?;
        self.updated_at.checked_add_signed(sla)
    }

    /// Time left on the current level, clamped to zero.
    pub fn remaining_sla(&self, now: DateTime<Utc>) -> Duration {
        let elapsed = (now - self.updated_at).to_std().unwrap_or(Duration::ZERO);
        self.current_sla().saturating_sub(elapsed)
    }

    /// The chain entry matching `approver` among levels that are or were
    /// active, i.e. `chain[0..=current_level]`.
    pub fn authorized_approver(&self, approver: &ApproverId) -> Option<&ApproverId> {
        self.chain[..=self.current_level]
            .iter()
            .find(|a| a.matches(approver))
    }

    pub fn authorizes(&self, approver: &ApproverId) -> bool {
        self.authorized_approver(approver).is_some()
    }

    /// The audit draft for the creation of this request
    pub fn creation_draft(&self) -> AuditDraft {
        AuditDraft {
            cause: AuditCause::Created,
            from_state: None,
            to_state: self.state,
            level: self.current_level,
            actor: None,
            detail: Some(format!("awaiting {}", self.current_approver())),
            timestamp: self.created_at,
        }
    }

    /// Apply a transition in place.
    ///
    /// Terminal requests reject everything with `AlreadyResolved` and are
    /// left untouched.
    pub fn apply(&mut self, transition: &Transition, at: DateTime<Utc>) -> ApprovalResult<AuditDraft> {
        if self.is_terminal() {
            return Err(ApprovalError::AlreadyResolved {
                id: self.id.clone(),
                state: self.state,
            });
        }

        let from = self.state;
        let draft = match transition {
            Transition::Decide {
                approver,
                outcome,
                comments,
            } => {
                let canonical = self.authorized_approver(approver).cloned().ok_or_else(|| {
                    ApprovalError::UnauthorizedApprover {
                        id: self.id.clone(),
                        approver: approver.clone(),
                    }
                })?;

                self.state = outcome.terminal_state();
                self.decision = Some(Decision {
                    approver: canonical.clone(),
                    outcome: *outcome,
                    comments: comments.clone(),
                    decided_at: at,
                });

                AuditDraft {
                    cause: AuditCause::Decision,
                    from_state: Some(from),
                    to_state: self.state,
                    level: self.current_level,
                    actor: Some(canonical.0),
                    detail: (!comments.is_empty()).then(|| comments.clone()),
                    timestamp: at,
                }
            }
            Transition::Escalate { manual } => {
                let cause = if *manual {
                    AuditCause::Manual
                } else {
                    AuditCause::Timeout
                };

                let detail = if self.is_last_level() {
                    self.state = ApprovalState::TimedOut;
                    format!("no response from {} at final level", self.current_approver())
                } else {
                    let previous = self.current_approver().clone();
                    self.current_level += 1;
                    self.state = ApprovalState::Escalated;
                    format!("escalated from {} to {}", previous, self.current_approver())
                };

                AuditDraft {
                    cause,
                    from_state: Some(from),
                    to_state: self.state,
                    level: self.current_level,
                    actor: None,
                    detail: Some(detail),
                    timestamp: at,
                }
            }
            Transition::Cancel { reason } => {
                let reason = reason
                    .clone()
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string());
                self.state = ApprovalState::Canceled;
                self.cancel_reason = Some(reason.clone());

                AuditDraft {
                    cause: AuditCause::Cancel,
                    from_state: Some(from),
                    to_state: self.state,
                    level: self.current_level,
                    actor: None,
                    detail: Some(reason),
                    timestamp: at,
                }
            }
        };

        self.updated_at = at;
        Ok(draft)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use proptest::prelude::*;

    fn two_level() -> ApprovalRequest {
        ApprovalRequest::create(
            NewApproval::new(["a@corp.com", "b@corp.com"], SlaPolicy::Uniform(3600)),
            Utc::now(),
        )
        .unwrap()
    }

    fn decide(approver: &str, outcome: Outcome) -> Transition {
        Transition::Decide {
            approver: ApproverId::new(approver),
            outcome,
            comments: String::new(),
        }
    }

    #[test]
    fn test_sla_beyond_bound_is_refused() {
        for secs in [MAX_SLA_SECS + 1, 10_000_000_000_000, u64::MAX / 2, u64::MAX] {
            let result = ApprovalRequest::create(
                NewApproval::new(["a"], SlaPolicy::Uniform(secs)),
                Utc::now(),
            );
            assert!(matches!(result, Err(ApprovalError::InvalidChain(_))), "{}", secs);
        }

        let per_level = SlaPolicy::PerLevel(vec![60, u64::MAX]);
        assert!(per_level.resolve(2).is_err());
    }

    #[test]
    fn test_longest_sla_has_a_deadline() {
        let request = ApprovalRequest::create(
            NewApproval::new(["a"], SlaPolicy::Uniform(MAX_SLA_SECS)),
            Utc::now(),
        )
        .unwrap();
        let deadline = request.level_deadline().unwrap();
        assert_eq!(
            (deadline - request.updated_at).num_seconds() as u64,
            MAX_SLA_SECS
        );
    }

    #[test]
    fn test_create_rejects_empty_chain() {
        let result = ApprovalRequest::create(
            NewApproval::new(Vec::<String>::new(), SlaPolicy::Uniform(60)),
            Utc::now(),
        );
        assert!(matches!(result, Err(ApprovalError::InvalidChain(_))));
    }

    #[test]
    fn test_create_rejects_mismatched_sla() {
        let result = ApprovalRequest::create(
            NewApproval::new(["a", "b", "c"], SlaPolicy::PerLevel(vec![60, 60])),
            Utc::now(),
        );
        assert!(matches!(result, Err(ApprovalError::InvalidChain(_))));
    }

    #[test]
    fn test_single_sla_value_applies_to_every_level() {
        let req = ApprovalRequest::create(
            NewApproval::new(["a", "b", "c"], SlaPolicy::PerLevel(vec![90])),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(req.sla_per_level_secs, vec![90, 90, 90]);
    }

    #[test]
    fn test_zero_sla_rejected() {
        let result = ApprovalRequest::create(
            NewApproval::new(["a", "b"], SlaPolicy::PerLevel(vec![60, 0])),
            Utc::now(),
        );
        assert!(matches!(result, Err(ApprovalError::InvalidChain(_))));
    }

    #[test]
    fn test_sla_policy_serde_forms() {
        let uniform: SlaPolicy = serde_json::from_str("3600").unwrap();
        assert_eq!(uniform, SlaPolicy::Uniform(3600));
        let per_level: SlaPolicy = serde_json::from_str("[86400, 14400]").unwrap();
        assert_eq!(per_level, SlaPolicy::PerLevel(vec![86400, 14400]));
    }

    #[test]
    fn test_escalate_then_time_out() {
        let mut req = two_level();
        let draft = req.apply(&Transition::Escalate { manual: false }, Utc::now()).unwrap();
        assert_eq!(req.state, ApprovalState::Escalated);
        assert_eq!(req.current_level, 1);
        assert_eq!(draft.cause, AuditCause::Timeout);
        assert_eq!(draft.level, 1);

        req.apply(&Transition::Escalate { manual: false }, Utc::now()).unwrap();
        assert_eq!(req.state, ApprovalState::TimedOut);
        assert_eq!(req.current_level, 1);
        assert!(req.level_deadline().is_none());
    }

    #[test]
    fn test_decision_by_future_level_is_unauthorized() {
        let mut req = two_level();
        let result = req.apply(&decide("b@corp.com", Outcome::Approved), Utc::now());
        assert!(matches!(
            result,
            Err(ApprovalError::UnauthorizedApprover { .. })
        ));
        assert_eq!(req.state, ApprovalState::Pending);
    }

    #[test]
    fn test_earlier_approver_may_still_decide_after_escalation() {
        let mut req = two_level();
        req.apply(&Transition::Escalate { manual: false }, Utc::now()).unwrap();
        req.apply(&decide("A@corp.com", Outcome::Rejected), Utc::now()).unwrap();

        assert_eq!(req.state, ApprovalState::Rejected);
        let decision = req.decision.as_ref().unwrap();
        // canonical chain handle, not the caller's spelling
        assert_eq!(decision.approver, ApproverId::new("a@corp.com"));
    }

    #[test]
    fn test_terminal_is_closed() {
        let mut req = two_level();
        req.apply(&decide("a@corp.com", Outcome::Approved), Utc::now()).unwrap();
        let snapshot = req.clone();

        let result = req.apply(&Transition::Cancel { reason: None }, Utc::now());
        assert!(matches!(result, Err(ApprovalError::AlreadyResolved { .. })));
        assert_eq!(req, snapshot);
    }

    #[test]
    fn test_cancel_defaults_reason() {
        let mut req = two_level();
        let draft = req.apply(&Transition::Cancel { reason: None }, Utc::now()).unwrap();
        assert_eq!(req.cancel_reason.as_deref(), Some("Request withdrawn"));
        assert_eq!(draft.detail.as_deref(), Some("Request withdrawn"));
    }

    #[test]
    fn test_remaining_sla_clamps_to_zero() {
        let mut req = two_level();
        let now = Utc::now();
        req.updated_at = now - ChronoDuration::hours(2);
        assert_eq!(req.remaining_sla(now), Duration::ZERO);

        req.updated_at = now - ChronoDuration::minutes(15);
        assert_eq!(req.remaining_sla(now), Duration::from_secs(45 * 60));
    }

    #[test]
    fn test_guard_includes_level() {
        let mut req = two_level();
        req.apply(&Transition::Escalate { manual: false }, Utc::now()).unwrap();
        let stale = StateGuard::new(ApprovalState::Escalated, 0);
        assert!(!stale.matches(&req));
        assert!(req.guard().matches(&req));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Decide(usize, bool),
        Escalate,
        Cancel,
    }

    fn op_strategy() -> impl Strategy<Value = Vec<Op>> {
        proptest::collection::vec(
            prop_oneof![
                (0usize..6, any::<bool>()).prop_map(|(who, ok)| Op::Decide(who, ok)),
                Just(Op::Escalate),
                Just(Op::Cancel),
            ],
            0..16,
        )
    }

    proptest! {
        #[test]
        fn property_levels_climb_one_step_and_terminal_is_final(
            chain_len in 1usize..5,
            ops in op_strategy(),
        ) {
            let chain: Vec<String> = (0..chain_len).map(|i| format!("approver-{}", i)).collect();
            let mut req = ApprovalRequest::create(
                NewApproval::new(chain, SlaPolicy::Uniform(60)),
                Utc::now(),
            ).unwrap();

            let mut escalations = 0;
            for op in ops {
                let before = req.clone();
                let transition = match op {
                    Op::Decide(who, ok) => decide(
                        &format!("approver-{}", who),
                        if ok { Outcome::Approved } else { Outcome::Rejected },
                    ),
                    Op::Escalate => Transition::Escalate { manual: false },
                    Op::Cancel => Transition::Cancel { reason: None },
                };

                match req.apply(&transition, Utc::now()) {
                    Ok(draft) => {
                        prop_assert!(before.state.is_awaiting());
                        prop_assert!(req.current_level == before.current_level
                            || req.current_level == before.current_level + 1);
                        prop_assert_eq!(draft.level, req.current_level);
                        if req.current_level > before.current_level {
                            escalations += 1;
                        }
                    }
                    Err(_) => {
                        prop_assert_eq!(&req, &before);
                    }
                }

                prop_assert!(req.current_level < req.chain.len());
                if let Some(decision) = &req.decision {
                    prop_assert!(req.chain[..=req.current_level].contains(&decision.approver));
                }
            }
            prop_assert!(escalations < chain_len);
        }
    }
}
