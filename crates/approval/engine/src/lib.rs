//! Approval Orchestrator Runtime
//!
//! Drives an approval request through its approver chain:
//!
//! ```text
//! request_approval → notify(level) → race(decision, SLA) ─┬─ decision → APPROVED / REJECTED
//!                                                          └─ timeout  → escalate → notify(level + 1) ...
//!                                                                        └─ last level → TIMED_OUT
//! ```
//!
//! Key design:
//! - The store's compare-and-transition is the only arbiter between a
//!   decision, a timeout and a cancel racing on the same request
//! - Timers are in-process and keyed by `(approval id, level)`; losing
//!   timers are stopped, and a stale one that fires anyway is a no-op
//! - Nothing waits on a call stack: after a restart [`ApprovalOrchestrator::recover`]
//!   re-arms every awaiting request from its persisted `updated_at`

#![deny(unsafe_code)]

pub mod clock;
pub mod config;
pub mod error;
pub mod intake;
pub mod ledger;
pub mod notify;
pub mod orchestrator;
pub mod timer;

pub use clock::{Clock, RuntimeClock, SystemClock};
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use intake::{DecisionIntake, InboundReply, IntakeError, ParsedReply};
pub use ledger::{AuditHistory, AuditLedger, LedgerVerification, ReplayPoint};
pub use notify::{
    ApprovalNotice, NoticeKind, NotificationPort, NotifyError, TracingNotifier, WebhookNotifier,
};
pub use orchestrator::{ApprovalEvent, ApprovalOrchestrator, RecoveryReport};
pub use timer::{race, Race, TimerRegistry};
