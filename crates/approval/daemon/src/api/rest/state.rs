//! Application state for API handlers

use approval_engine::{ApprovalOrchestrator, DecisionIntake};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Approval state machine
    pub orchestrator: ApprovalOrchestrator,

    /// Reply parser in front of the orchestrator
    pub intake: DecisionIntake,

    /// Daemon version
    pub version: String,

    /// Daemon start time
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    /// Create new application state
    pub fn new(orchestrator: ApprovalOrchestrator) -> Self {
        Self {
            intake: DecisionIntake::new(orchestrator.clone()),
            orchestrator,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: chrono::Utc::now(),
        }
    }

    /// Get uptime as human-readable string
    pub fn uptime(&self) -> String {
        let secs = (chrono::Utc::now() - self.started_at).num_seconds().max(0);
        let (days, hours, minutes) = (secs / 86_400, (secs % 86_400) / 3600, (secs % 3600) / 60);

        if days > 0 {
            format!("{}d {}h {}m", days, hours, minutes)
        } else if hours > 0 {
            format!("{}h {}m", hours, minutes)
        } else {
            format!("{}m {}s", minutes, secs % 60)
        }
    }
}
