//! Engine configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Orchestrator tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on a single notification call, in seconds
    #[serde(default = "default_notify_timeout")]
    pub notify_timeout_secs: u64,

    /// Audit entries fetched per page when streaming history
    #[serde(default = "default_history_page_size")]
    pub history_page_size: usize,

    /// SLA applied when a caller submits a chain without one
    #[serde(default = "default_sla")]
    pub default_sla_secs: u64,

    /// Capacity of the transition event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl EngineConfig {
    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            notify_timeout_secs: default_notify_timeout(),
            history_page_size: default_history_page_size(),
            default_sla_secs: default_sla(),
            event_buffer: default_event_buffer(),
        }
    }
}

fn default_notify_timeout() -> u64 {
    10
}

fn default_history_page_size() -> usize {
    100
}

fn default_sla() -> u64 {
    24 * 60 * 60
}

fn default_event_buffer() -> usize {
    1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"notify_timeout_secs": 3}"#).unwrap();
        assert_eq!(config.notify_timeout(), Duration::from_secs(3));
        assert_eq!(config.history_page_size, 100);
        assert_eq!(config.default_sla_secs, 86_400);
    }
}
