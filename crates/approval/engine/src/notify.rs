//! Notification Port: tells an approver a request is waiting on them.
//!
//! Delivery is best effort. The orchestrator bounds each call and logs
//! failures; an approver who never hears about a request simply lets the
//! SLA lapse, and escalation takes over.

use approval_types::{ApprovalId, ApprovalRequest, ApproverId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::info;

/// Why an approver is being contacted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// First approver of a new request
    Request,
    /// A previous level lapsed and the request moved to this approver
    Escalation,
}

/// One outbound message to one approver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalNotice {
    pub approval_id: ApprovalId,
    pub approver: ApproverId,
    pub level: usize,
    pub kind: NoticeKind,
    pub context: Value,
    /// When this level escalates if nobody answers
    pub deadline: DateTime<Utc>,
}

impl ApprovalNotice {
    /// Notice for the request's current approver; `None` once terminal.
    pub fn for_request(request: &ApprovalRequest, kind: NoticeKind) -> Option<Self> {
        Some(Self {
            approval_id: request.id.clone(),
            approver: request.current_approver().clone(),
            level: request.current_level,
            kind,
            context: request.context.clone(),
            deadline: request.level_deadline()?,
        })
    }

    /// Subject line carrying the approval id, so a reply can be correlated.
    pub fn subject(&self) -> String {
        match self.kind {
            NoticeKind::Request => format!("Approval required [{}]", self.approval_id),
            NoticeKind::Escalation => format!("Escalated approval required [{}]", self.approval_id),
        }
    }
}

/// Notification delivery errors
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification transport failed: {0}")]
    Transport(String),

    #[error("notification endpoint answered {0}")]
    Status(u16),
}

/// Outbound channel to approvers (mail, chat, webhook...)
#[async_trait]
pub trait NotificationPort: Send + Sync {
    async fn notify(&self, notice: &ApprovalNotice) -> Result<(), NotifyError>;
}

/// Writes notices to the log. Useful in development and as a fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl NotificationPort for TracingNotifier {
    async fn notify(&self, notice: &ApprovalNotice) -> Result<(), NotifyError> {
        info!(
            approval_id = %notice.approval_id,
            approver = %notice.approver,
            level = notice.level,
            kind = ?notice.kind,
            deadline = %notice.deadline,
            "{}",
            notice.subject()
        );
        Ok(())
    }
}

/// POSTs each notice as JSON to a fixed endpoint.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    subject: String,
    #[serde(flatten)]
    notice: &'a ApprovalNotice,
}

#[async_trait]
impl NotificationPort for WebhookNotifier {
    async fn notify(&self, notice: &ApprovalNotice) -> Result<(), NotifyError> {
        let payload = WebhookPayload {
            subject: notice.subject(),
            notice,
        };
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }
        Ok(())
    }
}
