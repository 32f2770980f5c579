//! Decision Intake: turns an approver's reply into a recorded decision.
//!
//! Correlation and classification happen here, never in the
//! orchestrator. A reply is matched to its approval by the `APR-…` id in
//! the subject line and classified by the first word of the body.

use crate::error::EngineResult;
use crate::orchestrator::ApprovalOrchestrator;
use approval_types::{ApprovalId, ApprovalRequest, ApproverId, Outcome};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

const APPROVE_WORDS: &[&str] = &["approve", "approved", "yes", "ok", "accept"];
const REJECT_WORDS: &[&str] = &["reject", "rejected", "deny", "denied", "no", "decline"];

/// An inbound reply as delivered by the mail/chat collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundReply {
    pub subject: String,
    pub body: String,
    /// Raw sender, either `addr` or `Display Name <addr>`
    pub sender: String,
}

/// What a reply says, ready for `record_decision`
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReply {
    pub approval_id: ApprovalId,
    pub approver: ApproverId,
    pub outcome: Outcome,
    pub comments: String,
}

/// Reasons a reply cannot be turned into a decision
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntakeError {
    #[error("reply subject carries no approval id")]
    MissingApprovalId,

    #[error("reply has no sender address")]
    MissingSender,

    #[error("cannot classify reply starting with '{0}'")]
    UnrecognizedOutcome(String),
}

/// Parses replies and forwards them to the orchestrator.
#[derive(Clone)]
pub struct DecisionIntake {
    orchestrator: ApprovalOrchestrator,
}

impl DecisionIntake {
    pub fn new(orchestrator: ApprovalOrchestrator) -> Self {
        Self { orchestrator }
    }

    /// Parse `reply` and record the decision it carries.
    #[instrument(skip(self, reply), fields(sender = %reply.sender))]
    pub async fn receive(&self, reply: &InboundReply) -> EngineResult<ApprovalRequest> {
        let parsed = Self::parse(reply)?;
        info!(
            approval_id = %parsed.approval_id,
            outcome = %parsed.outcome,
            "Reply correlated to approval"
        );
        self.orchestrator
            .record_decision(&parsed.approval_id, parsed.approver, parsed.outcome, parsed.comments)
            .await
    }

    pub fn parse(reply: &InboundReply) -> Result<ParsedReply, IntakeError> {
        let approval_id = reply
            .subject
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
            .find_map(ApprovalId::parse)
            .ok_or(IntakeError::MissingApprovalId)?;

        let approver = sender_address(&reply.sender).ok_or(IntakeError::MissingSender)?;

        let body = reply_text(&reply.body);
        let (first, rest) = match body.find(char::is_whitespace) {
            Some(split) => body.split_at(split),
            None => (body.as_str(), ""),
        };
        let word = first
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();

        let outcome = if APPROVE_WORDS.contains(&word.as_str()) {
            Outcome::Approved
        } else if REJECT_WORDS.contains(&word.as_str()) {
            Outcome::Rejected
        } else {
            return Err(IntakeError::UnrecognizedOutcome(first.to_string()));
        };

        let comments = rest
            .trim_start_matches(|c: char| c.is_whitespace() || matches!(c, ',' | '.' | '!' | ':' | '-'))
            .trim()
            .to_string();

        Ok(ParsedReply {
            approval_id,
            approver: ApproverId::new(approver),
            outcome,
            comments,
        })
    }
}

/// `Jane Doe <jane@corp.com>` → `jane@corp.com`
fn sender_address(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let address = match (raw.rfind('<'), raw.rfind('>')) {
        (Some(open), Some(close)) if open < close => &raw[open + 1..close],
        _ => raw,
    };
    let address = address.trim();
    (!address.is_empty()).then(|| address.to_string())
}

/// The reply's own text: quoted history (`>` lines and everything after
/// an `On … wrote:` line) is dropped.
fn reply_text(body: &str) -> String {
    body.lines()
        .take_while(|line| {
            let line = line.trim();
            !(line.starts_with('>') || (line.starts_with("On ") && line.ends_with("wrote:")))
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ID: &str = "APR-0123456789abcdef0123456789abcdef";

    fn reply(subject: &str, body: &str) -> InboundReply {
        InboundReply {
            subject: subject.into(),
            body: body.into(),
            sender: "Hiring Manager <Manager@Contoso.com>".into(),
        }
    }

    #[test]
    fn approve_with_comments() {
        let parsed = DecisionIntake::parse(&reply(
            &format!("RE: Approval required [{}]", ID),
            "Approved, looks fine to me.\n\nThanks",
        ))
        .unwrap();

        assert_eq!(parsed.approval_id.as_str(), ID);
        assert_eq!(parsed.approver.as_str(), "Manager@Contoso.com");
        assert_eq!(parsed.outcome, Outcome::Approved);
        assert_eq!(parsed.comments, "looks fine to me.\n\nThanks");
    }

    #[test]
    fn reject_ignores_quoted_history() {
        let parsed = DecisionIntake::parse(&reply(
            &format!("Re: {}", ID.to_lowercase()),
            "no - budget frozen\nOn Mon, 3 Mar 2025 someone wrote:\n> Approval required",
        ))
        .unwrap();

        assert_eq!(parsed.outcome, Outcome::Rejected);
        assert_eq!(parsed.comments, "budget frozen");
    }

    #[test]
    fn subject_without_id_is_refused() {
        let err = DecisionIntake::parse(&reply("Re: your request", "yes")).unwrap_err();
        assert_eq!(err, IntakeError::MissingApprovalId);
    }

    #[test]
    fn unclassifiable_body_is_refused() {
        let err = DecisionIntake::parse(&reply(ID, "Let me think about it")).unwrap_err();
        assert_eq!(err, IntakeError::UnrecognizedOutcome("Let".into()));
    }

    #[test]
    fn bare_sender_address_is_kept() {
        assert_eq!(sender_address(" ciso@corp.com "), Some("ciso@corp.com".into()));
        assert_eq!(sender_address("  "), None);
    }

    proptest! {
        #[test]
        fn any_approve_word_classifies_as_approved(
            word in prop::sample::select(APPROVE_WORDS.to_vec()),
            comment in "[a-z ]{0,40}",
        ) {
            let body = format!("{} {}", word.to_uppercase(), comment);
            let parsed = DecisionIntake::parse(&reply(ID, &body)).unwrap();
            prop_assert_eq!(parsed.outcome, Outcome::Approved);
            prop_assert_eq!(parsed.comments, comment.trim());
        }
    }
}
