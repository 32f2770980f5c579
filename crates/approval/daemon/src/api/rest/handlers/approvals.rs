//! Approval lifecycle handlers

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use approval_engine::{EngineResult, LedgerVerification, ReplayPoint};
use approval_store::{ApprovalFilter, QueryWindow};
use approval_types::{
    ApprovalError, ApprovalId, ApprovalRequest, ApprovalState, ApproverId, AuditEntry,
    NewApproval, Outcome, SlaPolicy,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Create approval request
#[derive(Debug, Deserialize)]
pub struct CreateApprovalRequest {
    pub chain: Vec<ApproverId>,
    /// Seconds for every level, or one value per level. Falls back to
    /// the engine's default SLA.
    #[serde(default)]
    pub sla: Option<SlaPolicy>,
    #[serde(default)]
    pub context: Value,
    /// Hold the response until the request is resolved
    #[serde(default)]
    pub wait: bool,
}

/// An approval as rendered by the API
#[derive(Debug, Serialize)]
pub struct ApprovalView {
    #[serde(flatten)]
    pub approval: ApprovalRequest,
    pub current_approver: ApproverId,
    pub escalation_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sla_deadline: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_sla_secs: Option<u64>,
}

impl ApprovalView {
    pub fn new(approval: ApprovalRequest, now: DateTime<Utc>) -> Self {
        let awaiting = approval.state.is_awaiting();
        Self {
            current_approver: approval.current_approver().clone(),
            escalation_count: approval.escalation_count(),
            sla_deadline: approval.level_deadline(),
            remaining_sla_secs: awaiting.then(|| approval.remaining_sla(now).as_secs()),
            approval,
        }
    }
}

/// Result of a state-changing call.
///
/// `status` is `applied` when this call committed a transition and
/// `already_resolved` when the request was terminal before it arrived.
#[derive(Debug, Serialize)]
pub struct MutationResponse {
    pub status: String,
    pub approval_id: ApprovalId,
    pub state: ApprovalState,
    pub approval: ApprovalView,
}

impl MutationResponse {
    fn new(status: &str, approval: ApprovalRequest, now: DateTime<Utc>) -> Self {
        Self {
            status: status.to_string(),
            approval_id: approval.id.clone(),
            state: approval.state,
            approval: ApprovalView::new(approval, now),
        }
    }
}

/// Decision request
#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub approver: ApproverId,
    pub outcome: Outcome,
    #[serde(default)]
    pub comments: String,
}

/// Cancel request
#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// List query parameters
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub state: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

/// Replay query parameters
#[derive(Debug, Deserialize)]
pub struct ReplayQuery {
    pub at: DateTime<Utc>,
}

/// Replay response
#[derive(Debug, Serialize)]
pub struct ReplayResponse {
    pub approval_id: ApprovalId,
    pub at: DateTime<Utc>,
    /// Absent when the approval did not exist yet at `at`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub point: Option<ReplayPoint>,
}

const DEFAULT_LIST_LIMIT: usize = 100;

fn parse_id(raw: &str) -> ApiResult<ApprovalId> {
    ApprovalId::parse(raw)
        .ok_or_else(|| ApiError::BadRequest(format!("'{}' is not an approval id", raw)))
}

/// Turn the result of a mutation into a response. A request that was
/// already terminal is reported with its current snapshot, not as an error.
pub(crate) async fn resolution_response(
    state: &AppState,
    result: EngineResult<ApprovalRequest>,
) -> ApiResult<Json<MutationResponse>> {
    let now = state.orchestrator.now();
    match result {
        Ok(approval) => Ok(Json(MutationResponse::new("applied", approval, now))),
        Err(err) => match err.approval() {
            Some(ApprovalError::AlreadyResolved { id, .. }) => {
                let current = state.orchestrator.check_approval_status(id).await?;
                Ok(Json(MutationResponse::new("already_resolved", current, now)))
            }
            _ => Err(err.into()),
        },
    }
}

/// Create a new approval request
pub async fn create_approval(
    State(state): State<AppState>,
    Json(request): Json<CreateApprovalRequest>,
) -> ApiResult<(StatusCode, Json<ApprovalView>)> {
    let sla = request
        .sla
        .unwrap_or(SlaPolicy::Uniform(state.orchestrator.config().default_sla_secs));
    let new = NewApproval {
        chain: request.chain,
        sla,
        context: request.context,
    };

    let approval = if request.wait {
        state.orchestrator.request_approval_and_wait(new).await?
    } else {
        let id = state.orchestrator.request_approval(new).await?;
        state.orchestrator.check_approval_status(&id).await?
    };

    let status = if approval.is_terminal() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(ApprovalView::new(approval, state.orchestrator.now()))))
}

/// List approvals, newest first
pub async fn list_approvals(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<ApprovalView>>> {
    let filter_state = query
        .state
        .as_deref()
        .map(str::parse::<ApprovalState>)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let filter = ApprovalFilter {
        state: filter_state,
        window: QueryWindow::page(
            query.limit.unwrap_or(DEFAULT_LIST_LIMIT),
            query.offset.unwrap_or(0),
        ),
    };

    let now = state.orchestrator.now();
    let approvals = state.orchestrator.list(&filter).await?;
    Ok(Json(
        approvals
            .into_iter()
            .map(|a| ApprovalView::new(a, now))
            .collect(),
    ))
}

/// Get a specific approval
pub async fn get_approval(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ApprovalView>> {
    let id = parse_id(&id)?;
    let approval = state.orchestrator.check_approval_status(&id).await?;
    Ok(Json(ApprovalView::new(approval, state.orchestrator.now())))
}

/// Record an approver's decision
pub async fn record_decision(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<DecisionRequest>,
) -> ApiResult<Json<MutationResponse>> {
    let id = parse_id(&id)?;
    let result = state
        .orchestrator
        .record_decision(&id, request.approver, request.outcome, request.comments)
        .await;
    resolution_response(&state, result).await
}

/// Cancel an awaiting approval
pub async fn cancel_approval(
    State(state): State<AppState>,
    Path(id): Path<String>,
    request: Option<Json<CancelRequest>>,
) -> ApiResult<Json<MutationResponse>> {
    let id = parse_id(&id)?;
    let reason = request.and_then(|Json(r)| r.reason);
    let result = state.orchestrator.cancel(&id, reason).await;
    resolution_response(&state, result).await
}

/// Escalate to the next approver without waiting for the SLA
pub async fn escalate_approval(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<MutationResponse>> {
    let id = parse_id(&id)?;
    let result = state.orchestrator.escalate(&id).await;
    resolution_response(&state, result).await
}

/// Full audit history, oldest first
pub async fn approval_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<AuditEntry>>> {
    let id = parse_id(&id)?;
    let history = state.orchestrator.get_approval_history(&id).await?;
    Ok(Json(history.collect().await?))
}

/// Where an approval stood at a given instant
pub async fn replay_approval(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ReplayQuery>,
) -> ApiResult<Json<ReplayResponse>> {
    let id = parse_id(&id)?;
    let point = state.orchestrator.ledger().replay_at(&id, query.at).await?;
    Ok(Json(ReplayResponse {
        approval_id: id,
        at: query.at,
        point,
    }))
}

/// Recompute the audit hash chain
pub async fn verify_approval(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<LedgerVerification>> {
    let id = parse_id(&id)?;
    Ok(Json(state.orchestrator.ledger().verify(&id).await?))
}
