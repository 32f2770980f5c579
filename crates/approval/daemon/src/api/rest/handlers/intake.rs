//! Inbound reply handler

use super::approvals::{resolution_response, MutationResponse};
use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use approval_engine::InboundReply;
use axum::{extract::State, Json};

/// Feed an approver's reply (as relayed by the mail/chat gateway) to the
/// decision intake.
pub async fn receive_reply(
    State(state): State<AppState>,
    Json(reply): Json<InboundReply>,
) -> ApiResult<Json<MutationResponse>> {
    resolution_response(&state, state.intake.receive(&reply).await).await
}
