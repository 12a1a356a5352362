use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;

use super::{ApiResult, AppState};
use crate::models::{submissions::TaskSubmission, withdrawals::Withdrawal};
use crate::services::{
    admin::{AdminReply, AdminRequest},
    dispatch,
};

#[derive(Deserialize)]
pub struct AdminCommandRequest {
    actor_id: i64,
    text: String,
}

#[derive(Deserialize)]
pub struct Decision {
    actor_id: i64,
    approve: bool,
}

pub async fn execute(
    State(state): State<AppState>,
    Json(req): Json<AdminCommandRequest>,
) -> ApiResult<AdminReply> {
    let reply = dispatch(&state.channels.admin, |response| AdminRequest::Execute {
        actor_id: req.actor_id,
        text: req.text,
        response,
    })
    .await?;

    Ok(Json(reply))
}

pub async fn resolve_submission(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(decision): Json<Decision>,
) -> ApiResult<TaskSubmission> {
    let submission = dispatch(&state.channels.admin, |response| {
        AdminRequest::ResolveSubmission {
            actor_id: decision.actor_id,
            submission_id: id,
            approve: decision.approve,
            response,
        }
    })
    .await?;

    Ok(Json(submission))
}

pub async fn resolve_withdrawal(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(decision): Json<Decision>,
) -> ApiResult<Withdrawal> {
    let withdrawal = dispatch(&state.channels.admin, |response| {
        AdminRequest::ResolveWithdrawal {
            actor_id: decision.actor_id,
            withdrawal_id: id,
            approve: decision.approve,
            response,
        }
    })
    .await?;

    Ok(Json(withdrawal))
}
