use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use super::{ApiError, ApiResult, AppState};
use crate::models::{
    referrals::{ReferralSummary, TopReferrer},
    stats::Stats,
    submissions::{NewSubmission, TaskSubmission},
    tasks::Task,
    users::{Language, NewUser, Profile},
    withdrawals::NewWithdrawal,
};
use crate::services::{
    dispatch,
    referrals::{CycleWithdrawal, ReferralRequest},
    tasks::TaskRequest,
    users::{BonusReceipt, Registration, UserRequest},
    withdrawals::{WithdrawalReceipt, WithdrawalRequest},
    ServiceError,
};
use crate::utils::sessions::Conversation;

const DEFAULT_TOP_LIMIT: i64 = 10;

#[derive(Deserialize)]
pub struct LanguageUpdate {
    language: String,
}

#[derive(Deserialize)]
pub struct PhoneUpdate {
    phone: String,
}

#[derive(Deserialize)]
pub struct TopQuery {
    limit: Option<i64>,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<NewUser>,
) -> Result<(StatusCode, Json<Registration>), ApiError> {
    let registration = dispatch(&state.channels.users, |response| UserRequest::Register {
        tg_id: req.tg_id,
        referrer_id: req.referrer_id,
        response,
    })
    .await?;

    let status = if registration.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(registration)))
}

pub async fn get_profile(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Profile> {
    let profile = dispatch(&state.channels.users, |response| UserRequest::GetProfile {
        id,
        response,
    })
    .await?;

    Ok(Json(profile))
}

pub async fn check_access(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.ensure_access(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn claim_bonus(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<BonusReceipt> {
    state.throttle(id)?;
    state.ensure_access(id).await?;

    let receipt = dispatch(&state.channels.users, |response| UserRequest::ClaimBonus {
        id,
        response,
    })
    .await?;

    Ok(Json(receipt))
}

pub async fn set_language(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<LanguageUpdate>,
) -> ApiResult<Language> {
    state.throttle(id)?;

    let language = dispatch(&state.channels.users, |response| UserRequest::SetLanguage {
        id,
        language: req.language,
        response,
    })
    .await?;

    Ok(Json(language))
}

pub async fn set_phone(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<PhoneUpdate>,
) -> ApiResult<String> {
    state.throttle(id)?;

    let phone = dispatch(&state.channels.users, |response| UserRequest::SetPhone {
        id,
        phone: req.phone,
        response,
    })
    .await?;

    Ok(Json(phone))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Conversation> {
    state
        .sessions
        .get(id)
        .map(Json)
        .ok_or_else(|| ServiceError::NotFound(format!("session of {}", id)).into())
}

pub async fn set_session(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(conversation): Json<Conversation>,
) -> StatusCode {
    state.sessions.set(id, conversation);
    StatusCode::NO_CONTENT
}

pub async fn clear_session(State(state): State<AppState>, Path(id): Path<i64>) -> StatusCode {
    state.sessions.clear(id);
    StatusCode::NO_CONTENT
}

pub async fn referral_summary(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<ReferralSummary> {
    let summary = dispatch(&state.channels.referrals, |response| {
        ReferralRequest::Summary {
            user_id: id,
            response,
        }
    })
    .await?;

    Ok(Json(summary))
}

pub async fn withdraw_cycle(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<CycleWithdrawal>), ApiError> {
    state.throttle(id)?;
    state.ensure_access(id).await?;

    let withdrawal = dispatch(&state.channels.referrals, |response| {
        ReferralRequest::WithdrawCycle {
            user_id: id,
            response,
        }
    })
    .await?;

    Ok((StatusCode::CREATED, Json(withdrawal)))
}

pub async fn list_tasks(State(state): State<AppState>) -> ApiResult<Vec<Task>> {
    let (response, receiver) = tokio::sync::oneshot::channel();
    state
        .channels
        .tasks
        .send(TaskRequest::ListTasks { response })
        .await
        .map_err(|e| ServiceError::Internal(format!("Failed to process request: {}", e)))?;

    let tasks = receiver
        .await
        .map_err(|e| ServiceError::Internal(format!("Failed to receive response: {}", e)))?;
    Ok(Json(tasks))
}

pub async fn submit_task(
    State(state): State<AppState>,
    Path((id, task_id)): Path<(i64, String)>,
    Json(proof): Json<NewSubmission>,
) -> Result<(StatusCode, Json<TaskSubmission>), ApiError> {
    state.throttle(id)?;
    state.ensure_access(id).await?;

    let submission = dispatch(&state.channels.tasks, |response| TaskRequest::Submit {
        user_id: id,
        task_id,
        proof,
        response,
    })
    .await?;
    state.sessions.clear(id);

    Ok((StatusCode::CREATED, Json(submission)))
}

pub async fn request_withdrawal(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<NewWithdrawal>,
) -> Result<(StatusCode, Json<WithdrawalReceipt>), ApiError> {
    state.throttle(id)?;
    state.ensure_access(id).await?;

    let receipt = dispatch(&state.channels.withdrawals, |response| {
        WithdrawalRequest::Create {
            user_id: id,
            request: req,
            response,
        }
    })
    .await?;
    state.sessions.clear(id);

    Ok((StatusCode::CREATED, Json(receipt)))
}

pub async fn get_stats(State(state): State<AppState>) -> ApiResult<Stats> {
    let stats = dispatch(&state.channels.users, |response| UserRequest::GetStats {
        response,
    })
    .await?;

    Ok(Json(stats))
}

pub async fn top_referrers(
    State(state): State<AppState>,
    Query(query): Query<TopQuery>,
) -> ApiResult<Vec<TopReferrer>> {
    let limit = query.limit.unwrap_or(DEFAULT_TOP_LIMIT).clamp(1, 100);
    let top = dispatch(&state.channels.referrals, |response| {
        ReferralRequest::TopReferrers { limit, response }
    })
    .await?;

    Ok(Json(top))
}
