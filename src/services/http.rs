use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde_json::json;
use tower_http::trace::TraceLayer;

use super::{dispatch, users::UserRequest, Channels, Precondition, ServiceError};
use crate::utils::{cooldown::Cooldown, sessions::SessionStore};

mod admin;
mod users;

const COOLDOWN_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub(crate) struct AppState {
    channels: Channels,
    sessions: SessionStore,
    cooldown: Arc<Cooldown>,
}

impl AppState {
    /// Advisory rate limit for user-initiated mutations.
    fn throttle(&self, user_id: i64) -> Result<(), ApiError> {
        if self.cooldown.try_acquire(user_id) {
            Ok(())
        } else {
            Err(ServiceError::precondition(Precondition::RateLimited, "slow down").into())
        }
    }

    async fn ensure_access(&self, user_id: i64) -> Result<(), ApiError> {
        dispatch(&self.channels.users, |response| UserRequest::CheckAccess {
            id: user_id,
            response,
        })
        .await?;
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct ApiError(ServiceError);

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        ApiError(e)
    }
}

pub(crate) type ApiResult<T> = Result<Json<T>, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self.0 {
            ServiceError::NotFound(what) => (StatusCode::NOT_FOUND, json!("not_found"), what.clone()),
            ServiceError::PreconditionFailed(Precondition::RateLimited, details) => (
                StatusCode::TOO_MANY_REQUESTS,
                json!(Precondition::RateLimited),
                details.clone(),
            ),
            ServiceError::PreconditionFailed(kind, details) => {
                (StatusCode::CONFLICT, json!(kind), details.clone())
            }
            ServiceError::Forbidden => (StatusCode::FORBIDDEN, json!("forbidden"), String::new()),
            e => {
                log::error!("Request failed: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!("internal"),
                    "Internal server error.".to_string(),
                )
            }
        };

        (status, Json(json!({"error": error, "details": details}))).into_response()
    }
}

pub async fn start_http_server(
    listen: &str,
    channels: Channels,
    sessions: SessionStore,
    cooldown: Arc<Cooldown>,
) -> Result<(), anyhow::Error> {
    let pruned = cooldown.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(COOLDOWN_PRUNE_INTERVAL);
        loop {
            interval.tick().await;
            let removed = pruned.prune();
            if removed > 0 {
                log::debug!("Pruned {} cooldown entries.", removed);
            }
        }
    });

    let app_state = AppState {
        channels,
        sessions,
        cooldown,
    };

    let app = Router::new()
        .route("/users", post(users::register))
        .route("/users/{id}", get(users::get_profile))
        .route("/users/{id}/access", get(users::check_access))
        .route("/users/{id}/bonus", post(users::claim_bonus))
        .route("/users/{id}/language", put(users::set_language))
        .route("/users/{id}/phone", put(users::set_phone))
        .route(
            "/users/{id}/session",
            get(users::get_session)
                .put(users::set_session)
                .delete(users::clear_session),
        )
        .route("/users/{id}/referrals", get(users::referral_summary))
        .route(
            "/users/{id}/referrals/withdraw",
            post(users::withdraw_cycle),
        )
        .route("/users/{id}/tasks/{task_id}", post(users::submit_task))
        .route("/users/{id}/withdrawals", post(users::request_withdrawal))
        .route("/tasks", get(users::list_tasks))
        .route("/stats", get(users::get_stats))
        .route("/referrals/top", get(users::top_referrers))
        .route("/admin/commands", post(admin::execute))
        .route(
            "/admin/submissions/{id}/decision",
            post(admin::resolve_submission),
        )
        .route(
            "/admin/withdrawals/{id}/decision",
            post(admin::resolve_withdrawal),
        )
        .route("/health", get(|| async { "OK" }))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(listen).await?;
    log::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
