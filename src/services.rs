use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::{mpsc, oneshot};

use crate::models::{channels::ChannelRef, tasks::TaskCatalog};
use crate::repositories::{
    submissions::SubmissionRepository, telegram::TelegramApi, users::UserRepository,
    withdrawals::WithdrawalRepository, Messenger, SubmissionStore, UserStore, WithdrawalStore,
};
use crate::settings::{Rewards, Settings};
use crate::utils::{cooldown::Cooldown, sessions::SessionStore};

pub mod admin;
pub mod http;
pub mod notifications;
pub mod referrals;
pub mod tasks;
#[cfg(test)]
mod testing;
pub mod users;
pub mod withdrawals;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Precondition {
    InsufficientBalance,
    BelowMinimumWithdrawal,
    InvalidAmount,
    NotEnoughCycles,
    DuplicateSubmission,
    AlreadyResolved,
    BonusNotReady,
    UnknownTask,
    PhoneInUse,
    InvalidPhone,
    Banned,
    NotSubscribed,
    RateLimited,
    InvalidCommand,
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Precondition failed: {0:?} - {1}")]
    PreconditionFailed(Precondition, String),
    #[error("Forbidden")]
    Forbidden,
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn precondition(kind: Precondition, details: impl Into<String>) -> Self {
        ServiceError::PreconditionFailed(kind, details.into())
    }

    pub fn database(e: anyhow::Error) -> Self {
        ServiceError::Database(e.to_string())
    }

    pub fn user_not_found(tg_id: i64) -> Self {
        ServiceError::NotFound(format!("user {}", tg_id))
    }
}

#[async_trait]
pub trait RequestHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle_request(&self, request: T);
}

#[async_trait]
pub trait Service<T, H>: Send + Sync + 'static
where
    T: Send + 'static,
    H: RequestHandler<T> + Clone + Send,
{
    async fn run(&mut self, handler: H, receiver: &mut mpsc::Receiver<T>) {
        while let Some(request) = receiver.recv().await {
            let handler = handler.clone();

            tokio::spawn(async move {
                handler.handle_request(request).await;
            });
        }
    }
}

/// Sends a request to a running service and waits for its reply.
pub(crate) async fn dispatch<R, T>(
    channel: &mpsc::Sender<R>,
    request: impl FnOnce(oneshot::Sender<Result<T, ServiceError>>) -> R,
) -> Result<T, ServiceError> {
    let (response, receiver) = oneshot::channel();

    channel
        .send(request(response))
        .await
        .map_err(|e| ServiceError::Internal(format!("Failed to process request: {}", e)))?;

    receiver
        .await
        .map_err(|e| ServiceError::Internal(format!("Failed to receive response: {}", e)))?
}

/// Static allow-list of privileged platform ids.
#[derive(Clone, Debug, Default)]
pub struct Admins(Arc<HashSet<i64>>);

impl Admins {
    pub fn new(ids: impl IntoIterator<Item = i64>) -> Self {
        Self(Arc::new(ids.into_iter().collect()))
    }

    pub fn contains(&self, tg_id: i64) -> bool {
        self.0.contains(&tg_id)
    }

    pub fn ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.0.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn ensure(&self, actor_id: i64) -> Result<(), ServiceError> {
        if self.contains(actor_id) {
            Ok(())
        } else {
            Err(ServiceError::Forbidden)
        }
    }
}

#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub submissions: Arc<dyn SubmissionStore>,
    pub withdrawals: Arc<dyn WithdrawalStore>,
}

impl Stores {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            users: Arc::new(UserRepository::new(pool.clone())),
            submissions: Arc::new(SubmissionRepository::new(pool.clone())),
            withdrawals: Arc::new(WithdrawalRepository::new(pool)),
        }
    }
}

/// Business configuration shared by all handlers.
#[derive(Clone)]
pub struct CoreConfig {
    pub admins: Admins,
    pub rewards: Rewards,
    pub tasks: TaskCatalog,
    pub channels: Vec<ChannelRef>,
    pub start_date: Option<NaiveDate>,
}

impl CoreConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let channels = settings
            .channels
            .required
            .iter()
            .filter_map(|raw| {
                let parsed = ChannelRef::parse(raw);
                if parsed.is_none() {
                    log::warn!("Ignoring malformed required channel: {}", raw);
                }
                parsed
            })
            .collect();

        Self {
            admins: Admins::new(settings.admins.iter().copied()),
            rewards: settings.rewards.clone(),
            tasks: TaskCatalog::from(settings.tasks.as_slice()),
            channels,
            start_date: settings.start_date,
        }
    }
}

/// Request channels of the running services.
#[derive(Clone)]
pub struct Channels {
    pub users: mpsc::Sender<users::UserRequest>,
    pub referrals: mpsc::Sender<referrals::ReferralRequest>,
    pub tasks: mpsc::Sender<tasks::TaskRequest>,
    pub withdrawals: mpsc::Sender<withdrawals::WithdrawalRequest>,
    pub notifications: mpsc::Sender<notifications::NotificationRequest>,
    pub admin: mpsc::Sender<admin::AdminRequest>,
}

pub fn spawn_services(stores: Stores, messenger: Arc<dyn Messenger>, config: CoreConfig) -> Channels {
    let (user_tx, mut user_rx) = mpsc::channel(512);
    let (referral_tx, mut referral_rx) = mpsc::channel(512);
    let (task_tx, mut task_rx) = mpsc::channel(512);
    let (withdrawal_tx, mut withdrawal_rx) = mpsc::channel(512);
    let (notification_tx, mut notification_rx) = mpsc::channel(512);
    let (admin_tx, mut admin_rx) = mpsc::channel(512);

    let mut notification_service = notifications::NotificationService::new();
    let mut referral_service = referrals::ReferralService::new();
    let mut user_service = users::UserService::new();
    let mut task_service = tasks::TaskService::new();
    let mut withdrawal_service = withdrawals::WithdrawalService::new();
    let mut admin_service = admin::AdminService::new();

    log::info!("Starting notification service.");
    let handler = notifications::NotificationRequestHandler::new(
        messenger.clone(),
        stores.users.clone(),
        config.admins.clone(),
    );
    tokio::spawn(async move {
        notification_service
            .run(handler, &mut notification_rx)
            .await;
    });

    log::info!("Starting referral service.");
    let handler = referrals::ReferralRequestHandler::new(
        stores.clone(),
        config.rewards.referral_bonus_in_cents,
        notification_tx.clone(),
    );
    tokio::spawn(async move {
        referral_service.run(handler, &mut referral_rx).await;
    });

    log::info!("Starting user service.");
    let handler = users::UserRequestHandler::new(
        stores.users.clone(),
        messenger,
        config.clone(),
        referral_tx.clone(),
        notification_tx.clone(),
    );
    tokio::spawn(async move {
        user_service.run(handler, &mut user_rx).await;
    });

    log::info!("Starting task service.");
    let handler = tasks::TaskRequestHandler::new(
        stores.submissions.clone(),
        config.tasks.clone(),
        referral_tx.clone(),
        notification_tx.clone(),
    );
    tokio::spawn(async move {
        task_service.run(handler, &mut task_rx).await;
    });

    log::info!("Starting withdrawal service.");
    let handler = withdrawals::WithdrawalRequestHandler::new(
        stores.withdrawals.clone(),
        config.rewards.min_withdraw_in_cents,
        notification_tx.clone(),
    );
    tokio::spawn(async move {
        withdrawal_service.run(handler, &mut withdrawal_rx).await;
    });

    log::info!("Starting admin service.");
    let handler = admin::AdminRequestHandler::new(
        stores.clone(),
        config.admins.clone(),
        config.start_date,
        task_tx.clone(),
        withdrawal_tx.clone(),
        notification_tx.clone(),
    );
    tokio::spawn(async move {
        admin_service.run(handler, &mut admin_rx).await;
    });

    Channels {
        users: user_tx,
        referrals: referral_tx,
        tasks: task_tx,
        withdrawals: withdrawal_tx,
        notifications: notification_tx,
        admin: admin_tx,
    }
}

pub async fn start_services(
    pool: PgPool,
    settings: Settings,
    listen: &str,
) -> Result<(), anyhow::Error> {
    let config = CoreConfig::from_settings(&settings);
    let messenger: Arc<dyn Messenger> = Arc::new(TelegramApi::new(
        &settings.telegram.api_url,
        &settings.telegram.bot_token,
    ));

    let channels = spawn_services(Stores::postgres(pool), messenger, config);

    let sessions = SessionStore::new(Duration::from_secs(settings.throttle.session_ttl_secs));
    sessions.start_purge_task(Duration::from_secs(60));
    let cooldown = Arc::new(Cooldown::new(Duration::from_secs(
        settings.throttle.cooldown_secs,
    )));

    log::info!("Starting HTTP server.");
    http::start_http_server(listen, channels, sessions, cooldown).await?;

    Ok(())
}

/// Formats a timestamp for user-facing notices.
pub(crate) fn format_time(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}
