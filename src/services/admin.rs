use std::str::FromStr;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use super::notifications::{send_and_forget, BroadcastReport, NotificationRequest};
use super::tasks::TaskRequest;
use super::withdrawals::WithdrawalRequest;
use super::{dispatch, Admins, Precondition, RequestHandler, Service, ServiceError, Stores};
use crate::models::{
    stats::{clamp_page, page_count, Stats, UsersPage, USERS_PER_PAGE},
    submissions::TaskSubmission,
    users::BalanceDebit,
    withdrawals::Withdrawal,
};
use crate::utils::money::{format_cents, parse_amount, AmountError};

const PENDING_LIMIT: i64 = 30;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdminCommand {
    Ban(i64),
    Unban(i64),
    AddBalance { user_id: i64, amount_in_cents: i64 },
    SubtractBalance { user_id: i64, amount_in_cents: i64 },
    Message { user_id: i64, text: String },
    Broadcast(String),
    Pending,
    /// One-based page as typed by the operator.
    Users(i64),
    AddRefs { user_id: i64, count: i64 },
    SetRefs { user_id: i64, count: i64 },
    Stats,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("id and count must be numbers")]
    NotANumber,
    #[error(transparent)]
    Amount(#[from] AmountError),
}

fn number(raw: Option<&str>) -> Result<i64, CommandError> {
    raw.ok_or(CommandError::NotANumber)?
        .parse()
        .map_err(|_| CommandError::NotANumber)
}

fn rest(raw: Option<&str>, usage: &'static str) -> Result<String, CommandError> {
    match raw.map(str::trim) {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        _ => Err(CommandError::Usage(usage)),
    }
}

impl FromStr for AdminCommand {
    type Err = CommandError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        let (head, tail) = text
            .split_once(char::is_whitespace)
            .unwrap_or((text, ""));
        // `/ban@my_bot` addresses the bot explicitly in group chats.
        let command = head.split('@').next().unwrap_or(head);

        let tail = tail.trim();
        let mut args = tail.split_whitespace();

        match command {
            "/ban" | "/unban" => {
                if tail.is_empty() {
                    return Err(CommandError::Usage("/ban 123456789"));
                }
                let user_id = number(args.next())?;
                Ok(match command {
                    "/ban" => AdminCommand::Ban(user_id),
                    _ => AdminCommand::Unban(user_id),
                })
            }
            "/addbal" | "/subbal" => {
                let (Some(id), Some(amount)) = (args.next(), args.next()) else {
                    return Err(CommandError::Usage("/addbal 123456789 5"));
                };
                let user_id = number(Some(id))?;
                let amount_in_cents = parse_amount(amount)?;
                Ok(match command {
                    "/addbal" => AdminCommand::AddBalance {
                        user_id,
                        amount_in_cents,
                    },
                    _ => AdminCommand::SubtractBalance {
                        user_id,
                        amount_in_cents,
                    },
                })
            }
            "/msg" => {
                let (id, text) = tail
                    .split_once(char::is_whitespace)
                    .ok_or(CommandError::Usage("/msg 123456789 text"))?;
                Ok(AdminCommand::Message {
                    user_id: number(Some(id))?,
                    text: rest(Some(text), "/msg 123456789 text")?,
                })
            }
            "/all" => Ok(AdminCommand::Broadcast(rest(Some(tail), "/all text")?)),
            "/pending" => Ok(AdminCommand::Pending),
            "/users" => match args.next() {
                Some(page) => match number(Some(page))? {
                    page if page >= 1 => Ok(AdminCommand::Users(page)),
                    _ => Err(CommandError::Usage("/users 1")),
                },
                None => Ok(AdminCommand::Users(1)),
            },
            "/addref" | "/setref" => {
                let (Some(id), Some(count), None) = (args.next(), args.next(), args.next()) else {
                    return Err(CommandError::Usage("/addref 123456789 5"));
                };
                let user_id = number(Some(id))?;
                let count = number(Some(count))?;
                Ok(match command {
                    "/addref" => AdminCommand::AddRefs { user_id, count },
                    _ => AdminCommand::SetRefs { user_id, count },
                })
            }
            "/stats" | "/admin" => Ok(AdminCommand::Stats),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "snake_case", tag = "reply")]
pub enum AdminReply {
    Banned { user_id: i64 },
    Unbanned { user_id: i64 },
    BalanceChanged { user_id: i64, balance_in_cents: i64 },
    MessageSent { user_id: i64, delivered: bool },
    Broadcast { report: BroadcastReport },
    Pending { withdrawals: Vec<Withdrawal> },
    Users { page: UsersPage },
    ManualRefs { user_id: i64, manual: i64 },
    Stats { stats: Stats },
}

pub enum AdminRequest {
    Execute {
        actor_id: i64,
        text: String,
        response: oneshot::Sender<Result<AdminReply, ServiceError>>,
    },
    ResolveSubmission {
        actor_id: i64,
        submission_id: i64,
        approve: bool,
        response: oneshot::Sender<Result<TaskSubmission, ServiceError>>,
    },
    ResolveWithdrawal {
        actor_id: i64,
        withdrawal_id: i64,
        approve: bool,
        response: oneshot::Sender<Result<Withdrawal, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct AdminRequestHandler {
    stores: Stores,
    admins: Admins,
    start_date: Option<NaiveDate>,
    task_channel: mpsc::Sender<TaskRequest>,
    withdrawal_channel: mpsc::Sender<WithdrawalRequest>,
    notification_channel: mpsc::Sender<NotificationRequest>,
}

impl AdminRequestHandler {
    pub fn new(
        stores: Stores,
        admins: Admins,
        start_date: Option<NaiveDate>,
        task_channel: mpsc::Sender<TaskRequest>,
        withdrawal_channel: mpsc::Sender<WithdrawalRequest>,
        notification_channel: mpsc::Sender<NotificationRequest>,
    ) -> Self {
        Self {
            stores,
            admins,
            start_date,
            task_channel,
            withdrawal_channel,
            notification_channel,
        }
    }

    async fn execute(&self, actor_id: i64, text: &str) -> Result<AdminReply, ServiceError> {
        self.admins.ensure(actor_id)?;

        let command = AdminCommand::from_str(text).map_err(|e| match e {
            CommandError::Amount(e) => {
                ServiceError::precondition(Precondition::InvalidAmount, e.to_string())
            }
            e => ServiceError::precondition(Precondition::InvalidCommand, e.to_string()),
        })?;
        log::info!("Admin {} runs {:?}.", actor_id, command);

        match command {
            AdminCommand::Ban(user_id) => {
                self.set_banned(user_id, true).await?;
                Ok(AdminReply::Banned { user_id })
            }
            AdminCommand::Unban(user_id) => {
                self.set_banned(user_id, false).await?;
                Ok(AdminReply::Unbanned { user_id })
            }
            AdminCommand::AddBalance {
                user_id,
                amount_in_cents,
            } => self.add_balance(user_id, amount_in_cents).await,
            AdminCommand::SubtractBalance {
                user_id,
                amount_in_cents,
            } => self.subtract_balance(user_id, amount_in_cents).await,
            AdminCommand::Message { user_id, text } => {
                let delivered = dispatch(&self.notification_channel, |response| {
                    NotificationRequest::Deliver {
                        chat_id: user_id,
                        text,
                        response,
                    }
                })
                .await?;
                Ok(AdminReply::MessageSent { user_id, delivered })
            }
            AdminCommand::Broadcast(text) => {
                let report = dispatch(&self.notification_channel, |response| {
                    NotificationRequest::Broadcast { text, response }
                })
                .await?;
                Ok(AdminReply::Broadcast { report })
            }
            AdminCommand::Pending => {
                let withdrawals = dispatch(&self.withdrawal_channel, |response| {
                    WithdrawalRequest::ListNew {
                        limit: PENDING_LIMIT,
                        response,
                    }
                })
                .await?;
                Ok(AdminReply::Pending { withdrawals })
            }
            AdminCommand::Users(page) => Ok(AdminReply::Users {
                page: self.users_page(page.saturating_sub(1)).await?,
            }),
            AdminCommand::AddRefs { user_id, count } => {
                let manual = self
                    .stores
                    .users
                    .add_manual_refs(user_id, count)
                    .await
                    .map_err(ServiceError::database)?
                    .ok_or_else(|| ServiceError::user_not_found(user_id))?;
                Ok(AdminReply::ManualRefs { user_id, manual })
            }
            AdminCommand::SetRefs { user_id, count } => {
                let manual = self
                    .stores
                    .users
                    .set_manual_refs(user_id, count)
                    .await
                    .map_err(ServiceError::database)?
                    .ok_or_else(|| ServiceError::user_not_found(user_id))?;
                Ok(AdminReply::ManualRefs { user_id, manual })
            }
            AdminCommand::Stats => {
                let now = Utc::now();
                let stats = self
                    .stores
                    .users
                    .stats(now)
                    .await
                    .map_err(ServiceError::database)?;
                Ok(AdminReply::Stats {
                    stats: stats.with_uptime(self.start_date, now),
                })
            }
        }
    }

    async fn set_banned(&self, user_id: i64, banned: bool) -> Result<(), ServiceError> {
        let updated = self
            .stores
            .users
            .set_banned(user_id, banned)
            .await
            .map_err(ServiceError::database)?;

        if updated {
            Ok(())
        } else {
            Err(ServiceError::user_not_found(user_id))
        }
    }

    async fn add_balance(
        &self,
        user_id: i64,
        amount_in_cents: i64,
    ) -> Result<AdminReply, ServiceError> {
        let balance_in_cents = self
            .stores
            .users
            .credit_balance(user_id, amount_in_cents)
            .await
            .map_err(ServiceError::database)?
            .ok_or_else(|| ServiceError::user_not_found(user_id))?;

        send_and_forget(
            &self.notification_channel,
            user_id,
            format!(
                "💰 An administrator credited <b>{}</b> to your balance.",
                format_cents(amount_in_cents)
            ),
        )
        .await;

        Ok(AdminReply::BalanceChanged {
            user_id,
            balance_in_cents,
        })
    }

    async fn subtract_balance(
        &self,
        user_id: i64,
        amount_in_cents: i64,
    ) -> Result<AdminReply, ServiceError> {
        let debit = self
            .stores
            .users
            .debit_balance(user_id, amount_in_cents)
            .await
            .map_err(ServiceError::database)?;

        let balance_in_cents = match debit {
            BalanceDebit::Debited { balance_in_cents } => balance_in_cents,
            BalanceDebit::Insufficient { balance_in_cents } => {
                return Err(ServiceError::precondition(
                    Precondition::InsufficientBalance,
                    format!(
                        "cannot subtract {} from {}",
                        format_cents(amount_in_cents),
                        format_cents(balance_in_cents)
                    ),
                ))
            }
            BalanceDebit::NotFound => return Err(ServiceError::user_not_found(user_id)),
        };

        send_and_forget(
            &self.notification_channel,
            user_id,
            format!(
                "💸 An administrator deducted <b>{}</b> from your balance.",
                format_cents(amount_in_cents)
            ),
        )
        .await;

        Ok(AdminReply::BalanceChanged {
            user_id,
            balance_in_cents,
        })
    }

    async fn users_page(&self, page: i64) -> Result<UsersPage, ServiceError> {
        let total = self
            .stores
            .users
            .count_users()
            .await
            .map_err(ServiceError::database)?;
        let page = clamp_page(page, total);

        let users = self
            .stores
            .users
            .list_users(page * USERS_PER_PAGE, USERS_PER_PAGE)
            .await
            .map_err(ServiceError::database)?;

        Ok(UsersPage {
            page,
            pages: page_count(total),
            total,
            users,
        })
    }

    async fn resolve_submission(
        &self,
        actor_id: i64,
        submission_id: i64,
        approve: bool,
    ) -> Result<TaskSubmission, ServiceError> {
        self.admins.ensure(actor_id)?;
        log::info!(
            "Admin {} {} submission {}.",
            actor_id,
            if approve { "approves" } else { "rejects" },
            submission_id
        );

        dispatch(&self.task_channel, |response| TaskRequest::Resolve {
            submission_id,
            approve,
            response,
        })
        .await
    }

    async fn resolve_withdrawal(
        &self,
        actor_id: i64,
        withdrawal_id: i64,
        approve: bool,
    ) -> Result<Withdrawal, ServiceError> {
        self.admins.ensure(actor_id)?;
        log::info!(
            "Admin {} {} withdrawal {}.",
            actor_id,
            if approve { "approves" } else { "rejects" },
            withdrawal_id
        );

        dispatch(&self.withdrawal_channel, |response| {
            WithdrawalRequest::Resolve {
                withdrawal_id,
                approve,
                response,
            }
        })
        .await
    }
}

#[async_trait]
impl RequestHandler<AdminRequest> for AdminRequestHandler {
    async fn handle_request(&self, request: AdminRequest) {
        match request {
            AdminRequest::Execute {
                actor_id,
                text,
                response,
            } => {
                let result = self.execute(actor_id, &text).await;
                let _ = response.send(result);
            }
            AdminRequest::ResolveSubmission {
                actor_id,
                submission_id,
                approve,
                response,
            } => {
                let result = self
                    .resolve_submission(actor_id, submission_id, approve)
                    .await;
                let _ = response.send(result);
            }
            AdminRequest::ResolveWithdrawal {
                actor_id,
                withdrawal_id,
                approve,
                response,
            } => {
                let result = self
                    .resolve_withdrawal(actor_id, withdrawal_id, approve)
                    .await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct AdminService;

impl AdminService {
    pub fn new() -> Self {
        AdminService {}
    }
}

#[async_trait]
impl Service<AdminRequest, AdminRequestHandler> for AdminService {}
