use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use super::notifications::{send_and_forget, NotificationRequest};
use super::{Precondition, RequestHandler, Service, ServiceError};
use crate::models::withdrawals::{
    NewWithdrawal, WithdrawOutcome, Withdrawal, WithdrawalMethod, WithdrawalStatus,
};
use crate::repositories::{Resolution, WithdrawalStore};
use crate::utils::money::{format_cents, parse_amount};

pub enum WithdrawalRequest {
    Create {
        user_id: i64,
        request: NewWithdrawal,
        response: oneshot::Sender<Result<WithdrawalReceipt, ServiceError>>,
    },
    Resolve {
        withdrawal_id: i64,
        approve: bool,
        response: oneshot::Sender<Result<Withdrawal, ServiceError>>,
    },
    ListNew {
        limit: i64,
        response: oneshot::Sender<Result<Vec<Withdrawal>, ServiceError>>,
    },
}

#[derive(Clone, Debug, Serialize)]
pub struct WithdrawalReceipt {
    pub withdrawal: Withdrawal,
    pub balance_in_cents: i64,
}

#[derive(Clone)]
pub struct WithdrawalRequestHandler {
    repository: Arc<dyn WithdrawalStore>,
    min_withdraw_in_cents: i64,
    notification_channel: mpsc::Sender<NotificationRequest>,
}

impl WithdrawalRequestHandler {
    pub fn new(
        repository: Arc<dyn WithdrawalStore>,
        min_withdraw_in_cents: i64,
        notification_channel: mpsc::Sender<NotificationRequest>,
    ) -> Self {
        Self {
            repository,
            min_withdraw_in_cents,
            notification_channel,
        }
    }

    async fn create(
        &self,
        user_id: i64,
        request: NewWithdrawal,
    ) -> Result<WithdrawalReceipt, ServiceError> {
        if !request.method.debits_balance() {
            return Err(ServiceError::precondition(
                Precondition::InvalidAmount,
                "referral cycle payouts have a fixed amount",
            ));
        }

        let amount_in_cents = parse_amount(&request.amount)
            .map_err(|e| ServiceError::precondition(Precondition::InvalidAmount, e.to_string()))?;

        let outcome = self
            .repository
            .create_withdrawal(
                user_id,
                request.method,
                request.details.trim(),
                amount_in_cents,
                self.min_withdraw_in_cents,
            )
            .await
            .map_err(ServiceError::database)?;

        match outcome {
            WithdrawOutcome::Created {
                withdrawal,
                balance_in_cents,
            } => {
                log::info!(
                    "Withdrawal {} of {} by {} via {}; balance now {}.",
                    withdrawal.id,
                    format_cents(amount_in_cents),
                    user_id,
                    withdrawal.method.as_str(),
                    format_cents(balance_in_cents)
                );
                let _ = self
                    .notification_channel
                    .send(NotificationRequest::NotifyAdmins {
                        text: format!(
                            "💸 Withdrawal #{} from <code>{}</code>: <b>{}</b> via {}\n{}",
                            withdrawal.id,
                            user_id,
                            format_cents(withdrawal.amount_in_cents),
                            withdrawal.method.as_str(),
                            withdrawal.details
                        ),
                    })
                    .await;

                Ok(WithdrawalReceipt {
                    withdrawal,
                    balance_in_cents,
                })
            }
            WithdrawOutcome::BelowMinimum { balance_in_cents } => Err(ServiceError::precondition(
                Precondition::BelowMinimumWithdrawal,
                format!(
                    "balance {} is below the minimum of {}",
                    format_cents(balance_in_cents),
                    format_cents(self.min_withdraw_in_cents)
                ),
            )),
            WithdrawOutcome::Insufficient { balance_in_cents } => Err(ServiceError::precondition(
                Precondition::InsufficientBalance,
                format!(
                    "requested {}, balance is {}",
                    format_cents(amount_in_cents),
                    format_cents(balance_in_cents)
                ),
            )),
            WithdrawOutcome::UserNotFound => Err(ServiceError::user_not_found(user_id)),
        }
    }

    async fn resolve(&self, withdrawal_id: i64, approve: bool) -> Result<Withdrawal, ServiceError> {
        let resolution = self
            .repository
            .resolve_withdrawal(withdrawal_id, approve)
            .await
            .map_err(ServiceError::database)?;

        let withdrawal = match resolution {
            Resolution::Resolved(withdrawal) => withdrawal,
            Resolution::AlreadyResolved(withdrawal) => {
                return Err(ServiceError::precondition(
                    Precondition::AlreadyResolved,
                    format!(
                        "withdrawal {} is already {}",
                        withdrawal.id,
                        withdrawal.status.as_str()
                    ),
                ))
            }
            Resolution::NotFound => {
                return Err(ServiceError::NotFound(format!("withdrawal {}", withdrawal_id)))
            }
        };

        log::info!(
            "Withdrawal {} {}.",
            withdrawal.id,
            withdrawal.status.as_str()
        );
        let text = match (withdrawal.status, withdrawal.method) {
            (WithdrawalStatus::Approved, _) => format!(
                "✅ Withdrawal #{} of <b>{}</b> approved.",
                withdrawal.id,
                format_cents(withdrawal.amount_in_cents)
            ),
            (_, WithdrawalMethod::ReferralCycle) => format!(
                "❌ Referral cycle withdrawal #{} was rejected. The cycle is not restored.",
                withdrawal.id
            ),
            _ => format!(
                "❌ Withdrawal #{} of <b>{}</b> was rejected. The funds are not returned.",
                withdrawal.id,
                format_cents(withdrawal.amount_in_cents)
            ),
        };
        send_and_forget(&self.notification_channel, withdrawal.tg_id, text).await;

        Ok(withdrawal)
    }

    async fn list_new(&self, limit: i64) -> Result<Vec<Withdrawal>, ServiceError> {
        self.repository
            .list_new_withdrawals(limit)
            .await
            .map_err(ServiceError::database)
    }
}

#[async_trait]
impl RequestHandler<WithdrawalRequest> for WithdrawalRequestHandler {
    async fn handle_request(&self, request: WithdrawalRequest) {
        match request {
            WithdrawalRequest::Create {
                user_id,
                request,
                response,
            } => {
                let result = self.create(user_id, request).await;
                let _ = response.send(result);
            }
            WithdrawalRequest::Resolve {
                withdrawal_id,
                approve,
                response,
            } => {
                let result = self.resolve(withdrawal_id, approve).await;
                let _ = response.send(result);
            }
            WithdrawalRequest::ListNew { limit, response } => {
                let result = self.list_new(limit).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct WithdrawalService;

impl WithdrawalService {
    pub fn new() -> Self {
        WithdrawalService {}
    }
}

#[async_trait]
impl Service<WithdrawalRequest, WithdrawalRequestHandler> for WithdrawalService {}
