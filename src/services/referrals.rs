use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use super::notifications::{send_and_forget, NotificationRequest};
use super::{Precondition, RequestHandler, Service, ServiceError, Stores};
use crate::models::{
    referrals::{Gate, Qualification, ReferralSummary, TopReferrer, CYCLE_SIZE},
    users::User,
    withdrawals::{CycleWithdrawOutcome, Withdrawal},
};
use crate::utils::money::format_cents;

const CYCLE_DETAILS: &str = "referral_cycle";

pub enum ReferralRequest {
    /// Re-evaluates qualification of a referred user from stored state.
    TryQualify {
        user_id: i64,
        response: oneshot::Sender<Result<Qualification, ServiceError>>,
    },
    Summary {
        user_id: i64,
        response: oneshot::Sender<Result<ReferralSummary, ServiceError>>,
    },
    WithdrawCycle {
        user_id: i64,
        response: oneshot::Sender<Result<CycleWithdrawal, ServiceError>>,
    },
    TopReferrers {
        limit: i64,
        response: oneshot::Sender<Result<Vec<TopReferrer>, ServiceError>>,
    },
}

#[derive(Clone, Debug, Serialize)]
pub struct CycleWithdrawal {
    pub withdrawal: Withdrawal,
    pub available_cycles: i64,
    pub used_cycles: i64,
}

/// Checks the gates that can be decided from the user row alone, in order.
fn user_gate(user: Option<&User>) -> Option<Gate> {
    let Some(user) = user else {
        return Some(Gate::UnknownUser);
    };

    if user.activated {
        Some(Gate::AlreadyActivated)
    } else if user.referrer_id.is_none() {
        Some(Gate::NoReferrer)
    } else if user.last_bonus_at.is_none() {
        Some(Gate::NoBonusClaimed)
    } else {
        None
    }
}

/// Fires a qualification check and waits for it, logging instead of failing.
/// Used by the bonus and task-approval paths, which must not fail because of it.
pub(crate) async fn trigger_qualification(
    channel: &mpsc::Sender<ReferralRequest>,
    user_id: i64,
) -> Option<Qualification> {
    let (response, receiver) = oneshot::channel();

    if let Err(e) = channel
        .send(ReferralRequest::TryQualify { user_id, response })
        .await
    {
        log::error!("Could not queue qualification of {}: {}", user_id, e);
        return None;
    }

    match receiver.await {
        Ok(Ok(qualification)) => Some(qualification),
        Ok(Err(e)) => {
            log::error!("Qualification of {} failed: {}", user_id, e);
            None
        }
        Err(e) => {
            log::error!("Qualification of {} dropped: {}", user_id, e);
            None
        }
    }
}

#[derive(Clone)]
pub struct ReferralRequestHandler {
    stores: Stores,
    referral_bonus_in_cents: i64,
    notification_channel: mpsc::Sender<NotificationRequest>,
}

impl ReferralRequestHandler {
    pub fn new(
        stores: Stores,
        referral_bonus_in_cents: i64,
        notification_channel: mpsc::Sender<NotificationRequest>,
    ) -> Self {
        Self {
            stores,
            referral_bonus_in_cents,
            notification_channel,
        }
    }

    async fn try_qualify(&self, user_id: i64) -> Result<Qualification, ServiceError> {
        let user = self
            .stores
            .users
            .get_user(user_id)
            .await
            .map_err(ServiceError::database)?;

        if let Some(gate) = user_gate(user.as_ref()) {
            return Ok(Qualification::Blocked { gate });
        }

        let has_approved_task = self
            .stores
            .submissions
            .has_approved_submission(user_id)
            .await
            .map_err(ServiceError::database)?;
        if !has_approved_task {
            return Ok(Qualification::Blocked {
                gate: Gate::NoApprovedTask,
            });
        }

        let credited = self
            .stores
            .users
            .activate_referral(user_id, self.referral_bonus_in_cents)
            .await
            .map_err(ServiceError::database)?;

        // Another trigger performed the flip between our read and the update.
        let Some(referrer_id) = credited else {
            return Ok(Qualification::Blocked {
                gate: Gate::AlreadyActivated,
            });
        };

        log::info!(
            "User {} qualified; referrer {} credited {}.",
            user_id,
            referrer_id,
            format_cents(self.referral_bonus_in_cents)
        );
        send_and_forget(
            &self.notification_channel,
            referrer_id,
            format!(
                "🎉 Your referral <code>{}</code> is now active! +<b>{}</b>",
                user_id,
                format_cents(self.referral_bonus_in_cents)
            ),
        )
        .await;

        Ok(Qualification::Qualified { referrer_id })
    }

    async fn summary(&self, user_id: i64) -> Result<ReferralSummary, ServiceError> {
        self.stores
            .users
            .referral_summary(user_id)
            .await
            .map_err(ServiceError::database)?
            .ok_or_else(|| ServiceError::user_not_found(user_id))
    }

    async fn withdraw_cycle(&self, user_id: i64) -> Result<CycleWithdrawal, ServiceError> {
        let outcome = self
            .stores
            .withdrawals
            .create_cycle_withdrawal(user_id, CYCLE_DETAILS)
            .await
            .map_err(ServiceError::database)?;

        match outcome {
            CycleWithdrawOutcome::Created {
                withdrawal,
                summary,
            } => {
                log::info!(
                    "User {} consumed referral cycle {} (withdrawal {}).",
                    user_id,
                    summary.used_cycles,
                    withdrawal.id
                );
                let _ = self
                    .notification_channel
                    .send(NotificationRequest::NotifyAdmins {
                        text: format!(
                            "🧾 New referral cycle withdrawal #{} from <code>{}</code>: <b>{}</b>",
                            withdrawal.id,
                            user_id,
                            format_cents(withdrawal.amount_in_cents)
                        ),
                    })
                    .await;

                Ok(CycleWithdrawal {
                    withdrawal,
                    available_cycles: summary.available_cycles(),
                    used_cycles: summary.used_cycles,
                })
            }
            CycleWithdrawOutcome::NotEnoughCycles(summary) => Err(ServiceError::precondition(
                Precondition::NotEnoughCycles,
                format!(
                    "{} active referrals, {} more needed (cycle of {})",
                    summary.total(),
                    summary.remaining_to_next_cycle(),
                    CYCLE_SIZE
                ),
            )),
            CycleWithdrawOutcome::UserNotFound => Err(ServiceError::user_not_found(user_id)),
        }
    }

    async fn top_referrers(&self, limit: i64) -> Result<Vec<TopReferrer>, ServiceError> {
        self.stores
            .users
            .top_referrers(limit)
            .await
            .map_err(ServiceError::database)
    }
}

#[async_trait]
impl RequestHandler<ReferralRequest> for ReferralRequestHandler {
    async fn handle_request(&self, request: ReferralRequest) {
        match request {
            ReferralRequest::TryQualify { user_id, response } => {
                let result = self.try_qualify(user_id).await;
                let _ = response.send(result);
            }
            ReferralRequest::Summary { user_id, response } => {
                let result = self.summary(user_id).await;
                let _ = response.send(result);
            }
            ReferralRequest::WithdrawCycle { user_id, response } => {
                let result = self.withdraw_cycle(user_id).await;
                let _ = response.send(result);
            }
            ReferralRequest::TopReferrers { limit, response } => {
                let result = self.top_referrers(limit).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct ReferralService;

impl ReferralService {
    pub fn new() -> Self {
        ReferralService {}
    }
}

#[async_trait]
impl Service<ReferralRequest, ReferralRequestHandler> for ReferralService {}
