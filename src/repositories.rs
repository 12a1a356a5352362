use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::models::{
    channels::{ChannelRef, Membership},
    referrals::{ReferralSummary, TopReferrer},
    stats::Stats,
    submissions::{SubmitOutcome, TaskSubmission},
    users::{BalanceDebit, BonusClaim, Language, PhoneBinding, User},
    withdrawals::{CycleWithdrawOutcome, WithdrawOutcome, Withdrawal, WithdrawalMethod},
};

#[cfg(test)]
pub mod memory;
pub mod submissions;
pub mod telegram;
pub mod users;
pub mod withdrawals;

/// Result of a guarded `pending/new -> terminal` transition.
#[derive(Clone, Debug)]
pub enum Resolution<T> {
    Resolved(T),
    AlreadyResolved(T),
    NotFound,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Inserts the user unless it exists. Returns `true` when a row was created.
    async fn insert_user(&self, tg_id: i64, referrer_id: Option<i64>)
        -> Result<bool, anyhow::Error>;

    async fn get_user(&self, tg_id: i64) -> Result<Option<User>, anyhow::Error>;

    /// Returns the new balance, or `None` when the user does not exist.
    async fn credit_balance(&self, tg_id: i64, amount_in_cents: i64)
        -> Result<Option<i64>, anyhow::Error>;

    /// Debits only if the balance covers the amount.
    async fn debit_balance(&self, tg_id: i64, amount_in_cents: i64)
        -> Result<BalanceDebit, anyhow::Error>;

    /// Credits the bonus and stamps `last_bonus_at` only if the previous claim
    /// is at least `interval` old.
    async fn claim_bonus(
        &self,
        tg_id: i64,
        amount_in_cents: i64,
        interval: Duration,
        now: DateTime<Utc>,
    ) -> Result<BonusClaim, anyhow::Error>;

    async fn set_language(&self, tg_id: i64, language: Language) -> Result<bool, anyhow::Error>;

    async fn set_phone(&self, tg_id: i64, phone: &str) -> Result<PhoneBinding, anyhow::Error>;

    async fn set_banned(&self, tg_id: i64, banned: bool) -> Result<bool, anyhow::Error>;

    /// Flips `activated` false -> true and credits the referrer in one step.
    /// Returns the credited referrer only for the call that performed the flip.
    async fn activate_referral(
        &self,
        tg_id: i64,
        referral_bonus_in_cents: i64,
    ) -> Result<Option<i64>, anyhow::Error>;

    async fn referral_summary(&self, tg_id: i64)
        -> Result<Option<ReferralSummary>, anyhow::Error>;

    async fn add_manual_refs(&self, tg_id: i64, count: i64) -> Result<Option<i64>, anyhow::Error>;

    async fn set_manual_refs(&self, tg_id: i64, count: i64) -> Result<Option<i64>, anyhow::Error>;

    async fn stats(&self, now: DateTime<Utc>) -> Result<Stats, anyhow::Error>;

    async fn top_referrers(&self, limit: i64) -> Result<Vec<TopReferrer>, anyhow::Error>;

    async fn count_users(&self) -> Result<i64, anyhow::Error>;

    async fn list_users(&self, offset: i64, limit: i64) -> Result<Vec<User>, anyhow::Error>;

    /// Ids of every user that is not banned, oldest first.
    async fn list_recipients(&self) -> Result<Vec<i64>, anyhow::Error>;
}

#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Creates a pending submission unless the latest one for the same task is
    /// still pending or already approved.
    async fn create_submission(
        &self,
        tg_id: i64,
        task_id: &str,
        proof_file_id: &str,
        proof_caption: Option<&str>,
    ) -> Result<SubmitOutcome, anyhow::Error>;

    async fn get_submission(&self, id: i64) -> Result<Option<TaskSubmission>, anyhow::Error>;

    async fn has_approved_submission(&self, tg_id: i64) -> Result<bool, anyhow::Error>;

    /// Approves a pending submission and credits `reward_in_cents` to its owner.
    async fn approve_submission(
        &self,
        id: i64,
        reward_in_cents: i64,
    ) -> Result<Resolution<TaskSubmission>, anyhow::Error>;

    async fn reject_submission(&self, id: i64)
        -> Result<Resolution<TaskSubmission>, anyhow::Error>;
}

#[async_trait]
pub trait WithdrawalStore: Send + Sync {
    /// Debits the balance and records the request. Requires the balance to be
    /// at least `min_balance_in_cents` and to cover the amount.
    async fn create_withdrawal(
        &self,
        tg_id: i64,
        method: WithdrawalMethod,
        details: &str,
        amount_in_cents: i64,
        min_balance_in_cents: i64,
    ) -> Result<WithdrawOutcome, anyhow::Error>;

    /// Consumes exactly one earned cycle and records a cycle payout request.
    async fn create_cycle_withdrawal(
        &self,
        tg_id: i64,
        details: &str,
    ) -> Result<CycleWithdrawOutcome, anyhow::Error>;

    async fn get_withdrawal(&self, id: i64) -> Result<Option<Withdrawal>, anyhow::Error>;

    /// `approved = false` rejects. Neither outcome touches the balance.
    async fn resolve_withdrawal(
        &self,
        id: i64,
        approved: bool,
    ) -> Result<Resolution<Withdrawal>, anyhow::Error>;

    async fn list_new_withdrawals(&self, limit: i64) -> Result<Vec<Withdrawal>, anyhow::Error>;
}

/// Outbound side of the messaging platform.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), anyhow::Error>;

    async fn membership(
        &self,
        channel: &ChannelRef,
        user_id: i64,
    ) -> Result<Membership, anyhow::Error>;
}
