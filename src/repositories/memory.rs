//! In-memory stores for tests. A single async mutex guards all tables, so
//! each method observes and mutates state atomically, like the guarded SQL
//! statements of the Postgres repositories.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use super::{Resolution, SubmissionStore, UserStore, WithdrawalStore};
use crate::models::{
    referrals::{ReferralSummary, TopReferrer, CYCLE_REWARD_IN_CENTS},
    stats::Stats,
    submissions::{SubmissionStatus, SubmitOutcome, TaskSubmission},
    users::{BalanceDebit, BonusClaim, Language, PhoneBinding, User},
    withdrawals::{
        CycleWithdrawOutcome, WithdrawOutcome, Withdrawal, WithdrawalMethod, WithdrawalStatus,
    },
};

#[derive(Default)]
struct State {
    users: BTreeMap<i64, User>,
    submissions: BTreeMap<i64, TaskSubmission>,
    withdrawals: BTreeMap<i64, Withdrawal>,
    next_submission_id: i64,
    next_withdrawal_id: i64,
}

impl State {
    fn summary(&self, tg_id: i64) -> Option<ReferralSummary> {
        let user = self.users.get(&tg_id)?;
        let active = self
            .users
            .values()
            .filter(|r| r.activated && r.referrer_id == Some(tg_id))
            .count() as i64;

        Some(ReferralSummary {
            active,
            manual: user.manual_ref_count,
            used_cycles: user.ref_withdraw_count,
        })
    }

    fn has_approved(&self, tg_id: i64) -> bool {
        self.submissions
            .values()
            .any(|s| s.tg_id == tg_id && s.status == SubmissionStatus::Approved)
    }

    fn push_withdrawal(
        &mut self,
        tg_id: i64,
        method: WithdrawalMethod,
        details: &str,
        amount_in_cents: i64,
    ) -> Withdrawal {
        self.next_withdrawal_id += 1;
        let withdrawal = Withdrawal {
            id: self.next_withdrawal_id,
            tg_id,
            method,
            details: details.to_string(),
            amount_in_cents,
            status: WithdrawalStatus::New,
            created_at: Utc::now(),
        };
        self.withdrawals.insert(withdrawal.id, withdrawal.clone());
        withdrawal
    }
}

/// Mirrors the out-of-range error Postgres raises on `BIGINT` overflow.
fn checked_add(current: i64, delta: i64) -> Result<i64, anyhow::Error> {
    current
        .checked_add(delta)
        .ok_or_else(|| anyhow!("bigint out of range"))
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites fields of an existing user; used to arrange test fixtures.
    pub async fn update_user(&self, tg_id: i64, update: impl FnOnce(&mut User)) {
        let mut state = self.state.lock().await;
        if let Some(user) = state.users.get_mut(&tg_id) {
            update(user);
        }
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn insert_user(
        &self,
        tg_id: i64,
        referrer_id: Option<i64>,
    ) -> Result<bool, anyhow::Error> {
        let mut state = self.state.lock().await;
        if state.users.contains_key(&tg_id) {
            return Ok(false);
        }

        let referrer_id = referrer_id.filter(|r| *r != tg_id && state.users.contains_key(r));
        state.users.insert(tg_id, User::new(tg_id, referrer_id));
        Ok(true)
    }

    async fn get_user(&self, tg_id: i64) -> Result<Option<User>, anyhow::Error> {
        Ok(self.state.lock().await.users.get(&tg_id).cloned())
    }

    async fn credit_balance(
        &self,
        tg_id: i64,
        amount_in_cents: i64,
    ) -> Result<Option<i64>, anyhow::Error> {
        let mut state = self.state.lock().await;
        let Some(user) = state.users.get_mut(&tg_id) else {
            return Ok(None);
        };

        user.balance_in_cents = checked_add(user.balance_in_cents, amount_in_cents)?;
        Ok(Some(user.balance_in_cents))
    }

    async fn debit_balance(
        &self,
        tg_id: i64,
        amount_in_cents: i64,
    ) -> Result<BalanceDebit, anyhow::Error> {
        let mut state = self.state.lock().await;
        let Some(user) = state.users.get_mut(&tg_id) else {
            return Ok(BalanceDebit::NotFound);
        };

        if user.balance_in_cents < amount_in_cents {
            return Ok(BalanceDebit::Insufficient {
                balance_in_cents: user.balance_in_cents,
            });
        }

        user.balance_in_cents -= amount_in_cents;
        Ok(BalanceDebit::Debited {
            balance_in_cents: user.balance_in_cents,
        })
    }

    async fn claim_bonus(
        &self,
        tg_id: i64,
        amount_in_cents: i64,
        interval: Duration,
        now: DateTime<Utc>,
    ) -> Result<BonusClaim, anyhow::Error> {
        let mut state = self.state.lock().await;
        let Some(user) = state.users.get_mut(&tg_id) else {
            return Ok(BonusClaim::NotFound);
        };

        if let Some(last) = user.last_bonus_at {
            if last > now - interval {
                return Ok(BonusClaim::NotReady {
                    next_claim_at: last + interval,
                });
            }
        }

        user.balance_in_cents = checked_add(user.balance_in_cents, amount_in_cents)?;
        user.last_bonus_at = Some(now);
        Ok(BonusClaim::Claimed {
            balance_in_cents: user.balance_in_cents,
        })
    }

    async fn set_language(&self, tg_id: i64, language: Language) -> Result<bool, anyhow::Error> {
        let mut state = self.state.lock().await;
        Ok(state
            .users
            .get_mut(&tg_id)
            .map(|user| user.language = language)
            .is_some())
    }

    async fn set_phone(&self, tg_id: i64, phone: &str) -> Result<PhoneBinding, anyhow::Error> {
        let mut state = self.state.lock().await;
        let taken = state
            .users
            .values()
            .any(|u| u.tg_id != tg_id && u.phone.as_deref() == Some(phone));

        match state.users.get_mut(&tg_id) {
            None => Ok(PhoneBinding::NotFound),
            Some(_) if taken => Ok(PhoneBinding::InUse),
            Some(user) => {
                user.phone = Some(phone.to_string());
                Ok(PhoneBinding::Saved)
            }
        }
    }

    async fn set_banned(&self, tg_id: i64, banned: bool) -> Result<bool, anyhow::Error> {
        let mut state = self.state.lock().await;
        Ok(state
            .users
            .get_mut(&tg_id)
            .map(|user| user.banned = banned)
            .is_some())
    }

    async fn activate_referral(
        &self,
        tg_id: i64,
        referral_bonus_in_cents: i64,
    ) -> Result<Option<i64>, anyhow::Error> {
        let mut state = self.state.lock().await;
        let has_approved = state.has_approved(tg_id);

        let Some(user) = state.users.get_mut(&tg_id) else {
            return Ok(None);
        };
        if user.activated || user.last_bonus_at.is_none() || !has_approved {
            return Ok(None);
        }
        let Some(referrer_id) = user.referrer_id else {
            return Ok(None);
        };

        user.activated = true;
        if let Some(referrer) = state.users.get_mut(&referrer_id) {
            referrer.balance_in_cents += referral_bonus_in_cents;
        }

        Ok(Some(referrer_id))
    }

    async fn referral_summary(
        &self,
        tg_id: i64,
    ) -> Result<Option<ReferralSummary>, anyhow::Error> {
        Ok(self.state.lock().await.summary(tg_id))
    }

    async fn add_manual_refs(&self, tg_id: i64, count: i64) -> Result<Option<i64>, anyhow::Error> {
        let mut state = self.state.lock().await;
        let Some(user) = state.users.get_mut(&tg_id) else {
            return Ok(None);
        };

        user.manual_ref_count = checked_add(user.manual_ref_count, count)?.max(0);
        Ok(Some(user.manual_ref_count))
    }

    async fn set_manual_refs(&self, tg_id: i64, count: i64) -> Result<Option<i64>, anyhow::Error> {
        let mut state = self.state.lock().await;
        Ok(state.users.get_mut(&tg_id).map(|user| {
            user.manual_ref_count = count.max(0);
            user.manual_ref_count
        }))
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<Stats, anyhow::Error> {
        let state = self.state.lock().await;
        let since = now - Duration::hours(24);
        let count = |f: &dyn Fn(&User) -> bool| state.users.values().filter(|u| f(u)).count() as i64;

        Ok(Stats {
            total_users: state.users.len() as i64,
            activated_users: count(&|u: &User| u.activated),
            with_phone: count(&|u: &User| u.phone.as_deref().is_some_and(|p| !p.is_empty())),
            banned_users: count(&|u: &User| u.banned),
            new_24h: count(&|u: &User| u.created_at > since),
            days_running: None,
        })
    }

    async fn top_referrers(&self, limit: i64) -> Result<Vec<TopReferrer>, anyhow::Error> {
        let state = self.state.lock().await;
        let mut counts: HashMap<i64, i64> = HashMap::new();
        for user in state.users.values().filter(|u| u.activated) {
            if let Some(referrer_id) = user.referrer_id {
                *counts.entry(referrer_id).or_default() += 1;
            }
        }

        let mut top: Vec<TopReferrer> = counts
            .into_iter()
            .map(|(referrer_id, active_referrals)| TopReferrer {
                referrer_id,
                active_referrals,
            })
            .collect();
        top.sort_by(|a, b| {
            b.active_referrals
                .cmp(&a.active_referrals)
                .then(a.referrer_id.cmp(&b.referrer_id))
        });
        top.truncate(limit.max(0) as usize);

        Ok(top)
    }

    async fn count_users(&self) -> Result<i64, anyhow::Error> {
        Ok(self.state.lock().await.users.len() as i64)
    }

    async fn list_users(&self, offset: i64, limit: i64) -> Result<Vec<User>, anyhow::Error> {
        let state = self.state.lock().await;
        let mut users: Vec<User> = state.users.values().cloned().collect();
        users.sort_by_key(|u| (u.created_at, u.tg_id));

        Ok(users
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn list_recipients(&self) -> Result<Vec<i64>, anyhow::Error> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .filter(|u| !u.banned)
            .map(|u| u.tg_id)
            .collect())
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn create_submission(
        &self,
        tg_id: i64,
        task_id: &str,
        proof_file_id: &str,
        proof_caption: Option<&str>,
    ) -> Result<SubmitOutcome, anyhow::Error> {
        let mut state = self.state.lock().await;
        if !state.users.contains_key(&tg_id) {
            return Ok(SubmitOutcome::UserNotFound);
        }

        let latest = state
            .submissions
            .values()
            .filter(|s| s.tg_id == tg_id && s.task_id == task_id)
            .max_by_key(|s| s.id);
        if let Some(latest) = latest {
            if latest.status.blocks_resubmission() {
                return Ok(SubmitOutcome::Duplicate(latest.status));
            }
        }

        state.next_submission_id += 1;
        let submission = TaskSubmission {
            id: state.next_submission_id,
            tg_id,
            task_id: task_id.to_string(),
            status: SubmissionStatus::Pending,
            proof_file_id: proof_file_id.to_string(),
            proof_caption: proof_caption.map(str::to_string),
            created_at: Utc::now(),
        };
        state.submissions.insert(submission.id, submission.clone());

        Ok(SubmitOutcome::Created(submission))
    }

    async fn get_submission(&self, id: i64) -> Result<Option<TaskSubmission>, anyhow::Error> {
        Ok(self.state.lock().await.submissions.get(&id).cloned())
    }

    async fn has_approved_submission(&self, tg_id: i64) -> Result<bool, anyhow::Error> {
        Ok(self.state.lock().await.has_approved(tg_id))
    }

    async fn approve_submission(
        &self,
        id: i64,
        reward_in_cents: i64,
    ) -> Result<Resolution<TaskSubmission>, anyhow::Error> {
        let mut state = self.state.lock().await;
        let Some(submission) = state.submissions.get_mut(&id) else {
            return Ok(Resolution::NotFound);
        };
        if submission.status.is_terminal() {
            return Ok(Resolution::AlreadyResolved(submission.clone()));
        }

        submission.status = SubmissionStatus::Approved;
        let submission = submission.clone();
        if let Some(user) = state.users.get_mut(&submission.tg_id) {
            user.balance_in_cents += reward_in_cents;
        }

        Ok(Resolution::Resolved(submission))
    }

    async fn reject_submission(
        &self,
        id: i64,
    ) -> Result<Resolution<TaskSubmission>, anyhow::Error> {
        let mut state = self.state.lock().await;
        let Some(submission) = state.submissions.get_mut(&id) else {
            return Ok(Resolution::NotFound);
        };
        if submission.status.is_terminal() {
            return Ok(Resolution::AlreadyResolved(submission.clone()));
        }

        submission.status = SubmissionStatus::Rejected;
        Ok(Resolution::Resolved(submission.clone()))
    }
}

#[async_trait]
impl WithdrawalStore for MemoryStore {
    async fn create_withdrawal(
        &self,
        tg_id: i64,
        method: WithdrawalMethod,
        details: &str,
        amount_in_cents: i64,
        min_balance_in_cents: i64,
    ) -> Result<WithdrawOutcome, anyhow::Error> {
        let mut state = self.state.lock().await;
        let Some(user) = state.users.get_mut(&tg_id) else {
            return Ok(WithdrawOutcome::UserNotFound);
        };

        let balance_in_cents = user.balance_in_cents;
        if balance_in_cents < min_balance_in_cents {
            return Ok(WithdrawOutcome::BelowMinimum { balance_in_cents });
        }
        if balance_in_cents < amount_in_cents {
            return Ok(WithdrawOutcome::Insufficient { balance_in_cents });
        }

        user.balance_in_cents -= amount_in_cents;
        let balance_in_cents = user.balance_in_cents;
        let withdrawal = state.push_withdrawal(tg_id, method, details, amount_in_cents);

        Ok(WithdrawOutcome::Created {
            withdrawal,
            balance_in_cents,
        })
    }

    async fn create_cycle_withdrawal(
        &self,
        tg_id: i64,
        details: &str,
    ) -> Result<CycleWithdrawOutcome, anyhow::Error> {
        let mut state = self.state.lock().await;
        let Some(summary) = state.summary(tg_id) else {
            return Ok(CycleWithdrawOutcome::UserNotFound);
        };
        if !summary.can_withdraw_cycle() {
            return Ok(CycleWithdrawOutcome::NotEnoughCycles(summary));
        }

        if let Some(user) = state.users.get_mut(&tg_id) {
            user.ref_withdraw_count += 1;
        }
        let withdrawal = state.push_withdrawal(
            tg_id,
            WithdrawalMethod::ReferralCycle,
            details,
            CYCLE_REWARD_IN_CENTS,
        );

        Ok(CycleWithdrawOutcome::Created {
            withdrawal,
            summary: ReferralSummary {
                used_cycles: summary.used_cycles + 1,
                ..summary
            },
        })
    }

    async fn get_withdrawal(&self, id: i64) -> Result<Option<Withdrawal>, anyhow::Error> {
        Ok(self.state.lock().await.withdrawals.get(&id).cloned())
    }

    async fn resolve_withdrawal(
        &self,
        id: i64,
        approved: bool,
    ) -> Result<Resolution<Withdrawal>, anyhow::Error> {
        let mut state = self.state.lock().await;
        let Some(withdrawal) = state.withdrawals.get_mut(&id) else {
            return Ok(Resolution::NotFound);
        };
        if withdrawal.status != WithdrawalStatus::New {
            return Ok(Resolution::AlreadyResolved(withdrawal.clone()));
        }

        withdrawal.status = if approved {
            WithdrawalStatus::Approved
        } else {
            WithdrawalStatus::Rejected
        };
        Ok(Resolution::Resolved(withdrawal.clone()))
    }

    async fn list_new_withdrawals(&self, limit: i64) -> Result<Vec<Withdrawal>, anyhow::Error> {
        let state = self.state.lock().await;
        Ok(state
            .withdrawals
            .values()
            .filter(|w| w.status == WithdrawalStatus::New)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn overflowing_updates_fail_without_changing_state() {
        let store = MemoryStore::new();
        store.insert_user(1, None).await.unwrap();
        store.credit_balance(1, 500).await.unwrap();
        store.add_manual_refs(1, 3).await.unwrap();

        assert!(store.credit_balance(1, i64::MAX).await.is_err());
        assert!(store.add_manual_refs(1, i64::MAX).await.is_err());

        let user = store.get_user(1).await.unwrap().unwrap();
        assert_eq!(user.balance_in_cents, 500);
        assert_eq!(user.manual_ref_count, 3);
        assert_eq!(store.credit_balance(2, 1).await.unwrap(), None);
    }
}
