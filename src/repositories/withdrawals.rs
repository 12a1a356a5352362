use async_trait::async_trait;
use sqlx::PgPool;

use super::{Resolution, WithdrawalStore};
use crate::models::{
    referrals::{ReferralSummary, CYCLE_REWARD_IN_CENTS, CYCLE_SIZE},
    withdrawals::{CycleWithdrawOutcome, WithdrawOutcome, Withdrawal, WithdrawalMethod},
};

#[derive(Clone)]
pub struct WithdrawalRepository {
    conn: PgPool,
}

impl WithdrawalRepository {
    pub fn new(conn: PgPool) -> Self {
        Self { conn }
    }

    async fn insert_withdrawal(
        tx: &mut sqlx::PgConnection,
        tg_id: i64,
        method: WithdrawalMethod,
        details: &str,
        amount_in_cents: i64,
    ) -> Result<Withdrawal, anyhow::Error> {
        let withdrawal = sqlx::query_as::<_, Withdrawal>(
            r#"
                INSERT INTO withdrawals (tg_id, method, details, amount_in_cents, status)
                VALUES ($1, $2, $3, $4, 'new')
                RETURNING *
            "#,
        )
        .bind(tg_id)
        .bind(method.as_str())
        .bind(details)
        .bind(amount_in_cents)
        .fetch_one(tx)
        .await?;

        Ok(withdrawal)
    }
}

#[async_trait]
impl WithdrawalStore for WithdrawalRepository {
    async fn create_withdrawal(
        &self,
        tg_id: i64,
        method: WithdrawalMethod,
        details: &str,
        amount_in_cents: i64,
        min_balance_in_cents: i64,
    ) -> Result<WithdrawOutcome, anyhow::Error> {
        let mut tx = self.conn.begin().await?;

        let debited: Option<i64> = sqlx::query_scalar(
            r#"
                UPDATE users SET balance_in_cents = balance_in_cents - $2
                WHERE tg_id = $1 AND balance_in_cents >= $2 AND balance_in_cents >= $3
                RETURNING balance_in_cents
            "#,
        )
        .bind(tg_id)
        .bind(amount_in_cents)
        .bind(min_balance_in_cents)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(balance_in_cents) = debited else {
            let balance: Option<i64> =
                sqlx::query_scalar("SELECT balance_in_cents FROM users WHERE tg_id = $1")
                    .bind(tg_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;

            return Ok(match balance {
                None => WithdrawOutcome::UserNotFound,
                Some(balance_in_cents) if balance_in_cents < min_balance_in_cents => {
                    WithdrawOutcome::BelowMinimum { balance_in_cents }
                }
                Some(balance_in_cents) => WithdrawOutcome::Insufficient { balance_in_cents },
            });
        };

        let withdrawal =
            Self::insert_withdrawal(&mut tx, tg_id, method, details, amount_in_cents).await?;
        tx.commit().await?;

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
        let mut tx = self.conn.begin().await?;

        // One cycle per call; the counter is compared and bumped under the row lock.
        let consumed = sqlx::query_as::<_, ReferralSummary>(
            r#"
                UPDATE users u SET ref_withdraw_count = u.ref_withdraw_count + 1
                WHERE u.tg_id = $1
                  AND ((SELECT COUNT(*) FROM users r WHERE r.referrer_id = u.tg_id AND r.activated)
                       + u.manual_ref_count) / $2 > u.ref_withdraw_count
                RETURNING
                    (SELECT COUNT(*) FROM users r WHERE r.referrer_id = u.tg_id AND r.activated) AS active,
                    u.manual_ref_count AS manual,
                    u.ref_withdraw_count AS used_cycles
            "#,
        )
        .bind(tg_id)
        .bind(CYCLE_SIZE)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(summary) = consumed else {
            let current = sqlx::query_as::<_, ReferralSummary>(
                r#"
                    SELECT
                        (SELECT COUNT(*) FROM users r WHERE r.referrer_id = u.tg_id AND r.activated) AS active,
                        u.manual_ref_count AS manual,
                        u.ref_withdraw_count AS used_cycles
                    FROM users u
                    WHERE u.tg_id = $1
                "#,
            )
            .bind(tg_id)
            .fetch_optional(&mut *tx)
            .await?;
            tx.rollback().await?;

            return Ok(match current {
                Some(summary) => CycleWithdrawOutcome::NotEnoughCycles(summary),
                None => CycleWithdrawOutcome::UserNotFound,
            });
        };

        let withdrawal = Self::insert_withdrawal(
            &mut tx,
            tg_id,
            WithdrawalMethod::ReferralCycle,
            details,
            CYCLE_REWARD_IN_CENTS,
        )
        .await?;
        tx.commit().await?;

        Ok(CycleWithdrawOutcome::Created {
            withdrawal,
            summary,
        })
    }

    async fn get_withdrawal(&self, id: i64) -> Result<Option<Withdrawal>, anyhow::Error> {
        let withdrawal = sqlx::query_as::<_, Withdrawal>("SELECT * FROM withdrawals WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.conn)
            .await?;

        Ok(withdrawal)
    }

    async fn resolve_withdrawal(
        &self,
        id: i64,
        approved: bool,
    ) -> Result<Resolution<Withdrawal>, anyhow::Error> {
        let status = if approved { "approved" } else { "rejected" };

        let resolved = sqlx::query_as::<_, Withdrawal>(
            "UPDATE withdrawals SET status = $2 WHERE id = $1 AND status = 'new' RETURNING *",
        )
        .bind(id)
        .bind(status)
        .fetch_optional(&self.conn)
        .await?;

        if let Some(withdrawal) = resolved {
            return Ok(Resolution::Resolved(withdrawal));
        }

        match self.get_withdrawal(id).await? {
            Some(current) => Ok(Resolution::AlreadyResolved(current)),
            None => Ok(Resolution::NotFound),
        }
    }

    async fn list_new_withdrawals(&self, limit: i64) -> Result<Vec<Withdrawal>, anyhow::Error> {
        let withdrawals = sqlx::query_as::<_, Withdrawal>(
            "SELECT * FROM withdrawals WHERE status = 'new' ORDER BY id ASC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.conn)
        .await?;

        Ok(withdrawals)
    }
}
