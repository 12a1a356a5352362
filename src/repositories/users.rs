use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use super::UserStore;
use crate::models::{
    referrals::{ReferralSummary, TopReferrer},
    stats::Stats,
    users::{BalanceDebit, BonusClaim, Language, PhoneBinding, User},
};

#[derive(Clone)]
pub struct UserRepository {
    conn: PgPool,
}

impl UserRepository {
    pub fn new(conn: PgPool) -> Self {
        Self { conn }
    }

    async fn get_balance(&self, tg_id: i64) -> Result<Option<i64>, anyhow::Error> {
        let balance = sqlx::query_scalar("SELECT balance_in_cents FROM users WHERE tg_id = $1")
            .bind(tg_id)
            .fetch_optional(&self.conn)
            .await?;

        Ok(balance)
    }
}

#[async_trait]
impl UserStore for UserRepository {
    async fn insert_user(
        &self,
        tg_id: i64,
        referrer_id: Option<i64>,
    ) -> Result<bool, anyhow::Error> {
        // Unknown referrers and self-referrals resolve to NULL.
        let result = sqlx::query(
            r#"
                INSERT INTO users (tg_id, referrer_id)
                VALUES ($1, (SELECT tg_id FROM users WHERE tg_id = $2 AND tg_id <> $1))
                ON CONFLICT (tg_id) DO NOTHING
            "#,
        )
        .bind(tg_id)
        .bind(referrer_id)
        .execute(&self.conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_user(&self, tg_id: i64) -> Result<Option<User>, anyhow::Error> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE tg_id = $1")
            .bind(tg_id)
            .fetch_optional(&self.conn)
            .await?;

        Ok(user)
    }

    async fn credit_balance(
        &self,
        tg_id: i64,
        amount_in_cents: i64,
    ) -> Result<Option<i64>, anyhow::Error> {
        let balance = sqlx::query_scalar(
            r#"
                UPDATE users SET balance_in_cents = balance_in_cents + $2
                WHERE tg_id = $1
                RETURNING balance_in_cents
            "#,
        )
        .bind(tg_id)
        .bind(amount_in_cents)
        .fetch_optional(&self.conn)
        .await?;

        Ok(balance)
    }

    async fn debit_balance(
        &self,
        tg_id: i64,
        amount_in_cents: i64,
    ) -> Result<BalanceDebit, anyhow::Error> {
        let debited: Option<i64> = sqlx::query_scalar(
            r#"
                UPDATE users SET balance_in_cents = balance_in_cents - $2
                WHERE tg_id = $1 AND balance_in_cents >= $2
                RETURNING balance_in_cents
            "#,
        )
        .bind(tg_id)
        .bind(amount_in_cents)
        .fetch_optional(&self.conn)
        .await?;

        if let Some(balance_in_cents) = debited {
            return Ok(BalanceDebit::Debited { balance_in_cents });
        }

        match self.get_balance(tg_id).await? {
            Some(balance_in_cents) => Ok(BalanceDebit::Insufficient { balance_in_cents }),
            None => Ok(BalanceDebit::NotFound),
        }
    }

    async fn claim_bonus(
        &self,
        tg_id: i64,
        amount_in_cents: i64,
        interval: Duration,
        now: DateTime<Utc>,
    ) -> Result<BonusClaim, anyhow::Error> {
        let claimed: Option<i64> = sqlx::query_scalar(
            r#"
                UPDATE users
                SET balance_in_cents = balance_in_cents + $2, last_bonus_at = $3
                WHERE tg_id = $1 AND (last_bonus_at IS NULL OR last_bonus_at <= $4)
                RETURNING balance_in_cents
            "#,
        )
        .bind(tg_id)
        .bind(amount_in_cents)
        .bind(now)
        .bind(now - interval)
        .fetch_optional(&self.conn)
        .await?;

        if let Some(balance_in_cents) = claimed {
            return Ok(BonusClaim::Claimed { balance_in_cents });
        }

        let last: Option<Option<DateTime<Utc>>> =
            sqlx::query_scalar("SELECT last_bonus_at FROM users WHERE tg_id = $1")
                .bind(tg_id)
                .fetch_optional(&self.conn)
                .await?;

        match last {
            Some(last) => Ok(BonusClaim::NotReady {
                next_claim_at: last.unwrap_or(now) + interval,
            }),
            None => Ok(BonusClaim::NotFound),
        }
    }

    async fn set_language(&self, tg_id: i64, language: Language) -> Result<bool, anyhow::Error> {
        let result = sqlx::query("UPDATE users SET language = $2 WHERE tg_id = $1")
            .bind(tg_id)
            .bind(language.as_str())
            .execute(&self.conn)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_phone(&self, tg_id: i64, phone: &str) -> Result<PhoneBinding, anyhow::Error> {
        let result = sqlx::query("UPDATE users SET phone = $2 WHERE tg_id = $1")
            .bind(tg_id)
            .bind(phone)
            .execute(&self.conn)
            .await;

        match result {
            Ok(done) if done.rows_affected() == 1 => Ok(PhoneBinding::Saved),
            Ok(_) => Ok(PhoneBinding::NotFound),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(PhoneBinding::InUse),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_banned(&self, tg_id: i64, banned: bool) -> Result<bool, anyhow::Error> {
        let result = sqlx::query("UPDATE users SET banned = $2 WHERE tg_id = $1")
            .bind(tg_id)
            .bind(banned)
            .execute(&self.conn)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn activate_referral(
        &self,
        tg_id: i64,
        referral_bonus_in_cents: i64,
    ) -> Result<Option<i64>, anyhow::Error> {
        let mut tx = self.conn.begin().await?;

        // The row lock taken here serializes concurrent triggers; losers see
        // `activated = TRUE` on re-check and update nothing.
        let referrer_id: Option<i64> = sqlx::query_scalar(
            r#"
                UPDATE users SET activated = TRUE
                WHERE tg_id = $1
                  AND activated = FALSE
                  AND referrer_id IS NOT NULL
                  AND last_bonus_at IS NOT NULL
                  AND EXISTS (
                      SELECT 1 FROM task_submissions
                      WHERE tg_id = $1 AND status = 'approved'
                  )
                RETURNING referrer_id
            "#,
        )
        .bind(tg_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(referrer_id) = referrer_id else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query("UPDATE users SET balance_in_cents = balance_in_cents + $2 WHERE tg_id = $1")
            .bind(referrer_id)
            .bind(referral_bonus_in_cents)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Some(referrer_id))
    }

    async fn referral_summary(
        &self,
        tg_id: i64,
    ) -> Result<Option<ReferralSummary>, anyhow::Error> {
        let summary = sqlx::query_as::<_, ReferralSummary>(
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
        .fetch_optional(&self.conn)
        .await?;

        Ok(summary)
    }

    async fn add_manual_refs(&self, tg_id: i64, count: i64) -> Result<Option<i64>, anyhow::Error> {
        let total = sqlx::query_scalar(
            r#"
                UPDATE users SET manual_ref_count = GREATEST(manual_ref_count + $2, 0)
                WHERE tg_id = $1
                RETURNING manual_ref_count
            "#,
        )
        .bind(tg_id)
        .bind(count)
        .fetch_optional(&self.conn)
        .await?;

        Ok(total)
    }

    async fn set_manual_refs(&self, tg_id: i64, count: i64) -> Result<Option<i64>, anyhow::Error> {
        let total = sqlx::query_scalar(
            r#"
                UPDATE users SET manual_ref_count = GREATEST($2, 0)
                WHERE tg_id = $1
                RETURNING manual_ref_count
            "#,
        )
        .bind(tg_id)
        .bind(count)
        .fetch_optional(&self.conn)
        .await?;

        Ok(total)
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<Stats, anyhow::Error> {
        let stats = sqlx::query_as::<_, Stats>(
            r#"
                SELECT
                    COUNT(*) AS total_users,
                    COUNT(*) FILTER (WHERE activated) AS activated_users,
                    COUNT(*) FILTER (WHERE phone IS NOT NULL AND phone <> '') AS with_phone,
                    COUNT(*) FILTER (WHERE banned) AS banned_users,
                    COUNT(*) FILTER (WHERE created_at > $1) AS new_24h
                FROM users
            "#,
        )
        .bind(now - Duration::hours(24))
        .fetch_one(&self.conn)
        .await?;

        Ok(stats)
    }

    async fn top_referrers(&self, limit: i64) -> Result<Vec<TopReferrer>, anyhow::Error> {
        let top = sqlx::query_as::<_, TopReferrer>(
            r#"
                SELECT referrer_id, COUNT(*) AS active_referrals
                FROM users
                WHERE activated AND referrer_id IS NOT NULL
                GROUP BY referrer_id
                ORDER BY active_referrals DESC, referrer_id ASC
                LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.conn)
        .await?;

        Ok(top)
    }

    async fn count_users(&self) -> Result<i64, anyhow::Error> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.conn)
            .await?;

        Ok(count)
    }

    async fn list_users(&self, offset: i64, limit: i64) -> Result<Vec<User>, anyhow::Error> {
        let users = sqlx::query_as::<_, User>(
            "SELECT * FROM users ORDER BY created_at ASC, tg_id ASC OFFSET $1 LIMIT $2",
        )
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.conn)
        .await?;

        Ok(users)
    }

    async fn list_recipients(&self) -> Result<Vec<i64>, anyhow::Error> {
        let ids = sqlx::query_scalar(
            "SELECT tg_id FROM users WHERE NOT banned ORDER BY created_at ASC, tg_id ASC",
        )
        .fetch_all(&self.conn)
        .await?;

        Ok(ids)
    }
}
