use async_trait::async_trait;
use sqlx::PgPool;

use super::{Resolution, SubmissionStore};
use crate::models::submissions::{SubmissionStatus, SubmitOutcome, TaskSubmission};

#[derive(Clone)]
pub struct SubmissionRepository {
    conn: PgPool,
}

impl SubmissionRepository {
    pub fn new(conn: PgPool) -> Self {
        Self { conn }
    }

    async fn resolve(
        &self,
        id: i64,
        status: SubmissionStatus,
        reward_in_cents: i64,
    ) -> Result<Resolution<TaskSubmission>, anyhow::Error> {
        let mut tx = self.conn.begin().await?;

        let resolved = sqlx::query_as::<_, TaskSubmission>(
            r#"
                UPDATE task_submissions SET status = $2
                WHERE id = $1 AND status = 'pending'
                RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(submission) = resolved else {
            tx.rollback().await?;

            return match self.get_submission(id).await? {
                Some(current) => Ok(Resolution::AlreadyResolved(current)),
                None => Ok(Resolution::NotFound),
            };
        };

        if reward_in_cents > 0 {
            sqlx::query(
                "UPDATE users SET balance_in_cents = balance_in_cents + $2 WHERE tg_id = $1",
            )
            .bind(submission.tg_id)
            .bind(reward_in_cents)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(Resolution::Resolved(submission))
    }
}

#[async_trait]
impl SubmissionStore for SubmissionRepository {
    async fn create_submission(
        &self,
        tg_id: i64,
        task_id: &str,
        proof_file_id: &str,
        proof_caption: Option<&str>,
    ) -> Result<SubmitOutcome, anyhow::Error> {
        let mut tx = self.conn.begin().await?;

        // Locking the owner row serializes submissions of the same user.
        let owner: Option<i64> =
            sqlx::query_scalar("SELECT tg_id FROM users WHERE tg_id = $1 FOR UPDATE")
                .bind(tg_id)
                .fetch_optional(&mut *tx)
                .await?;

        if owner.is_none() {
            tx.rollback().await?;
            return Ok(SubmitOutcome::UserNotFound);
        }

        let latest: Option<String> = sqlx::query_scalar(
            r#"
                SELECT status FROM task_submissions
                WHERE tg_id = $1 AND task_id = $2
                ORDER BY id DESC
                LIMIT 1
            "#,
        )
        .bind(tg_id)
        .bind(task_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(status) = latest {
            let status = SubmissionStatus::try_from(status).map_err(anyhow::Error::msg)?;
            if status.blocks_resubmission() {
                tx.rollback().await?;
                return Ok(SubmitOutcome::Duplicate(status));
            }
        }

        let submission = sqlx::query_as::<_, TaskSubmission>(
            r#"
                INSERT INTO task_submissions (tg_id, task_id, status, proof_file_id, proof_caption)
                VALUES ($1, $2, 'pending', $3, $4)
                RETURNING *
            "#,
        )
        .bind(tg_id)
        .bind(task_id)
        .bind(proof_file_id)
        .bind(proof_caption)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(SubmitOutcome::Created(submission))
    }

    async fn get_submission(&self, id: i64) -> Result<Option<TaskSubmission>, anyhow::Error> {
        let submission =
            sqlx::query_as::<_, TaskSubmission>("SELECT * FROM task_submissions WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.conn)
                .await?;

        Ok(submission)
    }

    async fn has_approved_submission(&self, tg_id: i64) -> Result<bool, anyhow::Error> {
        let approved = sqlx::query_scalar(
            r#"
                SELECT EXISTS (
                    SELECT 1 FROM task_submissions WHERE tg_id = $1 AND status = 'approved'
                )
            "#,
        )
        .bind(tg_id)
        .fetch_one(&self.conn)
        .await?;

        Ok(approved)
    }

    async fn approve_submission(
        &self,
        id: i64,
        reward_in_cents: i64,
    ) -> Result<Resolution<TaskSubmission>, anyhow::Error> {
        self.resolve(id, SubmissionStatus::Approved, reward_in_cents)
            .await
    }

    async fn reject_submission(
        &self,
        id: i64,
    ) -> Result<Resolution<TaskSubmission>, anyhow::Error> {
        self.resolve(id, SubmissionStatus::Rejected, 0).await
    }
}
