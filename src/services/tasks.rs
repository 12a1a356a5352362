use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::notifications::{send_and_forget, NotificationRequest};
use super::referrals::{trigger_qualification, ReferralRequest};
use super::{Precondition, RequestHandler, Service, ServiceError};
use crate::models::{
    submissions::{NewSubmission, SubmissionStatus, SubmitOutcome, TaskSubmission},
    tasks::{Task, TaskCatalog},
};
use crate::repositories::{Resolution, SubmissionStore};
use crate::utils::money::format_cents;

pub enum TaskRequest {
    ListTasks {
        response: oneshot::Sender<Vec<Task>>,
    },
    Submit {
        user_id: i64,
        task_id: String,
        proof: NewSubmission,
        response: oneshot::Sender<Result<TaskSubmission, ServiceError>>,
    },
    Resolve {
        submission_id: i64,
        approve: bool,
        response: oneshot::Sender<Result<TaskSubmission, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct TaskRequestHandler {
    repository: Arc<dyn SubmissionStore>,
    catalog: TaskCatalog,
    referral_channel: mpsc::Sender<ReferralRequest>,
    notification_channel: mpsc::Sender<NotificationRequest>,
}

impl TaskRequestHandler {
    pub fn new(
        repository: Arc<dyn SubmissionStore>,
        catalog: TaskCatalog,
        referral_channel: mpsc::Sender<ReferralRequest>,
        notification_channel: mpsc::Sender<NotificationRequest>,
    ) -> Self {
        Self {
            repository,
            catalog,
            referral_channel,
            notification_channel,
        }
    }

    async fn submit(
        &self,
        user_id: i64,
        task_id: &str,
        proof: NewSubmission,
    ) -> Result<TaskSubmission, ServiceError> {
        let Some(task) = self.catalog.get(task_id) else {
            return Err(ServiceError::precondition(
                Precondition::UnknownTask,
                format!("no task named {}", task_id),
            ));
        };

        let outcome = self
            .repository
            .create_submission(
                user_id,
                &task.id,
                &proof.proof_file_id,
                proof.proof_caption.as_deref(),
            )
            .await
            .map_err(ServiceError::database)?;

        let submission = match outcome {
            SubmitOutcome::Created(submission) => submission,
            SubmitOutcome::Duplicate(status) => {
                return Err(ServiceError::precondition(
                    Precondition::DuplicateSubmission,
                    format!("latest submission is {}", status.as_str()),
                ))
            }
            SubmitOutcome::UserNotFound => return Err(ServiceError::user_not_found(user_id)),
        };

        log::info!(
            "Submission {} for task {} from {}.",
            submission.id,
            task.id,
            user_id
        );
        let _ = self
            .notification_channel
            .send(NotificationRequest::NotifyAdmins {
                text: format!(
                    "📝 Submission #{} from <code>{}</code> for \"{}\" ({}). Proof: {}{}",
                    submission.id,
                    user_id,
                    task.title,
                    format_cents(task.reward_in_cents),
                    submission.proof_file_id,
                    submission
                        .proof_caption
                        .as_deref()
                        .map(|c| format!("\n{}", c))
                        .unwrap_or_default()
                ),
            })
            .await;

        Ok(submission)
    }

    async fn resolve(
        &self,
        submission_id: i64,
        approve: bool,
    ) -> Result<TaskSubmission, ServiceError> {
        let submission = self
            .repository
            .get_submission(submission_id)
            .await
            .map_err(ServiceError::database)?
            .ok_or_else(|| ServiceError::NotFound(format!("submission {}", submission_id)))?;

        let task = self.catalog.get(&submission.task_id);
        let reward_in_cents = match task {
            Some(task) => task.reward_in_cents,
            None => {
                log::warn!(
                    "Task {} of submission {} is no longer configured; approving without reward.",
                    submission.task_id,
                    submission_id
                );
                0
            }
        };

        let resolution = match approve {
            true => {
                self.repository
                    .approve_submission(submission_id, reward_in_cents)
                    .await
            }
            false => self.repository.reject_submission(submission_id).await,
        }
        .map_err(ServiceError::database)?;

        let submission = match resolution {
            Resolution::Resolved(submission) => submission,
            Resolution::AlreadyResolved(submission) => {
                return Err(ServiceError::precondition(
                    Precondition::AlreadyResolved,
                    format!(
                        "submission {} is already {}",
                        submission.id,
                        submission.status.as_str()
                    ),
                ))
            }
            Resolution::NotFound => {
                return Err(ServiceError::NotFound(format!("submission {}", submission_id)))
            }
        };

        let title = task.map(|t| t.title.as_str()).unwrap_or(&submission.task_id);
        if submission.status == SubmissionStatus::Approved {
            log::info!(
                "Submission {} approved; {} credited to {}.",
                submission.id,
                format_cents(reward_in_cents),
                submission.tg_id
            );
            send_and_forget(
                &self.notification_channel,
                submission.tg_id,
                format!(
                    "✅ Task \"{}\" approved! +<b>{}</b>",
                    title,
                    format_cents(reward_in_cents)
                ),
            )
            .await;

            trigger_qualification(&self.referral_channel, submission.tg_id).await;
        } else {
            log::info!("Submission {} rejected.", submission.id);
            send_and_forget(
                &self.notification_channel,
                submission.tg_id,
                format!("❌ Task \"{}\" was rejected. You can submit it again.", title),
            )
            .await;
        }

        Ok(submission)
    }
}

#[async_trait]
impl RequestHandler<TaskRequest> for TaskRequestHandler {
    async fn handle_request(&self, request: TaskRequest) {
        match request {
            TaskRequest::ListTasks { response } => {
                let _ = response.send(self.catalog.all().to_vec());
            }
            TaskRequest::Submit {
                user_id,
                task_id,
                proof,
                response,
            } => {
                let result = self.submit(user_id, &task_id, proof).await;
                let _ = response.send(result);
            }
            TaskRequest::Resolve {
                submission_id,
                approve,
                response,
            } => {
                let result = self.resolve(submission_id, approve).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct TaskService;

impl TaskService {
    pub fn new() -> Self {
        TaskService {}
    }
}

#[async_trait]
impl Service<TaskRequest, TaskRequestHandler> for TaskService {}
