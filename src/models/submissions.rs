use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Pending,
    Approved,
    Rejected,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Approved => "approved",
            SubmissionStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SubmissionStatus::Pending)
    }

    /// A pending or approved submission blocks another one for the same task.
    pub fn blocks_resubmission(&self) -> bool {
        !matches!(self, SubmissionStatus::Rejected)
    }
}

impl TryFrom<String> for SubmissionStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "pending" => Ok(SubmissionStatus::Pending),
            "approved" => Ok(SubmissionStatus::Approved),
            "rejected" => Ok(SubmissionStatus::Rejected),
            other => Err(format!("unknown submission status: {}", other)),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct TaskSubmission {
    pub id: i64,
    pub tg_id: i64,
    pub task_id: String,
    #[sqlx(try_from = "String")]
    pub status: SubmissionStatus,
    pub proof_file_id: String,
    pub proof_caption: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewSubmission {
    pub proof_file_id: String,
    pub proof_caption: Option<String>,
}

#[derive(Clone, Debug)]
pub enum SubmitOutcome {
    Created(TaskSubmission),
    Duplicate(SubmissionStatus),
    UserNotFound,
}
