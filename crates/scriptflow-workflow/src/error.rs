use scriptflow_ai::AiError;
use scriptflow_core::{CoreError, JobId, JobType, ProjectId, WorkflowStatus};
use scriptflow_queue::QueueError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Project not found: {0}")]
    ProjectNotFound(ProjectId),

    #[error("You do not have access to this project")]
    Forbidden,

    #[error("Project {0} has no revision decisions")]
    NoDecisions(ProjectId),

    #[error("Project must be in {expected} phase (current: {actual})")]
    InvalidPhase {
        expected: WorkflowStatus,
        actual: WorkflowStatus,
    },

    #[error("Job {job_id} is a {actual} job, not {expected}")]
    InvalidJobType {
        job_id: JobId,
        expected: JobType,
        actual: JobType,
    },

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Malformed job payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error(transparent)]
    Ai(#[from] AiError),

    #[error(transparent)]
    Storage(CoreError),
}

impl From<QueueError> for WorkflowError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::JobNotFound(id) => WorkflowError::JobNotFound(id),
            other => WorkflowError::Validation(other.to_string()),
        }
    }
}

impl From<CoreError> for WorkflowError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ProjectNotFound(id) => WorkflowError::ProjectNotFound(id),
            other => WorkflowError::Storage(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, WorkflowError>;
