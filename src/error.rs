use thiserror::Error;
use uuid::Uuid;

use crate::scheduler::JobStatus;

#[derive(Error, Debug)]
pub enum LivecodeError {
    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Task transport closed")]
    TransportClosed,

    #[error("Job queue is at capacity ({capacity} pending)")]
    TransportFull { capacity: usize },

    #[error("Job store is at capacity ({capacity} jobs)")]
    StoreFull { capacity: usize },

    /// The job ran but its terminal state could not be written after every retry.
    #[error("Failed to persist terminal state of job {job_id}: {reason}")]
    TerminalStateLost { job_id: Uuid, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LivecodeError {
    /// Errors caused by the engine's own plumbing rather than by the request or
    /// the executed program. Only these are worth redelivering.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LivecodeError::StoreUnavailable(_) | LivecodeError::TransportClosed
        )
    }
}

pub type Result<T> = std::result::Result<T, LivecodeError>;
