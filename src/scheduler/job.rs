use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LivecodeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Timeout,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Timeout
        )
    }

    /// QUEUED -> RUNNING, QUEUED -> FAILED (quota rejection), RUNNING -> any terminal state.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Queued, JobStatus::Running) => true,
            (JobStatus::Queued, JobStatus::Failed) => true,
            (JobStatus::Running, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "QUEUED"),
            JobStatus::Running => write!(f, "RUNNING"),
            JobStatus::Completed => write!(f, "COMPLETED"),
            JobStatus::Failed => write!(f, "FAILED"),
            JobStatus::Timeout => write!(f, "TIMEOUT"),
        }
    }
}

/// One execution of a session's source snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub session_id: Uuid,
    /// Language as submitted; resolved against the executor registry at run time
    pub language: String,
    pub source: String,
    pub status: JobStatus,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub execution_time_ms: Option<u64>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// A state change requested by the lifecycle manager.
#[derive(Debug, Clone, PartialEq)]
pub enum JobUpdate {
    Start {
        started_at: DateTime<Utc>,
    },
    /// QUEUED -> FAILED without ever running (quota rejection)
    Reject {
        stderr: String,
        finished_at: DateTime<Utc>,
    },
    Finish {
        status: JobStatus,
        stdout: String,
        stderr: String,
        execution_time_ms: u64,
        finished_at: DateTime<Utc>,
    },
}

impl JobUpdate {
    pub fn target_status(&self) -> JobStatus {
        match self {
            JobUpdate::Start { .. } => JobStatus::Running,
            JobUpdate::Reject { .. } => JobStatus::Failed,
            JobUpdate::Finish { status, .. } => *status,
        }
    }
}

impl Job {
    pub fn new(session_id: Uuid, language: String, source: String) -> Self {
        Self::with_id(Uuid::new_v4(), session_id, language, source, Utc::now())
    }

    pub fn with_id(
        id: Uuid,
        session_id: Uuid,
        language: String,
        source: String,
        queued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            session_id,
            language,
            source,
            status: JobStatus::Queued,
            stdout: None,
            stderr: None,
            execution_time_ms: None,
            queued_at,
            started_at: None,
            finished_at: None,
        }
    }

    /// Apply a transition, enforcing forward-only movement and timestamp order.
    /// The job is left untouched when the transition is refused.
    pub fn apply(&mut self, update: JobUpdate) -> Result<()> {
        let to = update.target_status();
        if !self.status.can_transition_to(to) {
            return Err(LivecodeError::InvalidTransition {
                job_id: self.id,
                from: self.status,
                to,
            });
        }

        match update {
            JobUpdate::Start { started_at } => {
                self.started_at = Some(started_at.max(self.queued_at));
            }
            JobUpdate::Reject {
                stderr,
                finished_at,
            } => {
                self.stdout = Some(String::new());
                self.stderr = Some(stderr);
                self.finished_at = Some(finished_at.max(self.queued_at));
            }
            JobUpdate::Finish {
                status: _,
                stdout,
                stderr,
                execution_time_ms,
                finished_at,
            } => {
                let floor = self.started_at.unwrap_or(self.queued_at);
                self.stdout = Some(stdout);
                self.stderr = Some(stderr);
                self.execution_time_ms = Some(execution_time_ms);
                self.finished_at = Some(finished_at.max(floor));
            }
        }
        self.status = to;
        Ok(())
    }
}
