use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::scheduler::job::JobStatus;
use crate::scheduler::transport::{RunMessage, TaskTransport};
use crate::store::{JobStore, SessionStore};

/// Returned to the caller as soon as the job is queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReceipt {
    #[serde(rename = "execution_id")]
    pub job_id: Uuid,
    pub status: JobStatus,
}

/// Turns a session into a queued job and hands it to the transport.
#[derive(Clone)]
pub struct Dispatcher {
    sessions: Arc<dyn SessionStore>,
    jobs: Arc<dyn JobStore>,
    transport: Arc<dyn TaskTransport>,
}

impl Dispatcher {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        jobs: Arc<dyn JobStore>,
        transport: Arc<dyn TaskTransport>,
    ) -> Self {
        Self {
            sessions,
            jobs,
            transport,
        }
    }

    /// Snapshot the session's language and source into a new QUEUED job, then
    /// publish the run message. Does not wait for execution.
    ///
    /// # Errors
    ///
    /// `SessionNotFound` if the session does not exist, in which case nothing
    /// is written. Store and transport faults are passed through; a job whose
    /// message could not be published stays QUEUED.
    pub async fn dispatch(&self, session_id: Uuid) -> Result<DispatchReceipt> {
        let session = self.sessions.get_session(session_id).await?;

        // The row must exist before any worker can see the message.
        let job = self
            .jobs
            .create_job(session.id, &session.language, &session.source_code)
            .await?;

        let message = RunMessage {
            job_id: job.id,
            language: job.language.clone(),
            source: job.source.clone(),
        };
        if let Err(e) = self.transport.publish(message).await {
            tracing::error!(job_id = %job.id, session_id = %session_id, error = %e, "Failed to publish run message");
            return Err(e);
        }

        tracing::info!(
            job_id = %job.id,
            session_id = %session_id,
            language = %job.language,
            "Job queued"
        );

        Ok(DispatchReceipt {
            job_id: job.id,
            status: job.status,
        })
    }
}
