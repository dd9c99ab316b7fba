//! Storage contracts the engine depends on.
//!
//! The engine never owns sessions; it only reads a snapshot of one at dispatch
//! time. Jobs are created by the dispatcher and mutated exclusively through
//! [`JobStore::update_job`], which enforces the job state machine so that a
//! redelivered message cannot move a job that another worker already owns.
//!
//! [`memory`] provides the in-process implementations used by the server and
//! the tests.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::scheduler::job::{Job, JobUpdate};
use crate::scheduler::session::{Session, SessionPatch};

pub use memory::{MemoryJobStore, MemorySessionStore};

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_session(&self, session_id: Uuid) -> Result<Session>;

    async fn create_session(&self, language: Option<String>, source_code: Option<String>)
        -> Result<Session>;

    async fn update_session(&self, session_id: Uuid, patch: SessionPatch) -> Result<Session>;

    async fn delete_session(&self, session_id: Uuid) -> Result<()>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Durably create a QUEUED job holding the given snapshot.
    async fn create_job(&self, session_id: Uuid, language: &str, source: &str) -> Result<Job>;

    async fn get_job(&self, job_id: Uuid) -> Result<Job>;

    /// Apply a transition atomically; fails with `InvalidTransition` if the job
    /// is not in a state the update may leave from.
    async fn update_job(&self, job_id: Uuid, update: JobUpdate) -> Result<Job>;

    /// Count the session's jobs with `since <= queued_at <= until`.
    async fn count_jobs(
        &self,
        session_id: Uuid,
        since: Option<DateTime<Utc>>,
        until: DateTime<Utc>,
    ) -> Result<u64>;

    /// The session's jobs, newest first.
    async fn list_jobs(&self, session_id: Uuid) -> Result<Vec<Job>>;
}
