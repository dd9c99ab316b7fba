use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{LivecodeError, Result};
use crate::scheduler::job::{Job, JobStatus, JobUpdate};
use crate::scheduler::session::{Session, SessionPatch};
use crate::store::{JobStore, SessionStore};

const DEFAULT_MAX_JOBS: usize = 100_000;

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get_session(&self, session_id: Uuid) -> Result<Session> {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .cloned()
            .ok_or(LivecodeError::SessionNotFound(session_id))
    }

    async fn create_session(
        &self,
        language: Option<String>,
        source_code: Option<String>,
    ) -> Result<Session> {
        let session = Session::new(language, source_code);
        self.sessions
            .write()
            .await
            .insert(session.id, session.clone());
        tracing::debug!(session_id = %session.id, language = %session.language, "Session created");
        Ok(session)
    }

    async fn update_session(&self, session_id: Uuid, patch: SessionPatch) -> Result<Session> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&session_id)
            .ok_or(LivecodeError::SessionNotFound(session_id))?;
        if let Some(language) = patch.language {
            session.language = language;
        }
        if let Some(source_code) = patch.source_code {
            session.source_code = source_code;
        }
        session.updated_at = Utc::now();
        Ok(session.clone())
    }

    async fn delete_session(&self, session_id: Uuid) -> Result<()> {
        self.sessions
            .write()
            .await
            .remove(&session_id)
            .map(|_| ())
            .ok_or(LivecodeError::SessionNotFound(session_id))
    }
}

/// Job records held in memory. Every mutation happens under one write lock, so
/// the transition check in `update_job` is a compare-and-set.
#[derive(Debug)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
    max_jobs: usize,
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_JOBS)
    }

    pub fn with_capacity(max_jobs: usize) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            max_jobs,
        }
    }

    /// Insert a prepared job as-is. Used to seed history.
    ///
    /// Jobs are never evicted, so once `max_jobs` is reached every insert fails
    /// with `StoreFull` until the process restarts.
    pub async fn insert_job(&self, job: Job) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.len() >= self.max_jobs {
            return Err(LivecodeError::StoreFull {
                capacity: self.max_jobs,
            });
        }
        jobs.insert(job.id, job);
        Ok(())
    }

    pub async fn count_by_status(&self, status: JobStatus) -> usize {
        self.jobs
            .read()
            .await
            .values()
            .filter(|j| j.status == status)
            .count()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_job(&self, session_id: Uuid, language: &str, source: &str) -> Result<Job> {
        let job = Job::new(session_id, language.to_string(), source.to_string());
        self.insert_job(job.clone()).await?;
        Ok(job)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Job> {
        self.jobs
            .read()
            .await
            .get(&job_id)
            .cloned()
            .ok_or(LivecodeError::JobNotFound(job_id))
    }

    async fn update_job(&self, job_id: Uuid, update: JobUpdate) -> Result<Job> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&job_id)
            .ok_or(LivecodeError::JobNotFound(job_id))?;
        job.apply(update)?;
        Ok(job.clone())
    }

    async fn count_jobs(
        &self,
        session_id: Uuid,
        since: Option<DateTime<Utc>>,
        until: DateTime<Utc>,
    ) -> Result<u64> {
        let count = self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.session_id == session_id)
            .filter(|j| j.queued_at <= until)
            .filter(|j| since.map_or(true, |since| j.queued_at >= since))
            .count();
        Ok(count as u64)
    }

    async fn list_jobs(&self, session_id: Uuid) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.session_id == session_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.queued_at.cmp(&a.queued_at));
        Ok(jobs)
    }
}
