//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use livecode::config::{EngineConfig, LimitsConfig, QuotaConfig, RetryConfig};
use livecode::error::{LivecodeError, Result};
use livecode::scheduler::{Job, JobStatus, JobUpdate};
use livecode::store::{JobStore, MemoryJobStore};
use livecode::worker::executor::ExecError;
use livecode::worker::{ExecutionBackend, ExecutionOutcome, LifecycleManager};

/// Backend that never spawns anything; counts calls and returns a fixed outcome.
pub struct StubBackend {
    pub calls: AtomicUsize,
    outcome: ExecutionOutcome,
    delay: Duration,
}

impl StubBackend {
    pub fn new(outcome: ExecutionOutcome) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            outcome,
            delay: Duration::ZERO,
        })
    }

    pub fn completed(stdout: &str) -> Arc<Self> {
        Self::new(ExecutionOutcome {
            stdout: stdout.to_string(),
            stderr: String::new(),
            status: JobStatus::Completed,
            run_time: Duration::from_millis(12),
        })
    }

    pub fn slow(stdout: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            outcome: ExecutionOutcome {
                stdout: stdout.to_string(),
                stderr: String::new(),
                status: JobStatus::Completed,
                run_time: delay,
            },
            delay,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionBackend for StubBackend {
    async fn execute(&self, _language: &str, _source: &str) -> std::result::Result<ExecutionOutcome, ExecError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.outcome.clone())
    }
}

/// Job store whose first `failures` reads report the store as unavailable.
pub struct FlakyJobStore {
    pub inner: MemoryJobStore,
    failures: AtomicU32,
    pub reads: AtomicU32,
}

impl FlakyJobStore {
    pub fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryJobStore::new(),
            failures: AtomicU32::new(failures),
            reads: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl JobStore for FlakyJobStore {
    async fn create_job(&self, session_id: Uuid, language: &str, source: &str) -> Result<Job> {
        self.inner.create_job(session_id, language, source).await
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Job> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(LivecodeError::StoreUnavailable("connection reset".into()));
        }
        self.inner.get_job(job_id).await
    }

    async fn update_job(&self, job_id: Uuid, update: JobUpdate) -> Result<Job> {
        self.inner.update_job(job_id, update).await
    }

    async fn count_jobs(
        &self,
        session_id: Uuid,
        since: Option<DateTime<Utc>>,
        until: DateTime<Utc>,
    ) -> Result<u64> {
        self.inner.count_jobs(session_id, since, until).await
    }

    async fn list_jobs(&self, session_id: Uuid) -> Result<Vec<Job>> {
        self.inner.list_jobs(session_id).await
    }
}

/// Job store that accepts everything except terminal writes.
pub struct NoFinishStore {
    pub inner: MemoryJobStore,
    pub finish_attempts: AtomicU32,
    pub reads: AtomicU32,
}

impl NoFinishStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryJobStore::new(),
            finish_attempts: AtomicU32::new(0),
            reads: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl JobStore for NoFinishStore {
    async fn create_job(&self, session_id: Uuid, language: &str, source: &str) -> Result<Job> {
        self.inner.create_job(session_id, language, source).await
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Job> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get_job(job_id).await
    }

    async fn update_job(&self, job_id: Uuid, update: JobUpdate) -> Result<Job> {
        if matches!(update, JobUpdate::Finish { .. }) {
            self.finish_attempts.fetch_add(1, Ordering::SeqCst);
            return Err(LivecodeError::StoreUnavailable("write rejected".into()));
        }
        self.inner.update_job(job_id, update).await
    }

    async fn count_jobs(
        &self,
        session_id: Uuid,
        since: Option<DateTime<Utc>>,
        until: DateTime<Utc>,
    ) -> Result<u64> {
        self.inner.count_jobs(session_id, since, until).await
    }

    async fn list_jobs(&self, session_id: Uuid) -> Result<Vec<Job>> {
        self.inner.list_jobs(session_id).await
    }
}

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        initial_delay: Duration::from_millis(5),
        ..Default::default()
    }
}

pub fn lifecycle(jobs: Arc<dyn JobStore>, backend: Arc<dyn ExecutionBackend>) -> LifecycleManager {
    LifecycleManager::new(
        jobs,
        backend,
        QuotaConfig::default(),
        LimitsConfig::default(),
        fast_retry(),
    )
}

/// Config with short timeouts and a private workspace root.
pub fn test_config(workspace_root: &std::path::Path) -> EngineConfig {
    let mut config = EngineConfig::default()
        .with_workers(2)
        .with_retry(fast_retry())
        .with_limits(LimitsConfig {
            run_timeout: Duration::from_secs(2),
            compile_timeout: Duration::from_secs(20),
            ..Default::default()
        });
    config.toolchain.workspace_root = workspace_root.to_path_buf();
    config
}

/// Whether an external tool can be started at all.
pub fn tool_available(program: &str) -> bool {
    std::process::Command::new(program)
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .is_ok()
}

pub async fn wait_for<F, Fut>(condition: F, timeout: Duration, interval: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    condition().await
}

pub async fn assert_eventually<F, Fut>(condition: F, timeout: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = wait_for(condition, timeout, Duration::from_millis(25)).await;
    assert!(result, "{}", message);
}
