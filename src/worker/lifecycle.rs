use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::config::{LimitsConfig, QuotaConfig, RetryConfig};
use crate::error::{LivecodeError, Result};
use crate::scheduler::{Job, JobStatus, JobUpdate, QuotaGuard, QuotaViolation, RunMessage};
use crate::store::JobStore;
use crate::worker::executor::{ExecutionBackend, ExecutionOutcome};
use crate::worker::output::truncate_output;
use crate::worker::retry::with_retry;

/// What processing a run message did to its job.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleOutcome {
    /// No job with this id; the message is dropped.
    Missing,
    /// The job was already past QUEUED (redelivery or a concurrent worker).
    AlreadyProcessed(JobStatus),
    /// Refused by the quota guard; the job is FAILED and never ran.
    Rejected(QuotaViolation),
    /// The job ran and reached this terminal state.
    Finished(JobStatus),
}

/// Drives one job through QUEUED -> RUNNING -> terminal and persists each step.
#[derive(Clone)]
pub struct LifecycleManager {
    jobs: Arc<dyn JobStore>,
    quota: QuotaGuard,
    backend: Arc<dyn ExecutionBackend>,
    limits: LimitsConfig,
    retry: RetryConfig,
}

impl LifecycleManager {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        backend: Arc<dyn ExecutionBackend>,
        quota: QuotaConfig,
        limits: LimitsConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            quota: QuotaGuard::new(jobs.clone(), quota),
            jobs,
            backend,
            limits,
            retry,
        }
    }

    /// Process one run message.
    ///
    /// Safe under redelivery: a job that is not QUEUED is left untouched.
    ///
    /// # Errors
    ///
    /// Store faults before the job enters RUNNING are returned as-is; they
    /// leave the job QUEUED so the message can be redelivered. Once RUNNING,
    /// the only error is `TerminalStateLost`, which is never redelivered.
    pub async fn process(&self, message: &RunMessage) -> Result<LifecycleOutcome> {
        let job_id = message.job_id;
        let job = match self.jobs.get_job(job_id).await {
            Ok(job) => job,
            Err(LivecodeError::JobNotFound(_)) => {
                tracing::warn!(job_id = %job_id, "Run message for unknown job, dropping");
                return Ok(LifecycleOutcome::Missing);
            }
            Err(e) => return Err(e),
        };

        if job.status != JobStatus::Queued {
            tracing::info!(job_id = %job_id, status = %job.status, "Job already processed, ignoring redelivery");
            return Ok(LifecycleOutcome::AlreadyProcessed(job.status));
        }

        if let Some(violation) = self.quota.check(&job).await? {
            return self.reject(&job, violation).await;
        }

        match self
            .jobs
            .update_job(
                job_id,
                JobUpdate::Start {
                    started_at: Utc::now(),
                },
            )
            .await
        {
            Ok(_) => {}
            Err(LivecodeError::InvalidTransition { from, .. }) => {
                tracing::info!(job_id = %job_id, status = %from, "Job claimed by another worker");
                return Ok(LifecycleOutcome::AlreadyProcessed(from));
            }
            Err(e) => return Err(e),
        }
        tracing::info!(job_id = %job_id, language = %message.language, "Job running");

        let outcome = self.execute(job_id, message).await;
        self.finish(job_id, outcome).await
    }

    async fn reject(&self, job: &Job, violation: QuotaViolation) -> Result<LifecycleOutcome> {
        tracing::warn!(
            job_id = %job.id,
            session_id = %job.session_id,
            violation = %violation,
            "Job rejected by quota guard"
        );
        let update = JobUpdate::Reject {
            stderr: violation.to_string(),
            finished_at: Utc::now(),
        };
        match self.jobs.update_job(job.id, update).await {
            Ok(_) => Ok(LifecycleOutcome::Rejected(violation)),
            Err(LivecodeError::InvalidTransition { from, .. }) => {
                Ok(LifecycleOutcome::AlreadyProcessed(from))
            }
            Err(e) => Err(e),
        }
    }

    async fn execute(&self, job_id: Uuid, message: &RunMessage) -> ExecutionOutcome {
        match self
            .backend
            .execute(&message.language, &message.source)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Execution could not be performed");
                ExecutionOutcome::failed(e.user_message())
            }
        }
    }

    /// Persist the terminal row. Retried on its own so a brief store outage
    /// cannot strand the job in RUNNING.
    ///
    /// Exhausting those retries yields `TerminalStateLost`, which is not
    /// transient: redelivering the message would only find the job RUNNING.
    async fn finish(&self, job_id: Uuid, outcome: ExecutionOutcome) -> Result<LifecycleOutcome> {
        let max = self.limits.max_output_bytes;
        let update = JobUpdate::Finish {
            status: outcome.status,
            stdout: truncate_output(outcome.stdout, max),
            stderr: truncate_output(outcome.stderr, max),
            execution_time_ms: outcome.run_time.as_millis() as u64,
            finished_at: Utc::now(),
        };

        let job = with_retry(&self.retry, "persist terminal state", || {
            self.jobs.update_job(job_id, update.clone())
        })
        .await
        .map_err(|e| {
            tracing::error!(job_id = %job_id, error = %e, "Failed to persist terminal state");
            LivecodeError::TerminalStateLost {
                job_id,
                reason: e.to_string(),
            }
        })?;

        tracing::info!(
            job_id = %job_id,
            status = %job.status,
            execution_time_ms = ?job.execution_time_ms,
            "Job finished"
        );
        Ok(LifecycleOutcome::Finished(job.status))
    }
}
