use std::sync::Arc;

use chrono::Duration as ChronoDuration;

use crate::config::QuotaConfig;
use crate::error::Result;
use crate::scheduler::job::Job;
use crate::store::JobStore;

/// Why a job was refused before running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaViolation {
    TotalCap { limit: u64, count: u64 },
    RateCap { limit: u64, window_secs: u64, count: u64 },
}

impl std::fmt::Display for QuotaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaViolation::TotalCap { limit, .. } => write!(
                f,
                "Execution limit exceeded: a session may run at most {} executions",
                limit
            ),
            QuotaViolation::RateCap {
                limit, window_secs, ..
            } => write!(
                f,
                "Rate limit exceeded: at most {} executions per {} seconds",
                limit, window_secs
            ),
        }
    }
}

/// Per-session total and rate caps, checked with single count queries.
///
/// Counts are anchored on the job's own `queued_at`, so later submissions never
/// count against an earlier job. Two near-simultaneous checks may both pass;
/// enforcement is approximate.
#[derive(Clone)]
pub struct QuotaGuard {
    jobs: Arc<dyn JobStore>,
    config: QuotaConfig,
}

impl QuotaGuard {
    pub fn new(jobs: Arc<dyn JobStore>, config: QuotaConfig) -> Self {
        Self { jobs, config }
    }

    pub async fn check(&self, job: &Job) -> Result<Option<QuotaViolation>> {
        let total = self
            .jobs
            .count_jobs(job.session_id, None, job.queued_at)
            .await?;
        if total > self.config.max_total_jobs {
            return Ok(Some(QuotaViolation::TotalCap {
                limit: self.config.max_total_jobs,
                count: total,
            }));
        }

        let window = ChronoDuration::from_std(self.config.rate_window)
            .unwrap_or_else(|_| ChronoDuration::seconds(60));
        let recent = self
            .jobs
            .count_jobs(job.session_id, Some(job.queued_at - window), job.queued_at)
            .await?;
        if recent > self.config.max_jobs_per_window {
            return Ok(Some(QuotaViolation::RateCap {
                limit: self.config.max_jobs_per_window,
                window_secs: self.config.rate_window.as_secs(),
                count: recent,
            }));
        }

        Ok(None)
    }
}
