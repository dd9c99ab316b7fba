//! Worker side of the execution engine.
//!
//! - **Process control** ([`process`]): spawns one untrusted program in its own
//!   process group, captures bounded output, kills the whole group on timeout
//! - **Executors** ([`executor`]): the closed set of languages and their
//!   compile/run steps, resolved through [`ExecutorRegistry`]
//! - **Output policy** ([`output`]): byte-budget truncation with a marker
//! - **Lifecycle** ([`lifecycle`]): the job state machine
//! - **Workers** ([`Worker`], [`WorkerPool`]): consume run messages, one job
//!   at a time each, redelivering on transient store faults
//!
//! # Execution Flow
//!
//! 1. A worker receives a [`RunMessage`] from the transport
//! 2. [`LifecycleManager::process`] checks quota and marks the job RUNNING
//! 3. The registry resolves the language and the executor runs the snippet
//! 4. Output is truncated and the terminal row is persisted

pub mod executor;
pub mod lifecycle;
pub mod output;
pub mod process;
pub mod retry;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::error::Result;
use crate::scheduler::{RunMessage, TransportReceiver};

pub use executor::{ExecutionBackend, ExecutionOutcome, Executor, ExecutorRegistry, Language};
pub use lifecycle::{LifecycleManager, LifecycleOutcome};

/// Consumer of the task transport. Processes at most one job at a time.
#[derive(Clone)]
pub struct Worker {
    id: usize,
    lifecycle: LifecycleManager,
    receiver: TransportReceiver,
    retry: RetryConfig,
}

impl Worker {
    pub fn new(
        id: usize,
        lifecycle: LifecycleManager,
        receiver: TransportReceiver,
        retry: RetryConfig,
    ) -> Self {
        Self {
            id,
            lifecycle,
            receiver,
            retry,
        }
    }

    /// Process one message, redelivering it on transient faults. Those can only
    /// arise before the job starts, so exhausting the retries leaves it QUEUED.
    pub async fn handle(&self, message: RunMessage) -> Result<LifecycleOutcome> {
        let result = retry::with_retry(&self.retry, "process run message", || {
            self.lifecycle.process(&message)
        })
        .await;

        if let Err(e) = &result {
            tracing::error!(
                worker_id = self.id,
                job_id = %message.job_id,
                error = %e,
                "Giving up on run message"
            );
        }
        result
    }

    /// Receive and process messages until the transport closes or shutdown is
    /// requested. A job in progress is always finished first.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::debug!(worker_id = self.id, "Worker started");
        loop {
            let message = tokio::select! {
                _ = shutdown.cancelled() => break,
                message = self.receiver.recv() => message,
            };
            match message {
                Some(message) => {
                    let _ = self.handle(message).await;
                }
                None => break,
            }
        }
        tracing::debug!(worker_id = self.id, "Worker stopped");
    }
}

/// A fixed number of workers sharing one transport receiver.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        count: usize,
        lifecycle: LifecycleManager,
        receiver: TransportReceiver,
        retry: RetryConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let handles = (0..count.max(1))
            .map(|id| {
                let worker = Worker::new(id, lifecycle.clone(), receiver.clone(), retry.clone());
                tokio::spawn(worker.run(shutdown.clone()))
            })
            .collect();
        tracing::info!(workers = count.max(1), "Worker pool started");
        Self { handles }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every worker to stop.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }
    }
}
