use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::{run_api, ApiState};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::scheduler::{ChannelTransport, Dispatcher, Job, TransportReceiver};
use crate::store::{JobStore, MemoryJobStore, MemorySessionStore};
use crate::worker::executor::sweep_stale_workspaces;
use crate::worker::{ExecutionBackend, ExecutorRegistry, LifecycleManager, WorkerPool};

/// Owns every engine component and wires them together explicitly.
pub struct Node {
    pub config: EngineConfig,
    pub sessions: Arc<MemorySessionStore>,
    pub jobs: Arc<MemoryJobStore>,
    pub transport: ChannelTransport,
    pub dispatcher: Dispatcher,
    pub lifecycle: LifecycleManager,
    receiver: TransportReceiver,
}

impl Node {
    /// Build a node that executes snippets with the built-in executors.
    pub fn new(config: EngineConfig) -> Self {
        let registry = ExecutorRegistry::new(config.toolchain.clone(), config.limits.clone());
        Self::with_backend(config, Arc::new(registry))
    }

    pub fn with_backend(config: EngineConfig, backend: Arc<dyn ExecutionBackend>) -> Self {
        let sessions = Arc::new(MemorySessionStore::new());
        let jobs = Arc::new(MemoryJobStore::new());
        let (transport, receiver) = ChannelTransport::new(config.transport_capacity);

        let dispatcher = Dispatcher::new(
            sessions.clone(),
            jobs.clone(),
            Arc::new(transport.clone()),
        );
        let lifecycle = LifecycleManager::new(
            jobs.clone(),
            backend,
            config.quota.clone(),
            config.limits.clone(),
            config.retry.clone(),
        );

        Self {
            config,
            sessions,
            jobs,
            transport,
            dispatcher,
            lifecycle,
            receiver,
        }
    }

    pub fn start_workers(&self, shutdown: CancellationToken) -> WorkerPool {
        WorkerPool::spawn(
            self.config.worker_count,
            self.lifecycle.clone(),
            self.receiver.clone(),
            self.config.retry.clone(),
            shutdown,
        )
    }

    pub fn api_state(&self) -> ApiState {
        ApiState {
            sessions: self.sessions.clone(),
            jobs: self.jobs.clone(),
            dispatcher: self.dispatcher.clone(),
            transport: self.transport.clone(),
            workers: self.config.worker_count,
        }
    }

    /// Poll a job until it reaches a terminal state or `timeout` elapses.
    pub async fn wait_for_job(&self, job_id: Uuid, timeout: Duration) -> Result<Job> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let job = self.jobs.get_job(job_id).await?;
            if job.status.is_terminal() || tokio::time::Instant::now() >= deadline {
                return Ok(job);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Run the node until `shutdown` is cancelled:
    /// 1. Removes compile workspaces left by a previous crash
    /// 2. Spawns the worker pool
    /// 3. Serves the HTTP API (blocking)
    /// 4. Waits for workers to finish their current jobs
    pub async fn run(self, shutdown: CancellationToken) {
        let removed = sweep_stale_workspaces(&self.config.toolchain.workspace_root);
        if removed > 0 {
            tracing::info!(removed, "Removed stale execution workspaces");
        }

        let pool = self.start_workers(shutdown.clone());
        run_api(self.config.listen_addr, self.api_state(), shutdown.clone()).await;

        // The API may also stop on a bind failure; bring the workers down with it.
        shutdown.cancel();
        pool.join().await;
        tracing::info!("Node stopped");
    }
}
