use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Resource limits applied to every execution.
#[derive(Debug, Clone)]
pub struct LimitsConfig {
    /// Wall-clock budget for the run step
    pub run_timeout: Duration,
    /// Wall-clock budget for the compile step (compiled languages only)
    pub compile_timeout: Duration,
    /// Maximum bytes kept from each of stdout and stderr
    pub max_output_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            run_timeout: Duration::from_secs(30),
            compile_timeout: Duration::from_secs(10),
            max_output_bytes: 100 * 1024,
        }
    }
}

/// Per-session execution caps enforced before a job may run.
#[derive(Debug, Clone)]
pub struct QuotaConfig {
    /// Maximum number of jobs a session may ever create
    pub max_total_jobs: u64,
    /// Maximum number of jobs queued within `rate_window`
    pub max_jobs_per_window: u64,
    pub rate_window: Duration,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            max_total_jobs: 100,
            max_jobs_per_window: 10,
            rate_window: Duration::from_secs(60),
        }
    }
}

/// Redelivery policy for run messages whose processing hit a transient fault.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Redeliveries after the first attempt
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2,
        }
    }
}

impl RetryConfig {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before the given redelivery (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.saturating_pow(attempt);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Binaries used by the built-in executors.
#[derive(Debug, Clone)]
pub struct ToolchainConfig {
    pub python: String,
    pub node: String,
    pub cxx: String,
    /// Extra flags passed to the C++ compiler before the source path
    pub cxx_flags: Vec<String>,
    /// Directory under which per-job compile workspaces are created
    pub workspace_root: PathBuf,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            node: "node".to_string(),
            cxx: "g++".to_string(),
            cxx_flags: vec!["-std=c++17".to_string(), "-O2".to_string(), "-pipe".to_string()],
            workspace_root: std::env::temp_dir(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub listen_addr: SocketAddr,
    /// Number of concurrent workers, each running at most one job
    pub worker_count: usize,
    /// Capacity of the in-process task transport
    pub transport_capacity: usize,
    pub limits: LimitsConfig,
    pub quota: QuotaConfig,
    pub retry: RetryConfig,
    pub toolchain: ToolchainConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            worker_count: 4,
            transport_capacity: 1024,
            limits: LimitsConfig::default(),
            quota: QuotaConfig::default(),
            retry: RetryConfig::default(),
            toolchain: ToolchainConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count.max(1);
        self
    }

    pub fn with_limits(mut self, limits: LimitsConfig) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_quota(mut self, quota: QuotaConfig) -> Self {
        self.quota = quota;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_toolchain(mut self, toolchain: ToolchainConfig) -> Self {
        self.toolchain = toolchain;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_config_default() {
        let cfg = LimitsConfig::default();
        assert_eq!(cfg.run_timeout, Duration::from_secs(30));
        assert_eq!(cfg.compile_timeout, Duration::from_secs(10));
        assert_eq!(cfg.max_output_bytes, 102_400);
    }

    #[test]
    fn quota_config_default() {
        let cfg = QuotaConfig::default();
        assert_eq!(cfg.max_total_jobs, 100);
        assert_eq!(cfg.max_jobs_per_window, 10);
        assert_eq!(cfg.rate_window, Duration::from_secs(60));
    }

    #[test]
    fn retry_delay_doubles_and_caps() {
        let cfg = RetryConfig::default();
        assert_eq!(cfg.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(cfg.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(cfg.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(cfg.delay_for_attempt(30), Duration::from_secs(5));
    }

    #[test]
    fn no_retry_keeps_backoff_shape() {
        let cfg = RetryConfig::no_retry();
        assert_eq!(cfg.max_retries, 0);
        assert_eq!(cfg.initial_delay, Duration::from_millis(100));
    }

    #[test]
    fn toolchain_config_default() {
        let cfg = ToolchainConfig::default();
        assert_eq!(cfg.python, "python3");
        assert_eq!(cfg.node, "node");
        assert_eq!(cfg.cxx, "g++");
        assert!(cfg.cxx_flags.iter().any(|f| f == "-std=c++17"));
    }

    #[test]
    fn engine_config_default() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(cfg.worker_count, 4);
        assert_eq!(cfg.transport_capacity, 1024);
        assert_eq!(cfg.retry.max_retries, 3);
    }

    #[test]
    fn engine_config_builders() {
        let addr: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        let cfg = EngineConfig::new(addr)
            .with_workers(0)
            .with_quota(QuotaConfig {
                max_total_jobs: 5,
                ..Default::default()
            });
        assert_eq!(cfg.listen_addr, addr);
        assert_eq!(cfg.worker_count, 1);
        assert_eq!(cfg.quota.max_total_jobs, 5);
        assert_eq!(cfg.quota.max_jobs_per_window, 10);
    }
}
