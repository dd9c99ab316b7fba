use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use livecode::config::{EngineConfig, LimitsConfig, QuotaConfig, ToolchainConfig};
use livecode::node::Node;
use livecode::scheduler::{Job, JobStatus};
use livecode::shutdown::install_shutdown_handler;
use livecode::store::SessionStore;

#[derive(Parser, Debug)]
#[command(name = "livecode")]
#[command(version)]
#[command(about = "Run untrusted code snippets asynchronously with bounded resources")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the HTTP API and worker pool
    Server(ServerArgs),

    /// Execute one source file through the engine and print the finished job
    Exec(ExecArgs),
}

// =============================================================================
// Arguments
// =============================================================================

/// Engine settings shared by both subcommands
#[derive(Parser, Debug)]
struct EngineArgs {
    /// Number of concurrent workers
    #[arg(long, default_value = "4")]
    workers: usize,

    /// Run-step timeout in seconds
    #[arg(long, default_value = "30")]
    run_timeout: u64,

    /// Compile-step timeout in seconds
    #[arg(long, default_value = "10")]
    compile_timeout: u64,

    /// Maximum bytes kept from each output stream
    #[arg(long, default_value = "102400")]
    max_output_bytes: usize,

    /// Maximum executions per session
    #[arg(long, default_value = "100")]
    max_total_jobs: u64,

    /// Maximum executions per session per rate window
    #[arg(long, default_value = "10")]
    max_jobs_per_window: u64,

    /// Rate window in seconds
    #[arg(long, default_value = "60")]
    rate_window: u64,

    /// Python interpreter
    #[arg(long, default_value = "python3")]
    python: String,

    /// JavaScript runtime
    #[arg(long, default_value = "node")]
    node: String,

    /// C++ compiler
    #[arg(long, default_value = "g++")]
    cxx: String,

    /// Directory for per-job compile workspaces (defaults to the system temp dir)
    #[arg(long)]
    workspace_root: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Port for the HTTP API
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Parser, Debug)]
struct ExecArgs {
    /// Language of the source file (python, javascript, c++)
    #[arg(long, short = 'l')]
    language: String,

    /// Path to the source file
    file: PathBuf,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,

    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Serialize)]
struct JobOutput {
    execution_id: String,
    status: JobStatus,
    stdout: String,
    stderr: String,
    execution_time_ms: Option<u64>,
}

impl From<&Job> for JobOutput {
    fn from(job: &Job) -> Self {
        Self {
            execution_id: job.id.to_string(),
            status: job.status,
            stdout: job.stdout.clone().unwrap_or_default(),
            stderr: job.stderr.clone().unwrap_or_default(),
            execution_time_ms: job.execution_time_ms,
        }
    }
}

fn engine_config(args: EngineArgs, listen_addr: SocketAddr) -> EngineConfig {
    let defaults = ToolchainConfig::default();
    EngineConfig::new(listen_addr)
        .with_workers(args.workers)
        .with_limits(LimitsConfig {
            run_timeout: Duration::from_secs(args.run_timeout),
            compile_timeout: Duration::from_secs(args.compile_timeout),
            max_output_bytes: args.max_output_bytes,
        })
        .with_quota(QuotaConfig {
            max_total_jobs: args.max_total_jobs,
            max_jobs_per_window: args.max_jobs_per_window,
            rate_window: Duration::from_secs(args.rate_window),
        })
        .with_toolchain(ToolchainConfig {
            python: args.python,
            node: args.node,
            cxx: args.cxx,
            workspace_root: args.workspace_root.unwrap_or(defaults.workspace_root),
            cxx_flags: defaults.cxx_flags,
        })
}

// =============================================================================
// Command Handlers
// =============================================================================

/// Accepts bare IPv4 and IPv6 literals; `--host ::` binds all IPv6 interfaces.
fn listen_addr(host: &str, port: u16) -> Result<SocketAddr, AddrParseError> {
    let ip: IpAddr = host.parse()?;
    Ok(SocketAddr::new(ip, port))
}

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let listen_addr = listen_addr(&args.host, args.port)?;
    let config = engine_config(args.engine, listen_addr);

    tracing::info!(
        listen_addr = %config.listen_addr,
        workers = config.worker_count,
        run_timeout_s = config.limits.run_timeout.as_secs(),
        workspace_root = %config.toolchain.workspace_root.display(),
        "Starting livecode node"
    );

    let shutdown = install_shutdown_handler();
    Node::new(config).run(shutdown).await;
    Ok(())
}

async fn run_exec(args: ExecArgs) -> Result<bool, Box<dyn std::error::Error>> {
    let source = tokio::fs::read_to_string(&args.file).await?;
    let config = engine_config(args.engine, EngineConfig::default().listen_addr).with_workers(1);
    let wait = config.limits.compile_timeout + config.limits.run_timeout + Duration::from_secs(10);

    let node = Node::new(config);
    let shutdown = CancellationToken::new();
    let pool = node.start_workers(shutdown.clone());

    let session = node
        .sessions
        .create_session(Some(args.language), Some(source))
        .await?;
    let receipt = node.dispatcher.dispatch(session.id).await?;
    let job = node.wait_for_job(receipt.job_id, wait).await?;

    shutdown.cancel();
    pool.join().await;

    let output = JobOutput::from(&job);
    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Table => {
            println!("Execution ID: {}", output.execution_id);
            println!("Status:       {}", output.status);
            if let Some(ms) = output.execution_time_ms {
                println!("Time:         {} ms", ms);
            }
            if !output.stdout.is_empty() {
                println!("--- stdout ---\n{}", output.stdout);
            }
            if !output.stderr.is_empty() {
                println!("--- stderr ---\n{}", output.stderr);
            }
        }
    }
    Ok(job.status == JobStatus::Completed)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => run_server(server_args).await,
        Commands::Exec(exec_args) => {
            if !run_exec(exec_args).await? {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}
