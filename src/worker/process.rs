use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::worker::executor::ExecError;

const READ_CHUNK: usize = 8192;
/// How long to wait for the pipes to close once the process group is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(2);
const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// One child process invocation.
#[derive(Debug, Clone)]
pub struct ProcessSpec<'a> {
    /// Human-readable tool name used in diagnostics ("python3", "g++")
    pub tool: &'a str,
    pub program: &'a str,
    pub args: Vec<String>,
    pub workdir: &'a Path,
    pub env: Vec<(&'static str, String)>,
    pub timeout: Duration,
    /// Bytes kept per stream; anything beyond is read and discarded
    pub capture_limit: usize,
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal or timed out
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Spawn the process in its own process group, capture both streams, and wait
/// at most `spec.timeout`. Whatever the outcome, the whole group is killed
/// before returning so no descendant outlives the call.
pub async fn run_process(spec: ProcessSpec<'_>) -> Result<ProcessOutput, ExecError> {
    let mut cmd = Command::new(spec.program);
    cmd.args(&spec.args)
        .current_dir(spec.workdir)
        .env_clear()
        .env(
            "PATH",
            std::env::var("PATH").unwrap_or_else(|_| DEFAULT_PATH.to_string()),
        )
        .env("HOME", spec.workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }
    #[cfg(unix)]
    cmd.process_group(0);

    let started = Instant::now();
    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ExecError::ToolMissing {
                tool: spec.tool.to_string(),
            }
        } else {
            ExecError::Spawn {
                tool: spec.tool.to_string(),
                source: e,
            }
        }
    })?;
    let pid = child.id();

    let stdout_buf = Arc::new(Mutex::new(Vec::new()));
    let stderr_buf = Arc::new(Mutex::new(Vec::new()));
    let stdout_task = child
        .stdout
        .take()
        .map(|out| tokio::spawn(drain(out, spec.capture_limit, stdout_buf.clone())));
    let stderr_task = child
        .stderr
        .take()
        .map(|err| tokio::spawn(drain(err, spec.capture_limit, stderr_buf.clone())));

    let (status, timed_out) = match tokio::time::timeout(spec.timeout, child.wait()).await {
        Ok(Ok(status)) => (Some(status), false),
        Ok(Err(e)) => {
            kill_group(pid, &mut child).await;
            return Err(ExecError::Io(e));
        }
        Err(_) => {
            tracing::debug!(pid = ?pid, tool = spec.tool, "Process exceeded its time budget");
            (None, true)
        }
    };
    let elapsed = started.elapsed();

    // Background descendants may still hold the pipes open.
    kill_group(pid, &mut child).await;
    finish_drain(stdout_task).await;
    finish_drain(stderr_task).await;

    let (exit_code, signal) = status.map(exit_details).unwrap_or((None, None));

    Ok(ProcessOutput {
        stdout: take_text(&stdout_buf),
        stderr: take_text(&stderr_buf),
        exit_code,
        signal,
        timed_out,
        elapsed,
    })
}

async fn drain<R>(mut reader: R, limit: usize, buf: Arc<Mutex<Vec<u8>>>)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if let Ok(mut buf) = buf.lock() {
                    let room = limit.saturating_sub(buf.len());
                    buf.extend_from_slice(&chunk[..n.min(room)]);
                }
            }
        }
    }
}

async fn finish_drain(task: Option<JoinHandle<()>>) {
    if let Some(mut task) = task {
        if tokio::time::timeout(DRAIN_GRACE, &mut task).await.is_err() {
            tracing::warn!("Output pipe still open after process group was killed");
            task.abort();
        }
    }
}

fn take_text(buf: &Arc<Mutex<Vec<u8>>>) -> String {
    buf.lock()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

#[cfg(unix)]
fn exit_details(status: ExitStatus) -> (Option<i32>, Option<i32>) {
    use std::os::unix::process::ExitStatusExt;
    (status.code(), status.signal())
}

#[cfg(not(unix))]
fn exit_details(status: ExitStatus) -> (Option<i32>, Option<i32>) {
    (status.code(), None)
}

/// SIGKILL the child's process group, then reap the child itself.
async fn kill_group(pid: Option<u32>, child: &mut Child) {
    if let Some(pid) = pid {
        signal_group(pid);
    }
    if let Err(e) = child.start_kill() {
        // Already reaped is the common case here.
        tracing::trace!(error = %e, "start_kill after group kill");
    }
    let _ = child.wait().await;
}

#[cfg(unix)]
fn signal_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => tracing::warn!(pid, error = %e, "Failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: u32) {}
