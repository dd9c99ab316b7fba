//! Executors against the real toolchain. Each test skips when its tool is absent.

mod common;

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use common::{test_config, tool_available};
use livecode::config::{EngineConfig, LimitsConfig, ToolchainConfig};
use livecode::node::Node;
use livecode::scheduler::{Job, JobStatus};
use livecode::store::SessionStore;
use livecode::worker::executor::{ExecError, COMPILE_ERROR_PREFIX};
use livecode::worker::output::truncation_marker;
use livecode::worker::process::{run_process, ProcessSpec};
use livecode::worker::{ExecutionBackend, ExecutorRegistry};

macro_rules! require_tool {
    ($tool:expr) => {
        if !tool_available($tool) {
            eprintln!("skipping: {} not available", $tool);
            return;
        }
    };
}

fn registry(workspace: &std::path::Path, run_timeout: Duration) -> ExecutorRegistry {
    let toolchain = ToolchainConfig {
        workspace_root: workspace.to_path_buf(),
        ..Default::default()
    };
    let limits = LimitsConfig {
        run_timeout,
        compile_timeout: Duration::from_secs(30),
        ..Default::default()
    };
    ExecutorRegistry::new(toolchain, limits)
}

#[tokio::test]
async fn test_python_hello() {
    require_tool!("python3");
    let workspace = tempfile::tempdir().unwrap();
    let outcome = registry(workspace.path(), Duration::from_secs(10))
        .execute("python", "print(\"hi\")")
        .await
        .unwrap();

    assert_eq!(outcome.status, JobStatus::Completed);
    assert_eq!(outcome.stdout, "hi\n");
    assert_eq!(outcome.stderr, "");
    assert!(outcome.run_time > Duration::ZERO);
}

#[tokio::test]
async fn test_python_runtime_error_is_failed() {
    require_tool!("python3");
    let workspace = tempfile::tempdir().unwrap();
    let outcome = registry(workspace.path(), Duration::from_secs(10))
        .execute("python", "raise ValueError('boom')")
        .await
        .unwrap();

    assert_eq!(outcome.status, JobStatus::Failed);
    assert!(outcome.stderr.contains("ValueError: boom"));
}

#[tokio::test]
async fn test_python_timeout_keeps_partial_output() {
    require_tool!("python3");
    let workspace = tempfile::tempdir().unwrap();
    let outcome = registry(workspace.path(), Duration::from_secs(1))
        .execute("python", "print('started')\nwhile True:\n    pass")
        .await
        .unwrap();

    assert_eq!(outcome.status, JobStatus::Timeout);
    assert_eq!(outcome.stdout, "started\n");
    assert!(outcome.stderr.ends_with("Execution timed out after 1 seconds"));
    assert!(outcome.run_time >= Duration::from_secs(1));
    assert!(outcome.run_time < Duration::from_secs(5));
}

#[tokio::test]
async fn test_javascript_hello() {
    require_tool!("node");
    let workspace = tempfile::tempdir().unwrap();
    let outcome = registry(workspace.path(), Duration::from_secs(10))
        .execute("javascript", "console.log('hi')")
        .await
        .unwrap();

    assert_eq!(outcome.status, JobStatus::Completed);
    assert_eq!(outcome.stdout, "hi\n");
}

#[tokio::test]
async fn test_cpp_compile_and_run() {
    require_tool!("g++");
    let workspace = tempfile::tempdir().unwrap();
    let source = "#include <iostream>\nint main() { std::cout << 6 * 7 << std::endl; return 0; }\n";
    let outcome = registry(workspace.path(), Duration::from_secs(10))
        .execute("c++", source)
        .await
        .unwrap();

    assert_eq!(outcome.status, JobStatus::Completed);
    assert_eq!(outcome.stdout, "42\n");
    // The workspace is removed once the job finishes.
    assert_eq!(std::fs::read_dir(workspace.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_cpp_compile_error_never_runs() {
    require_tool!("g++");
    let workspace = tempfile::tempdir().unwrap();
    let outcome = registry(workspace.path(), Duration::from_secs(10))
        .execute("c++", "int main() { return undefined_name; }")
        .await
        .unwrap();

    assert_eq!(outcome.status, JobStatus::Failed);
    assert!(outcome.stderr.starts_with(COMPILE_ERROR_PREFIX));
    assert!(outcome.stderr.contains("undefined_name"));
    assert_eq!(outcome.stdout, "");
    assert_eq!(outcome.run_time, Duration::ZERO);
}

#[tokio::test]
async fn test_cpp_nonzero_exit_is_failed() {
    require_tool!("g++");
    let workspace = tempfile::tempdir().unwrap();
    let outcome = registry(workspace.path(), Duration::from_secs(10))
        .execute("cpp", "int main() { return 3; }")
        .await
        .unwrap();

    assert_eq!(outcome.status, JobStatus::Failed);
}

#[tokio::test]
async fn test_unknown_language_is_rejected_before_spawn() {
    let workspace = tempfile::tempdir().unwrap();
    let err = registry(workspace.path(), Duration::from_secs(1))
        .execute("cobol", "DISPLAY 'HI'.")
        .await
        .unwrap_err();
    assert!(matches!(err, ExecError::UnsupportedLanguage(ref l) if l == "cobol"));
}

/// Submit `source` through a running node and wait for the job to settle.
async fn run_on_node(config: EngineConfig, language: &str, source: &str) -> Job {
    let node = Node::new(config);
    let shutdown = CancellationToken::new();
    let pool = node.start_workers(shutdown.clone());

    let session = node
        .sessions
        .create_session(Some(language.into()), Some(source.into()))
        .await
        .unwrap();
    let receipt = node.dispatcher.dispatch(session.id).await.unwrap();
    let job = node.wait_for_job(receipt.job_id, Duration::from_secs(30)).await.unwrap();

    shutdown.cancel();
    pool.join().await;
    job
}

#[tokio::test]
async fn test_node_runs_python_end_to_end() {
    require_tool!("python3");
    let workspace = tempfile::tempdir().unwrap();
    let job = run_on_node(test_config(workspace.path()), "python", "print(\"hi\")").await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.stdout.as_deref(), Some("hi\n"));
    assert_eq!(job.stderr.as_deref(), Some(""));
    assert!(job.started_at.is_some());
    assert!(job.finished_at >= job.started_at);
}

#[tokio::test]
async fn test_node_truncates_large_output() {
    require_tool!("python3");
    let workspace = tempfile::tempdir().unwrap();
    let config = test_config(workspace.path());
    let limit = config.limits.max_output_bytes;
    let source = "import sys\nsys.stdout.write('x' * 204800)\n";
    let job = run_on_node(config, "python", source).await;

    assert_eq!(job.status, JobStatus::Completed);
    let stdout = job.stdout.unwrap();
    let marker = truncation_marker(limit);
    assert!(stdout.starts_with(&"x".repeat(limit)));
    assert!(stdout.ends_with(&marker));
    assert_eq!(stdout.len(), limit + marker.len());
}

#[tokio::test]
async fn test_node_reports_compile_timeout() {
    require_tool!("g++");
    let workspace = tempfile::tempdir().unwrap();
    let mut config = test_config(workspace.path());
    config.limits.compile_timeout = Duration::from_millis(50);
    let source = r#"
#include <iostream>
#include <map>
#include <regex>
#include <string>
#include <vector>

template <int N> struct Fib { static const long value = Fib<N - 1>::value + Fib<N - 2>::value; };
template <> struct Fib<1> { static const long value = 1; };
template <> struct Fib<0> { static const long value = 0; };

int main() {
    std::regex pattern("([a-z]+)\\s+([0-9]+)");
    std::map<std::string, std::vector<long>> seen;
    seen["fib"].push_back(Fib<80>::value);
    std::cout << std::regex_match("abc 12", pattern) << seen.size() << std::endl;
    return 0;
}
"#;
    let job = run_on_node(config, "c++", source).await;

    assert_eq!(job.status, JobStatus::Failed);
    let stderr = job.stderr.unwrap();
    assert!(stderr.starts_with(COMPILE_ERROR_PREFIX), "{stderr}");
    assert!(stderr.contains("Compilation timed out after 50 milliseconds"), "{stderr}");
    assert_eq!(job.stdout.as_deref(), Some(""));
    assert_eq!(job.execution_time_ms, Some(0));
}

#[cfg(target_os = "linux")]
fn process_alive(pid: i32) -> bool {
    // A reaped process has no entry; a zombie is as good as dead.
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit(')')
            .next()
            .map(|rest| !rest.trim_start().starts_with('Z'))
            .unwrap_or(false),
        Err(_) => false,
    }
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_timeout_kills_background_descendants() {
    require_tool!("sh");
    let workdir = tempfile::tempdir().unwrap();
    let out = run_process(ProcessSpec {
        tool: "sh",
        program: "sh",
        args: vec!["-c".into(), "sleep 60 & echo $!; wait".into()],
        workdir: workdir.path(),
        env: Vec::new(),
        timeout: Duration::from_millis(500),
        capture_limit: 1024,
    })
    .await
    .unwrap();

    assert!(out.timed_out);
    let pid: i32 = out.stdout.trim().parse().unwrap();
    common::assert_eventually(
        || async move { !process_alive(pid) },
        Duration::from_secs(3),
        "background sleep should be killed with its process group",
    )
    .await;
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_clean_exit_kills_leftover_descendants() {
    require_tool!("sh");
    let workdir = tempfile::tempdir().unwrap();
    let out = run_process(ProcessSpec {
        tool: "sh",
        program: "sh",
        args: vec!["-c".into(), "sleep 60 >/dev/null 2>&1 & echo $!".into()],
        workdir: workdir.path(),
        env: Vec::new(),
        timeout: Duration::from_secs(5),
        capture_limit: 1024,
    })
    .await
    .unwrap();

    assert!(out.success());
    let pid: i32 = out.stdout.trim().parse().unwrap();
    common::assert_eventually(
        || async move { !process_alive(pid) },
        Duration::from_secs(3),
        "descendant should not outlive the job",
    )
    .await;
}
