use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{LimitsConfig, ToolchainConfig};
use crate::scheduler::JobStatus;
use crate::worker::process::{run_process, ProcessOutput, ProcessSpec};

/// Prefix for every compile workspace, also used to find stale ones.
pub const WORKSPACE_PREFIX: &str = "livecode-";
/// Marks compiler diagnostics so they are not mistaken for runtime errors.
pub const COMPILE_ERROR_PREFIX: &str = "Compilation error:\n";

const CPP_SOURCE: &str = "solution.cpp";
const CPP_BINARY: &str = "solution";

/// Infrastructure faults while trying to execute a snippet. The executed
/// program failing is not an `ExecError`; it is an [`ExecutionOutcome`].
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("{tool} not found")]
    ToolMissing { tool: String },

    /// The compile step succeeded but its output could not be executed.
    #[error("compiled program {path} could not be started: {source}")]
    CompiledProgramMissing {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("workspace error: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("process I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecError {
    /// Stable text stored in the job's stderr instead of the raw error.
    pub fn user_message(&self) -> String {
        match self {
            ExecError::UnsupportedLanguage(lang) => format!("Unsupported language: {}", lang),
            ExecError::ToolMissing { tool } => match tool.as_str() {
                t if t.contains("++") => format!("C++ compiler ({}) is not installed", t),
                "node" => "Node.js is not installed".to_string(),
                t if t.starts_with("python") => format!("Python interpreter ({}) is not installed", t),
                t => format!("{} is not installed", t),
            },
            ExecError::CompiledProgramMissing { .. } => {
                "Compiled program could not be started".to_string()
            }
            ExecError::Spawn { tool, .. } => format!("Failed to start {}", tool),
            ExecError::Workspace(_) => "Failed to prepare execution workspace".to_string(),
            ExecError::Io(_) => "Execution failed due to an internal error".to_string(),
        }
    }
}

/// Built-in languages. The set is closed; lookups of anything else fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Python,
    JavaScript,
    Cpp,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Cpp => "c++",
        }
    }

    pub fn requires_compile(&self) -> bool {
        matches!(self, Language::Cpp)
    }

    /// Whether the source must be written into the workspace before running.
    fn needs_source_file(&self) -> bool {
        self.requires_compile()
    }

    fn compile_command(&self, toolchain: &ToolchainConfig, workdir: &Path) -> Option<Vec<String>> {
        match self {
            Language::Python | Language::JavaScript => None,
            Language::Cpp => {
                let mut cmd = vec![toolchain.cxx.clone()];
                cmd.extend(toolchain.cxx_flags.iter().cloned());
                cmd.push("-o".to_string());
                cmd.push(workdir.join(CPP_BINARY).to_string_lossy().to_string());
                cmd.push(workdir.join(CPP_SOURCE).to_string_lossy().to_string());
                Some(cmd)
            }
        }
    }

    fn run_command(&self, toolchain: &ToolchainConfig, source: &str, workdir: &Path) -> Vec<String> {
        match self {
            Language::Python => vec![toolchain.python.clone(), "-c".to_string(), source.to_string()],
            Language::JavaScript => vec![toolchain.node.clone(), "-e".to_string(), source.to_string()],
            Language::Cpp => vec![workdir.join(CPP_BINARY).to_string_lossy().to_string()],
        }
    }

    fn run_env(&self) -> Vec<(&'static str, String)> {
        match self {
            // Keep output flushed so a killed run still reports what it printed.
            Language::Python => vec![("PYTHONUNBUFFERED", "1".to_string())],
            Language::JavaScript | Language::Cpp => Vec::new(),
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = ExecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" | "python3" | "py" => Ok(Language::Python),
            "javascript" | "js" | "node" => Ok(Language::JavaScript),
            "c++" | "cpp" | "cxx" => Ok(Language::Cpp),
            _ => Err(ExecError::UnsupportedLanguage(s.to_string())),
        }
    }
}

/// Uniform result of one execution. `status` is always terminal.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub stdout: String,
    pub stderr: String,
    pub status: JobStatus,
    /// Wall-clock duration of the run step only; zero when it never ran
    pub run_time: Duration,
}

impl ExecutionOutcome {
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            status: JobStatus::Failed,
            run_time: Duration::ZERO,
        }
    }
}

/// Anything that can turn (language, source) into an outcome.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn execute(&self, language: &str, source: &str) -> Result<ExecutionOutcome, ExecError>;
}

/// Runs one language's compile (optional) and run steps in a private workspace.
#[derive(Debug, Clone)]
pub struct Executor {
    language: Language,
    toolchain: ToolchainConfig,
    limits: LimitsConfig,
}

impl Executor {
    pub fn new(language: Language, toolchain: ToolchainConfig, limits: LimitsConfig) -> Self {
        Self {
            language,
            toolchain,
            limits,
        }
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub async fn execute(&self, source: &str) -> Result<ExecutionOutcome, ExecError> {
        // Removed on drop, so every return path (and unwinding) cleans up.
        let workspace = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(&self.toolchain.workspace_root)
            .map_err(ExecError::Workspace)?;
        let workdir = workspace.path();

        if self.language.needs_source_file() {
            tokio::fs::write(workdir.join(CPP_SOURCE), source)
                .await
                .map_err(ExecError::Workspace)?;
        }

        if let Some(compiled) = self.compile(workdir).await? {
            if !compiled.success() {
                tracing::debug!(language = %self.language, timed_out = compiled.timed_out, "Compilation failed");
                return Ok(self.compile_failure(compiled));
            }
        }

        let output = self.run(source, workdir).await?;
        Ok(self.classify(output))
    }

    /// Compile step; `None` for run-only languages.
    async fn compile(&self, workdir: &Path) -> Result<Option<ProcessOutput>, ExecError> {
        let Some(command) = self.language.compile_command(&self.toolchain, workdir) else {
            return Ok(None);
        };
        let output = run_process(ProcessSpec {
            tool: &self.toolchain.cxx,
            program: &command[0],
            args: command[1..].to_vec(),
            workdir,
            env: Vec::new(),
            timeout: self.limits.compile_timeout,
            capture_limit: self.capture_limit(),
        })
        .await?;
        Ok(Some(output))
    }

    async fn run(&self, source: &str, workdir: &Path) -> Result<ProcessOutput, ExecError> {
        let command = self.language.run_command(&self.toolchain, source, workdir);
        let tool = match self.language {
            Language::Python => self.toolchain.python.as_str(),
            Language::JavaScript => self.toolchain.node.as_str(),
            Language::Cpp => CPP_BINARY,
        };
        let result = run_process(ProcessSpec {
            tool,
            program: &command[0],
            args: command[1..].to_vec(),
            workdir,
            env: self.language.run_env(),
            timeout: self.limits.run_timeout,
            capture_limit: self.capture_limit(),
        })
        .await;

        if !self.language.requires_compile() {
            return result;
        }
        // For compiled languages the program is our own build output, not a tool.
        result.map_err(|e| match e {
            ExecError::ToolMissing { .. } => ExecError::CompiledProgramMissing {
                path: command[0].clone(),
                source: std::io::ErrorKind::NotFound.into(),
            },
            ExecError::Spawn { source, .. } => ExecError::CompiledProgramMissing {
                path: command[0].clone(),
                source,
            },
            e => e,
        })
    }

    // One byte past the output budget is enough to know truncation is needed.
    fn capture_limit(&self) -> usize {
        self.limits.max_output_bytes.saturating_add(1)
    }

    fn compile_failure(&self, compiled: ProcessOutput) -> ExecutionOutcome {
        let mut diagnostics = compiled.stderr;
        if diagnostics.is_empty() {
            diagnostics = compiled.stdout;
        }
        if compiled.timed_out {
            if !diagnostics.is_empty() && !diagnostics.ends_with('\n') {
                diagnostics.push('\n');
            }
            diagnostics.push_str(&format!(
                "Compilation timed out after {}",
                describe_budget(self.limits.compile_timeout)
            ));
        }
        ExecutionOutcome::failed(format!("{}{}", COMPILE_ERROR_PREFIX, diagnostics))
    }

    fn classify(&self, output: ProcessOutput) -> ExecutionOutcome {
        let status = if output.timed_out {
            JobStatus::Timeout
        } else if output.exit_code == Some(0) {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };

        let mut stderr = output.stderr;
        if output.timed_out {
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str(&format!(
                "Execution timed out after {}",
                describe_budget(self.limits.run_timeout)
            ));
        } else if let (None, Some(signal)) = (output.exit_code, output.signal) {
            if stderr.is_empty() {
                stderr = format!("Process terminated by signal {}", signal);
            }
        }

        ExecutionOutcome {
            stdout: output.stdout,
            stderr,
            status,
            run_time: output.elapsed,
        }
    }
}

/// "30 seconds" for whole seconds, "250 milliseconds" otherwise.
fn describe_budget(budget: Duration) -> String {
    if budget.subsec_millis() == 0 && budget.as_secs() > 0 {
        format!("{} seconds", budget.as_secs())
    } else {
        format!("{} milliseconds", budget.as_millis())
    }
}

/// Resolves a language name to its executor.
#[derive(Debug, Clone)]
pub struct ExecutorRegistry {
    toolchain: ToolchainConfig,
    limits: LimitsConfig,
}

impl ExecutorRegistry {
    pub fn new(toolchain: ToolchainConfig, limits: LimitsConfig) -> Self {
        Self { toolchain, limits }
    }

    pub fn resolve(&self, language: &str) -> Result<Executor, ExecError> {
        let language = language.parse::<Language>()?;
        Ok(Executor::new(
            language,
            self.toolchain.clone(),
            self.limits.clone(),
        ))
    }

    pub fn workspace_root(&self) -> &Path {
        &self.toolchain.workspace_root
    }
}

#[async_trait]
impl ExecutionBackend for ExecutorRegistry {
    async fn execute(&self, language: &str, source: &str) -> Result<ExecutionOutcome, ExecError> {
        self.resolve(language)?.execute(source).await
    }
}

/// Remove compile workspaces left behind by a process that died mid-job.
/// Returns how many were removed.
pub fn sweep_stale_workspaces(root: &Path) -> usize {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(root = %root.display(), error = %e, "Cannot scan workspace root");
            return 0;
        }
    };

    let stale: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(WORKSPACE_PREFIX))
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|entry| entry.path())
        .collect();

    let mut removed = 0;
    for path in stale {
        match std::fs::remove_dir_all(&path) {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove stale workspace"),
        }
    }
    removed
}
