//! Sandboxed Script Execution
//!
//! Runs skill-provided scripts inside one of three interchangeable backends:
//!
//! - **Disabled**: rejects every request
//! - **Local**: restricted subprocess in its own process group
//! - **Docker**: restricted, throwaway container
//!
//! # Security Model
//!
//! 1. **Static validation**: script body, arguments and stdin are scanned by
//!    the [`ScriptValidator`] before any backend sees the request
//! 2. **Interpreter allowlist**: only known interpreters can be launched
//! 3. **Environment sanitization**: minimal explicit environment, dangerous
//!    variables dropped
//! 4. **Timeout**: hard deadline, the whole process group is killed on expiry
//! 5. **Container posture** (Docker): non-root, no capabilities, no network,
//!    PID/memory/CPU ceilings, read-only mount of the skill directory

pub mod disabled;
pub mod docker;
pub mod local;
pub mod manager;
mod process;
pub mod validator;

pub use disabled::DisabledSandbox;
pub use docker::DockerSandbox;
pub use local::LocalSandbox;
pub use manager::SandboxManager;
pub use validator::{ScriptValidator, ValidationError, ValidationResult, ViolationKind};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default execution deadline
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
/// Default container memory ceiling (256 MiB)
pub const DEFAULT_MEMORY_LIMIT: u64 = 256 * 1024 * 1024;
/// Default container CPU ceiling (cores)
pub const DEFAULT_CPU_LIMIT: f64 = 1.0;
/// Default captured output per stream (1 MiB)
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;
pub const DEFAULT_DOCKER_IMAGE: &str = "wechatopenai/weknora-sandbox:latest";

/// Backend kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxType {
    Disabled,
    Local,
    Docker,
}

impl SandboxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Local => "local",
            Self::Docker => "docker",
        }
    }
}

impl fmt::Display for SandboxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SandboxType {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docker" => Ok(Self::Docker),
            "local" => Ok(Self::Local),
            "disabled" | "" => Ok(Self::Disabled),
            other => Err(SandboxError::InvalidConfig(format!(
                "unknown sandbox type: {}",
                other
            ))),
        }
    }
}

/// Sandbox manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Preferred backend
    pub sandbox_type: SandboxType,
    /// Fall back to the local backend when Docker is unavailable at startup
    pub fallback_enabled: bool,
    /// Deadline used when a request does not carry its own
    pub default_timeout: Duration,
    /// Image for the Docker backend
    pub docker_image: String,
    /// Interpreters the local backend may launch (empty = defaults)
    pub allowed_commands: Vec<String>,
    /// Path prefixes scripts must live under (empty = unrestricted)
    pub allowed_paths: Vec<PathBuf>,
    /// Container memory ceiling in bytes
    pub max_memory: u64,
    /// Container CPU ceiling in cores
    pub max_cpu: f64,
    /// Captured bytes per output stream
    pub max_output_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            sandbox_type: SandboxType::Local,
            fallback_enabled: true,
            default_timeout: DEFAULT_TIMEOUT,
            docker_image: DEFAULT_DOCKER_IMAGE.to_string(),
            allowed_commands: default_allowed_commands(),
            allowed_paths: Vec::new(),
            max_memory: DEFAULT_MEMORY_LIMIT,
            max_cpu: DEFAULT_CPU_LIMIT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

impl SandboxConfig {
    /// Local process sandbox
    pub fn local() -> Self {
        Self::default()
    }

    /// Docker sandbox with fallback to local
    pub fn docker(image: &str) -> Self {
        let docker_image = if image.is_empty() {
            DEFAULT_DOCKER_IMAGE.to_string()
        } else {
            image.to_string()
        };
        Self {
            sandbox_type: SandboxType::Docker,
            docker_image,
            ..Default::default()
        }
    }

    /// Script execution disabled
    pub fn disabled() -> Self {
        Self {
            sandbox_type: SandboxType::Disabled,
            fallback_enabled: false,
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.fallback_enabled = enabled;
        self
    }

    pub fn with_allowed_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.allowed_paths = paths;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), SandboxError> {
        if !self.max_cpu.is_finite() || self.max_cpu < 0.0 {
            return Err(SandboxError::InvalidConfig(
                "CPU limit cannot be negative".to_string(),
            ));
        }
        if self.sandbox_type == SandboxType::Docker && self.docker_image.trim().is_empty() {
            return Err(SandboxError::InvalidConfig(
                "docker image is required for the docker sandbox".to_string(),
            ));
        }
        if self.max_output_bytes == 0 {
            return Err(SandboxError::InvalidConfig(
                "output limit must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Timeout for one request: request value, then configured default,
    /// then [`DEFAULT_TIMEOUT`].
    pub fn resolve_timeout(&self, requested: Option<Duration>) -> Duration {
        requested
            .filter(|t| !t.is_zero())
            .or_else(|| Some(self.default_timeout).filter(|t| !t.is_zero()))
            .unwrap_or(DEFAULT_TIMEOUT)
    }

    pub(crate) fn allowed_command_set(&self) -> HashSet<&str> {
        if self.allowed_commands.is_empty() {
            DEFAULT_INTERPRETERS.iter().copied().collect()
        } else {
            self.allowed_commands.iter().map(String::as_str).collect()
        }
    }
}

const DEFAULT_INTERPRETERS: &[&str] = &["python3", "bash", "sh", "node", "ruby", "perl", "php"];

/// Interpreters the local backend may launch by default
fn default_allowed_commands() -> Vec<String> {
    DEFAULT_INTERPRETERS.iter().map(|s| s.to_string()).collect()
}

/// Interpreter for a script, chosen by extension
pub fn interpreter_for(script: &Path) -> &'static str {
    let ext = script
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "py" => "python3",
        "sh" | "bash" => "bash",
        "js" => "node",
        "rb" => "ruby",
        "pl" => "perl",
        "php" => "php",
        _ => "sh",
    }
}

/// One execution request
///
/// Built fresh for every call; never shared between executions.
#[derive(Debug, Clone, Default)]
pub struct ExecuteConfig {
    /// Absolute path to the script file
    pub script: PathBuf,
    /// Script body for validation (read from `script` when absent)
    pub script_content: Option<String>,
    /// Arguments passed after the script path
    pub args: Vec<String>,
    /// Extra environment variables
    pub env: BTreeMap<String, String>,
    /// Standard input fed to the script
    pub stdin: Option<String>,
    /// Working directory (defaults to the script's directory)
    pub work_dir: Option<PathBuf>,
    /// Deadline (None = configured default)
    pub timeout: Option<Duration>,
    /// Container memory ceiling in bytes (Docker only)
    pub memory_limit: Option<u64>,
    /// Container CPU ceiling in cores (Docker only)
    pub cpu_limit: Option<f64>,
    /// Allow network access (Docker only)
    pub allow_network: bool,
    /// Read-only root filesystem (Docker only)
    pub read_only_rootfs: bool,
    /// Skip the security validator. Only for trusted scripts.
    pub skip_validation: bool,
}

impl ExecuteConfig {
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
            ..Default::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        let stdin = stdin.into();
        self.stdin = if stdin.is_empty() { None } else { Some(stdin) };
        self
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_script_content(mut self, content: impl Into<String>) -> Self {
        self.script_content = Some(content.into());
        self
    }
}

/// Result of one execution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecuteResult {
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
    /// Exit code, -1 when the process never exited normally
    pub exit_code: i32,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
    /// Killed by the sandbox (timeout)
    pub killed: bool,
    /// Whether captured output hit the size cap
    pub truncated: bool,
    /// Execution error, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecuteResult {
    /// Result for a request that never reached a process
    pub fn rejected(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            stderr: message.clone(),
            exit_code: -1,
            error: Some(message),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0 && !self.killed && self.error.is_none()
    }

    /// Stdout, or stderr when stdout is empty
    pub fn output(&self) -> &str {
        if self.stdout.is_empty() {
            &self.stderr
        } else {
            &self.stdout
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// Sandbox errors
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("sandbox is disabled")]
    Disabled,

    #[error("sandbox unavailable: {0}")]
    Unavailable(String),

    #[error("invalid sandbox config: {0}")]
    InvalidConfig(String),

    #[error("invalid script: {0}")]
    InvalidScript(String),

    #[error("script not found: {0}")]
    ScriptNotFound(PathBuf),

    #[error("script path not in allowed paths: {0}")]
    PathNotAllowed(PathBuf),

    #[error("interpreter not allowed: {0}")]
    InterpreterNotAllowed(String),

    #[error("failed to read script for validation: {path}: {source}")]
    ValidationRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("security validation failed: {}", first_finding(.findings))]
    SecurityViolation {
        findings: Vec<ValidationError>,
        result: Box<ExecuteResult>,
    },

    #[error("failed to launch {interpreter}: {source}")]
    LaunchFailed {
        interpreter: String,
        #[source]
        source: std::io::Error,
        result: Box<ExecuteResult>,
    },

    #[error("failed to pull image {image}: {stderr}")]
    ImagePull { image: String, stderr: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn first_finding(findings: &[ValidationError]) -> String {
    findings
        .first()
        .map(|f| f.to_string())
        .unwrap_or_else(|| "no findings".to_string())
}

impl SandboxError {
    /// Best-effort result carried alongside the error, if any
    pub fn partial_result(&self) -> Option<&ExecuteResult> {
        match self {
            Self::SecurityViolation { result, .. } | Self::LaunchFailed { result, .. } => {
                Some(result)
            }
            _ => None,
        }
    }

    pub fn is_security_violation(&self) -> bool {
        matches!(self, Self::SecurityViolation { .. })
    }
}

/// Execution backend contract
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Run a script
    async fn execute(&self, config: &ExecuteConfig) -> Result<ExecuteResult, SandboxError>;

    /// Release backend resources
    async fn cleanup(&self) -> Result<(), SandboxError>;

    /// Backend kind
    fn sandbox_type(&self) -> SandboxType;

    /// Whether the backend can run scripts right now
    async fn is_available(&self) -> bool;
}
