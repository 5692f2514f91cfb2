//! Local process sandbox
//!
//! Fallback when Docker is not available. Isolation is limited to:
//! - Interpreter allowlist
//! - Optional script path allowlist
//! - Minimal, explicit environment
//! - Deadline with process-group kill

use super::process::{self, KillScope};
use super::{
    interpreter_for, ExecuteConfig, ExecuteResult, Sandbox, SandboxConfig, SandboxError,
    SandboxType,
};
use crate::paths;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Environment every script starts from
const BASE_ENV: &[(&str, &str)] = &[
    ("PATH", "/usr/local/bin:/usr/bin:/bin"),
    ("HOME", "/tmp"),
    ("LANG", "en_US.UTF-8"),
    ("LC_ALL", "en_US.UTF-8"),
];

/// Variables a caller may never set
const DENIED_ENV_VARS: &[&str] = &[
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "PYTHONPATH",
    "NODE_OPTIONS",
    "BASH_ENV",
    "ENV",
    "SHELL",
];

/// Restricted subprocess backend
#[derive(Debug, Clone)]
pub struct LocalSandbox {
    config: SandboxConfig,
}

impl LocalSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Check that the script is an absolute path to an existing file inside
    /// the allowed paths.
    async fn validate_script(&self, script: &Path) -> Result<(), SandboxError> {
        if !script.is_absolute() {
            return Err(SandboxError::InvalidScript(format!(
                "script path must be absolute: {}",
                script.display()
            )));
        }

        let meta = match tokio::fs::metadata(script).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SandboxError::ScriptNotFound(script.to_path_buf()));
            }
            Err(e) => return Err(SandboxError::Io(e)),
        };
        if meta.is_dir() {
            return Err(SandboxError::InvalidScript(format!(
                "script path is a directory: {}",
                script.display()
            )));
        }

        if !self.config.allowed_paths.is_empty() {
            // Compare resolved paths so symlinked roots match either way
            let real_script = tokio::fs::canonicalize(script).await?;
            let mut allowed = false;
            for prefix in &self.config.allowed_paths {
                let prefix = match tokio::fs::canonicalize(prefix).await {
                    Ok(real) => real,
                    Err(_) => match paths::absolute(prefix) {
                        Ok(abs) => abs,
                        Err(_) => continue,
                    },
                };
                if real_script.starts_with(&prefix) {
                    allowed = true;
                    break;
                }
            }
            if !allowed {
                return Err(SandboxError::PathNotAllowed(script.to_path_buf()));
            }
        }

        Ok(())
    }

    fn is_allowed_command(&self, interpreter: &str) -> bool {
        self.config.allowed_command_set().contains(interpreter)
    }

    /// Build the script environment, dropping denied variables
    fn build_environment(extra: &BTreeMap<String, String>) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> = BASE_ENV
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        for (key, value) in extra {
            let upper = key.to_ascii_uppercase();
            if DENIED_ENV_VARS.contains(&upper.as_str()) {
                warn!("Dropping denied environment variable {}", key);
                continue;
            }
            env.push((key.clone(), value.clone()));
        }

        env
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    async fn execute(&self, config: &ExecuteConfig) -> Result<ExecuteResult, SandboxError> {
        self.validate_script(&config.script).await?;

        let interpreter = interpreter_for(&config.script);
        if !self.is_allowed_command(interpreter) {
            return Err(SandboxError::InterpreterNotAllowed(interpreter.to_string()));
        }

        let timeout = self.config.resolve_timeout(config.timeout);
        let work_dir = match &config.work_dir {
            Some(dir) => dir.clone(),
            None => config
                .script
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| "/".into()),
        };

        let mut cmd = Command::new(interpreter);
        cmd.arg(&config.script)
            .args(&config.args)
            .current_dir(&work_dir)
            .env_clear()
            .envs(Self::build_environment(&config.env));

        // New process group so the whole tree can be killed on timeout
        #[cfg(unix)]
        cmd.process_group(0);

        debug!(
            "Local sandbox: {} {} ({} args, timeout {:?})",
            interpreter,
            config.script.display(),
            config.args.len(),
            timeout
        );

        let result = process::run(
            cmd,
            config.stdin.as_deref(),
            timeout,
            self.config.max_output_bytes,
            KillScope::ProcessGroup,
        )
        .await
        .map_err(|source| SandboxError::LaunchFailed {
            interpreter: interpreter.to_string(),
            result: Box::new(ExecuteResult::rejected(format!(
                "failed to launch {}: {}",
                interpreter, source
            ))),
            source,
        })?;

        info!(
            "Local sandbox finished {} (exit {}, {}ms, killed={})",
            config.script.display(),
            result.exit_code,
            result.duration_ms,
            result.killed
        );

        Ok(result)
    }

    async fn cleanup(&self) -> Result<(), SandboxError> {
        Ok(())
    }

    fn sandbox_type(&self) -> SandboxType {
        SandboxType::Local
    }

    async fn is_available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn write_script(dir: &TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_build_environment_drops_denied() {
        let mut extra = BTreeMap::new();
        extra.insert("LD_PRELOAD".to_string(), "/evil.so".to_string());
        extra.insert("node_options".to_string(), "--inspect".to_string());
        extra.insert("REPORT_MODE".to_string(), "brief".to_string());

        let env = LocalSandbox::build_environment(&extra);
        assert!(env.iter().any(|(k, v)| k == "REPORT_MODE" && v == "brief"));
        assert!(!env.iter().any(|(k, _)| k == "LD_PRELOAD"));
        assert!(!env.iter().any(|(k, _)| k.eq_ignore_ascii_case("NODE_OPTIONS")));
        assert!(env.iter().any(|(k, v)| k == "HOME" && v == "/tmp"));
    }

    #[tokio::test]
    async fn test_rejects_relative_path() {
        let sandbox = LocalSandbox::new(SandboxConfig::local());
        let err = sandbox
            .execute(&ExecuteConfig::new("scripts/run.sh"))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::InvalidScript(_)));
    }

    #[tokio::test]
    async fn test_rejects_missing_and_directory() {
        let dir = TempDir::new().unwrap();
        let sandbox = LocalSandbox::new(SandboxConfig::local());

        let err = sandbox
            .execute(&ExecuteConfig::new(dir.path().join("missing.sh")))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::ScriptNotFound(_)));

        let err = sandbox
            .execute(&ExecuteConfig::new(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::InvalidScript(_)));
    }

    #[tokio::test]
    async fn test_allowed_paths() {
        let dir = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let script = write_script(&dir, "run.sh", "echo hi\n");

        let sandbox = LocalSandbox::new(
            SandboxConfig::local().with_allowed_paths(vec![other.path().to_path_buf()]),
        );
        let err = sandbox.execute(&ExecuteConfig::new(&script)).await.unwrap_err();
        assert!(matches!(err, SandboxError::PathNotAllowed(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_allowed_paths_through_symlink() {
        let dir = TempDir::new().unwrap();
        let links = TempDir::new().unwrap();
        let link = links.path().join("skills");
        std::os::unix::fs::symlink(dir.path(), &link).unwrap();
        let script = write_script(&dir, "run.sh", "echo hi\n");

        // Allowed root given through the link, script given by its real path
        let sandbox =
            LocalSandbox::new(SandboxConfig::local().with_allowed_paths(vec![link.clone()]));
        let real_script = std::fs::canonicalize(&script).unwrap();
        let result = sandbox.execute(&ExecuteConfig::new(&real_script)).await.unwrap();
        assert!(result.is_success(), "{:?}", result);

        // And the other way round
        let sandbox = LocalSandbox::new(
            SandboxConfig::local().with_allowed_paths(vec![dir.path().to_path_buf()]),
        );
        let result = sandbox
            .execute(&ExecuteConfig::new(link.join("run.sh")))
            .await
            .unwrap();
        assert!(result.is_success(), "{:?}", result);
    }

    #[tokio::test]
    async fn test_interpreter_allowlist() {
        let dir = TempDir::new().unwrap();
        let script = write_script(&dir, "run.rb", "puts 1\n");

        let mut config = SandboxConfig::local();
        config.allowed_commands = vec!["python3".to_string()];
        let sandbox = LocalSandbox::new(config);
        let err = sandbox.execute(&ExecuteConfig::new(&script)).await.unwrap_err();
        assert!(matches!(err, SandboxError::InterpreterNotAllowed(ref i) if i == "ruby"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_executes_shell_script() {
        let dir = TempDir::new().unwrap();
        let script = write_script(
            &dir,
            "greet.sh",
            "echo \"hello $1\"\necho \"home=$HOME\"\nread line\necho \"got $line\"\n",
        );

        let sandbox = LocalSandbox::new(SandboxConfig::local());
        let config = ExecuteConfig::new(&script)
            .with_args(["world"])
            .with_stdin("input\n");
        let result = sandbox.execute(&config).await.unwrap();

        assert!(result.is_success(), "{:?}", result);
        assert!(result.stdout.contains("hello world"));
        assert!(result.stdout.contains("home=/tmp"));
        assert!(result.stdout.contains("got input"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_reported_in_result() {
        let dir = TempDir::new().unwrap();
        let script = write_script(&dir, "fail.sh", "echo oops >&2\nexit 7\n");

        let sandbox = LocalSandbox::new(SandboxConfig::local());
        let result = sandbox.execute(&ExecuteConfig::new(&script)).await.unwrap();
        assert_eq!(result.exit_code, 7);
        assert!(!result.killed);
        assert_eq!(result.stderr.trim(), "oops");
        assert!(!result.is_success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_process_group() {
        let dir = TempDir::new().unwrap();
        // The background sleep inherits stdout; if only the leader died the
        // pipe would stay open for 30s.
        let script = write_script(&dir, "hang.sh", "sleep 30 &\nsleep 30\n");

        let sandbox = LocalSandbox::new(SandboxConfig::local());
        let start = Instant::now();
        let result = sandbox
            .execute(&ExecuteConfig::new(&script).with_timeout(Duration::from_secs(1)))
            .await
            .unwrap();

        assert!(result.killed);
        assert_eq!(result.exit_code, -1);
        assert!(result.error.as_deref().unwrap_or_default().contains("timed out"));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
