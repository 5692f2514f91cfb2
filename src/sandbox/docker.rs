//! Docker container sandbox
//!
//! Every run gets a throwaway container with a fixed posture no request can
//! relax: non-root user, no capabilities, `no-new-privileges`, PID ceiling,
//! read-only mount of the skill directory. Requests may only tighten it
//! (read-only rootfs) or opt into the network.

use super::process::{self, KillScope};
use super::{
    interpreter_for, ExecuteConfig, ExecuteResult, Sandbox, SandboxConfig, SandboxError,
    SandboxType, DEFAULT_DOCKER_IMAGE,
};
use crate::paths;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Mount point of the skill directory inside the container
const CONTAINER_WORKSPACE: &str = "/workspace";
const CONTAINER_USER: &str = "1000:1000";
const PIDS_LIMIT: &str = "100";
const TMPFS_SPEC: &str = "/tmp:rw,noexec,nosuid,size=64m";
const CONTAINER_NAME_PREFIX: &str = "skill-sandbox-";
/// Bound on `docker version`, `docker image inspect` and `docker kill`
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Container backend driven through the `docker` CLI
#[derive(Debug, Clone)]
pub struct DockerSandbox {
    config: SandboxConfig,
}

impl DockerSandbox {
    pub fn new(mut config: SandboxConfig) -> Self {
        if config.docker_image.trim().is_empty() {
            config.docker_image = DEFAULT_DOCKER_IMAGE.to_string();
        }
        Self { config }
    }

    pub fn image(&self) -> &str {
        &self.config.docker_image
    }

    /// Whether the configured image is present locally
    pub async fn image_exists(&self) -> bool {
        let mut cmd = Command::new("docker");
        cmd.args(["image", "inspect", &self.config.docker_image]);
        probe(cmd).await
    }

    /// Pull the configured image unless it is already present
    pub async fn ensure_image(&self) -> Result<(), SandboxError> {
        if self.image_exists().await {
            debug!("Docker image {} already present", self.config.docker_image);
            return Ok(());
        }

        info!("Pulling docker image {}", self.config.docker_image);
        let output = Command::new("docker")
            .args(["pull", &self.config.docker_image])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(SandboxError::ImagePull {
                image: self.config.docker_image.clone(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    /// Unique name for one run's container
    pub fn container_name() -> String {
        format!("{}{}", CONTAINER_NAME_PREFIX, Uuid::new_v4().simple())
    }

    /// Stop a container whose CLI process was killed on timeout
    async fn kill_container(name: &str) {
        let mut cmd = Command::new("docker");
        cmd.args(["kill", name]);
        if probe(cmd).await {
            debug!("Killed container {}", name);
        } else {
            warn!("Failed to kill container {} (it may have already exited)", name);
        }
    }

    /// Host directory to mount and the script path inside it.
    ///
    /// With a working directory the whole skill directory is mounted and the
    /// script keeps its relative path; otherwise only the script's parent is
    /// mounted.
    fn mount_plan(config: &ExecuteConfig) -> (PathBuf, String) {
        if let Some(work_dir) = &config.work_dir {
            if let Ok(rel) = config.script.strip_prefix(work_dir) {
                if !rel.as_os_str().is_empty() {
                    return (work_dir.clone(), paths::to_slash(rel));
                }
            }
        }

        let parent = config
            .script
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));
        let name = config
            .script
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        (parent, name)
    }

    /// `docker run` argument vector for one request
    pub fn build_docker_args(&self, config: &ExecuteConfig, container_name: &str) -> Vec<String> {
        let mut args: Vec<String> = vec!["run".into(), "--rm".into()];

        args.extend(["--name".to_string(), container_name.to_string()]);

        args.extend(["--user".to_string(), CONTAINER_USER.to_string()]);
        args.extend(["--cap-drop".to_string(), "ALL".to_string()]);

        if config.read_only_rootfs {
            args.push("--read-only".into());
            args.extend(["--tmpfs".to_string(), TMPFS_SPEC.to_string()]);
        }

        let memory = config
            .memory_limit
            .filter(|m| *m > 0)
            .unwrap_or(self.config.max_memory);
        if memory > 0 {
            // Swap pinned to memory disables swap
            args.extend(["--memory".to_string(), memory.to_string()]);
            args.extend(["--memory-swap".to_string(), memory.to_string()]);
        }

        let cpus = config
            .cpu_limit
            .filter(|c| *c > 0.0)
            .unwrap_or(self.config.max_cpu);
        if cpus > 0.0 {
            args.extend(["--cpus".to_string(), format!("{:.2}", cpus)]);
        }

        if !config.allow_network {
            args.extend(["--network".to_string(), "none".to_string()]);
        }

        args.extend(["--pids-limit".to_string(), PIDS_LIMIT.to_string()]);
        args.extend(["--security-opt".to_string(), "no-new-privileges".to_string()]);

        let (mount_dir, script_path) = Self::mount_plan(config);
        args.extend([
            "-v".to_string(),
            format!("{}:{}:ro", mount_dir.display(), CONTAINER_WORKSPACE),
        ]);
        args.extend(["-w".to_string(), CONTAINER_WORKSPACE.to_string()]);

        for (key, value) in &config.env {
            args.extend(["-e".to_string(), format!("{}={}", key, value)]);
        }

        args.push(self.config.docker_image.clone());
        args.push(interpreter_for(&config.script).into());
        args.push(script_path);
        args.extend(config.args.iter().cloned());

        args
    }
}

/// Run a short docker command and report whether it succeeded
async fn probe(mut cmd: Command) -> bool {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    matches!(
        tokio::time::timeout(PROBE_TIMEOUT, cmd.status()).await,
        Ok(Ok(status)) if status.success()
    )
}

#[async_trait]
impl Sandbox for DockerSandbox {
    async fn execute(&self, config: &ExecuteConfig) -> Result<ExecuteResult, SandboxError> {
        if !config.script.is_absolute() {
            return Err(SandboxError::InvalidScript(format!(
                "script path must be absolute: {}",
                config.script.display()
            )));
        }

        let timeout = self.config.resolve_timeout(config.timeout);
        let name = Self::container_name();
        let args = self.build_docker_args(config, &name);
        debug!("docker {}", args.join(" "));

        let mut cmd = Command::new("docker");
        cmd.args(&args);

        let result = process::run(
            cmd,
            config.stdin.as_deref(),
            timeout,
            self.config.max_output_bytes,
            KillScope::Process,
        )
        .await
        .map_err(|source| SandboxError::LaunchFailed {
            interpreter: "docker".to_string(),
            result: Box::new(ExecuteResult::rejected(format!(
                "failed to launch docker: {}",
                source
            ))),
            source,
        })?;

        // Killing the CLI leaves the container running; --rm removes it once stopped
        if result.killed {
            Self::kill_container(&name).await;
        }

        info!(
            "Docker sandbox finished {} (exit {}, {}ms, killed={})",
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
        SandboxType::Docker
    }

    async fn is_available(&self) -> bool {
        let mut cmd = Command::new("docker");
        cmd.arg("version");
        probe(cmd).await
    }
}
