//! Sandbox manager: backend selection and the validation gate
//!
//! Backend choice happens once, at construction:
//!
//! ```text
//! disabled ──────────────────────────────> Disabled
//! local    ──────────────────────────────> Local
//! docker   ── docker version ok ─────────> Docker (+ detached image pre-pull)
//!          ── unavailable, fallback on ──> Local
//!          ── unavailable, fallback off ─> error
//! ```
//!
//! Every request then passes the [`ScriptValidator`] before it can reach the
//! backend.

use super::{
    DisabledSandbox, DockerSandbox, ExecuteConfig, ExecuteResult, LocalSandbox, Sandbox,
    SandboxConfig, SandboxError, SandboxType, ScriptValidator,
};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct SandboxManager {
    config: SandboxConfig,
    sandbox: RwLock<Arc<dyn Sandbox>>,
    validator: ScriptValidator,
}

impl std::fmt::Debug for SandboxManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxManager")
            .field("config", &self.config)
            .field("sandbox_type", &self.sandbox_type())
            .finish()
    }
}

impl SandboxManager {
    /// Build a manager, probing Docker when it is the requested backend
    pub async fn new(config: SandboxConfig) -> Result<Self, SandboxError> {
        config.validate()?;
        let sandbox = Self::select_backend(&config).await?;
        info!("Sandbox manager using {} backend", sandbox.sandbox_type());

        Ok(Self {
            config,
            sandbox: RwLock::new(sandbox),
            validator: ScriptValidator::new(),
        })
    }

    /// Build from a mode string (`docker`, `local`, `disabled` or empty)
    pub async fn from_type(
        mode: &str,
        fallback_enabled: bool,
        docker_image: &str,
    ) -> Result<Self, SandboxError> {
        let config = match mode.parse::<SandboxType>()? {
            SandboxType::Disabled => SandboxConfig::disabled(),
            SandboxType::Local => SandboxConfig::local(),
            SandboxType::Docker => SandboxConfig::docker(docker_image),
        }
        .with_fallback(fallback_enabled);
        Self::new(config).await
    }

    /// Manager that rejects every execution
    pub fn disabled() -> Self {
        Self {
            config: SandboxConfig::disabled(),
            sandbox: RwLock::new(Arc::new(DisabledSandbox)),
            validator: ScriptValidator::new(),
        }
    }

    async fn select_backend(config: &SandboxConfig) -> Result<Arc<dyn Sandbox>, SandboxError> {
        match config.sandbox_type {
            SandboxType::Disabled => Ok(Arc::new(DisabledSandbox)),
            SandboxType::Local => Ok(Arc::new(LocalSandbox::new(config.clone()))),
            SandboxType::Docker => {
                let docker = DockerSandbox::new(config.clone());
                if docker.is_available().await {
                    Self::spawn_image_prepull(docker.clone());
                    return Ok(Arc::new(docker));
                }

                if config.fallback_enabled {
                    warn!("Docker is not available, falling back to local sandbox");
                    return Ok(Arc::new(LocalSandbox::new(config.clone())));
                }

                Err(SandboxError::Unavailable(
                    "docker is not available and fallback is disabled".to_string(),
                ))
            }
        }
    }

    /// Pull the image in the background; never awaited by a request
    fn spawn_image_prepull(docker: DockerSandbox) {
        tokio::spawn(async move {
            match docker.ensure_image().await {
                Ok(()) => info!("Sandbox image {} is ready", docker.image()),
                Err(e) => error!("Failed to pre-pull sandbox image {}: {}", docker.image(), e),
            }
        });
    }

    /// Validate and run one request
    pub async fn execute(&self, config: &ExecuteConfig) -> Result<ExecuteResult, SandboxError> {
        let sandbox = self.sandbox();

        // Nothing can run, so there is nothing to validate
        if sandbox.sandbox_type() == SandboxType::Disabled {
            return Err(SandboxError::Disabled);
        }

        if !config.skip_validation {
            self.validate_request(config).await?;
        }

        sandbox.execute(config).await
    }

    async fn validate_request(&self, config: &ExecuteConfig) -> Result<(), SandboxError> {
        let content = match &config.script_content {
            Some(content) => content.clone(),
            None if config.script.as_os_str().is_empty() => String::new(),
            None => {
                let bytes = tokio::fs::read(&config.script).await.map_err(|source| {
                    SandboxError::ValidationRead {
                        path: config.script.clone(),
                        source,
                    }
                })?;
                String::from_utf8_lossy(&bytes).into_owned()
            }
        };

        let verdict = self.validator.validate_all(
            &content,
            config.args.as_slice(),
            config.stdin.as_deref().unwrap_or_default(),
        );
        if verdict.valid {
            return Ok(());
        }

        for finding in &verdict.errors {
            warn!("Security validation failed for {}: {}", config.script.display(), finding);
        }

        let summary = verdict
            .errors
            .first()
            .map(|f| f.to_string())
            .unwrap_or_else(|| "security violation".to_string());
        let mut result = ExecuteResult::rejected(format!("Security validation failed: {}", summary));
        result.error = Some(summary);

        Err(SandboxError::SecurityViolation {
            findings: verdict.errors,
            result: Box::new(result),
        })
    }

    /// Release backend resources
    pub async fn cleanup(&self) -> Result<(), SandboxError> {
        self.sandbox().cleanup().await
    }

    /// The active backend
    pub fn sandbox(&self) -> Arc<dyn Sandbox> {
        Arc::clone(&self.sandbox.read())
    }

    pub fn sandbox_type(&self) -> SandboxType {
        self.sandbox.read().sandbox_type()
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::ViolationKind;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_disabled_rejects_without_validation() {
        let manager = SandboxManager::disabled();
        // Missing script would fail validation if it were attempted
        let err = manager
            .execute(&ExecuteConfig::new("/nonexistent/run.sh"))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Disabled));
        assert_eq!(manager.sandbox_type(), SandboxType::Disabled);
    }

    #[tokio::test]
    async fn test_from_type() {
        let manager = SandboxManager::from_type("", true, "").await.unwrap();
        assert_eq!(manager.sandbox_type(), SandboxType::Disabled);

        let manager = SandboxManager::from_type("local", false, "").await.unwrap();
        assert_eq!(manager.sandbox_type(), SandboxType::Local);

        assert!(SandboxManager::from_type("vm", true, "").await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = SandboxConfig::local();
        config.max_cpu = f64::NAN;
        assert!(matches!(
            SandboxManager::new(config).await,
            Err(SandboxError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_security_violation_blocks_backend() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("wipe.sh");
        // Would leave a marker if the backend ran it
        std::fs::write(&script, "touch ran.txt\nrm -rf /\n").unwrap();

        let manager = SandboxManager::new(SandboxConfig::local()).await.unwrap();
        let err = manager.execute(&ExecuteConfig::new(&script)).await.unwrap_err();

        assert!(err.is_security_violation());
        let SandboxError::SecurityViolation { findings, result } = &err else {
            panic!("expected security violation, got {:?}", err);
        };
        assert!(findings.iter().any(|f| f.kind == ViolationKind::DangerousCommand));
        assert_eq!(result.exit_code, -1);
        assert!(result.stderr.starts_with("Security validation failed"));
        assert!(err.partial_result().is_some());
        assert!(!dir.path().join("ran.txt").exists());
    }

    #[tokio::test]
    async fn test_argument_injection_blocked() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("ok.sh");
        std::fs::write(&script, "echo \"$1\"\n").unwrap();

        let manager = SandboxManager::new(SandboxConfig::local()).await.unwrap();
        let config = ExecuteConfig::new(&script).with_args(["x; cat /etc/passwd"]);
        let err = manager.execute(&config).await.unwrap_err();
        let SandboxError::SecurityViolation { findings, .. } = err else {
            panic!("expected security violation");
        };
        assert!(findings.iter().any(|f| f.kind == ViolationKind::ShellInjection));
    }

    #[tokio::test]
    async fn test_unreadable_script_fails_closed() {
        let manager = SandboxManager::new(SandboxConfig::local()).await.unwrap();
        let err = manager
            .execute(&ExecuteConfig::new("/nonexistent/dir/run.sh"))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::ValidationRead { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_skip_validation_reaches_backend() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("echo.sh");
        std::fs::write(&script, "echo \"$1\"\n").unwrap();

        let manager = SandboxManager::new(SandboxConfig::local()).await.unwrap();
        let mut config = ExecuteConfig::new(&script).with_args(["a;b"]);
        assert!(manager.execute(&config).await.is_err());

        config.skip_validation = true;
        let result = manager.execute(&config).await.unwrap();
        assert_eq!(result.stdout.trim(), "a;b");
    }

    #[tokio::test]
    async fn test_docker_without_fallback() {
        // Only meaningful where docker is absent
        if DockerSandbox::new(SandboxConfig::docker("img")).is_available().await {
            return;
        }
        let err = SandboxManager::new(SandboxConfig::docker("img").with_fallback(false))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Unavailable(_)));

        let manager = SandboxManager::new(SandboxConfig::docker("img")).await.unwrap();
        assert_eq!(manager.sandbox_type(), SandboxType::Local);
    }
}
