//! Disabled sandbox: rejects every request without inspecting it.

use super::{ExecuteConfig, ExecuteResult, Sandbox, SandboxError, SandboxType};
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledSandbox;

#[async_trait]
impl Sandbox for DisabledSandbox {
    async fn execute(&self, _config: &ExecuteConfig) -> Result<ExecuteResult, SandboxError> {
        Err(SandboxError::Disabled)
    }

    async fn cleanup(&self) -> Result<(), SandboxError> {
        Ok(())
    }

    fn sandbox_type(&self) -> SandboxType {
        SandboxType::Disabled
    }

    async fn is_available(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_rejects_everything() {
        let sandbox = DisabledSandbox;
        let err = sandbox
            .execute(&ExecuteConfig::new("/bin/true"))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Disabled));
        assert!(!sandbox.is_available().await);
        assert_eq!(sandbox.sandbox_type(), SandboxType::Disabled);
    }
}
