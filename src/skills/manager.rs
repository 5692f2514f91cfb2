//! Skill Manager
//!
//! Single entry point for the agent runtime. Adds the enabled flag and the
//! skill allow-list on top of the [`SkillLoader`], and routes script
//! execution through the [`SandboxManager`].

use super::loader::SkillLoader;
use super::types::*;
use crate::sandbox::{ExecuteConfig, ExecuteResult, SandboxManager};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Skill manager configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillManagerConfig {
    /// Directories searched for skill bundles
    pub skill_dirs: Vec<PathBuf>,
    /// Skill names that may be used (empty = all)
    pub allowed_skills: Vec<String>,
    pub enabled: bool,
}

pub struct SkillManager {
    loader: SkillLoader,
    sandbox: Arc<SandboxManager>,
    allowed: HashSet<String>,
    enabled: bool,
    metadata: RwLock<Vec<SkillMetadata>>,
}

impl std::fmt::Debug for SkillManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkillManager")
            .field("skill_dirs", &self.loader.skill_dirs())
            .field("allowed", &self.allowed)
            .field("enabled", &self.enabled)
            .field("sandbox_type", &self.sandbox.sandbox_type())
            .finish()
    }
}

impl SkillManager {
    pub fn new(config: SkillManagerConfig, sandbox: Arc<SandboxManager>) -> Self {
        Self {
            loader: SkillLoader::new(config.skill_dirs),
            sandbox,
            allowed: config.allowed_skills.into_iter().collect(),
            enabled: config.enabled,
            metadata: RwLock::new(Vec::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn is_allowed(&self, name: &str) -> bool {
        self.allowed.is_empty() || self.allowed.contains(name)
    }

    fn check_access(&self, name: &str) -> Result<(), SkillError> {
        if !self.enabled {
            return Err(SkillError::NotEnabled);
        }
        if !self.is_allowed(name) {
            warn!("Rejected access to skill {} (not in allow-list)", name);
            return Err(SkillError::NotAllowed(name.to_string()));
        }
        Ok(())
    }

    fn filter_allowed(&self, metadata: Vec<SkillMetadata>) -> Vec<SkillMetadata> {
        metadata
            .into_iter()
            .filter(|meta| self.is_allowed(&meta.name))
            .collect()
    }

    /// Discover skills and cache the allowed metadata
    pub async fn initialize(&self) {
        if !self.enabled {
            debug!("Skills disabled, skipping discovery");
            return;
        }

        let mut cache = self.metadata.write().await;
        let metadata = self.filter_allowed(self.loader.discover_skills().await);
        info!("Initialized {} skills", metadata.len());
        *cache = metadata;
    }

    /// Level 1 metadata of every allowed skill (a copy of the cache)
    pub async fn get_all_metadata(&self) -> Vec<SkillMetadata> {
        if !self.enabled {
            return Vec::new();
        }
        self.metadata.read().await.clone()
    }

    /// Level 2: full instructions
    pub async fn load_skill(&self, name: &str) -> Result<Skill, SkillError> {
        self.check_access(name)?;
        self.loader.load_skill_instructions(name).await
    }

    /// Level 3: content of one file inside the skill
    pub async fn read_skill_file(&self, name: &str, path: &str) -> Result<String, SkillError> {
        self.check_access(name)?;
        let file = self.loader.load_skill_file(name, path).await?;
        Ok(file.content)
    }

    pub async fn list_skill_files(&self, name: &str) -> Result<Vec<String>, SkillError> {
        self.check_access(name)?;
        self.loader.list_skill_files(name).await
    }

    /// Run a script shipped with a skill.
    ///
    /// The script path and working directory come only from the loader's
    /// resolution; callers supply just the relative path, arguments and stdin.
    pub async fn execute_script(
        &self,
        name: &str,
        script_path: &str,
        args: &[String],
        stdin: &str,
    ) -> Result<ExecuteResult, SkillError> {
        self.check_access(name)?;

        let base_path = self.loader.skill_base_path(name).await?;
        let file = self.loader.load_skill_file(name, script_path).await?;
        if !file.is_script {
            return Err(SkillError::NotScript(script_path.to_string()));
        }

        info!(
            "Executing {} script {} ({} args)",
            name,
            script_path,
            args.len()
        );

        let config = ExecuteConfig::new(file.path)
            .with_script_content(file.content)
            .with_args(args.iter().cloned())
            .with_stdin(stdin)
            .with_work_dir(base_path);

        Ok(self.sandbox.execute(&config).await?)
    }

    /// Metadata, instructions and file list of one skill
    pub async fn get_skill_info(&self, name: &str) -> Result<SkillInfo, SkillError> {
        self.check_access(name)?;

        let skill = self.loader.load_skill_instructions(name).await?;
        let files = match self.loader.list_skill_files(name).await {
            Ok(files) => files,
            Err(e) => {
                warn!("Failed to list files of skill {}: {}", name, e);
                Vec::new()
            }
        };

        Ok(SkillInfo {
            name: skill.name,
            description: skill.description,
            base_path: skill.base_path,
            instructions: skill.instructions,
            files,
        })
    }

    /// Rediscover skills and refresh the metadata cache
    pub async fn reload(&self) {
        if !self.enabled {
            return;
        }

        let mut cache = self.metadata.write().await;
        *cache = self.filter_allowed(self.loader.reload().await);
    }

    pub async fn cleanup(&self) -> Result<(), SkillError> {
        Ok(self.sandbox.cleanup().await?)
    }

    pub fn sandbox(&self) -> &Arc<SandboxManager> {
        &self.sandbox
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxError;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_skill(root: &Path, name: &str) {
        let dir = root.join(name);
        std::fs::create_dir_all(dir.join("scripts")).unwrap();
        std::fs::write(
            dir.join(SKILL_FILE_NAME),
            format!("---\nname: {}\ndescription: The {} skill\n---\nSteps.\n", name, name),
        )
        .unwrap();
        std::fs::write(dir.join("scripts").join("run.sh"), "echo ok\n").unwrap();
        std::fs::write(dir.join("REFERENCE.md"), "# Reference\n").unwrap();
    }

    fn manager(root: &Path, allowed: &[&str], enabled: bool) -> SkillManager {
        SkillManager::new(
            SkillManagerConfig {
                skill_dirs: vec![root.to_path_buf()],
                allowed_skills: allowed.iter().map(|s| s.to_string()).collect(),
                enabled,
            },
            Arc::new(SandboxManager::disabled()),
        )
    }

    #[tokio::test]
    async fn test_disabled_manager() {
        let temp = TempDir::new().unwrap();
        write_skill(temp.path(), "alpha");

        let manager = manager(temp.path(), &[], false);
        manager.initialize().await;
        assert!(!manager.is_enabled());
        assert!(manager.get_all_metadata().await.is_empty());

        let err = manager.load_skill("alpha").await.unwrap_err();
        assert!(matches!(err, SkillError::NotEnabled));
        assert_eq!(err.to_string(), "skills are not enabled");
    }

    #[tokio::test]
    async fn test_allow_list_filters_and_blocks() {
        let temp = TempDir::new().unwrap();
        write_skill(temp.path(), "alpha");
        write_skill(temp.path(), "beta");

        let manager = manager(temp.path(), &["alpha"], true);
        manager.initialize().await;

        let names: Vec<String> = manager
            .get_all_metadata()
            .await
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["alpha"]);

        // Discovered but not allow-listed: every level is blocked
        let err = manager.load_skill("beta").await.unwrap_err();
        assert_eq!(err.to_string(), "skill not allowed: beta");
        assert!(manager.read_skill_file("beta", "REFERENCE.md").await.is_err());
        assert!(manager.list_skill_files("beta").await.is_err());
        assert!(manager.get_skill_info("beta").await.is_err());
        assert!(matches!(
            manager.execute_script("beta", "scripts/run.sh", &[], "").await,
            Err(SkillError::NotAllowed(_))
        ));

        assert_eq!(
            manager.read_skill_file("alpha", "REFERENCE.md").await.unwrap(),
            "# Reference\n"
        );
    }

    #[tokio::test]
    async fn test_metadata_is_a_copy() {
        let temp = TempDir::new().unwrap();
        write_skill(temp.path(), "alpha");

        let manager = manager(temp.path(), &[], true);
        manager.initialize().await;

        let mut copy = manager.get_all_metadata().await;
        copy[0].name = "mutated".to_string();
        copy.clear();
        assert_eq!(manager.get_all_metadata().await[0].name, "alpha");
    }

    #[tokio::test]
    async fn test_skill_info() {
        let temp = TempDir::new().unwrap();
        write_skill(temp.path(), "alpha");

        let manager = manager(temp.path(), &[], true);
        let info = manager.get_skill_info("alpha").await.unwrap();
        assert_eq!(info.name, "alpha");
        assert_eq!(info.instructions, "Steps.");
        assert_eq!(info.files, vec!["REFERENCE.md", "SKILL.md", "scripts/run.sh"]);
    }

    #[tokio::test]
    async fn test_execute_rejects_non_scripts_and_traversal() {
        let temp = TempDir::new().unwrap();
        write_skill(temp.path(), "alpha");

        let manager = manager(temp.path(), &[], true);
        manager.initialize().await;

        let err = manager
            .execute_script("alpha", "REFERENCE.md", &[], "")
            .await
            .unwrap_err();
        assert!(matches!(err, SkillError::NotScript(_)));

        let err = manager
            .execute_script("alpha", "../alpha/scripts/run.sh", &[], "")
            .await
            .unwrap_err();
        assert!(matches!(err, SkillError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn test_execute_with_disabled_sandbox() {
        let temp = TempDir::new().unwrap();
        write_skill(temp.path(), "alpha");

        let manager = manager(temp.path(), &[], true);
        manager.initialize().await;

        let err = manager
            .execute_script("alpha", "scripts/run.sh", &[], "")
            .await
            .unwrap_err();
        assert!(matches!(err, SkillError::Sandbox(SandboxError::Disabled)));

        // Cleanup still succeeds after a rejected run
        assert!(manager.cleanup().await.is_ok());
    }

    #[tokio::test]
    async fn test_reload_refilters() {
        let temp = TempDir::new().unwrap();
        write_skill(temp.path(), "alpha");

        let manager = manager(temp.path(), &["alpha", "gamma"], true);
        manager.initialize().await;
        assert_eq!(manager.get_all_metadata().await.len(), 1);

        write_skill(temp.path(), "gamma");
        write_skill(temp.path(), "delta");
        manager.reload().await;

        let mut names: Vec<String> = manager
            .get_all_metadata()
            .await
            .into_iter()
            .map(|m| m.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["alpha", "gamma"]);
    }
}
