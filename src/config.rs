//! Configuration management

use crate::sandbox::{SandboxConfig, SandboxType, DEFAULT_DOCKER_IMAGE, DEFAULT_TIMEOUT};
use crate::skills::SkillManagerConfig;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Enable the skill subsystem
    pub skills_enabled: bool,

    /// Directories searched for skills
    pub skill_dirs: Vec<PathBuf>,

    /// Skill allow-list (empty = all)
    pub allowed_skills: Vec<String>,

    /// Sandbox backend
    pub sandbox_mode: SandboxType,

    /// Default script deadline
    pub sandbox_timeout: Duration,

    /// Image for the docker backend
    pub docker_image: String,

    /// Fall back to the local backend when docker is unavailable
    pub sandbox_fallback: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let skills_enabled = lookup("SKILLS_ENABLED")
            .map(|v| parse_bool(&v))
            .unwrap_or(true);

        let skill_dirs = match lookup("SKILLS_DIRS").filter(|v| !v.trim().is_empty()) {
            Some(value) => parse_dirs(&value)?,
            None => vec![default_skill_dir()],
        };

        let allowed_skills = lookup("SKILLS_ALLOWED")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let sandbox_mode = lookup("SANDBOX_MODE")
            .unwrap_or_default()
            .parse::<SandboxType>()
            .context("Invalid SANDBOX_MODE")?;

        let sandbox_timeout = lookup("SANDBOX_TIMEOUT")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);

        let docker_image = lookup("SANDBOX_DOCKER_IMAGE")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DOCKER_IMAGE.to_string());

        let sandbox_fallback = lookup("SANDBOX_FALLBACK")
            .map(|v| parse_bool(&v))
            .unwrap_or(true);

        Ok(Self {
            skills_enabled,
            skill_dirs,
            allowed_skills,
            sandbox_mode,
            sandbox_timeout,
            docker_image,
            sandbox_fallback,
        })
    }

    /// Library sandbox configuration
    pub fn sandbox_config(&self) -> SandboxConfig {
        let base = match self.sandbox_mode {
            SandboxType::Disabled => SandboxConfig::disabled(),
            SandboxType::Local => SandboxConfig::local(),
            SandboxType::Docker => SandboxConfig::docker(&self.docker_image),
        };
        base.with_timeout(self.sandbox_timeout)
            .with_fallback(self.sandbox_fallback)
    }

    /// Library skill manager configuration
    pub fn manager_config(&self) -> SkillManagerConfig {
        SkillManagerConfig {
            skill_dirs: self.skill_dirs.clone(),
            allowed_skills: self.allowed_skills.clone(),
            enabled: self.skills_enabled,
        }
    }
}

fn parse_bool(value: &str) -> bool {
    let value = value.trim();
    value.eq_ignore_ascii_case("true") || value == "1"
}

/// Split a `:` or `,` separated list and expand `~` and `$VAR` in each entry
fn parse_dirs(value: &str) -> Result<Vec<PathBuf>> {
    value
        .split([':', ','])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            shellexpand::full(entry)
                .map(|expanded| PathBuf::from(expanded.into_owned()))
                .with_context(|| format!("Invalid SKILLS_DIRS entry: {}", entry))
        })
        .collect()
}

fn default_skill_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("skill-sandbox")
        .join("skills")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert!(config.skills_enabled);
        assert_eq!(config.sandbox_mode, SandboxType::Disabled);
        assert_eq!(config.sandbox_timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.docker_image, DEFAULT_DOCKER_IMAGE);
        assert!(config.sandbox_fallback);
        assert!(config.allowed_skills.is_empty());
        assert_eq!(config.skill_dirs.len(), 1);
        assert!(config.skill_dirs[0].ends_with("skill-sandbox/skills"));
    }

    #[test]
    fn test_values() {
        let config = load(&[
            ("SKILLS_ENABLED", "false"),
            ("SKILLS_DIRS", "/opt/skills:/srv/skills, /tmp/more"),
            ("SKILLS_ALLOWED", "pdf-processing, ,xlsx"),
            ("SANDBOX_MODE", "Docker"),
            ("SANDBOX_TIMEOUT", "15"),
            ("SANDBOX_DOCKER_IMAGE", "sandbox:v2"),
            ("SANDBOX_FALLBACK", "0"),
        ])
        .unwrap();

        assert!(!config.skills_enabled);
        assert_eq!(
            config.skill_dirs,
            vec![
                PathBuf::from("/opt/skills"),
                PathBuf::from("/srv/skills"),
                PathBuf::from("/tmp/more")
            ]
        );
        assert_eq!(config.allowed_skills, vec!["pdf-processing", "xlsx"]);
        assert_eq!(config.sandbox_mode, SandboxType::Docker);
        assert_eq!(config.sandbox_timeout, Duration::from_secs(15));

        let sandbox = config.sandbox_config();
        assert_eq!(sandbox.sandbox_type, SandboxType::Docker);
        assert_eq!(sandbox.docker_image, "sandbox:v2");
        assert_eq!(sandbox.default_timeout, Duration::from_secs(15));
        assert!(!sandbox.fallback_enabled);

        let manager = config.manager_config();
        assert!(!manager.enabled);
        assert_eq!(manager.allowed_skills.len(), 2);
    }

    #[test]
    fn test_bad_timeout_falls_back() {
        for value in ["0", "soon", "-5"] {
            let config = load(&[("SANDBOX_TIMEOUT", value)]).unwrap();
            assert_eq!(config.sandbox_timeout, DEFAULT_TIMEOUT, "{}", value);
        }
    }

    #[test]
    fn test_unknown_mode_is_error() {
        assert!(load(&[("SANDBOX_MODE", "firecracker")]).is_err());
    }
}
