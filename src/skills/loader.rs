//! Skill Loader
//!
//! Discovers skill bundles under the configured directories and resolves
//! skill names and relative paths back to files, never leaving the skill's
//! own directory.

use super::types::*;
use crate::paths;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Filesystem skill loader with an in-memory cache keyed by skill name
#[derive(Debug)]
pub struct SkillLoader {
    skill_dirs: Vec<PathBuf>,
    skills: RwLock<HashMap<String, Skill>>,
}

impl SkillLoader {
    /// Create a loader over the given search directories
    pub fn new(skill_dirs: Vec<PathBuf>) -> Self {
        Self {
            skill_dirs,
            skills: RwLock::new(HashMap::new()),
        }
    }

    pub fn skill_dirs(&self) -> &[PathBuf] {
        &self.skill_dirs
    }

    /// Scan every directory and cache each valid skill (Level 1).
    ///
    /// Bad skills and unreadable directories are logged and skipped.
    pub async fn discover_skills(&self) -> Vec<SkillMetadata> {
        let found = self.scan_all().await;
        let mut cache = self.skills.write().await;
        Self::store(&mut cache, found)
    }

    /// Clear the cache and discover again
    pub async fn reload(&self) -> Vec<SkillMetadata> {
        let mut cache = self.skills.write().await;
        cache.clear();
        let found = self.scan_all().await;
        let metadata = Self::store(&mut cache, found);
        info!("Reloaded {} skills", metadata.len());
        metadata
    }

    /// Cache every skill and return one metadata entry per name, last wins
    fn store(cache: &mut HashMap<String, Skill>, found: Vec<Skill>) -> Vec<SkillMetadata> {
        let mut metadata: Vec<SkillMetadata> = Vec::with_capacity(found.len());
        let mut positions: HashMap<String, usize> = HashMap::new();
        for skill in found {
            if let Some(previous) = cache.get(&skill.name) {
                if previous.base_path != skill.base_path {
                    debug!(
                        "Skill {} at {} replaces {}",
                        skill.name,
                        skill.base_path.display(),
                        previous.base_path.display()
                    );
                }
            }
            match positions.get(&skill.name) {
                Some(&i) => metadata[i] = skill.to_metadata(),
                None => {
                    positions.insert(skill.name.clone(), metadata.len());
                    metadata.push(skill.to_metadata());
                }
            }
            cache.insert(skill.name.clone(), skill);
        }
        metadata
    }

    async fn scan_all(&self) -> Vec<Skill> {
        let mut found = Vec::new();
        for dir in &self.skill_dirs {
            match scan_directory(dir).await {
                Ok(skills) => found.extend(skills),
                Err(e) => warn!("Skipping skill directory {}: {}", dir.display(), e),
            }
        }
        found
    }

    /// Return a skill with its instructions loaded (Level 2)
    pub async fn load_skill_instructions(&self, name: &str) -> Result<Skill, SkillError> {
        if let Some(skill) = self.skills.read().await.get(name) {
            if skill.loaded {
                return Ok(skill.clone());
            }
        }

        for dir in &self.skill_dirs {
            match find_in_directory(dir, name).await {
                Ok(Some(skill)) => {
                    self.skills
                        .write()
                        .await
                        .insert(name.to_string(), skill.clone());
                    return Ok(skill);
                }
                Ok(None) => {}
                Err(e) => debug!("Skill {} not loadable from {}: {}", name, dir.display(), e),
            }
        }

        Err(SkillError::NotFound(name.to_string()))
    }

    /// Cached skill, loading it on a miss
    async fn resolve(&self, name: &str) -> Result<Skill, SkillError> {
        if let Some(skill) = self.get_skill(name).await {
            return Ok(skill);
        }
        self.load_skill_instructions(name).await
    }

    /// Read a file inside a skill directory (Level 3).
    ///
    /// `relative_path` must stay inside the skill directory lexically and
    /// after symlinks are resolved.
    pub async fn load_skill_file(
        &self,
        name: &str,
        relative_path: &str,
    ) -> Result<SkillFile, SkillError> {
        let skill = self.resolve(name).await?;

        let rel = Path::new(relative_path);
        if relative_path.trim().is_empty() || paths::has_root(rel) || paths::has_parent_component(rel)
        {
            return Err(SkillError::InvalidPath(relative_path.to_string()));
        }

        let base = paths::absolute(&skill.base_path)?;
        let full = paths::normalize(&base.join(rel));
        if full == base || !full.starts_with(&base) {
            return Err(SkillError::OutsideSkillDir(relative_path.to_string()));
        }

        let real = match tokio::fs::canonicalize(&full).await {
            Ok(real) => real,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SkillError::FileNotFound {
                    skill: name.to_string(),
                    path: relative_path.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        let real_base = tokio::fs::canonicalize(&base).await?;
        if !real.starts_with(&real_base) {
            warn!(
                "Skill {} file {} resolves outside the skill directory",
                name, relative_path
            );
            return Err(SkillError::OutsideSkillDir(relative_path.to_string()));
        }

        if tokio::fs::metadata(&real).await?.is_dir() {
            return Err(SkillError::InvalidPath(format!(
                "{} is a directory",
                relative_path
            )));
        }

        let bytes = tokio::fs::read(&real).await?;
        Ok(SkillFile {
            name: relative_path.to_string(),
            path: real,
            content: String::from_utf8_lossy(&bytes).into_owned(),
            is_script: is_script(relative_path),
        })
    }

    /// Relative paths of every regular file in a skill directory, sorted
    pub async fn list_skill_files(&self, name: &str) -> Result<Vec<String>, SkillError> {
        let skill = self.resolve(name).await?;
        let base = &skill.base_path;

        let mut files = Vec::new();
        let mut pending = vec![base.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    if let Ok(rel) = path.strip_prefix(base) {
                        files.push(paths::to_slash(rel));
                    }
                }
            }
        }

        files.sort();
        Ok(files)
    }

    /// Canonical skill directory, the same form as [`SkillFile::path`]
    pub async fn skill_base_path(&self, name: &str) -> Result<PathBuf, SkillError> {
        let skill = self.resolve(name).await?;
        let base = paths::absolute(&skill.base_path)?;
        Ok(tokio::fs::canonicalize(&base).await?)
    }

    /// Cached skill by name
    pub async fn get_skill(&self, name: &str) -> Option<Skill> {
        self.skills.read().await.get(name).cloned()
    }
}

/// Immediate subdirectories of `dir`, sorted by name
async fn subdirectories(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Parse `<skill_dir>/SKILL.md`; `None` when the manifest is absent
async fn read_skill(skill_dir: &Path) -> Result<Option<Skill>, SkillError> {
    let manifest = skill_dir.join(SKILL_FILE_NAME);
    let content = match tokio::fs::read_to_string(&manifest).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let skill = parse_skill_file(&content).map_err(|source| SkillError::Parse {
        path: manifest.clone(),
        source,
    })?;

    let base = paths::absolute(skill_dir).unwrap_or_else(|_| skill_dir.to_path_buf());
    let file = base.join(SKILL_FILE_NAME);
    Ok(Some(skill.with_paths(base, file)))
}

/// Every valid skill directly under `dir`; a missing `dir` yields nothing
async fn scan_directory(dir: &Path) -> std::io::Result<Vec<Skill>> {
    let meta = match tokio::fs::metadata(dir).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("Skill directory {} does not exist", dir.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(e),
    };
    if !meta.is_dir() {
        return Err(std::io::Error::new(
            ErrorKind::InvalidInput,
            format!("{} is not a directory", dir.display()),
        ));
    }

    let mut skills = Vec::new();
    for skill_dir in subdirectories(dir).await? {
        match read_skill(&skill_dir).await {
            Ok(Some(skill)) => {
                debug!("Discovered skill {} at {}", skill.name, skill_dir.display());
                skills.push(skill);
            }
            Ok(None) => {}
            Err(e) => warn!("Skipping skill at {}: {}", skill_dir.display(), e),
        }
    }
    Ok(skills)
}

/// Locate a skill by name under `dir`: the directory named after it first,
/// then any directory whose manifest declares that name.
async fn find_in_directory(dir: &Path, name: &str) -> Result<Option<Skill>, SkillError> {
    let mut components = Path::new(name).components();
    let single_component = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );

    if single_component {
        if let Ok(Some(skill)) = read_skill(&dir.join(name)).await {
            if skill.name == name {
                return Ok(Some(skill));
            }
        }
    }

    for skill_dir in subdirectories(dir).await? {
        if let Ok(Some(skill)) = read_skill(&skill_dir).await {
            if skill.name == name {
                return Ok(Some(skill));
            }
        }
    }
    Ok(None)
}
