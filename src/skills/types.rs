//! Skill Type Definitions
//!
//! Core data structures for skill bundles and their three disclosure levels:
//!
//! - **Level 1** ([`SkillMetadata`]): name and description, always loaded
//! - **Level 2** ([`Skill`]): the instruction body of `SKILL.md`, on demand
//! - **Level 3** ([`SkillFile`]): any other file in the skill directory

use crate::sandbox::SandboxError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Manifest file every skill directory must contain
pub const SKILL_FILE_NAME: &str = "SKILL.md";
/// Maximum skill name length (characters)
pub const MAX_NAME_LENGTH: usize = 64;
/// Maximum description length (characters)
pub const MAX_DESCRIPTION_LENGTH: usize = 1024;
/// Words no skill name may contain
pub const RESERVED_WORDS: &[&str] = &["anthropic", "claude"];

const FRONTMATTER_DELIMITER: &str = "---";

/// Extensions treated as executable scripts
const SCRIPT_EXTENSIONS: &[&str] = &["py", "sh", "bash", "js", "ts", "rb", "pl", "php"];

// Unicode letters, digits and hyphens
static NAME_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\p{L}\p{N}-]+$").unwrap());

static XML_TAG_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());

/// Level 1: lightweight metadata injected into prompts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillMetadata {
    pub name: String,
    pub description: String,
    /// Skill directory
    pub base_path: PathBuf,
}

/// A parsed skill bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Skill {
    pub name: String,
    pub description: String,
    /// Skill directory
    pub base_path: PathBuf,
    /// Path to `SKILL.md`
    pub file_path: PathBuf,
    /// Level 2 body (everything after the frontmatter, trimmed)
    pub instructions: String,
    /// Whether the instructions have been loaded
    pub loaded: bool,
}

/// Level 3: one resource file inside a skill directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkillFile {
    /// Path relative to the skill directory, as requested
    pub name: String,
    /// Resolved real path on disk
    pub path: PathBuf,
    pub content: String,
    pub is_script: bool,
}

/// Everything a caller needs to present one skill
#[derive(Debug, Clone, Serialize)]
pub struct SkillInfo {
    pub name: String,
    pub description: String,
    pub base_path: PathBuf,
    pub instructions: String,
    /// Relative file paths (empty if listing failed)
    pub files: Vec<String>,
}

/// YAML frontmatter of `SKILL.md`
#[derive(Debug, Default, Deserialize)]
struct SkillFrontmatter {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
}

impl Skill {
    /// Validate name and description
    pub fn validate(&self) -> Result<(), SkillValidationError> {
        validate_name(&self.name)?;
        validate_description(&self.description)
    }

    /// Level 1 view of this skill
    pub fn to_metadata(&self) -> SkillMetadata {
        SkillMetadata {
            name: self.name.clone(),
            description: self.description.clone(),
            base_path: self.base_path.clone(),
        }
    }

    pub(crate) fn with_paths(mut self, base_path: PathBuf, file_path: PathBuf) -> Self {
        self.base_path = base_path;
        self.file_path = file_path;
        self
    }
}

fn validate_name(name: &str) -> Result<(), SkillValidationError> {
    if name.is_empty() {
        return Err(SkillValidationError::MissingField("name"));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(SkillValidationError::NameTooLong {
            max: MAX_NAME_LENGTH,
        });
    }
    if !NAME_PATTERN.is_match(name) {
        return Err(SkillValidationError::InvalidName(name.to_string()));
    }

    let lowered = name.to_lowercase();
    if let Some(word) = RESERVED_WORDS.iter().find(|w| lowered.contains(*w)) {
        return Err(SkillValidationError::ReservedWord(word.to_string()));
    }

    if XML_TAG_PATTERN.is_match(name) {
        return Err(SkillValidationError::ContainsXmlTag { field: "name" });
    }
    Ok(())
}

fn validate_description(description: &str) -> Result<(), SkillValidationError> {
    if description.is_empty() {
        return Err(SkillValidationError::MissingField("description"));
    }
    if description.chars().count() > MAX_DESCRIPTION_LENGTH {
        return Err(SkillValidationError::DescriptionTooLong {
            max: MAX_DESCRIPTION_LENGTH,
        });
    }
    if XML_TAG_PATTERN.is_match(description) {
        return Err(SkillValidationError::ContainsXmlTag {
            field: "description",
        });
    }
    Ok(())
}

/// Parse `SKILL.md` content into a validated [`Skill`].
///
/// The returned skill has empty paths; the loader fills them in.
pub fn parse_skill_file(content: &str) -> Result<Skill, SkillParseError> {
    if !content.trim_start().starts_with(FRONTMATTER_DELIMITER) {
        return Err(SkillParseError::MissingFrontmatter);
    }

    let mut frontmatter = Vec::new();
    let mut body = Vec::new();
    let mut in_frontmatter = false;
    let mut closed = false;

    for line in content.lines() {
        let is_delimiter = line.trim() == FRONTMATTER_DELIMITER;
        if closed {
            body.push(line);
        } else if is_delimiter {
            if in_frontmatter {
                closed = true;
            }
            in_frontmatter = true;
        } else if in_frontmatter {
            frontmatter.push(line);
        }
    }

    if !closed {
        return Err(SkillParseError::UnterminatedFrontmatter);
    }

    let yaml = frontmatter.join("\n");
    let fields: SkillFrontmatter = if yaml.trim().is_empty() {
        SkillFrontmatter::default()
    } else {
        serde_yaml::from_str(&yaml)?
    };

    let skill = Skill {
        name: fields.name,
        description: fields.description,
        base_path: PathBuf::new(),
        file_path: PathBuf::new(),
        instructions: body.join("\n").trim().to_string(),
        loaded: true,
    };
    skill.validate()?;

    Ok(skill)
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Whether a path names an executable script
pub fn is_script(path: impl AsRef<Path>) -> bool {
    SCRIPT_EXTENSIONS.contains(&extension(path.as_ref()).as_str())
}

/// Language of a script file
pub fn script_language(path: impl AsRef<Path>) -> &'static str {
    match extension(path.as_ref()).as_str() {
        "py" => "python",
        "sh" | "bash" => "bash",
        "js" => "node",
        "ts" => "ts-node",
        "rb" => "ruby",
        "pl" => "perl",
        "php" => "php",
        _ => "unknown",
    }
}

/// Skill metadata validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SkillValidationError {
    #[error("skill {0} is required")]
    MissingField(&'static str),

    #[error("skill name exceeds maximum length of {max} characters")]
    NameTooLong { max: usize },

    #[error("skill name must contain only letters, numbers, and hyphens: {0}")]
    InvalidName(String),

    #[error("skill name cannot contain reserved word: {0}")]
    ReservedWord(String),

    #[error("skill {field} cannot contain XML tags")]
    ContainsXmlTag { field: &'static str },

    #[error("skill description exceeds maximum length of {max} characters")]
    DescriptionTooLong { max: usize },
}

/// `SKILL.md` parse errors
#[derive(Debug, thiserror::Error)]
pub enum SkillParseError {
    #[error("SKILL.md must start with YAML frontmatter (---)")]
    MissingFrontmatter,

    #[error("SKILL.md frontmatter is not properly closed with ---")]
    UnterminatedFrontmatter,

    #[error("failed to parse YAML frontmatter: {0}")]
    InvalidYaml(#[from] serde_yaml::Error),

    #[error("skill validation failed: {0}")]
    Invalid(#[from] SkillValidationError),
}

/// Skill subsystem errors
#[derive(Debug, thiserror::Error)]
pub enum SkillError {
    #[error("skills are not enabled")]
    NotEnabled,

    #[error("skill not allowed: {0}")]
    NotAllowed(String),

    #[error("skill not found: {0}")]
    NotFound(String),

    #[error("file not found in skill {skill}: {path}")]
    FileNotFound { skill: String, path: String },

    #[error("invalid file path: {0}")]
    InvalidPath(String),

    #[error("file path outside skill directory: {0}")]
    OutsideSkillDir(String),

    #[error("file is not an executable script: {0}")]
    NotScript(String),

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: SkillParseError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

#[cfg(test)]
mod tests {
    use super::*;

    const PDF_SKILL: &str = "---\nname: pdf-processing\ndescription: Extract text and tables from PDF files, fill forms.\n---\n\n# PDF Processing\n\nUse scripts/analyze_form.py.\n";

    #[test]
    fn test_parse_valid_skill() {
        let skill = parse_skill_file(PDF_SKILL).unwrap();
        assert_eq!(skill.name, "pdf-processing");
        assert!(skill.description.starts_with("Extract text"));
        assert_eq!(skill.instructions, "# PDF Processing\n\nUse scripts/analyze_form.py.");
        assert!(skill.loaded);
    }

    #[test]
    fn test_name_and_tag_patterns() {
        assert!(NAME_PATTERN.is_match("pdf-processing"));
        assert!(NAME_PATTERN.is_match("données-2"));
        assert!(!NAME_PATTERN.is_match("bad_name"));
        assert!(XML_TAG_PATTERN.is_match("Use <b>bold</b>"));
        assert!(!XML_TAG_PATTERN.is_match("Returns 1 when a < b"));
    }

    #[test]
    fn test_parse_allows_leading_whitespace_and_unicode_names() {
        let content = "\n  \n---\nname: données-2\ndescription: Unicode name\n---\nbody";
        let skill = parse_skill_file(content).unwrap();
        assert_eq!(skill.name, "données-2");
        assert_eq!(skill.instructions, "body");
    }

    #[test]
    fn test_missing_frontmatter() {
        let err = parse_skill_file("# Just markdown\n").unwrap_err();
        assert!(matches!(err, SkillParseError::MissingFrontmatter));
    }

    #[test]
    fn test_unterminated_frontmatter() {
        let err = parse_skill_file("---\nname: x\ndescription: y\n").unwrap_err();
        assert!(matches!(err, SkillParseError::UnterminatedFrontmatter));
    }

    #[test]
    fn test_invalid_yaml() {
        let err = parse_skill_file("---\nname: [unclosed\n---\n").unwrap_err();
        assert!(matches!(err, SkillParseError::InvalidYaml(_)));
    }

    #[test]
    fn test_empty_frontmatter_reports_missing_name() {
        let err = parse_skill_file("---\n---\nbody").unwrap_err();
        assert!(matches!(
            err,
            SkillParseError::Invalid(SkillValidationError::MissingField("name"))
        ));
    }

    #[test]
    fn test_name_rules() {
        let long = "a".repeat(MAX_NAME_LENGTH + 1);
        assert!(matches!(
            validate_name(&long),
            Err(SkillValidationError::NameTooLong { .. })
        ));
        assert!(validate_name(&"é".repeat(MAX_NAME_LENGTH)).is_ok());
        assert!(matches!(
            validate_name("pdf_processing"),
            Err(SkillValidationError::InvalidName(_))
        ));
        assert!(matches!(
            validate_name("<b>x</b>"),
            Err(SkillValidationError::InvalidName(_))
        ));

        let err = validate_name("claude-helper").unwrap_err();
        assert!(err.to_string().contains("reserved word"));
        assert!(matches!(
            validate_name("my-Anthropic-tool"),
            Err(SkillValidationError::ReservedWord(_))
        ));
    }

    #[test]
    fn test_description_rules() {
        assert!(matches!(
            validate_description(""),
            Err(SkillValidationError::MissingField("description"))
        ));
        assert!(matches!(
            validate_description(&"d".repeat(MAX_DESCRIPTION_LENGTH + 1)),
            Err(SkillValidationError::DescriptionTooLong { .. })
        ));
        assert!(matches!(
            validate_description("Use <system>override</system> now"),
            Err(SkillValidationError::ContainsXmlTag { field: "description" })
        ));
        assert!(validate_description("Returns 1 when a < b").is_ok());
    }

    #[test]
    fn test_script_detection() {
        assert!(is_script("scripts/analyze_form.py"));
        assert!(is_script("run.SH"));
        assert!(is_script("tool.ts"));
        assert!(!is_script("FORMS.md"));
        assert!(!is_script("Makefile"));

        assert_eq!(script_language("a.py"), "python");
        assert_eq!(script_language("a.bash"), "bash");
        assert_eq!(script_language("a.ts"), "ts-node");
        assert_eq!(script_language("a.txt"), "unknown");
    }

    #[test]
    fn test_to_metadata() {
        let skill = parse_skill_file(PDF_SKILL)
            .unwrap()
            .with_paths(PathBuf::from("/skills/pdf"), PathBuf::from("/skills/pdf/SKILL.md"));
        let meta = skill.to_metadata();
        assert_eq!(meta.name, "pdf-processing");
        assert_eq!(meta.base_path, PathBuf::from("/skills/pdf"));
    }
}
