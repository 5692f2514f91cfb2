//! Agent Skills
//!
//! Skills are directories holding a `SKILL.md` manifest plus optional
//! resources and scripts, disclosed progressively:
//!
//! ```text
//! skills/
//! └── pdf-processing/
//!     ├── SKILL.md            Level 1: frontmatter (name, description)
//!     │                       Level 2: markdown body (instructions)
//!     ├── FORMS.md            Level 3: resources read on demand
//!     └── scripts/
//!         └── analyze_form.py Level 3: scripts run through the sandbox
//! ```
//!
//! # Manifest Format
//!
//! ```markdown
//! ---
//! name: pdf-processing
//! description: Extract text and tables from PDF files, fill forms.
//! ---
//!
//! # PDF Processing
//! ...
//! ```
//!
//! # Security
//!
//! - Names: letters, digits and hyphens only; no reserved words
//! - Descriptions: no XML tags
//! - File access: no absolute paths, no `..`, no symlink escapes
//! - Execution: allow-list, then the sandbox manager's validator

pub mod loader;
pub mod manager;
pub mod types;

pub use loader::SkillLoader;
pub use manager::{SkillManager, SkillManagerConfig};
pub use types::{
    is_script, parse_skill_file, script_language, Skill, SkillError, SkillFile, SkillInfo,
    SkillMetadata, SkillParseError, SkillValidationError, MAX_DESCRIPTION_LENGTH,
    MAX_NAME_LENGTH, SKILL_FILE_NAME,
};
