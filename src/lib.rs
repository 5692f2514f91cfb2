//! Skill Sandbox
//!
//! Discovery, progressive loading and sandboxed execution of agent skills.
//!
//! # Features
//!
//! - **Progressive Disclosure**: metadata, instructions and resources load in
//!   three separate levels
//! - **Security Validator**: static checks over script, arguments and stdin
//!   before anything runs
//! - **Sandbox Backends**: disabled, local process group, or Docker container
//! - **Allow-list**: only named skills are visible and executable
//!
//! # Architecture
//!
//! ```text
//! caller ──► SkillManager ──► SkillLoader (resolve skill + script path)
//!                 │
//!                 └──► SandboxManager ──► ScriptValidator (gate)
//!                                   │
//!                                   └──► Disabled | Local | Docker
//! ```

pub mod config;
pub mod paths;
pub mod sandbox;
pub mod skills;

pub use config::Config;
pub use sandbox::{
    ExecuteConfig, ExecuteResult, Sandbox, SandboxConfig, SandboxError, SandboxManager,
    SandboxType, ScriptValidator, ValidationError, ValidationResult, ViolationKind,
};
pub use skills::{
    Skill, SkillError, SkillFile, SkillInfo, SkillLoader, SkillManager, SkillManagerConfig,
    SkillMetadata,
};
