//! Skill Sandbox - Operator CLI
//!
//! Commands:
//! - list: discovered skills (Level 1)
//! - show / files / read: Level 2 and Level 3 content
//! - run: execute a skill script through the full pipeline
//! - validate: run the security validator over a local file

use anyhow::{bail, Context};
use skill_sandbox::{
    Config, SandboxError, SandboxManager, ScriptValidator, SkillError, SkillManager,
};
use std::collections::VecDeque;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

fn print_help() {
    println!("Skill Sandbox v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage: skill-sandbox [OPTIONS] <COMMAND>");
    println!();
    println!("Commands:");
    println!("  list                                      List discovered skills");
    println!("  show <skill>                              Show skill info as JSON");
    println!("  files <skill>                             List files in a skill");
    println!("  read <skill> <path>                       Print a skill file");
    println!("  run [--stdin <text>] <skill> <script> [args...]");
    println!("                                            Run a skill script in the sandbox");
    println!("  validate <file> [args...]                 Check a script with the validator");
    println!();
    println!("Options:");
    println!("  --json       Log as JSON lines");
    println!("  --help, -h   Show this help");
    println!();
    println!("Environment variables:");
    println!("  SKILLS_ENABLED         Enable skills (default: true)");
    println!("  SKILLS_DIRS            Skill directories, ':' or ',' separated");
    println!("  SKILLS_ALLOWED         Allowed skill names, comma separated");
    println!("  SANDBOX_MODE           disabled | local | docker (default: disabled)");
    println!("  SANDBOX_TIMEOUT        Script timeout in seconds (default: 60)");
    println!("  SANDBOX_DOCKER_IMAGE   Image for the docker sandbox");
    println!("  SANDBOX_FALLBACK       Fall back to local without docker (default: true)");
}

fn init_logging(json: bool) -> anyhow::Result<()> {
    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    // stdout carries command output, logs go to stderr
    if json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

fn next_arg(args: &mut VecDeque<String>, what: &str) -> anyhow::Result<String> {
    match args.pop_front() {
        Some(arg) => Ok(arg),
        None => bail!("missing {} (see --help)", what),
    }
}

async fn skill_manager(config: &Config, sandbox: SandboxManager) -> SkillManager {
    let manager = SkillManager::new(config.manager_config(), Arc::new(sandbox));
    manager.initialize().await;
    manager
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load environment
    dotenvy::dotenv().ok();

    let mut args: VecDeque<String> = std::env::args().skip(1).collect();
    let mut json_logs = false;
    while let Some(flag) = args.front() {
        match flag.as_str() {
            "--json" => {
                json_logs = true;
                args.pop_front();
            }
            "--help" | "-h" => {
                print_help();
                return Ok(ExitCode::SUCCESS);
            }
            _ => break,
        }
    }

    let Some(command) = args.pop_front() else {
        print_help();
        return Ok(ExitCode::SUCCESS);
    };

    init_logging(json_logs)?;
    let config = Config::from_env()?;

    match command.as_str() {
        "list" => {
            let manager = skill_manager(&config, SandboxManager::disabled()).await;
            for meta in manager.get_all_metadata().await {
                println!("{}\t{}", meta.name, meta.description);
            }
        }
        "show" => {
            let name = next_arg(&mut args, "skill name")?;
            let manager = skill_manager(&config, SandboxManager::disabled()).await;
            let info = manager.get_skill_info(&name).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        "files" => {
            let name = next_arg(&mut args, "skill name")?;
            let manager = skill_manager(&config, SandboxManager::disabled()).await;
            for file in manager.list_skill_files(&name).await? {
                println!("{}", file);
            }
        }
        "read" => {
            let name = next_arg(&mut args, "skill name")?;
            let path = next_arg(&mut args, "file path")?;
            let manager = skill_manager(&config, SandboxManager::disabled()).await;
            print!("{}", manager.read_skill_file(&name, &path).await?);
        }
        "run" => {
            let mut stdin = String::new();
            if args.front().map(String::as_str) == Some("--stdin") {
                args.pop_front();
                stdin = next_arg(&mut args, "--stdin value")?;
            }
            let name = next_arg(&mut args, "skill name")?;
            let script = next_arg(&mut args, "script path")?;
            let script_args: Vec<String> = args.drain(..).collect();

            let sandbox = SandboxManager::new(config.sandbox_config())
                .await
                .context("Failed to initialize sandbox")?;
            info!("Using {} sandbox", sandbox.sandbox_type());
            let manager = skill_manager(&config, sandbox).await;

            let outcome = manager
                .execute_script(&name, &script, &script_args, &stdin)
                .await;
            if let Err(e) = manager.cleanup().await {
                warn!("Sandbox cleanup failed: {}", e);
            }

            match outcome {
                Ok(result) => {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                    if !result.is_success() {
                        return Ok(ExitCode::FAILURE);
                    }
                }
                Err(SkillError::Sandbox(e)) => {
                    if let Some(result) = e.partial_result() {
                        println!("{}", serde_json::to_string_pretty(result)?);
                    }
                    if let SandboxError::SecurityViolation { findings, .. } = &e {
                        for finding in findings {
                            eprintln!("  - {}", finding);
                        }
                    }
                    return Err(e.into());
                }
                Err(e) => return Err(e.into()),
            }
        }
        "validate" => {
            let file = next_arg(&mut args, "script file")?;
            let script_args: Vec<String> = args.drain(..).collect();
            let content = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file))?;

            let result = ScriptValidator::new().validate_all(
                &String::from_utf8_lossy(&content),
                script_args.as_slice(),
                "",
            );
            print!("{}", result.format());
            if !result.valid {
                return Ok(ExitCode::FAILURE);
            }
        }
        other => bail!("unknown command: {} (see --help)", other),
    }

    Ok(ExitCode::SUCCESS)
}
