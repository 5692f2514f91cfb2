//! Static Security Validator
//!
//! Pure, deterministic scan of script bodies, CLI arguments and stdin for
//! destructive commands, code-execution primitives, network and reverse
//! shell indicators, and shell injection. Never touches the filesystem.
//!
//! The dangerous-command list is matched as case-sensitive substrings; every
//! regex table is case-insensitive.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;

/// Bytes of context kept on each side of a match
const CONTEXT_WINDOW: usize = 20;
const ARG_CONTEXT_LEN: usize = 50;
const STDIN_CONTEXT_LEN: usize = 100;

/// Category of a validation finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    DangerousCommand,
    DangerousPattern,
    NetworkAccess,
    ReverseShell,
    ShellInjection,
    CommandSubstitution,
    ArgInjection,
    StdinInjection,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DangerousCommand => "dangerous_command",
            Self::DangerousPattern => "dangerous_pattern",
            Self::NetworkAccess => "network_access",
            Self::ReverseShell => "reverse_shell",
            Self::ShellInjection => "shell_injection",
            Self::CommandSubstitution => "command_substitution",
            Self::ArgInjection => "arg_injection",
            Self::StdinInjection => "stdin_injection",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("[{kind}] {message} (pattern: {pattern}, context: {context})")]
pub struct ValidationError {
    pub kind: ViolationKind,
    /// The literal or regex that matched
    pub pattern: String,
    /// Bounded excerpt around the match
    pub context: String,
    pub message: String,
}

/// Aggregated verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }
}

impl ValidationResult {
    fn push(&mut self, error: ValidationError) {
        self.valid = false;
        self.errors.push(error);
    }

    fn merge(&mut self, other: ValidationResult) {
        if !other.valid {
            self.valid = false;
        }
        self.errors.extend(other.errors);
    }

    /// Whether any finding has the given category
    pub fn has_kind(&self, kind: ViolationKind) -> bool {
        self.errors.iter().any(|e| e.kind == kind)
    }

    /// Format for display
    pub fn format(&self) -> String {
        let mut s = String::new();

        if self.valid {
            s.push_str("✓ No security findings\n");
        } else {
            s.push_str(&format!("✗ {} security finding(s):\n", self.errors.len()));
            for error in &self.errors {
                s.push_str(&format!("  - [{}] {}\n", error.kind, error.message));
                s.push_str(&format!("      pattern: {}\n", error.pattern));
                if !error.context.is_empty() {
                    s.push_str(&format!("      context: {}\n", error.context.escape_debug()));
                }
            }
        }

        s
    }
}

/// Literal command fragments that must never appear in a script
const DANGEROUS_COMMANDS: &[&str] = &[
    // Destructive rm
    "rm -rf /",
    "rm -fr /",
    "rm -rf/*",
    "rm -rf *",
    // Filesystem destruction
    "mkfs",
    "dd if=/dev/zero",
    "dd if=/dev/random",
    // Fork bombs
    ":(){ :|:& };:",
    ":(){:|:&};:",
    "bomb(){ bomb|bomb& };bomb",
    // Process and system control
    "shutdown",
    "reboot",
    "halt",
    "poweroff",
    "init 0",
    "init 6",
    "killall",
    "pkill",
    // Privilege escalation
    "chmod 777 /",
    "chown root",
    "setuid",
    "setgid",
    "passwd",
    // Credentials
    "/etc/passwd",
    "/etc/shadow",
    "/etc/sudoers",
    ".ssh/",
    "id_rsa",
    "id_ed25519",
    // Environment hijacking
    "export PATH=",
    "export LD_PRELOAD",
    "export LD_LIBRARY_PATH",
    // Cron
    "crontab",
    "/etc/cron",
    // Services
    "systemctl",
    "service",
    // Kernel modules
    "insmod",
    "modprobe",
    "rmmod",
    // Container escape
    "docker",
    "kubectl",
    "nsenter",
    "unshare",
    "capsh",
];

const DANGEROUS_PATTERNS: &[&str] = &[
    // Encoded payloads
    r"base64\s+(-d|--decode)",
    r"echo\s+.*\|\s*base64\s+-d",
    r"xxd\s+-r",
    r"echo\s+-e\s+.*\\x",
    // Download and execute
    r"curl.*\|\s*(bash|sh)",
    r"wget.*\|\s*(bash|sh)",
    r"python.*http\.server",
    // Code execution
    r"eval\s*\(",
    r"exec\s*\(",
    r"os\.system\s*\(",
    r"subprocess\.call\s*\(.*shell\s*=\s*True",
    r"subprocess\.Popen\s*\(.*shell\s*=\s*True",
    r"os\.popen\s*\(",
    r"commands\.getoutput\s*\(",
    r"commands\.getstatusoutput\s*\(",
    // History tampering
    r"history\s+-c",
    r"unset\s+HISTFILE",
    r"export\s+HISTSIZE=0",
    // Dynamic import
    r"__import__\s*\(",
    r"importlib\.import_module",
    r"compile\s*\(.*exec",
    // Unsafe deserialization
    r"pickle\.loads?\s*\(",
    r"cPickle\.loads?\s*\(",
    r"yaml\.load\s*\([^,]+\)",
    r"yaml\.unsafe_load",
    // Fork bomb syntax
    r":\s*\(\s*\)\s*\{\s*:",
    r"\(\)\s*\{\s*\w+\s*\|\s*\w+\s*&",
    // rm with any flag order
    r"rm\s+-[rf]+\s+/",
    r"rm\s+--no-preserve-root",
];

const NETWORK_PATTERNS: &[&str] = &[
    r"\bcurl\b",
    r"\bwget\b",
    r"\bnc\b",
    r"\bnetcat\b",
    r"\btelnet\b",
    r"\bssh\b",
    r"\bscp\b",
    r"\brsync\b",
    r"\bftp\b",
    r"\bsftp\b",
    r"socket\.connect",
    r"urllib\.request",
    r"requests\.get",
    r"requests\.post",
    r"http\.client",
    r"httplib",
    r"fetch\s*\(",
    r"axios",
    r"XMLHttpRequest",
];

const REVERSE_SHELL_PATTERNS: &[&str] = &[
    r"/dev/tcp/",
    r"/dev/udp/",
    r"bash\s+-i",
    r"sh\s+-i",
    r"/bin/bash\s+-i",
    r"/bin/sh\s+-i",
    r"python.*pty\.spawn",
    r"perl.*-e.*socket",
    r"ruby.*-rsocket",
    r"socat.*exec",
    r"mkfifo",
    r"mknod.*p",
    r"0<&196",
    r"196>&0",
    r"/inet/tcp/",
    r"bash.*>&.*0>&1",
    r"nc.*-e",
    r"ncat.*-e",
    r"netcat.*-e",
];

const ARG_INJECTION_PATTERNS: &[&str] = &[
    // Path traversal
    r"\.\./",
    r"\.\.\\",
    // Variable expansion
    r"\$\{[A-Z_]+\}",
    r"\$[A-Z_]+",
    // Substitution and line breaks
    r"\$\(",
    r"`",
    r"\n",
    r"\r",
];

/// Operators that chain or redirect commands
const SHELL_OPERATORS: &[&str] = &[
    "&&", "||", ";", "|", "\n", "\r", "$(", "`", ">", "<", ">>", "2>", "&>",
];

const COMMAND_SUBSTITUTION_PATTERNS: &[&str] = &[r"\$\([^)]+\)", r"`[^`]+`", r"\$\{[^}]*\$\("];

const STDIN_PATTERNS: &[&str] = &[r"\$\(.*\)", r"`.*`", r"\n\s*[;&|]", r"\\n.*[;&|]"];

/// A compiled pattern that keeps its source text for reporting
#[derive(Debug, Clone)]
struct Pattern {
    source: &'static str,
    regex: Regex,
}

fn compile(patterns: &[&'static str], case_insensitive: bool) -> Vec<Pattern> {
    patterns
        .iter()
        .map(|source| {
            let expr = if case_insensitive {
                format!("(?i){}", source)
            } else {
                source.to_string()
            };
            Pattern {
                source: *source,
                regex: Regex::new(&expr).unwrap(),
            }
        })
        .collect()
}

static RE_DANGEROUS: Lazy<Vec<Pattern>> = Lazy::new(|| compile(DANGEROUS_PATTERNS, true));
static RE_NETWORK: Lazy<Vec<Pattern>> = Lazy::new(|| compile(NETWORK_PATTERNS, true));
static RE_REVERSE_SHELL: Lazy<Vec<Pattern>> = Lazy::new(|| compile(REVERSE_SHELL_PATTERNS, true));
static RE_ARG_INJECTION: Lazy<Vec<Pattern>> = Lazy::new(|| compile(ARG_INJECTION_PATTERNS, true));
static RE_COMMAND_SUBSTITUTION: Lazy<Vec<Pattern>> =
    Lazy::new(|| compile(COMMAND_SUBSTITUTION_PATTERNS, false));
static RE_STDIN: Lazy<Vec<Pattern>> = Lazy::new(|| compile(STDIN_PATTERNS, false));

/// Validator for scripts, arguments and stdin
#[derive(Debug, Clone)]
pub struct ScriptValidator {
    dangerous_commands: Vec<String>,
}

impl Default for ScriptValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptValidator {
    /// Create a validator with the default rule set
    pub fn new() -> Self {
        Self {
            dangerous_commands: DANGEROUS_COMMANDS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Add literal command fragments to reject
    pub fn with_dangerous_commands<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dangerous_commands
            .extend(commands.into_iter().map(Into::into));
        self
    }

    /// Validate a script body
    pub fn validate_script(&self, content: &str) -> ValidationResult {
        let mut result = ValidationResult::default();

        for cmd in &self.dangerous_commands {
            if let Some(idx) = content.find(cmd.as_str()) {
                result.push(ValidationError {
                    kind: ViolationKind::DangerousCommand,
                    pattern: cmd.clone(),
                    context: extract_context(content, idx, idx + cmd.len()),
                    message: format!("Script contains dangerous command: {}", cmd),
                });
            }
        }

        for pattern in RE_DANGEROUS.iter() {
            if let Some(m) = pattern.regex.find(content) {
                result.push(ValidationError {
                    kind: ViolationKind::DangerousPattern,
                    pattern: pattern.source.to_string(),
                    context: extract_context(content, m.start(), m.end()),
                    message: format!("Script contains dangerous pattern: {}", m.as_str()),
                });
            }
        }

        for pattern in RE_NETWORK.iter() {
            if let Some(m) = pattern.regex.find(content) {
                result.push(ValidationError {
                    kind: ViolationKind::NetworkAccess,
                    pattern: pattern.source.to_string(),
                    context: extract_context(content, m.start(), m.end()),
                    message: format!("Script attempts to access network resources: {}", m.as_str()),
                });
            }
        }

        for pattern in RE_REVERSE_SHELL.iter() {
            if let Some(m) = pattern.regex.find(content) {
                result.push(ValidationError {
                    kind: ViolationKind::ReverseShell,
                    pattern: pattern.source.to_string(),
                    context: extract_context(content, m.start(), m.end()),
                    message: format!("Script contains potential reverse shell pattern: {}", m.as_str()),
                });
            }
        }

        result
    }

    /// Validate command-line arguments, each one independently
    pub fn validate_args<S: AsRef<str>>(&self, args: &[S]) -> ValidationResult {
        let mut result = ValidationResult::default();

        for (i, arg) in args.iter().enumerate() {
            let arg = arg.as_ref();
            let context = format!("arg[{}]: {}", i, truncate(arg, ARG_CONTEXT_LEN));

            if let Some(op) = SHELL_OPERATORS.iter().find(|op| arg.contains(**op)) {
                result.push(ValidationError {
                    kind: ViolationKind::ShellInjection,
                    pattern: op.escape_debug().to_string(),
                    context: context.clone(),
                    message: "Argument contains shell command operators".to_string(),
                });
            }

            if let Some(pattern) = RE_COMMAND_SUBSTITUTION
                .iter()
                .find(|p| p.regex.is_match(arg))
            {
                result.push(ValidationError {
                    kind: ViolationKind::CommandSubstitution,
                    pattern: pattern.source.to_string(),
                    context: context.clone(),
                    message: "Argument contains command substitution syntax".to_string(),
                });
            }

            for pattern in RE_ARG_INJECTION.iter() {
                if pattern.regex.is_match(arg) {
                    result.push(ValidationError {
                        kind: ViolationKind::ArgInjection,
                        pattern: pattern.source.to_string(),
                        context: context.clone(),
                        message: "Argument matches injection pattern".to_string(),
                    });
                }
            }
        }

        result
    }

    /// Validate stdin content for embedded shell commands
    pub fn validate_stdin(&self, stdin: &str) -> ValidationResult {
        let mut result = ValidationResult::default();

        if let Some(pattern) = RE_STDIN.iter().find(|p| p.regex.is_match(stdin)) {
            result.push(ValidationError {
                kind: ViolationKind::StdinInjection,
                pattern: pattern.source.to_string(),
                context: truncate(stdin, STDIN_CONTEXT_LEN),
                message: "Stdin contains embedded shell command patterns".to_string(),
            });
        }

        result
    }

    /// Validate script, arguments and stdin together
    pub fn validate_all<S: AsRef<str>>(
        &self,
        script_content: &str,
        args: &[S],
        stdin: &str,
    ) -> ValidationResult {
        let mut result = ValidationResult::default();
        result.merge(self.validate_script(script_content));
        result.merge(self.validate_args(args));
        if !stdin.is_empty() {
            result.merge(self.validate_stdin(stdin));
        }
        result
    }
}

/// Excerpt of `content` around `start..end`, ellipsized where cut
fn extract_context(content: &str, start: usize, end: usize) -> String {
    let mut from = start.saturating_sub(CONTEXT_WINDOW);
    while !content.is_char_boundary(from) {
        from -= 1;
    }
    let mut to = (end + CONTEXT_WINDOW).min(content.len());
    while !content.is_char_boundary(to) {
        to += 1;
    }

    let mut context = String::new();
    if from > 0 {
        context.push_str("...");
    }
    context.push_str(&content[from..to]);
    if to < content.len() {
        context.push_str("...");
    }
    context
}

/// Truncate to at most `max_len` bytes on a char boundary
fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
