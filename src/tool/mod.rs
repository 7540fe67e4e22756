//! External tool invocation
//!
//! Abstracts process spawning for testability. Provides:
//! - Invocation: program, arguments, environment, redaction of secrets
//! - ToolRunner trait: run one tool, or pipe one tool into another
//! - SystemRunner: real child processes for production
//!
//! The scripted fake lives in [`crate::mock`].

mod system;

pub use system::SystemRunner;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// A single external tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    /// Program name or absolute path
    pub program: String,
    /// Arguments in order
    pub args: Vec<String>,
    /// Extra environment variables for the child
    pub env: Vec<(String, String)>,
    /// Working directory for the child
    pub current_dir: Option<PathBuf>,
    /// Do not forward output lines to the task log
    pub quiet: bool,
    /// Indices into `args` that must never be logged
    secret: Vec<usize>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append a path argument.
    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy())
    }

    /// Append an argument that is rendered as `***` in logs.
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.secret.push(self.args.len());
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    /// File name of the program, used for matching and messages.
    pub fn program_name(&self) -> &str {
        Path::new(&self.program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.program)
    }

    /// Whether the argument at `index` is secret.
    pub fn is_secret(&self, index: usize) -> bool {
        self.secret.contains(&index)
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for (i, arg) in self.args.iter().enumerate() {
            if self.is_secret(i) {
                write!(f, " ***")?;
            } else if arg.is_empty() || arg.contains(' ') {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Completed tool output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub exit_code: i32,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl ToolOutput {
    /// Full stdout joined with newlines.
    pub fn stdout_text(&self) -> String {
        self.stdout.join("\n")
    }

    /// First non-empty trimmed stdout line.
    pub fn first_line(&self) -> Option<&str> {
        self.stdout
            .iter()
            .map(|l| l.trim())
            .find(|l| !l.is_empty())
    }
}

/// Tool errors
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("failed to start '{program}': {reason}")]
    Spawn { program: String, reason: String },

    #[error("'{program}' failed with exit code {code}")]
    Failed {
        program: String,
        code: i32,
        stdout: Vec<String>,
        stderr: Vec<String>,
    },

    #[error("'{0}' was not found on PATH")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ToolError {
    /// Build a failure from a completed invocation.
    pub fn failed(invocation: &Invocation, output: ToolOutput) -> Self {
        ToolError::Failed {
            program: invocation.program_name().to_string(),
            code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }

    /// Captured stderr, empty when the tool never ran.
    pub fn stderr(&self) -> &[String] {
        match self {
            ToolError::Failed { stderr, .. } => stderr,
            _ => &[],
        }
    }

    /// Whether any captured stderr line contains `needle`.
    pub fn stderr_contains(&self, needle: &str) -> bool {
        self.stderr().iter().any(|l| l.contains(needle))
    }

    /// Exit code of the failed tool, if it ran.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ToolError::Failed { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Runs external tools.
///
/// Every call blocks until the tool (or both ends of a pipe) exits. A non-zero
/// exit is returned as [`ToolError::Failed`] with everything that was captured.
pub trait ToolRunner {
    /// Run a single tool.
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, ToolError>;

    /// Run `producer` with its stdout connected to `consumer`'s stdin.
    ///
    /// The producer's raw output is also written to `log_file` when given. The
    /// returned stdout is the consumer's; stderr holds the producer's lines
    /// followed by the consumer's.
    fn pipe(
        &self,
        producer: &Invocation,
        consumer: &Invocation,
        log_file: Option<&Path>,
    ) -> Result<ToolOutput, ToolError>;

    /// Locate a program on the host.
    fn which(&self, program: &str) -> Option<PathBuf>;
}

impl<R: ToolRunner + ?Sized> ToolRunner for &R {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, ToolError> {
        (**self).run(invocation)
    }

    fn pipe(
        &self,
        producer: &Invocation,
        consumer: &Invocation,
        log_file: Option<&Path>,
    ) -> Result<ToolOutput, ToolError> {
        (**self).pipe(producer, consumer, log_file)
    }

    fn which(&self, program: &str) -> Option<PathBuf> {
        (**self).which(program)
    }
}

/// Split a command-line string into arguments.
///
/// Whitespace separates arguments, double quotes group, and a backslash
/// escapes a double quote inside quotes. Quotes are removed.
pub fn split_command_line(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut has_token = false;

    for c in line.chars() {
        if escaped {
            if c != '"' {
                current.push('\\');
            }
            current.push(c);
            escaped = false;
            continue;
        }

        match c {
            '\\' if in_quotes => escaped = true,
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    args.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }

    if escaped {
        current.push('\\');
    }
    if has_token {
        args.push(current);
    }

    args
}
