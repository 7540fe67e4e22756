//! Mock runner implementation

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::tool::{Invocation, ToolError, ToolOutput, ToolRunner};

/// Canned result of a mocked tool call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockResponse {
    pub exit_code: i32,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl MockResponse {
    /// Success with no output.
    pub fn ok() -> Self {
        Self::default()
    }

    /// Success printing `text` (split into lines).
    pub fn stdout(text: &str) -> Self {
        Self {
            stdout: text.lines().map(String::from).collect(),
            ..Self::default()
        }
    }

    /// Failure with the given exit code and stderr text.
    pub fn failure(exit_code: i32, stderr: &str) -> Self {
        Self {
            exit_code,
            stderr: stderr.lines().map(String::from).collect(),
            ..Self::default()
        }
    }

    pub fn with_stderr(mut self, text: &str) -> Self {
        self.stderr.extend(text.lines().map(String::from));
        self
    }

    fn into_output(self) -> ToolOutput {
        ToolOutput {
            exit_code: self.exit_code,
            stdout: self.stdout,
            stderr: self.stderr,
        }
    }
}

type Responder = Box<dyn Fn(&Invocation) -> MockResponse + Send>;

struct Rule {
    program: String,
    prefix: Vec<String>,
    once: bool,
    responder: Responder,
}

impl Rule {
    fn matches(&self, invocation: &Invocation) -> bool {
        let program_matches =
            invocation.program == self.program || invocation.program_name() == self.program;
        program_matches && invocation.args.starts_with(&self.prefix)
    }
}

/// Scripted [`ToolRunner`].
///
/// Rules match on the program (full path or file name) and a prefix of the
/// argument list. One-shot rules are tried first in registration order; among
/// persistent rules the longest matching prefix wins, later registrations
/// breaking ties.
#[derive(Default)]
pub struct MockToolRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Invocation>>,
    missing: Mutex<HashSet<String>>,
}

impl MockToolRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, program: &str, prefix: &[&str], once: bool, responder: Responder) {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                program: program.to_string(),
                prefix: prefix.iter().map(|s| s.to_string()).collect(),
                once,
                responder,
            });
        }
    }

    /// Answer every call to `program` whose args start with `prefix`.
    pub fn on(&self, program: &str, prefix: &[&str], response: MockResponse) -> &Self {
        self.push(program, prefix, false, Box::new(move |_| response.clone()));
        self
    }

    /// Answer the next matching call only.
    pub fn once(&self, program: &str, prefix: &[&str], response: MockResponse) -> &Self {
        self.push(program, prefix, true, Box::new(move |_| response.clone()));
        self
    }

    /// Answer matching calls with a computed response.
    pub fn on_with<F>(&self, program: &str, prefix: &[&str], responder: F) -> &Self
    where
        F: Fn(&Invocation) -> MockResponse + Send + 'static,
    {
        self.push(program, prefix, false, Box::new(responder));
        self
    }

    /// Report `program` as not installed.
    pub fn missing(&self, program: &str) -> &Self {
        if let Ok(mut missing) = self.missing.lock() {
            missing.insert(program.to_string());
        }
        self
    }

    /// All recorded invocations, in call order.
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Recorded invocations of `program` (full path or file name).
    pub fn calls_to(&self, program: &str) -> Vec<Invocation> {
        self.calls()
            .into_iter()
            .filter(|c| c.program == program || c.program_name() == program)
            .collect()
    }

    /// Recorded invocations of `program` whose args start with `prefix`.
    pub fn calls_matching(&self, program: &str, prefix: &[&str]) -> Vec<Invocation> {
        let prefix: Vec<String> = prefix.iter().map(|s| s.to_string()).collect();
        self.calls_to(program)
            .into_iter()
            .filter(|c| c.args.starts_with(&prefix))
            .collect()
    }

    fn record(&self, invocation: &Invocation) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(invocation.clone());
        }
    }

    fn respond(&self, invocation: &Invocation) -> Option<MockResponse> {
        let mut rules = self.rules.lock().ok()?;

        if let Some(pos) = rules.iter().position(|r| r.once && r.matches(invocation)) {
            let rule = rules.remove(pos);
            return Some((rule.responder)(invocation));
        }

        rules
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.once && r.matches(invocation))
            .max_by_key(|(i, r)| (r.prefix.len(), *i))
            .map(|(_, r)| (r.responder)(invocation))
    }

    fn check_installed(&self, invocation: &Invocation) -> Result<(), ToolError> {
        let missing = self
            .missing
            .lock()
            .map(|m| m.contains(&invocation.program) || m.contains(invocation.program_name()))
            .unwrap_or(false);
        if missing {
            Err(ToolError::NotFound(invocation.program.clone()))
        } else {
            Ok(())
        }
    }
}

impl ToolRunner for MockToolRunner {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, ToolError> {
        self.record(invocation);
        self.check_installed(invocation)?;

        let output = self
            .respond(invocation)
            .unwrap_or_default()
            .into_output();
        if output.exit_code == 0 {
            Ok(output)
        } else {
            Err(ToolError::failed(invocation, output))
        }
    }

    fn pipe(
        &self,
        producer: &Invocation,
        consumer: &Invocation,
        log_file: Option<&Path>,
    ) -> Result<ToolOutput, ToolError> {
        self.record(producer);
        self.record(consumer);
        self.check_installed(producer)?;
        self.check_installed(consumer)?;

        let produced = self.respond(producer).unwrap_or_default();
        if let Some(path) = log_file {
            let mut text = produced.stdout.join("\n");
            if !text.is_empty() {
                text.push('\n');
            }
            fs::write(path, text)?;
        }
        if produced.exit_code != 0 {
            return Err(ToolError::failed(producer, produced.into_output()));
        }

        // Unscripted consumers pass the producer's output through.
        let consumed = self.respond(consumer).unwrap_or_else(|| MockResponse {
            stdout: produced.stdout.clone(),
            ..MockResponse::default()
        });

        let mut stderr = produced.stderr;
        stderr.extend(consumed.stderr);
        let output = ToolOutput {
            exit_code: consumed.exit_code,
            stdout: consumed.stdout,
            stderr,
        };
        if output.exit_code == 0 {
            Ok(output)
        } else {
            Err(ToolError::failed(consumer, output))
        }
    }

    fn which(&self, program: &str) -> Option<PathBuf> {
        let missing = self
            .missing
            .lock()
            .map(|m| m.contains(program))
            .unwrap_or(false);
        if missing {
            None
        } else if program.starts_with('/') {
            Some(PathBuf::from(program))
        } else {
            Some(PathBuf::from("/usr/bin").join(program))
        }
    }
}
