//! Child-process runner used in production.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::debug;

use super::{Invocation, ToolError, ToolOutput, ToolRunner};

type SharedLog = Arc<Mutex<File>>;

/// Where forwarded output lines go.
#[derive(Debug, Clone, Copy)]
enum Forward {
    Stdout,
    Stderr,
    Nowhere,
}

/// Runs tools as real child processes, forwarding their output to the task log.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }

    fn command(invocation: &Invocation) -> Command {
        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args);
        for (key, value) in &invocation.env {
            command.env(key, value);
        }
        if let Some(ref dir) = invocation.current_dir {
            command.current_dir(dir);
        }
        command
    }

    fn spawn(invocation: &Invocation, command: &mut Command) -> Result<Child, ToolError> {
        debug!("[command] {}", invocation);
        command.spawn().map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ToolError::NotFound(invocation.program.clone()),
            _ => ToolError::Spawn {
                program: invocation.program.clone(),
                reason: e.to_string(),
            },
        })
    }

    fn forward(invocation: &Invocation, target: Forward) -> Forward {
        if invocation.quiet {
            Forward::Nowhere
        } else {
            target
        }
    }
}

/// Read `reader` line by line on a worker thread.
///
/// Each line is forwarded, appended to `log`, and handed to `sink` before
/// being collected. Non-UTF-8 bytes are replaced.
fn collect_lines<R, F>(
    reader: R,
    forward: Forward,
    log: Option<SharedLog>,
    mut sink: F,
) -> JoinHandle<Vec<String>>
where
    R: Read + Send + 'static,
    F: FnMut(&str) + Send + 'static,
{
    thread::spawn(move || {
        let mut lines = Vec::new();
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = String::from_utf8_lossy(&buf)
                .trim_end_matches(['\n', '\r'])
                .to_string();

            match forward {
                Forward::Stdout => println!("{}", line),
                Forward::Stderr => eprintln!("{}", line),
                Forward::Nowhere => {}
            }
            if let Some(ref log) = log {
                if let Ok(mut f) = log.lock() {
                    let _ = writeln!(f, "{}", line);
                }
            }
            sink(&line);
            lines.push(line);
        }
        lines
    })
}

fn join(handle: Option<JoinHandle<Vec<String>>>) -> Vec<String> {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

fn open_log(path: &Path) -> Result<SharedLog, ToolError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    Ok(Arc::new(Mutex::new(file)))
}

impl ToolRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, ToolError> {
        let mut command = Self::command(invocation);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = Self::spawn(invocation, &mut command)?;

        let stdout_handle = child.stdout.take().map(|out| {
            collect_lines(out, Self::forward(invocation, Forward::Stdout), None, |_| {})
        });
        let stderr_handle = child.stderr.take().map(|err| {
            collect_lines(err, Self::forward(invocation, Forward::Stderr), None, |_| {})
        });

        let status = child.wait()?;
        let output = ToolOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout: join(stdout_handle),
            stderr: join(stderr_handle),
        };

        if status.success() {
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
        let log = log_file.map(open_log).transpose()?;

        let mut consumer_cmd = Self::command(consumer);
        consumer_cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut consumer_child = Self::spawn(consumer, &mut consumer_cmd)?;

        let mut producer_cmd = Self::command(producer);
        producer_cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut producer_child = match Self::spawn(producer, &mut producer_cmd) {
            Ok(child) => child,
            Err(e) => {
                let _ = consumer_child.kill();
                let _ = consumer_child.wait();
                return Err(e);
            }
        };

        // Producer stdout feeds the consumer and the raw log.
        let consumer_stdin = Arc::new(Mutex::new(consumer_child.stdin.take()));
        let feed = Arc::clone(&consumer_stdin);
        let producer_out = producer_child.stdout.take().map(|out| {
            collect_lines(out, Forward::Nowhere, log.clone(), move |line| {
                if let Ok(mut guard) = feed.lock() {
                    if let Some(stdin) = guard.as_mut() {
                        let _ = writeln!(stdin, "{}", line);
                    }
                }
            })
        });
        let producer_err = producer_child.stderr.take().map(|err| {
            collect_lines(err, Self::forward(producer, Forward::Stderr), log.clone(), |_| {})
        });
        let consumer_out = consumer_child.stdout.take().map(|out| {
            collect_lines(out, Self::forward(consumer, Forward::Stdout), None, |_| {})
        });
        let consumer_err = consumer_child.stderr.take().map(|err| {
            collect_lines(err, Self::forward(consumer, Forward::Stderr), None, |_| {})
        });

        let producer_status = producer_child.wait()?;
        let producer_stdout = join(producer_out);
        // Closing stdin lets the consumer see end of input.
        if let Ok(mut guard) = consumer_stdin.lock() {
            guard.take();
        }
        let consumer_status = consumer_child.wait()?;

        let mut stderr = join(producer_err);
        let consumer_stdout = join(consumer_out);
        stderr.extend(join(consumer_err));

        if !producer_status.success() {
            return Err(ToolError::failed(
                producer,
                ToolOutput {
                    exit_code: producer_status.code().unwrap_or(-1),
                    stdout: producer_stdout,
                    stderr,
                },
            ));
        }

        let output = ToolOutput {
            exit_code: consumer_status.code().unwrap_or(-1),
            stdout: consumer_stdout,
            stderr,
        };
        if consumer_status.success() {
            Ok(output)
        } else {
            Err(ToolError::failed(consumer, output))
        }
    }

    fn which(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_run_captures_output() {
        let runner = SystemRunner::new();
        let inv = Invocation::new("sh")
            .args(["-c", "echo one; echo two >&2"])
            .quiet();
        let out = runner.run(&inv).unwrap();
        assert_eq!(out.exit_code, 0);
        assert_eq!(out.stdout, vec!["one"]);
        assert_eq!(out.stderr, vec!["two"]);
    }

    #[test]
    fn test_run_failure_keeps_stderr() {
        let runner = SystemRunner::new();
        let inv = Invocation::new("sh")
            .args(["-c", "echo boom >&2; exit 3"])
            .quiet();
        let err = runner.run(&inv).unwrap_err();
        assert_eq!(err.exit_code(), Some(3));
        assert!(err.stderr_contains("boom"));
    }

    #[test]
    fn test_missing_program() {
        let runner = SystemRunner::new();
        let inv = Invocation::new("definitely-not-a-real-tool-xyz");
        assert!(matches!(runner.run(&inv), Err(ToolError::NotFound(_))));
    }

    #[test]
    fn test_pipe_filters_and_logs_raw_output() {
        let temp = TempDir::new().unwrap();
        let log = temp.path().join("raw.log");
        let runner = SystemRunner::new();

        let producer = Invocation::new("sh")
            .args(["-c", "echo keep me; echo drop me; echo oops >&2"])
            .quiet();
        let consumer = Invocation::new("grep").arg("keep").quiet();

        let out = runner.pipe(&producer, &consumer, Some(&log)).unwrap();
        assert_eq!(out.stdout, vec!["keep me"]);
        assert!(out.stderr.contains(&"oops".to_string()));

        let raw = fs::read_to_string(&log).unwrap();
        assert!(raw.contains("keep me"));
        assert!(raw.contains("drop me"));
    }

    #[test]
    fn test_pipe_producer_failure() {
        let runner = SystemRunner::new();
        let producer = Invocation::new("sh").args(["-c", "echo x; exit 2"]).quiet();
        let consumer = Invocation::new("cat").quiet();

        let err = runner.pipe(&producer, &consumer, None).unwrap_err();
        match err {
            ToolError::Failed { program, code, .. } => {
                assert_eq!(program, "sh");
                assert_eq!(code, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
