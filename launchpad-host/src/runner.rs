//! External command capability.
//!
//! Everything that touches the container engine, git or swap tooling goes
//! through [`CommandRunner`], so callers can be driven by a scripted runner
//! in tests instead of the real host.

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::CommandError;

/// How often a command with a timeout is polled for completion.
const WAIT_POLL: Duration = Duration::from_millis(50);

/// Stderr kept in [`CommandError::Failed`].
const STDERR_TAIL_BYTES: usize = 4096;

/// A fully described external invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: vec![],
            cwd: None,
            timeout: None,
        }
    }

    /// Build from an argv prefix such as `["docker", "compose"]`.
    ///
    /// An empty prefix yields a spec with an empty program, which fails to
    /// spawn; configuration validation rejects empty prefixes up front.
    pub fn from_argv(argv: &[String]) -> Self {
        let mut spec = Self::new(argv.first().cloned().unwrap_or_default());
        spec.args.extend(argv.iter().skip(1).cloned());
        spec
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

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Runs external commands. Non-zero exit is an error.
pub trait CommandRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError>;
}

/// Runs commands on the real host via `std::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        let command = spec.to_string();
        tracing::debug!(%command, cwd = ?spec.cwd, "running command");

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| CommandError::Spawn {
            command: command.clone(),
            source,
        })?;

        // Drain both pipes on their own threads so a chatty build cannot
        // block on a full pipe while we wait.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match spec.timeout {
            None => child.wait().map_err(|source| CommandError::Io {
                command: command.clone(),
                source,
            })?,
            Some(timeout) => match wait_with_deadline(&mut child, timeout, &command)? {
                Some(status) => status,
                None => {
                    let _ = child.kill();
                    let _ = child.wait();
                    tracing::warn!(%command, timeout_secs = timeout.as_secs(), "command timed out");
                    return Err(CommandError::TimedOut { command, timeout });
                }
            },
        };

        let output = CommandOutput {
            status: status.code(),
            stdout: join_drain(stdout),
            stderr: join_drain(stderr),
        };

        if status.success() {
            return Ok(output);
        }

        Err(CommandError::Failed {
            command,
            status: status.code(),
            stderr: tail_of(output.stderr.trim(), STDERR_TAIL_BYTES),
        })
    }
}

fn wait_with_deadline(
    child: &mut Child,
    timeout: Duration,
    command: &str,
) -> Result<Option<std::process::ExitStatus>, CommandError> {
    // A timeout too large to represent means no deadline at all.
    let deadline = Instant::now().checked_add(timeout);
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(Some(status)),
            Ok(None) if deadline.is_some_and(|d| Instant::now() >= d) => return Ok(None),
            Ok(None) => thread::sleep(WAIT_POLL),
            Err(source) => {
                return Err(CommandError::Io {
                    command: command.to_string(),
                    source,
                })
            }
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn join_drain(handle: Option<JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

/// Last `max` bytes of `text`, cut on a char boundary.
fn tail_of(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}
