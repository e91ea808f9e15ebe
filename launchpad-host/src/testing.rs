//! Scripted stand-ins for the host: a command runner that records
//! invocations and a clock that only moves when slept.

use std::cell::Cell;
use std::sync::Mutex;
use std::time::Duration;

use crate::clock::Clock;
use crate::error::CommandError;
use crate::runner::{CommandOutput, CommandRunner, CommandSpec};

/// Succeeds on everything unless a rule says otherwise.
#[derive(Default)]
pub(crate) struct ScriptedRunner {
    calls: Mutex<Vec<CommandSpec>>,
    /// `(needle, remaining failures)`; `None` fails forever.
    failures: Mutex<Vec<(String, Option<usize>)>>,
    responses: Mutex<Vec<(String, String)>>,
}

impl ScriptedRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Every command whose rendered form contains `needle` exits 1.
    pub(crate) fn fail_when(self, needle: &str) -> Self {
        self.failures
            .lock()
            .unwrap()
            .push((needle.to_string(), None));
        self
    }

    /// The first `times` matching commands exit 1, later ones succeed.
    pub(crate) fn fail_times(self, needle: &str, times: usize) -> Self {
        self.failures
            .lock()
            .unwrap()
            .push((needle.to_string(), Some(times)));
        self
    }

    pub(crate) fn respond(self, needle: &str, stdout: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push((needle.to_string(), stdout.to_string()));
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.to_string())
            .collect()
    }

    pub(crate) fn specs(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, needle: &str) -> usize {
        self.calls().iter().filter(|c| c.contains(needle)).count()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        self.calls.lock().unwrap().push(spec.clone());
        let rendered = spec.to_string();

        let mut failures = self.failures.lock().unwrap();
        for (needle, remaining) in failures.iter_mut() {
            if !rendered.contains(needle.as_str()) {
                continue;
            }
            match remaining {
                None => {}
                Some(0) => continue,
                Some(n) => *n -= 1,
            }
            return Err(CommandError::Failed {
                command: rendered,
                status: Some(1),
                stderr: format!("scripted failure for '{needle}'"),
            });
        }

        let stdout = self
            .responses
            .lock()
            .unwrap()
            .iter()
            .find(|(needle, _)| rendered.contains(needle.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_default();
        Ok(CommandOutput {
            status: Some(0),
            stdout,
            stderr: String::new(),
        })
    }
}

/// A clock that advances only through `sleep` or `advance`.
#[derive(Default)]
pub(crate) struct ManualClock {
    now: Cell<Duration>,
}

impl ManualClock {
    pub(crate) fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}
