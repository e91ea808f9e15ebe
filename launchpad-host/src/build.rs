//! Build Pipeline: cached build first, one clean retry.
//!
//! Attempt 1 uses the build cache. If it fails, build caches are purged and
//! attempt 2 rebuilds with `--no-cache --pull`. Only a successful attempt
//! yields an [`Artifact`]; nothing from a failed attempt is reused.

use std::time::Duration;

use chrono::Utc;
use launchpad_core::{BuildAttempt, CacheMode, Release, ReleaseId};

use crate::compose::ComposeCommand;
use crate::error::BuildError;
use crate::runner::CommandRunner;

/// Hard upper bound on attempts per release.
pub const MAX_BUILD_ATTEMPTS: u32 = 2;

/// How many attempts to make and how long each may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptPolicy {
    pub max_attempts: u32,
    pub timeout: Option<Duration>,
}

impl AttemptPolicy {
    pub fn new(max_attempts: u32, timeout: Option<Duration>) -> Self {
        Self {
            max_attempts: max_attempts.clamp(1, MAX_BUILD_ATTEMPTS),
            timeout,
        }
    }

    /// Cache mode for a 1-based attempt number.
    pub fn cache_mode(attempt: u32) -> CacheMode {
        if attempt <= 1 {
            CacheMode::Cached
        } else {
            CacheMode::NoCache
        }
    }
}

impl Default for AttemptPolicy {
    fn default() -> Self {
        Self::new(MAX_BUILD_ATTEMPTS, None)
    }
}

/// A runnable build for one release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub release: ReleaseId,
    /// Every attempt made, the last one successful.
    pub attempts: Vec<BuildAttempt>,
}

impl Artifact {
    pub fn cache_mode(&self) -> Option<CacheMode> {
        self.attempts.last().map(|a| a.cache_mode)
    }
}

/// Produces an artifact for a staged release without starting it.
pub trait Builder {
    fn build(&self, release: &Release, policy: &AttemptPolicy) -> Result<Artifact, BuildError>;
}

/// [`Builder`] running `compose build` in the release directory.
pub struct ComposeBuilder<'a> {
    runner: &'a dyn CommandRunner,
    command: ComposeCommand,
}

impl<'a> ComposeBuilder<'a> {
    pub fn new(runner: &'a dyn CommandRunner, command: ComposeCommand) -> Self {
        Self { runner, command }
    }

    fn purge_caches(&self) {
        let spec = self.command.engine(["builder", "prune", "-af"]);
        if let Err(err) = self.runner.run(&spec) {
            tracing::warn!(error = %err, "build cache purge failed; retrying anyway");
        }
    }
}

impl Builder for ComposeBuilder<'_> {
    fn build(&self, release: &Release, policy: &AttemptPolicy) -> Result<Artifact, BuildError> {
        let dir = release.app_dir();
        let mut attempts = Vec::new();
        let mut last_error = String::new();

        for attempt_number in 1..=policy.max_attempts.clamp(1, MAX_BUILD_ATTEMPTS) {
            let cache_mode = AttemptPolicy::cache_mode(attempt_number);
            if attempt_number > 1 {
                self.purge_caches();
            }

            let args: &[&str] = match cache_mode {
                CacheMode::Cached => &["build"],
                CacheMode::NoCache => &["build", "--no-cache", "--pull"],
            };
            let spec = self
                .command
                .compose(&dir, args.iter().copied())
                .timeout(policy.timeout);

            tracing::info!(release = %release.id, attempt = attempt_number, %cache_mode, "build attempt");
            let result = self.runner.run(&spec);
            let succeeded = result.is_ok();
            attempts.push(BuildAttempt {
                attempt_number,
                cache_mode,
                exit_status: match &result {
                    Ok(output) => output.status,
                    Err(err) => err.exit_status(),
                },
                succeeded,
                finished_at: Utc::now(),
            });

            match result {
                Ok(_) => {
                    tracing::info!(release = %release.id, attempt = attempt_number, "build succeeded");
                    return Ok(Artifact {
                        release: release.id,
                        attempts,
                    });
                }
                Err(err) => {
                    tracing::warn!(release = %release.id, attempt = attempt_number, error = %err, "build attempt failed");
                    last_error = err.to_string();
                }
            }
        }

        Err(BuildError::Exhausted {
            attempts,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;
    use launchpad_core::{ReleaseStatus, SourceRef};
    use std::path::PathBuf;

    fn command() -> ComposeCommand {
        ComposeCommand {
            compose: vec!["docker".into(), "compose".into()],
            engine: vec!["docker".into()],
            project: "shop".into(),
            file: "docker-compose.yml".into(),
            app_services: vec!["app".into()],
        }
    }

    fn release() -> Release {
        Release {
            id: ReleaseId(20261019083005000),
            source_ref: SourceRef::from("main"),
            status: ReleaseStatus::Building,
            directory: PathBuf::from("/srv/shop/releases/20261019083005000"),
            attempts: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn first_attempt_success_uses_cache_only() {
        let runner = ScriptedRunner::new();
        let builder = ComposeBuilder::new(&runner, command());
        let artifact = builder.build(&release(), &AttemptPolicy::default()).expect("build");

        assert_eq!(artifact.attempts.len(), 1);
        assert_eq!(artifact.cache_mode(), Some(CacheMode::Cached));
        assert_eq!(runner.count("builder prune"), 0);
        assert_eq!(
            runner.calls(),
            vec!["docker compose -p shop -f docker-compose.yml build"]
        );
    }

    #[test]
    fn failure_purges_and_retries_clean() {
        let runner = ScriptedRunner::new().fail_times("compose -p shop -f docker-compose.yml build", 1);
        let builder = ComposeBuilder::new(&runner, command());
        let artifact = builder.build(&release(), &AttemptPolicy::default()).expect("build");

        let calls = runner.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[0].ends_with(" build"));
        assert_eq!(calls[1], "docker builder prune -af");
        assert!(calls[2].ends_with("build --no-cache --pull"));

        assert_eq!(artifact.attempts.len(), 2);
        assert!(!artifact.attempts[0].succeeded);
        assert_eq!(artifact.attempts[0].exit_status, Some(1));
        assert_eq!(artifact.attempts[1].cache_mode, CacheMode::NoCache);
        assert!(artifact.attempts[1].succeeded);
    }

    #[test]
    fn two_failures_exhaust_the_policy() {
        let runner = ScriptedRunner::new().fail_when("yml build");
        let builder = ComposeBuilder::new(&runner, command());
        let err = builder
            .build(&release(), &AttemptPolicy::new(5, None))
            .unwrap_err();

        assert_eq!(err.attempts().len(), 2, "never more than two attempts");
        assert_eq!(runner.count("yml build"), 2);
        assert!(err.to_string().contains("after 2 attempt(s)"));
        let numbers: Vec<u32> = err.attempts().iter().map(|a| a.attempt_number).collect();
        assert_eq!(numbers, vec![1, 2]);
    }

    #[test]
    fn single_attempt_policy_does_not_retry() {
        let runner = ScriptedRunner::new().fail_when("yml build");
        let builder = ComposeBuilder::new(&runner, command());
        let err = builder
            .build(&release(), &AttemptPolicy::new(1, None))
            .unwrap_err();
        assert_eq!(err.attempts().len(), 1);
        assert_eq!(runner.count("builder prune"), 0);
    }

    #[test]
    fn purge_failure_does_not_prevent_retry() {
        let runner = ScriptedRunner::new()
            .fail_times("docker-compose.yml build", 1)
            .fail_when("builder prune");
        let builder = ComposeBuilder::new(&runner, command());
        assert!(builder.build(&release(), &AttemptPolicy::default()).is_ok());
    }

    #[test]
    fn timeout_is_passed_to_every_attempt() {
        let runner = ScriptedRunner::new().fail_times("docker-compose.yml build", 1);
        let builder = ComposeBuilder::new(&runner, command());
        let timeout = Some(Duration::from_secs(1200));
        builder
            .build(&release(), &AttemptPolicy::new(2, timeout))
            .expect("build");
        let build_specs: Vec<_> = runner
            .specs()
            .into_iter()
            .filter(|s| s.args.contains(&"build".to_string()))
            .collect();
        assert_eq!(build_specs.len(), 2);
        assert!(build_specs.iter().all(|s| s.timeout == timeout));
    }
}
