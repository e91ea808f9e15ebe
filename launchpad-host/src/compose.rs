//! Service Controller backed by a compose-style CLI.
//!
//! Every invocation pins the project name and compose file and runs inside
//! the release's `app/` directory, so containers of consecutive releases
//! belong to the same compose project.

use std::path::Path;
use std::time::Duration;

use launchpad_core::config::DeployConfig;
use launchpad_core::Release;

use crate::error::{CommandError, ControllerError};
use crate::runner::{CommandOutput, CommandRunner, CommandSpec};

/// Starts, recreates and stops the service for a release.
pub trait ServiceController {
    /// Recreate only the application services; dependencies keep running.
    fn update_partial(&self, release: &Release) -> Result<(), ControllerError>;

    /// Stop everything, drop old images, rebuild clean and start fresh.
    fn update_full(&self, release: &Release) -> Result<(), ControllerError>;

    /// Bring the previously active release's services back up.
    fn rollback(&self, previous: &Release) -> Result<(), ControllerError>;

    /// Stop all services of the project.
    fn stop(&self, release: &Release) -> Result<(), ControllerError>;

    /// Last `tail` lines of service logs.
    fn logs(&self, release: &Release, tail: usize) -> Result<String, ControllerError>;

    /// Remove dangling images left behind by earlier runs.
    fn prune_dangling(&self) -> Result<(), ControllerError>;
}

/// How to invoke compose and the container engine for one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeCommand {
    pub compose: Vec<String>,
    pub engine: Vec<String>,
    pub project: String,
    pub file: String,
    pub app_services: Vec<String>,
}

impl ComposeCommand {
    pub fn from_config(config: &DeployConfig) -> Self {
        Self {
            compose: config.compose.command.clone(),
            engine: config.compose.engine.clone(),
            project: config.project.clone(),
            file: config.compose.file.clone(),
            app_services: config.compose.app_services.clone(),
        }
    }

    /// `<compose> -p <project> -f <file> <args…>` in `dir`.
    pub fn compose<I, S>(&self, dir: &Path, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::from_argv(&self.compose)
            .args(["-p", self.project.as_str(), "-f", self.file.as_str()])
            .args(args)
            .current_dir(dir)
    }

    /// `<engine> <args…>`, e.g. `docker builder prune -af`.
    pub fn engine<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::from_argv(&self.engine).args(args)
    }
}

/// [`ServiceController`] driving `docker compose` (or a compatible CLI).
pub struct ComposeController<'a> {
    runner: &'a dyn CommandRunner,
    command: ComposeCommand,
    build_timeout: Option<Duration>,
}

impl<'a> ComposeController<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        command: ComposeCommand,
        build_timeout: Option<Duration>,
    ) -> Self {
        Self {
            runner,
            command,
            build_timeout,
        }
    }

    fn step(&self, action: &'static str, spec: CommandSpec) -> Result<CommandOutput, ControllerError> {
        tracing::info!(action, command = %spec, "service control");
        self.runner
            .run(&spec)
            .map_err(|source: CommandError| ControllerError { action, source })
    }
}

impl ServiceController for ComposeController<'_> {
    fn update_partial(&self, release: &Release) -> Result<(), ControllerError> {
        let dir = release.app_dir();
        let mut args = vec!["up", "-d", "--no-deps", "--force-recreate"];
        args.extend(self.command.app_services.iter().map(String::as_str));
        self.step("partial update", self.command.compose(&dir, args))?;
        Ok(())
    }

    fn update_full(&self, release: &Release) -> Result<(), ControllerError> {
        let dir = release.app_dir();
        self.step(
            "stop services",
            self.command.compose(&dir, ["down", "--remove-orphans"]),
        )?;
        self.step("remove images", self.command.engine(["image", "prune", "-af"]))?;
        self.step(
            "clean rebuild",
            self.command
                .compose(&dir, ["build", "--no-cache", "--pull"])
                .timeout(self.build_timeout),
        )?;
        self.step(
            "start services",
            self.command.compose(&dir, ["up", "-d", "--force-recreate"]),
        )?;
        Ok(())
    }

    fn rollback(&self, previous: &Release) -> Result<(), ControllerError> {
        let dir = previous.app_dir();
        self.step(
            "rollback",
            self.command
                .compose(&dir, ["up", "-d", "--build", "--force-recreate"])
                .timeout(self.build_timeout),
        )?;
        Ok(())
    }

    fn stop(&self, release: &Release) -> Result<(), ControllerError> {
        self.step("stop services", self.command.compose(&release.app_dir(), ["down"]))?;
        Ok(())
    }

    fn logs(&self, release: &Release, tail: usize) -> Result<String, ControllerError> {
        let spec = self.command.compose(
            &release.app_dir(),
            [
                "logs".to_string(),
                "--no-color".to_string(),
                "--tail".to_string(),
                tail.to_string(),
            ],
        );
        let output = self
            .runner
            .run(&spec)
            .map_err(|source| ControllerError { action: "collect logs", source })?;
        Ok(output.stdout)
    }

    fn prune_dangling(&self) -> Result<(), ControllerError> {
        self.step("prune dangling images", self.command.engine(["image", "prune", "-f"]))?;
        Ok(())
    }
}
