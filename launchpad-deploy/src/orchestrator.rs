//! Deployment Orchestrator: the state machine sequencing one deploy run.
//!
//! ```text
//! Idle → Cleaning → Staging → Building → PartialUpdate → HealthCheck(partial) → Promote
//!                                              │                │
//!                                              └──── FullRebuild ←┘
//!                                                        │
//!                                              HealthCheck(full) → Promote | Rollback
//! ```
//!
//! Every transition is logged and recorded in the [`DeployReport`]. Build
//! capacity acquired while staging is released exactly once when the run
//! reaches `Done`, whatever the outcome. `Promote` is only reachable from a
//! health check that returned healthy.

use std::time::Duration;

use chrono::Utc;

use launchpad_core::config::DeployConfig;
use launchpad_core::{
    ActivePointer, BuildAttempt, Release, ReleaseStatus, ReleaseStore, SourceRef, SwapResource,
};
use launchpad_host::{
    AttemptPolicy, Builder, CapacityGuard, HealthCheck, ServiceController, SourceFetcher,
};

use crate::report::{DeployReport, Outcome, Transition, UpdatePath};

// ---------------------------------------------------------------------------
// Settings and components
// ---------------------------------------------------------------------------

/// Tunables of a run, usually taken from `launchpad.yaml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploySettings {
    pub endpoint: String,
    pub poll_interval: Duration,
    pub partial_timeout: Duration,
    pub full_timeout: Duration,
    pub min_memory_mb: u64,
    pub swap_size_bytes: u64,
    pub attempts: AttemptPolicy,
    pub log_tail_lines: usize,
}

impl DeploySettings {
    pub fn from_config(config: &DeployConfig) -> Self {
        Self {
            endpoint: config.health.endpoint(),
            poll_interval: config.health.poll_interval(),
            partial_timeout: config.health.partial_timeout(),
            full_timeout: config.health.full_timeout(),
            min_memory_mb: config.resources.min_memory_mb,
            swap_size_bytes: config.resources.swap_size_bytes(),
            attempts: AttemptPolicy::new(config.build_attempts(), config.build.timeout()),
            log_tail_lines: config.logs.tail_lines,
        }
    }
}

/// The capabilities a run drives.
pub struct Components<'a> {
    pub guard: &'a mut dyn CapacityGuard,
    pub fetcher: &'a dyn SourceFetcher,
    pub builder: &'a dyn Builder,
    pub controller: &'a dyn ServiceController,
    pub health: &'a dyn HealthCheck,
}

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// Why a failed release is being rolled back.
#[derive(Debug)]
struct Failure {
    release: Release,
    reason: String,
}

#[derive(Debug)]
enum State {
    Idle,
    Cleaning,
    Staging,
    Building(Release),
    PartialUpdate(Release),
    HealthCheck(Release, UpdatePath),
    FullRebuild(Release),
    Promote(Release, UpdatePath),
    Rollback(Failure),
    Done(Outcome),
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Idle => "idle",
            State::Cleaning => "cleaning",
            State::Staging => "staging",
            State::Building(_) => "building",
            State::PartialUpdate(_) => "partial-update",
            State::HealthCheck(_, UpdatePath::Partial) => "health-check(partial)",
            State::HealthCheck(_, UpdatePath::Full) => "health-check(full)",
            State::FullRebuild(_) => "full-rebuild",
            State::Promote(..) => "promote",
            State::Rollback(_) => "rollback",
            State::Done(Outcome::Promoted { .. }) => "promoted",
            State::Done(Outcome::RolledBack { .. }) => "rolled-back",
            State::Done(_) => "failed",
        }
    }
}

// ---------------------------------------------------------------------------
// Run context
// ---------------------------------------------------------------------------

/// Mutable state owned by one run: the active pointer, the swap resource
/// and everything collected for the report.
struct RunContext<'p> {
    pointer: &'p mut ActivePointer,
    source_ref: SourceRef,
    swap: Option<SwapResource>,
    swap_seen: Option<SwapResource>,
    transitions: Vec<Transition>,
    attempts: Vec<BuildAttempt>,
    logs: Option<String>,
    warnings: Vec<String>,
}

impl RunContext<'_> {
    fn warn(&mut self, message: String) {
        self.warnings.push(message);
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator<'a> {
    store: &'a ReleaseStore,
    settings: DeploySettings,
    components: Components<'a>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(store: &'a ReleaseStore, settings: DeploySettings, components: Components<'a>) -> Self {
        Self {
            store,
            settings,
            components,
        }
    }

    /// Run one deploy of `source_ref` to completion.
    ///
    /// Never fails: every problem ends in an [`Outcome`]. The caller holds
    /// the deploy lock and owns `pointer` for the duration of the run.
    pub fn run(&mut self, source_ref: SourceRef, pointer: &mut ActivePointer) -> DeployReport {
        let started_at = Utc::now();
        let mut ctx = RunContext {
            pointer,
            source_ref: source_ref.clone(),
            swap: None,
            swap_seen: None,
            transitions: Vec::new(),
            attempts: Vec::new(),
            logs: None,
            warnings: Vec::new(),
        };

        tracing::info!(source_ref = %source_ref, "deploy started");
        let mut state = State::Idle;
        let (outcome, last) = loop {
            let from = state.name();
            state = self.step(state, &mut ctx);
            let to = state.name();
            record(&mut ctx, from, to);
            if let State::Done(outcome) = state {
                break (outcome, to);
            }
        };

        // Balanced acquire/release on every path.
        if let Some(swap) = ctx.swap.take() {
            self.components.guard.release_build_capacity(&swap);
        }
        record(&mut ctx, last, State::Idle.name());

        match &outcome {
            Outcome::Promoted { cleanup_error: None, .. } => tracing::info!(%outcome, "deploy finished"),
            Outcome::Promoted { .. } => tracing::warn!(%outcome, exit_code = outcome.exit_code(), "deploy finished"),
            _ => tracing::error!(%outcome, exit_code = outcome.exit_code(), "deploy finished"),
        }

        DeployReport {
            source_ref,
            started_at,
            finished_at: Utc::now(),
            outcome,
            transitions: ctx.transitions,
            build_attempts: ctx.attempts,
            swap: ctx.swap_seen,
            logs: ctx.logs,
            warnings: ctx.warnings,
        }
    }

    fn step(&mut self, state: State, ctx: &mut RunContext<'_>) -> State {
        match state {
            State::Idle => State::Cleaning,
            State::Cleaning => self.clean(ctx),
            State::Staging => self.stage(ctx),
            State::Building(release) => self.build(release, ctx),
            State::PartialUpdate(release) => self.update_partial(release, ctx),
            State::HealthCheck(release, path) => self.check_health(release, path, ctx),
            State::FullRebuild(release) => self.rebuild_full(release, ctx),
            State::Promote(release, path) => self.promote(release, path, ctx),
            State::Rollback(failure) => self.roll_back(failure, ctx),
            done @ State::Done(_) => done,
        }
    }

    // -- Cleaning ----------------------------------------------------------

    /// Remove leftovers of earlier runs. Best-effort.
    fn clean(&mut self, ctx: &mut RunContext<'_>) -> State {
        match self.store.sweep() {
            Ok(removed) if !removed.is_empty() => {
                tracing::info!(count = removed.len(), "orphaned releases removed")
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(error = %err, "release sweep failed");
                ctx.warn(format!("cleanup: release sweep failed: {err}"));
            }
        }
        if let Err(err) = self.components.controller.prune_dangling() {
            tracing::warn!(error = %err, "image prune failed");
            ctx.warn(format!("cleanup: {err}"));
        }
        State::Staging
    }

    // -- Staging -----------------------------------------------------------

    fn stage(&mut self, ctx: &mut RunContext<'_>) -> State {
        let swap = self
            .components
            .guard
            .ensure_build_capacity(self.settings.min_memory_mb, self.settings.swap_size_bytes);
        if let Some(swap) = &swap {
            tracing::info!(path = %swap.path.display(), created = swap.created_by_this_run, "build capacity ensured");
        }
        ctx.swap_seen = swap.clone();
        ctx.swap = swap;

        let mut release = match self.store.stage(ctx.source_ref.clone()) {
            Ok(release) => release,
            Err(err) => {
                tracing::error!(error = %err, "staging failed");
                return State::Done(Outcome::StageFailed {
                    error: err.to_string(),
                });
            }
        };

        if let Err(err) = self.components.fetcher.fetch(&release) {
            tracing::error!(release = %release.id, error = %err, "source population failed");
            self.discard(&mut release, ctx);
            return State::Done(Outcome::StageFailed {
                error: err.to_string(),
            });
        }

        State::Building(release)
    }

    // -- Building ----------------------------------------------------------

    fn build(&mut self, mut release: Release, ctx: &mut RunContext<'_>) -> State {
        self.set_status(&mut release, ReleaseStatus::Building, ctx);

        let result = self.components.builder.build(&release, &self.settings.attempts);
        let attempts = match &result {
            Ok(artifact) => artifact.attempts.clone(),
            Err(err) => err.attempts().to_vec(),
        };
        for attempt in attempts {
            ctx.attempts.push(attempt.clone());
            if let Err(err) = self.store.record_attempt(&mut release, attempt) {
                tracing::warn!(release = %release.id, error = %err, "failed to record build attempt");
            }
        }

        match result {
            Ok(_) => State::PartialUpdate(release),
            Err(err) => {
                // Nothing was started; the active release keeps serving.
                tracing::error!(release = %release.id, error = %err, "build failed");
                self.set_status(&mut release, ReleaseStatus::Failed, ctx);
                self.discard(&mut release, ctx);
                State::Done(Outcome::BuildFailed {
                    release: release.id,
                    error: err.to_string(),
                })
            }
        }
    }

    // -- Updates -----------------------------------------------------------

    fn update_partial(&mut self, release: Release, ctx: &mut RunContext<'_>) -> State {
        match self.components.controller.update_partial(&release) {
            Ok(()) => State::HealthCheck(release, UpdatePath::Partial),
            Err(err) => {
                tracing::warn!(release = %release.id, error = %err, "partial update failed, falling back to full rebuild");
                ctx.warn(format!("partial update failed: {err}"));
                State::FullRebuild(release)
            }
        }
    }

    fn rebuild_full(&mut self, release: Release, _ctx: &mut RunContext<'_>) -> State {
        match self.components.controller.update_full(&release) {
            Ok(()) => State::HealthCheck(release, UpdatePath::Full),
            Err(err) => {
                tracing::error!(release = %release.id, error = %err, "full rebuild failed");
                State::Rollback(Failure {
                    release,
                    reason: err.to_string(),
                })
            }
        }
    }

    fn check_health(&mut self, mut release: Release, path: UpdatePath, ctx: &mut RunContext<'_>) -> State {
        let timeout = match path {
            UpdatePath::Partial => self.settings.partial_timeout,
            UpdatePath::Full => self.settings.full_timeout,
        };
        let healthy = self.components.health.wait_healthy(
            &self.settings.endpoint,
            timeout,
            self.settings.poll_interval,
        );

        match (healthy, path) {
            (true, _) => {
                self.set_status(&mut release, ReleaseStatus::Healthy, ctx);
                State::Promote(release, path)
            }
            (false, UpdatePath::Partial) => {
                tracing::warn!(release = %release.id, "partial update not healthy in time, falling back to full rebuild");
                State::FullRebuild(release)
            }
            (false, UpdatePath::Full) => State::Rollback(Failure {
                release,
                reason: format!("not healthy within {}s after full rebuild", timeout.as_secs()),
            }),
        }
    }

    // -- Promotion ---------------------------------------------------------

    fn promote(&mut self, mut release: Release, path: UpdatePath, ctx: &mut RunContext<'_>) -> State {
        match self.store.promote(&mut *ctx.pointer, &mut release) {
            Ok(promotion) => {
                ctx.warnings.extend(promotion.warnings);
                State::Done(Outcome::Promoted {
                    release: release.id,
                    path,
                    previous: promotion.previous,
                    cleanup_error: promotion.cleanup_error,
                })
            }
            Err(err) => {
                tracing::error!(release = %release.id, error = %err, "promotion failed; new release is serving without the pointer");
                State::Done(Outcome::PromotionFailed {
                    release: release.id,
                    error: err.to_string(),
                })
            }
        }
    }

    // -- Rollback ----------------------------------------------------------

    fn roll_back(&mut self, failure: Failure, ctx: &mut RunContext<'_>) -> State {
        let Failure {
            mut release,
            reason,
        } = failure;
        let controller = self.components.controller;

        match controller.logs(&release, self.settings.log_tail_lines) {
            Ok(logs) => ctx.logs = Some(logs),
            Err(err) => {
                tracing::warn!(release = %release.id, error = %err, "could not collect service logs");
                ctx.warn(format!("log collection failed: {err}"));
            }
        }
        if let Err(err) = controller.stop(&release) {
            tracing::warn!(release = %release.id, error = %err, "could not stop failed services");
            ctx.warn(format!("stopping failed release: {err}"));
        }
        self.set_status(&mut release, ReleaseStatus::Failed, ctx);
        self.discard(&mut release, ctx);

        let fatal = |error: String| {
            State::Done(Outcome::Fatal {
                release: Some(release.id),
                error: format!("{reason}; {error}"),
            })
        };

        let previous = match ctx.pointer.read() {
            Ok(Some(id)) => id,
            Ok(None) => return fatal("no previous release to roll back to".to_string()),
            Err(err) => return fatal(format!("cannot read active pointer: {err}")),
        };
        let previous = match self.store.load(previous) {
            Ok(release) => release,
            Err(err) => return fatal(format!("cannot load previous release: {err}")),
        };

        tracing::warn!(failed = %release.id, restore = %previous.id, "rolling back");
        if let Err(err) = controller.rollback(&previous) {
            return fatal(format!("rollback to {} failed: {err}", previous.id));
        }
        let healthy = self.components.health.wait_healthy(
            &self.settings.endpoint,
            self.settings.full_timeout,
            self.settings.poll_interval,
        );
        if !healthy {
            return fatal(format!("release {} not healthy after rollback", previous.id));
        }

        State::Done(Outcome::RolledBack {
            failed: release.id,
            restored: previous.id,
            reason,
        })
    }

    // -- Helpers -----------------------------------------------------------

    fn set_status(&self, release: &mut Release, status: ReleaseStatus, ctx: &mut RunContext<'_>) {
        if let Err(err) = self.store.set_status(release, status) {
            tracing::warn!(release = %release.id, %status, error = %err, "failed to record release status");
            ctx.warn(format!("release {}: status {status} not recorded: {err}", release.id));
        }
    }

    fn discard(&self, release: &mut Release, ctx: &mut RunContext<'_>) {
        if let Err(err) = self.store.discard(release) {
            tracing::warn!(release = %release.id, error = %err, "failed to discard release");
            ctx.warn(format!("release {} not discarded: {err}", release.id));
        }
    }
}

fn record(ctx: &mut RunContext<'_>, from: &'static str, to: &'static str) {
    tracing::info!(from, to, "state transition");
    ctx.transitions.push(Transition {
        from: from.to_string(),
        to: to.to_string(),
        at: Utc::now(),
    });
}
