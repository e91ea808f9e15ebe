//! End-to-end runs of the orchestrator over a real release store and fake
//! host capabilities.

use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;

use launchpad_core::{
    ActivePointer, BuildAttempt, CacheMode, ProbeResult, Release, ReleaseId, ReleaseStatus,
    ReleaseStore, SourceRef, SwapResource,
};
use launchpad_deploy::{Components, DeploySettings, Orchestrator, Outcome, UpdatePath};
use launchpad_host::{
    Artifact, AttemptPolicy, BuildError, Builder, CapacityGuard, Clock, CommandError,
    ControllerError, HealthCheck, HealthMonitor, NoSource, Probe, ServiceController,
};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeGuard {
    provide_swap: bool,
    ensured: u32,
    released: Vec<SwapResource>,
}

impl CapacityGuard for FakeGuard {
    fn ensure_build_capacity(&mut self, _min_memory_mb: u64, swap_size_bytes: u64) -> Option<SwapResource> {
        self.ensured += 1;
        self.provide_swap.then(|| SwapResource {
            path: PathBuf::from("/swapfile"),
            size_bytes: swap_size_bytes,
            created_by_this_run: true,
            activated_by_this_run: true,
        })
    }

    fn release_build_capacity(&mut self, resource: &SwapResource) {
        self.released.push(resource.clone());
    }
}

#[derive(Default)]
struct FakeBuilder {
    fail: bool,
    calls: Cell<u32>,
}

impl Builder for FakeBuilder {
    fn build(&self, release: &Release, _policy: &AttemptPolicy) -> Result<Artifact, BuildError> {
        self.calls.set(self.calls.get() + 1);
        let attempt = |n, cache_mode, succeeded| BuildAttempt {
            attempt_number: n,
            cache_mode,
            exit_status: Some(if succeeded { 0 } else { 1 }),
            succeeded,
            finished_at: Utc::now(),
        };
        if self.fail {
            return Err(BuildError::Exhausted {
                attempts: vec![
                    attempt(1, CacheMode::Cached, false),
                    attempt(2, CacheMode::NoCache, false),
                ],
                last_error: "compile error".into(),
            });
        }
        Ok(Artifact {
            release: release.id,
            attempts: vec![attempt(1, CacheMode::Cached, true)],
        })
    }
}

#[derive(Default)]
struct FakeController {
    fail_partial: bool,
    fail_full: bool,
    fail_rollback: bool,
    calls: RefCell<Vec<String>>,
}

impl FakeController {
    fn called(&self, what: &str) -> usize {
        self.calls.borrow().iter().filter(|c| c.starts_with(what)).count()
    }

    fn outcome(&self, call: String, fail: bool) -> Result<(), ControllerError> {
        self.calls.borrow_mut().push(call);
        if fail {
            return Err(ControllerError {
                action: "fake",
                source: CommandError::Failed {
                    command: "docker compose".into(),
                    status: Some(1),
                    stderr: "boom".into(),
                },
            });
        }
        Ok(())
    }
}

impl ServiceController for FakeController {
    fn update_partial(&self, release: &Release) -> Result<(), ControllerError> {
        self.outcome(format!("partial {}", release.id), self.fail_partial)
    }

    fn update_full(&self, release: &Release) -> Result<(), ControllerError> {
        self.outcome(format!("full {}", release.id), self.fail_full)
    }

    fn rollback(&self, previous: &Release) -> Result<(), ControllerError> {
        self.outcome(format!("rollback {}", previous.id), self.fail_rollback)
    }

    fn stop(&self, release: &Release) -> Result<(), ControllerError> {
        self.outcome(format!("stop {}", release.id), false)
    }

    fn logs(&self, release: &Release, tail: usize) -> Result<String, ControllerError> {
        self.calls.borrow_mut().push(format!("logs {}", release.id));
        Ok(format!("last {tail} lines: app exited with code 137\n"))
    }

    fn prune_dangling(&self) -> Result<(), ControllerError> {
        self.outcome("prune".into(), false)
    }
}

/// Answers successive waits from a script; records each timeout asked for.
struct ScriptedHealth {
    answers: RefCell<Vec<bool>>,
    waits: RefCell<Vec<Duration>>,
}

impl ScriptedHealth {
    fn new(answers: &[bool]) -> Self {
        Self {
            answers: RefCell::new(answers.iter().rev().copied().collect()),
            waits: RefCell::new(vec![]),
        }
    }

    fn waits(&self) -> usize {
        self.waits.borrow().len()
    }
}

impl HealthCheck for ScriptedHealth {
    fn wait_healthy(&self, _endpoint: &str, timeout: Duration, _poll_interval: Duration) -> bool {
        self.waits.borrow_mut().push(timeout);
        self.answers.borrow_mut().pop().unwrap_or(false)
    }
}

#[derive(Default)]
struct StepClock {
    now: Cell<Duration>,
}

impl Clock for StepClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.now.set(self.now.get() + duration);
    }
}

/// Healthy from the n-th probe on.
struct HealthyFrom {
    poll: u32,
    seen: Cell<u32>,
}

impl Probe for HealthyFrom {
    fn probe(&self, _endpoint: &str, _timeout: Duration) -> ProbeResult {
        self.seen.set(self.seen.get() + 1);
        if self.seen.get() >= self.poll {
            ProbeResult::responded(200, Duration::from_millis(3))
        } else {
            ProbeResult::unreachable(Duration::from_millis(1))
        }
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn settings() -> DeploySettings {
    DeploySettings {
        endpoint: "http://127.0.0.1:8080/".into(),
        poll_interval: Duration::from_secs(2),
        partial_timeout: Duration::from_secs(10),
        full_timeout: Duration::from_secs(30),
        min_memory_mb: 2048,
        swap_size_bytes: 2 * 1024 * 1024 * 1024,
        attempts: AttemptPolicy::default(),
        log_tail_lines: 50,
    }
}

/// A store with release `previous` already promoted, as after an earlier deploy.
fn store_with_active(root: &TempDir) -> (ReleaseStore, ActivePointer, ReleaseId) {
    let store = ReleaseStore::new(root.path());
    let mut pointer = ActivePointer::open(root.path());
    let mut previous = store.stage(SourceRef::from("v1")).expect("stage previous");
    store.promote(&mut pointer, &mut previous).expect("promote previous");
    (store, pointer, previous.id)
}

fn run(
    store: &ReleaseStore,
    pointer: &mut ActivePointer,
    guard: &mut FakeGuard,
    builder: &FakeBuilder,
    controller: &FakeController,
    health: &dyn HealthCheck,
) -> launchpad_deploy::DeployReport {
    let components = Components {
        guard,
        fetcher: &NoSource,
        builder,
        controller,
        health,
    };
    Orchestrator::new(store, settings(), components).run(SourceRef::from("v2"), pointer)
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn partial_update_healthy_at_third_poll_promotes_without_full_rebuild() {
    let root = TempDir::new().expect("tempdir");
    let (store, mut pointer, previous) = store_with_active(&root);
    let mut guard = FakeGuard::default();
    let builder = FakeBuilder::default();
    let controller = FakeController::default();
    let clock = StepClock::default();
    let probe = HealthyFrom {
        poll: 3,
        seen: Cell::new(0),
    };
    let health = HealthMonitor::new(&probe, &clock, Duration::from_secs(1));

    let report = run(&store, &mut pointer, &mut guard, &builder, &controller, &health);

    assert_eq!(clock.now(), Duration::from_secs(6));
    let release = match report.outcome {
        Outcome::Promoted {
            release,
            path: UpdatePath::Partial,
            previous: Some(p),
            cleanup_error: None,
        } if p == previous => release,
        ref other => panic!("unexpected outcome: {other:?}"),
    };
    assert_eq!(report.exit_code(), 0);
    assert_eq!(controller.called("full"), 0, "full rebuild must not run");
    assert_eq!(pointer.read().expect("read"), Some(release));
    assert_eq!(store.load(release).expect("load").status, ReleaseStatus::Promoted);
    assert!(!launchpad_core::paths::release_dir(root.path(), previous).exists());
    assert_eq!(
        report.states(),
        vec![
            "idle",
            "cleaning",
            "staging",
            "building",
            "partial-update",
            "health-check(partial)",
            "promote",
            "promoted",
            "idle"
        ]
    );
}

#[test]
fn leftover_previous_release_exits_with_its_own_code() {
    let root = TempDir::new().expect("tempdir");
    let (store, mut pointer, previous) = store_with_active(&root);
    // A plain file where the release directory was: directory removal fails
    // even for root.
    let old_dir = launchpad_core::paths::release_dir(root.path(), previous);
    std::fs::remove_dir_all(&old_dir).expect("remove old dir");
    std::fs::write(&old_dir, "in the way").expect("write blocker");
    let mut guard = FakeGuard::default();
    let builder = FakeBuilder::default();
    let controller = FakeController::default();
    let health = ScriptedHealth::new(&[true]);

    let report = run(&store, &mut pointer, &mut guard, &builder, &controller, &health);

    let release = match &report.outcome {
        Outcome::Promoted {
            release,
            cleanup_error: Some(err),
            ..
        } => {
            assert!(err.contains(&previous.to_string()), "got: {err}");
            *release
        }
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert_eq!(report.exit_code(), 7);
    assert!(report.outcome.is_success(), "the new release is serving");
    assert_eq!(pointer.read().expect("read"), Some(release));
    assert!(old_dir.exists());
}

#[test]
fn partial_timeout_then_full_rebuild_healthy_promotes_and_releases_swap() {
    let root = TempDir::new().expect("tempdir");
    let (store, mut pointer, previous) = store_with_active(&root);
    let mut guard = FakeGuard {
        provide_swap: true,
        ..FakeGuard::default()
    };
    let builder = FakeBuilder::default();
    let controller = FakeController::default();
    let health = ScriptedHealth::new(&[false, true]);

    let report = run(&store, &mut pointer, &mut guard, &builder, &controller, &health);

    assert!(matches!(
        report.outcome,
        Outcome::Promoted {
            path: UpdatePath::Full,
            ..
        }
    ));
    assert_eq!(controller.called("partial"), 1);
    assert_eq!(controller.called("full"), 1);
    assert_eq!(
        *health.waits.borrow(),
        vec![Duration::from_secs(10), Duration::from_secs(30)]
    );
    assert!(!launchpad_core::paths::release_dir(root.path(), previous).exists());
    assert_eq!(guard.ensured, 1);
    assert_eq!(guard.released.len(), 1, "swap released exactly once");
    assert!(report.swap.is_some());
}

#[test]
fn partial_command_failure_goes_straight_to_full_rebuild() {
    let root = TempDir::new().expect("tempdir");
    let (store, mut pointer, _) = store_with_active(&root);
    let mut guard = FakeGuard::default();
    let builder = FakeBuilder::default();
    let controller = FakeController {
        fail_partial: true,
        ..FakeController::default()
    };
    let health = ScriptedHealth::new(&[true]);

    let report = run(&store, &mut pointer, &mut guard, &builder, &controller, &health);

    assert!(matches!(
        report.outcome,
        Outcome::Promoted {
            path: UpdatePath::Full,
            ..
        }
    ));
    assert_eq!(health.waits(), 1, "no partial health check after a failed partial update");
    assert!(report.warnings.iter().any(|w| w.contains("partial update failed")));
}

#[test]
fn failed_build_leaves_active_release_untouched() {
    let root = TempDir::new().expect("tempdir");
    let (store, mut pointer, previous) = store_with_active(&root);
    let mut guard = FakeGuard {
        provide_swap: true,
        ..FakeGuard::default()
    };
    let builder = FakeBuilder {
        fail: true,
        ..FakeBuilder::default()
    };
    let controller = FakeController::default();
    let health = ScriptedHealth::new(&[true]);

    let report = run(&store, &mut pointer, &mut guard, &builder, &controller, &health);

    let failed = match report.outcome {
        Outcome::BuildFailed { release, .. } => release,
        ref other => panic!("unexpected outcome: {other:?}"),
    };
    assert_eq!(report.exit_code(), 3);
    assert_eq!(pointer.read().expect("read"), Some(previous));
    assert!(launchpad_core::paths::release_dir(root.path(), previous).exists());
    assert!(!launchpad_core::paths::release_dir(root.path(), failed).exists());
    assert_eq!(health.waits(), 0);
    assert_eq!(controller.called("partial") + controller.called("full"), 0);
    assert_eq!(report.build_attempts.len(), 2);
    assert_eq!(guard.released.len(), 1);
}

#[test]
fn both_paths_unhealthy_roll_back_with_logs() {
    let root = TempDir::new().expect("tempdir");
    let (store, mut pointer, previous) = store_with_active(&root);
    let mut guard = FakeGuard {
        provide_swap: true,
        ..FakeGuard::default()
    };
    let builder = FakeBuilder::default();
    let controller = FakeController::default();
    // partial, full, then the restored release.
    let health = ScriptedHealth::new(&[false, false, true]);

    let report = run(&store, &mut pointer, &mut guard, &builder, &controller, &health);

    let failed = match report.outcome {
        Outcome::RolledBack {
            failed, restored, ..
        } if restored == previous => failed,
        ref other => panic!("unexpected outcome: {other:?}"),
    };
    assert_ne!(report.exit_code(), 0);
    assert_eq!(report.exit_code(), 4);
    assert!(report.logs.as_deref().is_some_and(|l| l.contains("code 137")));
    assert_eq!(controller.called(&format!("rollback {previous}")), 1);
    assert_eq!(controller.called(&format!("stop {failed}")), 1);
    assert_eq!(pointer.read().expect("read"), Some(previous));
    assert!(!launchpad_core::paths::release_dir(root.path(), failed).exists());
    assert_eq!(guard.released.len(), 1);
}

#[test]
fn rollback_without_previous_release_is_fatal() {
    let root = TempDir::new().expect("tempdir");
    let store = ReleaseStore::new(root.path());
    let mut pointer = ActivePointer::open(root.path());
    let mut guard = FakeGuard::default();
    let builder = FakeBuilder::default();
    let controller = FakeController::default();
    let health = ScriptedHealth::new(&[false, false]);

    let report = run(&store, &mut pointer, &mut guard, &builder, &controller, &health);

    assert!(matches!(report.outcome, Outcome::Fatal { .. }), "{:?}", report.outcome);
    assert_eq!(report.exit_code(), 5);
    assert_eq!(pointer.read().expect("read"), None);
    assert_eq!(controller.called("rollback"), 0);
    assert!(report.logs.is_some());
}

#[test]
fn failed_rollback_is_fatal() {
    let root = TempDir::new().expect("tempdir");
    let (store, mut pointer, _) = store_with_active(&root);
    let mut guard = FakeGuard::default();
    let builder = FakeBuilder::default();
    let controller = FakeController {
        fail_rollback: true,
        ..FakeController::default()
    };
    let health = ScriptedHealth::new(&[false, false]);

    let report = run(&store, &mut pointer, &mut guard, &builder, &controller, &health);

    assert!(matches!(report.outcome, Outcome::Fatal { .. }));
    assert!(report.outcome.error().is_some_and(|e| e.contains("rollback")));
}

#[test]
fn never_promotes_without_healthy_check() {
    let root = TempDir::new().expect("tempdir");
    let (store, mut pointer, previous) = store_with_active(&root);
    let mut guard = FakeGuard::default();
    let builder = FakeBuilder::default();
    let controller = FakeController {
        fail_full: true,
        ..FakeController::default()
    };
    // Partial unhealthy, full fails outright, restored release healthy.
    let health = ScriptedHealth::new(&[false, true]);

    let report = run(&store, &mut pointer, &mut guard, &builder, &controller, &health);

    assert!(!report.states().contains(&"promote"));
    assert!(matches!(report.outcome, Outcome::RolledBack { .. }));
    assert_eq!(pointer.read().expect("read"), Some(previous));
}

#[test]
fn stage_failure_changes_nothing() {
    let root = TempDir::new().expect("tempdir");
    // A file where the releases directory should go.
    std::fs::write(root.path().join("releases"), "").expect("write");
    let store = ReleaseStore::new(root.path());
    let mut pointer = ActivePointer::open(root.path());
    let mut guard = FakeGuard {
        provide_swap: true,
        ..FakeGuard::default()
    };
    let builder = FakeBuilder::default();
    let controller = FakeController::default();
    let health = ScriptedHealth::new(&[]);

    let report = run(&store, &mut pointer, &mut guard, &builder, &controller, &health);

    assert!(matches!(report.outcome, Outcome::StageFailed { .. }));
    assert_eq!(report.exit_code(), 2);
    assert_eq!(builder.calls.get(), 0);
    assert_eq!(guard.released.len(), 1, "capacity released even when staging fails");
}
