//! Host-side capabilities for launchpad: external commands, swap, builds,
//! compose service control, HTTP health probing and source population.
//!
//! Every capability sits behind a trait so the deploy orchestrator can be
//! exercised without a container engine.

pub mod build;
pub mod clock;
pub mod compose;
pub mod error;
pub mod guard;
pub mod health;
pub mod meminfo;
pub mod runner;
pub mod source;

#[cfg(test)]
mod testing;

pub use build::{Artifact, AttemptPolicy, Builder, ComposeBuilder};
pub use clock::{Clock, SystemClock};
pub use compose::{ComposeCommand, ComposeController, ServiceController};
pub use error::{BuildError, CommandError, ControllerError, GuardError};
pub use guard::{CapacityGuard, SwapGuard};
pub use health::{HealthCheck, HealthMonitor, HttpProbe, Probe};
pub use meminfo::{HostMemory, ProcHost};
pub use runner::{CommandOutput, CommandRunner, CommandSpec, SystemRunner};
pub use source::{fetcher_for, DirectorySource, GitSource, NoSource, SourceFetcher};
