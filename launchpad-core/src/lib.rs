//! Launchpad core library: release domain types, configuration, and the
//! release store with its active pointer.
//!
//! - [`types`]: newtypes and domain structs
//! - [`config`]: `launchpad.yaml` loading and validation
//! - [`paths`]: storage layout under the release root
//! - [`store`]: stage / promote / discard / sweep

pub mod config;
pub mod error;
pub mod paths;
pub mod store;
pub mod types;

pub use config::DeployConfig;
pub use error::{ConfigError, StoreError};
pub use store::{ActivePointer, Promotion, ReleaseStore};
pub use types::{
    BuildAttempt, CacheMode, ProbeResult, Release, ReleaseId, ReleaseStatus, SourceRef,
    SourceSpec, SwapResource,
};
