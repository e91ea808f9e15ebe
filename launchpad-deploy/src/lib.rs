//! Deploy runs: the orchestrator state machine, the run report, the deploy
//! lock and the run history.

pub mod error;
pub mod history;
pub mod lock;
pub mod orchestrator;
pub mod report;

pub use error::DeployError;
pub use history::HistoryEntry;
pub use lock::DeployLock;
pub use orchestrator::{Components, DeploySettings, Orchestrator};
pub use report::{DeployReport, Outcome, Transition, UpdatePath};
