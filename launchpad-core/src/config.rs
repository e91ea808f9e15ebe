//! `launchpad.yaml`: deployment configuration.
//!
//! Every section except `project` and `root` has defaults. Relative paths
//! (`root`, `source.path`) are resolved against the directory containing the
//! config file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::SourceSpec;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "launchpad.yaml";

/// Upper bound for every health timing setting (one day).
pub const MAX_HEALTH_SECS: u64 = 24 * 60 * 60;

/// Root of `launchpad.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Compose project name shared by every release of this service.
    pub project: String,
    /// Release-storage root.
    pub root: PathBuf,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub compose: ComposeConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub resources: ResourceConfig,
    #[serde(default)]
    pub logs: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Git URL or path cloned with `git clone --depth 1 --branch <ref>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    /// Local directory copied into each release instead of cloning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default = "default_ref")]
    pub default_ref: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            repository: None,
            path: None,
            default_ref: default_ref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeConfig {
    /// Argv prefix for compose invocations.
    #[serde(default = "default_compose_command")]
    pub command: Vec<String>,
    #[serde(default = "default_compose_file")]
    pub file: String,
    /// Services recreated by the partial-update path.
    #[serde(default = "default_app_services")]
    pub app_services: Vec<String>,
    /// Argv prefix for image/builder maintenance (`image prune`, `builder prune`).
    #[serde(default = "default_engine_command")]
    pub engine: Vec<String>,
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            command: default_compose_command(),
            file: default_compose_file(),
            app_services: default_app_services(),
            engine: default_engine_command(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_host")]
    pub host: String,
    #[serde(default = "default_health_port")]
    pub port: u16,
    #[serde(default = "default_health_path")]
    pub path: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_partial_timeout")]
    pub partial_timeout_secs: u64,
    #[serde(default = "default_full_timeout")]
    pub full_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            host: default_health_host(),
            port: default_health_port(),
            path: default_health_path(),
            poll_interval_secs: default_poll_interval(),
            partial_timeout_secs: default_partial_timeout(),
            full_timeout_secs: default_full_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl HealthConfig {
    /// `http://<host>:<port><path>`
    pub fn endpoint(&self) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        format!("http://{}:{}{}", self.host, self.port, path)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn partial_timeout(&self) -> Duration {
        Duration::from_secs(self.partial_timeout_secs)
    }

    pub fn full_timeout(&self) -> Duration {
        Duration::from_secs(self.full_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Clamped to `1..=2`.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            max_attempts: default_max_attempts(),
        }
    }
}

impl BuildConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Hosts with less total memory get temporary swap for the build.
    #[serde(default = "default_min_memory_mb")]
    pub min_memory_mb: u64,
    #[serde(default = "default_swap_path")]
    pub swap_path: PathBuf,
    #[serde(default = "default_swap_size_mb")]
    pub swap_size_mb: u64,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            min_memory_mb: default_min_memory_mb(),
            swap_path: default_swap_path(),
            swap_size_mb: default_swap_size_mb(),
        }
    }
}

impl ResourceConfig {
    pub fn swap_size_bytes(&self) -> u64 {
        self.swap_size_mb * 1024 * 1024
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Service log lines captured when a deploy fails.
    #[serde(default = "default_tail_lines")]
    pub tail_lines: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            tail_lines: default_tail_lines(),
        }
    }
}

fn default_ref() -> String {
    "main".to_string()
}
fn default_compose_command() -> Vec<String> {
    vec!["docker".to_string(), "compose".to_string()]
}
fn default_engine_command() -> Vec<String> {
    vec!["docker".to_string()]
}
fn default_compose_file() -> String {
    "docker-compose.yml".to_string()
}
fn default_app_services() -> Vec<String> {
    vec!["app".to_string()]
}
fn default_health_host() -> String {
    "127.0.0.1".to_string()
}
fn default_health_port() -> u16 {
    8080
}
fn default_health_path() -> String {
    "/".to_string()
}
fn default_poll_interval() -> u64 {
    2
}
fn default_partial_timeout() -> u64 {
    60
}
fn default_full_timeout() -> u64 {
    180
}
fn default_request_timeout() -> u64 {
    5
}
fn default_max_attempts() -> u32 {
    2
}
fn default_min_memory_mb() -> u64 {
    2048
}
fn default_swap_path() -> PathBuf {
    PathBuf::from("/swapfile")
}
fn default_swap_size_mb() -> u64 {
    2048
}
fn default_tail_lines() -> usize {
    100
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

impl DeployConfig {
    /// Load, resolve and validate the config at `path`.
    ///
    /// Returns `ConfigError::NotFound` if absent and `ConfigError::Parse`
    /// (with path + line context) if malformed.
    pub fn load_at(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: DeployConfig =
            serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let base = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        config.resolve_relative_paths(base);
        config.validate()?;
        Ok(config)
    }

    fn resolve_relative_paths(&mut self, base: &Path) {
        if self.root.is_relative() {
            self.root = base.join(&self.root);
        }
        if let Some(path) = self.source.path.as_mut() {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    /// Reject configurations the orchestrator cannot act on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project.trim().is_empty() {
            return Err(ConfigError::Invalid("project must not be empty".into()));
        }
        if self.compose.command.is_empty() {
            return Err(ConfigError::Invalid("compose.command must not be empty".into()));
        }
        if self.compose.engine.is_empty() {
            return Err(ConfigError::Invalid("compose.engine must not be empty".into()));
        }
        if self.compose.app_services.is_empty() {
            return Err(ConfigError::Invalid(
                "compose.app_services must name at least one service".into(),
            ));
        }
        if self.health.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "health.poll_interval_secs must be greater than zero".into(),
            ));
        }
        if self.health.partial_timeout_secs == 0
            || self.health.full_timeout_secs == 0
            || self.health.request_timeout_secs == 0
        {
            return Err(ConfigError::Invalid("health timeouts must be greater than zero".into()));
        }
        let health = [
            ("poll_interval_secs", self.health.poll_interval_secs),
            ("partial_timeout_secs", self.health.partial_timeout_secs),
            ("full_timeout_secs", self.health.full_timeout_secs),
            ("request_timeout_secs", self.health.request_timeout_secs),
        ];
        if let Some((name, _)) = health.iter().find(|(_, secs)| *secs > MAX_HEALTH_SECS) {
            return Err(ConfigError::Invalid(format!(
                "health.{name} must be at most {MAX_HEALTH_SECS}"
            )));
        }
        match (&self.source.repository, &self.source.path) {
            (Some(_), Some(_)) => Err(ConfigError::Invalid(
                "set only one of source.repository and source.path".into(),
            )),
            (None, None) => Err(ConfigError::Invalid(
                "one of source.repository or source.path is required".into(),
            )),
            _ => Ok(()),
        }
    }

    /// Attempts the build pipeline may make, clamped to `1..=2`.
    pub fn build_attempts(&self) -> u32 {
        self.build.max_attempts.clamp(1, 2)
    }

    /// Where staged releases get their source tree from.
    pub fn source_spec(&self) -> SourceSpec {
        match (&self.source.repository, &self.source.path) {
            (Some(repository), _) => SourceSpec::Git {
                repository: repository.clone(),
            },
            (None, Some(path)) => SourceSpec::Directory { path: path.clone() },
            (None, None) => SourceSpec::Empty,
        }
    }
}

/// Starter `launchpad.yaml` written by `launchpad init`.
pub fn starter_config(project: &str, root: &Path) -> String {
    format!(
        r#"# launchpad deployment configuration
project: {project}
root: {root}

source:
  # Git URL (or local repository path) cloned for each release.
  repository: https://example.invalid/{project}.git
  # path: ./src
  default_ref: main

compose:
  command: [docker, compose]
  # Container engine used for image and build-cache pruning.
  engine: [docker]
  file: docker-compose.yml
  app_services: [app]

health:
  host: 127.0.0.1
  port: 8080
  path: /
  poll_interval_secs: 2
  partial_timeout_secs: 60
  full_timeout_secs: 180
  request_timeout_secs: 5

build:
  max_attempts: 2
  # timeout_secs: 1800

resources:
  min_memory_mb: 2048
  swap_path: /swapfile
  swap_size_mb: 2048

logs:
  tail_lines: 100
"#,
        project = project,
        root = root.display(),
    )
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
