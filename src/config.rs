use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid value for {name}: {value}")]
    InvalidEnv { name: String, value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct QueueConfig {
    #[serde(default = "default_queue_name")]
    pub(crate) name: String,
    #[serde(default = "default_retry_prefix")]
    pub(crate) retry_prefix: String,
    #[serde(default = "default_poll_interval")]
    pub(crate) poll_interval_seconds: u64,
    #[serde(default)]
    pub(crate) minimum_age_seconds: u64,
    #[serde(default = "default_max_attempts")]
    pub(crate) max_attempts: u64,
    #[serde(default = "default_base_backoff")]
    pub(crate) base_backoff_seconds: f64,
    #[serde(default = "default_redis_url")]
    pub(crate) redis_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RepositoryConfig {
    #[serde(default = "default_repository_url")]
    pub(crate) url: String,
    #[serde(default = "default_repository_base_path")]
    pub(crate) base_path: String,
    #[serde(default)]
    pub(crate) user: String,
    #[serde(default)]
    pub(crate) password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SwiftConfig {
    #[serde(default = "default_swift_auth_url")]
    pub(crate) auth_url: String,
    #[serde(default = "default_swift_username")]
    pub(crate) username: String,
    #[serde(default = "default_swift_password")]
    pub(crate) password: String,
    #[serde(default = "default_swift_container")]
    pub(crate) container: String,
    #[serde(default = "default_swift_project")]
    pub(crate) project: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Config {
    #[serde(default = "default_workdir")]
    pub(crate) workdir: PathBuf,
    #[serde(default = "default_logdir")]
    pub(crate) logdir: PathBuf,
    #[serde(default = "default_aip_version")]
    pub(crate) aip_version: String,
    /// Remove the staging directory after packaging. Off only for
    /// debugging a failed assembly.
    #[serde(default = "default_true")]
    pub(crate) clean_work_directories: bool,
    #[serde(default)]
    pub(crate) queue: QueueConfig,
    #[serde(default)]
    pub(crate) repository: RepositoryConfig,
    #[serde(default)]
    pub(crate) swift: SwiftConfig,
}

fn default_workdir() -> PathBuf {
    PathBuf::from("tmp/work")
}
fn default_logdir() -> PathBuf {
    PathBuf::from("log")
}
fn default_aip_version() -> String {
    "lightaip-2.0".to_string()
}
fn default_true() -> bool {
    true
}
fn default_queue_name() -> String {
    "dev:preservation_queue".to_string()
}
fn default_retry_prefix() -> String {
    "dev:preservation_attempts:".to_string()
}
fn default_poll_interval() -> u64 {
    10
}
fn default_max_attempts() -> u64 {
    5
}
fn default_base_backoff() -> f64 {
    10.0
}
fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}
fn default_repository_url() -> String {
    "http://localhost:8080/fcrepo/rest".to_string()
}
fn default_repository_base_path() -> String {
    "/dev".to_string()
}
fn default_swift_auth_url() -> String {
    "http://localhost:8080/auth/v1.0".to_string()
}
fn default_swift_username() -> String {
    "test:tester".to_string()
}
fn default_swift_password() -> String {
    "testing".to_string()
}
fn default_swift_container() -> String {
    "ERA".to_string()
}
fn default_swift_project() -> String {
    "ERA".to_string()
}

// An empty JSON object deserializes every field through its serde
// default, so Default and Deserialize cannot drift apart.
impl Default for QueueConfig {
    fn default() -> Self {
        from_empty()
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        from_empty()
    }
}

impl Default for SwiftConfig {
    fn default() -> Self {
        from_empty()
    }
}

impl Default for Config {
    fn default() -> Self {
        from_empty()
    }
}

fn from_empty<T: for<'de> Deserialize<'de>>() -> T {
    match serde_json::from_str("{}") {
        Ok(value) => value,
        Err(_) => unreachable!("empty object always satisfies serde defaults"),
    }
}

impl Config {
    /// Defaults, overlaid by the JSON config file (when given), overlaid
    /// by `MAGPIE_*` environment variables. CLI flags go on top of this
    /// in the cli module.
    pub(crate) fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            None => Config::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = env_optional("MAGPIE_WORKDIR") {
            self.workdir = PathBuf::from(value);
        }
        if let Some(value) = env_optional("MAGPIE_LOGDIR") {
            self.logdir = PathBuf::from(value);
        }
        if let Some(value) = env_optional("MAGPIE_QUEUE_NAME") {
            self.queue.name = value;
        }
        if let Some(value) = env_optional("MAGPIE_REDIS_URL") {
            self.queue.redis_url = value;
        }
        self.queue.poll_interval_seconds =
            env_u64("MAGPIE_POLL_INTERVAL", self.queue.poll_interval_seconds)?;
        self.queue.minimum_age_seconds =
            env_u64("MAGPIE_MINIMUM_AGE", self.queue.minimum_age_seconds)?;
        self.queue.max_attempts = env_u64("MAGPIE_MAX_ATTEMPTS", self.queue.max_attempts)?;
        self.queue.base_backoff_seconds =
            env_f64("MAGPIE_BASE_BACKOFF", self.queue.base_backoff_seconds)?;
        if let Some(value) = env_optional("MAGPIE_REPOSITORY_URL") {
            self.repository.url = value;
        }
        if let Some(value) = env_optional("MAGPIE_REPOSITORY_USER") {
            self.repository.user = value;
        }
        if let Some(value) = env_optional("MAGPIE_REPOSITORY_PASSWORD") {
            self.repository.password = value;
        }
        if let Some(value) = env_optional("MAGPIE_SWIFT_AUTH_URL") {
            self.swift.auth_url = value;
        }
        if let Some(value) = env_optional("MAGPIE_SWIFT_USERNAME") {
            self.swift.username = value;
        }
        if let Some(value) = env_optional("MAGPIE_SWIFT_PASSWORD") {
            self.swift.password = value;
        }
        if let Some(value) = env_optional("MAGPIE_SWIFT_CONTAINER") {
            self.swift.container = value;
        }
        Ok(())
    }

    pub(crate) fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.queue.poll_interval_seconds)
    }

    pub(crate) fn minimum_age(&self) -> Duration {
        Duration::from_secs(self.queue.minimum_age_seconds)
    }
}

pub(crate) fn env_optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

pub(crate) fn env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match env_optional(name) {
        Some(value) => value.parse::<u64>().map_err(|_| ConfigError::InvalidEnv {
            name: name.to_string(),
            value,
        }),
        None => Ok(default),
    }
}

pub(crate) fn env_f64(name: &str, default: f64) -> Result<f64, ConfigError> {
    match env_optional(name) {
        Some(value) => value.parse::<f64>().map_err(|_| ConfigError::InvalidEnv {
            name: name.to_string(),
            value,
        }),
        None => Ok(default),
    }
}
