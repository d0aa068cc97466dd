use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::language::Language;

/// Overrides the config path when `--config` is not given.
pub const CONFIG_PATH_ENV: &str = "CODE_RUNNER_CONFIG";

pub const DEFAULT_CONFIG_PATH: &str = "./config.toml";

pub const WORKSPACE_ROOT: &str = "./temp";

pub const TIME_LIMIT_SECS: u64 = 5;

/// Deadline for engine housekeeping calls (`version`, `image inspect`, `create`, `rm`).
pub const COMMAND_TIMEOUT_SECS: u64 = 10;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub runtime: RuntimeConfig,
    pub workspace: WorkspaceConfig,
    pub limits: LimitsConfig,
    /// Language key to container image.
    pub images: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind: String,
    pub max_body_bytes: usize,
    pub tls: Option<TlsConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            max_body_bytes: 256 * 1024,
            tls: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Container engine CLI, e.g. `docker` or `podman`.
    pub executable: String,
    /// Arguments placed before the subcommand, e.g. `["--context", "sandbox"]`.
    pub global_args: Vec<String>,
    pub memory: String,
    pub cpus: String,
    pub pids_limit: u32,
    pub time_limit_secs: u64,
    pub command_timeout_secs: u64,
    pub max_output_bytes: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            executable: "docker".to_string(),
            global_args: Vec::new(),
            memory: "200m".to_string(),
            cpus: "0.5".to_string(),
            pids_limit: 64,
            time_limit_secs: TIME_LIMIT_SECS,
            command_timeout_secs: COMMAND_TIMEOUT_SECS,
            max_output_bytes: 64 * 1024,
        }
    }
}

impl RuntimeConfig {
    pub fn time_limit(&self) -> Duration {
        Duration::from_secs(self.time_limit_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkspaceConfig {
    pub root: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(WORKSPACE_ROOT),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    pub max_concurrent_jobs: usize,
    pub max_queued_jobs: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            max_queued_jobs: 32,
        }
    }
}

impl Config {
    /// A missing file yields the defaults; anything else unreadable is an error.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "config file not found, using defaults");
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let runtime = &self.runtime;
        if runtime.executable.trim().is_empty() {
            return Err(invalid("runtime.executable must not be empty"));
        }
        if runtime.time_limit_secs == 0 {
            return Err(invalid("runtime.time_limit_secs must be positive"));
        }
        if runtime.max_output_bytes == 0 {
            return Err(invalid("runtime.max_output_bytes must be positive"));
        }
        if runtime.pids_limit == 0 {
            return Err(invalid("runtime.pids_limit must be positive"));
        }
        if runtime.memory.trim().is_empty() || runtime.cpus.trim().is_empty() {
            return Err(invalid("runtime.memory and runtime.cpus must be set"));
        }
        if runtime.command_timeout_secs == 0 {
            return Err(invalid("runtime.command_timeout_secs must be positive"));
        }
        if self.limits.max_concurrent_jobs == 0 {
            return Err(invalid("limits.max_concurrent_jobs must be positive"));
        }
        if self.server.max_body_bytes == 0 {
            return Err(invalid("server.max_body_bytes must be positive"));
        }
        for (key, image) in &self.images {
            if Language::from_key(key).is_err() {
                return Err(invalid(&format!("images.{key} is not a supported language")));
            }
            if image.trim().is_empty() {
                return Err(invalid(&format!("images.{key} must not be empty")));
            }
        }
        Ok(())
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid(message.to_string())
}
