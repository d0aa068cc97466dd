use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Request rejected before any resources are allocated.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unsupported language")]
    UnsupportedLanguage,
    #[error("No code provided")]
    NoCode,
}

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("failed to create workspace root {path}: {source}")]
    Root { path: PathBuf, source: io::Error },
    #[error("failed to create workspace {path}: {source}")]
    Create { path: PathBuf, source: io::Error },
    #[error("failed to write source file {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("refusing to write source file with name {0:?}")]
    InvalidFilename(String),
}

/// Failure to get the isolation runtime to run the program at all.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("isolation runtime {runtime:?} is not installed or not on PATH")]
    RuntimeMissing { runtime: String },
    #[error("failed to spawn isolation runtime {runtime:?}: {source}")]
    Spawn { runtime: String, source: io::Error },
    #[error("isolation runtime {runtime:?} is not available: {detail}")]
    Unavailable { runtime: String, detail: String },
    #[error("isolation runtime {runtime:?} did not finish `{action}` within {secs}s")]
    Timeout {
        runtime: String,
        action: &'static str,
        secs: u64,
    },
    /// The engine refused to create the container; the program never ran.
    #[error("{detail}")]
    Create { detail: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Everything that keeps a job from producing an in-band outcome.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    #[error("too many executions in progress")]
    Busy,
}
