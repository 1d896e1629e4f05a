use thiserror::Error;

use crate::domain::error::DomainError;

/// Configuration-related errors with structured variants.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

/// Errors raised by the cloud provider.
///
/// Transient errors (throttling, flaky network) are retried by the caller;
/// permanent ones (bad image id, auth failure) abort the enclosing operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("transient provider error: {0}")]
    Transient(String),

    #[error("permanent provider error: {0}")]
    Permanent(String),

    #[error("{operation} still failing after {attempts} attempts: {message}")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
        message: String,
    },
}

impl ProviderError {
    /// Whether the caller may retry the call that produced this error.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

/// Errors raised while bringing a single node to `Ready`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BootstrapError {
    #[error("node did not become ready within {after_secs}s")]
    Timeout { after_secs: u64 },

    #[error("bootstrap step '{step}' exited with status {exit_code}: {stderr}")]
    ScriptFailure {
        step: String,
        exit_code: i32,
        stderr: String,
    },
}

/// Cluster lifecycle failures surfaced by `launch`, `open` and `terminate`.
#[derive(Error, Debug, Clone)]
pub enum LifecycleError {
    #[error("a cluster session is already active ({existing}); terminate it first")]
    SessionConflict { existing: String },

    #[error("no active cluster session")]
    NoActiveSession,

    #[error("manager {instance_id} failed to bootstrap: {reason}")]
    ManagerBootstrapFailed { instance_id: String, reason: String },

    #[error("manager {instance_id} is unreachable: {reason}")]
    ManagerUnreachable { instance_id: String, reason: String },

    #[error("cluster launch timed out after {after_secs}s with {pending} node(s) still provisioning")]
    LaunchTimeout { after_secs: u64, pending: usize },

    #[error("cluster launch was cancelled")]
    LaunchCancelled,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt session record at {path}: {reason}")]
    CorruptSession { path: String, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
