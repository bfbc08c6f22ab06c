//! Error types for agentsync.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Project tracker error: {0}")]
    Project(#[from] ProjectError),

    #[error("Webhook event error: {0}")]
    Event(#[from] EventError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: String, message: String },
}

/// Errors returned by [`crate::agents::Registry`] operations.
///
/// These are caller errors and are never retried by the crate itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("agent is busy: {0}")]
    AgentBusy(String),

    #[error("task {0} is already finished")]
    TaskAlreadyFinished(String),

    #[error("task {0} is not assignable")]
    TaskNotAssignable(String),
}

/// Errors talking to the external project tracker.
///
/// The sync loop never retries inline: failures are logged and the work is
/// picked up again on the next poll tick. [`ProjectError::is_transient`]
/// decides how loudly.
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("Request to {endpoint} failed: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Tracker returned {status} for {endpoint}")]
    Status { endpoint: String, status: u16 },

    #[error("Invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },
}

impl ProjectError {
    /// Whether the failure should be left to the next poll cycle.
    pub fn is_transient(&self) -> bool {
        match self {
            ProjectError::Request { .. } | ProjectError::InvalidResponse { .. } => true,
            // 4xx other than rate limiting will not fix itself.
            ProjectError::Status { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

/// A webhook payload that cannot be turned into a tracker event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    #[error("event {event} is missing required field '{field}'")]
    MissingField { event: String, field: String },

    #[error("event {event} has invalid field '{field}': {reason}")]
    InvalidField {
        event: String,
        field: String,
        reason: String,
    },

    #[error("unsupported event type: {0}")]
    UnsupportedType(String),
}

/// Failures of a single task execution.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutionError {
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("execution timed out after {0:?}")]
    Timeout(Duration),

    #[error("execution failed: {0}")]
    Failed(String),
}

/// Errors from the synchronization subsystem itself.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("sync manager already started")]
    AlreadyStarted,

    #[error("failed to bind webhook listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("dispatch queue is full")]
    QueueFull,

    #[error("sync manager is shutting down")]
    ShuttingDown,
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> ProjectError {
        ProjectError::Status {
            endpoint: "/api/v1/tasks".to_string(),
            status: code,
        }
    }

    #[test]
    fn test_transient_statuses() {
        assert!(status(429).is_transient());
        assert!(status(500).is_transient());
        assert!(status(503).is_transient());
        assert!(!status(400).is_transient());
        assert!(!status(401).is_transient());
        assert!(!status(404).is_transient());
    }

    #[test]
    fn test_invalid_response_is_transient() {
        let err = ProjectError::InvalidResponse {
            endpoint: "/api/v1/tasks".to_string(),
            reason: "expected array".to_string(),
        };
        assert!(err.is_transient());
    }
}
