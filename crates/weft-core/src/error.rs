//! Error types for submission, joining, and configuration

use std::fmt;
use std::path::PathBuf;

/// Errors returned when a Task cannot be admitted
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// The run queue already holds `depth` Ready Tasks
    #[error("Run queue is full ({depth} tasks queued)")]
    CapacityExceeded {
        /// Configured maximum run queue depth
        depth: usize,
    },

    /// Shutdown has begun; no new Tasks are accepted
    #[error("Scheduler is shutting down")]
    PoolShutdownInProgress,
}

/// How a Task's user logic failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The work unit returned an error value
    Error,
    /// The work unit panicked
    Panic,
}

/// Failure raised by a Task's user logic, delivered through its handle
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TaskFailure {
    kind: FailureKind,
    message: String,
}

impl TaskFailure {
    /// Failure from an error value returned by the work unit
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Error,
            message: message.into(),
        }
    }

    /// Failure from a caught panic payload
    pub fn panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "task panicked".to_string()
        };
        Self {
            kind: FailureKind::Panic,
            message,
        }
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_panic(&self) -> bool {
        self.kind == FailureKind::Panic
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FailureKind::Error => write!(f, "task failed: {}", self.message),
            FailureKind::Panic => write!(f, "task panicked: {}", self.message),
        }
    }
}

impl std::error::Error for TaskFailure {}

impl From<String> for TaskFailure {
    fn from(message: String) -> Self {
        TaskFailure::error(message)
    }
}

impl From<&str> for TaskFailure {
    fn from(message: &str) -> Self {
        TaskFailure::error(message)
    }
}

impl From<std::io::Error> for TaskFailure {
    fn from(err: std::io::Error) -> Self {
        TaskFailure::error(err.to_string())
    }
}

/// A joined Task's failure propagates into the joining Task
impl From<JoinError> for TaskFailure {
    fn from(err: JoinError) -> Self {
        match err {
            JoinError::Failed(failure) => failure,
            JoinError::Cancelled => TaskFailure::error("joined task was cancelled"),
        }
    }
}

/// Result of joining a Task that did not complete normally
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    /// The Task was cancelled before it completed
    #[error("task was cancelled")]
    Cancelled,

    /// The Task's user logic failed
    #[error(transparent)]
    Failed(#[from] TaskFailure),
}

impl JoinError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, JoinError::Cancelled)
    }

    /// The failure, if the Task failed rather than being cancelled
    pub fn failure(&self) -> Option<&TaskFailure> {
        match self {
            JoinError::Failed(failure) => Some(failure),
            JoinError::Cancelled => None,
        }
    }
}

/// Errors that can occur while loading a scheduler configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_from_str_panic() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        let failure = TaskFailure::panic(payload.as_ref());
        assert!(failure.is_panic());
        assert_eq!(failure.message(), "boom");
    }

    #[test]
    fn test_failure_from_string_panic() {
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("index out of range"));
        let failure = TaskFailure::panic(payload.as_ref());
        assert_eq!(failure.message(), "index out of range");
        assert_eq!(failure.to_string(), "task panicked: index out of range");
    }

    #[test]
    fn test_join_error_accessors() {
        let err = JoinError::from(TaskFailure::error("db down"));
        assert!(!err.is_cancelled());
        assert_eq!(err.failure().map(|f| f.kind()), Some(FailureKind::Error));
        assert_eq!(err.to_string(), "task failed: db down");

        assert!(JoinError::Cancelled.is_cancelled());
        assert!(JoinError::Cancelled.failure().is_none());
    }

    #[test]
    fn test_capacity_message() {
        let err = SchedulerError::CapacityExceeded { depth: 8 };
        assert_eq!(err.to_string(), "Run queue is full (8 tasks queued)");
    }
}
