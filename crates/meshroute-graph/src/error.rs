//! Error types for topology operations
//!
//! Only a handful of operations can fail: loading the graph at startup,
//! compaction, and talking to the background flush task. Path resolution itself
//! never returns an error; insufficient evidence is a normal outcome.

use meshroute_core::MeshrouteError;
use thiserror::Error;

/// Main error type for topology operations
#[derive(Error, Debug)]
pub enum TopologyError {
    // ===== Storage Errors =====
    /// Durable storage could not be read while loading the graph
    #[error("Failed to load edge graph: {0}")]
    LoadFailed(#[source] MeshrouteError),

    /// Durable storage rejected an operation
    #[error("Storage error: {0}")]
    Storage(#[from] MeshrouteError),

    // ===== Scheduler Errors =====
    /// Flush task already stopped
    #[error("Flush scheduler is not running")]
    SchedulerNotRunning,

    /// Flush task panicked or was aborted
    #[error("Flush scheduler task failed: {0}")]
    SchedulerJoin(String),

    /// Channel send error
    #[error("Channel send error: {0}")]
    ChannelError(String),

    /// Channel closed
    #[error("Channel closed")]
    ChannelClosed,

    // ===== Configuration Errors =====
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ===== General Errors =====
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TopologyError {
    /// Check if this error is recoverable/retriable
    pub fn is_retriable(&self) -> bool {
        match self {
            TopologyError::LoadFailed(inner) | TopologyError::Storage(inner) => {
                inner.is_retriable()
            }
            _ => false,
        }
    }

    /// Get an error code for logging/metrics
    pub fn error_code(&self) -> &'static str {
        match self {
            TopologyError::LoadFailed(_) => "LOAD_FAILED",
            TopologyError::Storage(inner) => inner.error_code(),
            TopologyError::SchedulerNotRunning => "SCHEDULER_NOT_RUNNING",
            TopologyError::SchedulerJoin(_) => "SCHEDULER_JOIN",
            TopologyError::ChannelError(_) => "CHANNEL_ERROR",
            TopologyError::ChannelClosed => "CHANNEL_CLOSED",
            TopologyError::InvalidConfig(_) => "INVALID_CONFIG",
            TopologyError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type alias for topology operations
pub type Result<T> = std::result::Result<T, TopologyError>;

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for TopologyError {
    fn from(err: tokio::sync::mpsc::error::SendError<T>) -> Self {
        TopologyError::ChannelError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for TopologyError {
    fn from(err: tokio::task::JoinError) -> Self {
        TopologyError::SchedulerJoin(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(TopologyError::ChannelClosed.error_code(), "CHANNEL_CLOSED");
        let load = TopologyError::LoadFailed(MeshrouteError::StorageUnavailable("down".into()));
        assert_eq!(load.error_code(), "LOAD_FAILED");
        assert!(load.to_string().contains("down"));
    }

    #[test]
    fn test_storage_codes_pass_through() {
        let err: TopologyError = MeshrouteError::Storage("disk full".into()).into();
        assert_eq!(err.error_code(), "STORAGE_ERROR");
        assert!(err.is_retriable());
    }

    #[test]
    fn test_is_retriable() {
        assert!(!TopologyError::InvalidConfig("max_hops".into()).is_retriable());
        assert!(!TopologyError::SchedulerNotRunning.is_retriable());
    }
}
