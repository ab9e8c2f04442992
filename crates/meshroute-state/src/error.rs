//! Error types for the persistence layer

use meshroute_core::MeshrouteError;
use thiserror::Error;

/// Errors that can occur in state operations
#[derive(Error, Debug)]
pub enum StateError {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Invalid data in a persisted row
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),
}

impl StateError {
    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            StateError::Database(_) => "DATABASE_ERROR",
            StateError::Serialization(_) => "SERIALIZATION_ERROR",
            StateError::Deserialization(_) => "DESERIALIZATION_ERROR",
            StateError::InvalidData(_) => "INVALID_DATA",
            StateError::Connection(_) => "CONNECTION_ERROR",
            StateError::Migration(_) => "MIGRATION_ERROR",
        }
    }
}

impl From<sqlx::Error> for StateError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StateError::Connection(err.to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StateError::Deserialization(err.to_string())
            }
            _ => StateError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}

impl From<StateError> for MeshrouteError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::Connection(msg) => MeshrouteError::StorageUnavailable(msg),
            StateError::Serialization(msg) => MeshrouteError::Serialization(msg),
            StateError::Deserialization(msg) | StateError::InvalidData(msg) => {
                MeshrouteError::Deserialization(msg)
            }
            other => MeshrouteError::Storage(other.to_string()),
        }
    }
}

/// Result type for state operations
pub type Result<T> = std::result::Result<T, StateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_failures_map_to_database() {
        let err: StateError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.error_code(), "DATABASE_ERROR");
        let core: MeshrouteError = err.into();
        assert_eq!(core.error_code(), "STORAGE_ERROR");
    }

    #[test]
    fn test_pool_timeout_is_unavailable() {
        let err: StateError = sqlx::Error::PoolTimedOut.into();
        let core: MeshrouteError = err.into();
        assert_eq!(core.error_code(), "STORAGE_UNAVAILABLE");
        assert!(core.is_retriable());
    }

    #[test]
    fn test_invalid_data_maps_to_deserialization() {
        let core: MeshrouteError = StateError::InvalidData("bad prefix".into()).into();
        assert_eq!(core.error_code(), "DESERIALIZATION_ERROR");
    }
}
