//! Error types shared by every meshroute crate
//!
//! Collaborator traits ([`EdgeStorage`](crate::EdgeStorage) in particular) report
//! failures through [`MeshrouteError`] so the graph engine does not depend on any
//! concrete storage backend.

use thiserror::Error;

/// Main error type for meshroute core operations
#[derive(Error, Debug)]
pub enum MeshrouteError {
    // ===== Identity Errors =====
    /// Prefix was empty or not hexadecimal
    #[error("Invalid node prefix: {0:?}")]
    InvalidPrefix(String),

    /// Public key was empty or not hexadecimal
    #[error("Invalid public key: {0:?}")]
    InvalidPublicKey(String),

    // ===== Storage Errors =====
    /// Durable storage could not be reached
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Storage operation failed
    #[error("Storage error: {0}")]
    Storage(String),

    // ===== Serialization Errors =====
    /// Serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization failed
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // ===== Configuration Errors =====
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ===== General Errors =====
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MeshrouteError {
    /// Check if this error is retriable
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            MeshrouteError::StorageUnavailable(_) | MeshrouteError::Storage(_)
        )
    }

    /// Check if this error is a client error (bad input)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            MeshrouteError::InvalidPrefix(_)
                | MeshrouteError::InvalidPublicKey(_)
                | MeshrouteError::InvalidConfig(_)
        )
    }

    /// Get an error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            MeshrouteError::InvalidPrefix(_) => "INVALID_PREFIX",
            MeshrouteError::InvalidPublicKey(_) => "INVALID_PUBLIC_KEY",
            MeshrouteError::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            MeshrouteError::Storage(_) => "STORAGE_ERROR",
            MeshrouteError::Serialization(_) => "SERIALIZATION_ERROR",
            MeshrouteError::Deserialization(_) => "DESERIALIZATION_ERROR",
            MeshrouteError::InvalidConfig(_) => "INVALID_CONFIG",
            MeshrouteError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type alias for meshroute core operations
pub type Result<T> = std::result::Result<T, MeshrouteError>;

impl From<serde_json::Error> for MeshrouteError {
    fn from(err: serde_json::Error) -> Self {
        MeshrouteError::Serialization(err.to_string())
    }
}
