//! Meshroute State - Durable edge persistence
//!
//! This crate provides the SQLite implementation of the
//! [`EdgeStorage`](meshroute_core::EdgeStorage) collaborator used by the graph engine.
//!
//! ## Components
//!
//! - **storage**: SQLite-based persistence with sqlx
//! - **error**: State-specific error types
//!
//! ## Example
//!
//! ```ignore
//! use meshroute_state::SqliteEdgeStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(SqliteEdgeStore::new("sqlite:meshroute.db?mode=rwc").await?);
//!     println!("{} edges on disk", store.count().await?);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod storage;

// Re-exports for convenience
pub use error::{Result, StateError};
pub use storage::SqliteEdgeStore;
