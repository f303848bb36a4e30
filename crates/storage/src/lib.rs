//! Storage Layer
//!
//! SQLite persistence of analysis history with repository pattern.

mod repository;

pub use repository::{HistoryRecord, NewHistoryRecord, Repository, TIMESTAMP_FORMAT};

use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Record not found")]
    NotFound,
    #[error("Serialization error: {0}")]
    SerializationError(String),
}
