//! Error types for tidal

use thiserror::Error;

/// Result type alias for tidal operations
pub type Result<T> = std::result::Result<T, TidalError>;

/// Unified error type for all tidal operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TidalError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Database not found: {0}")]
    DatabaseNotFound(String),

    /// The table backing a collection does not exist (never created, or dropped)
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    /// No document with the given primary key
    #[error("Document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    /// Duplicate primary key or name
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Waiting for an operation slot took longer than the connection timeout - retryable
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Transient error that may succeed on retry
    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TidalError {
    /// Returns true if this error is potentially retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, TidalError::Timeout(_) | TidalError::Transient(_))
    }

    /// Returns true if the addressed document, collection or database is missing
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            TidalError::NotFound { .. }
                | TidalError::CollectionNotFound(_)
                | TidalError::DatabaseNotFound(_)
        )
    }
}

impl From<serde_json::Error> for TidalError {
    fn from(err: serde_json::Error) -> Self {
        TidalError::Serialization(err.to_string())
    }
}

impl From<bson::ser::Error> for TidalError {
    fn from(err: bson::ser::Error) -> Self {
        TidalError::Serialization(format!("BSON serialization error: {}", err))
    }
}

impl From<bson::de::Error> for TidalError {
    fn from(err: bson::de::Error) -> Self {
        TidalError::Deserialization(format!("BSON deserialization error: {}", err))
    }
}
