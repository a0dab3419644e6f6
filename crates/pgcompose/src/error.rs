//! Error types for pgcompose

use thiserror::Error;

/// Result type alias for pgcompose operations
pub type ComposeResult<T> = Result<T, ComposeError>;

/// Error types for query composition and execution
#[derive(Debug, Error)]
pub enum ComposeError {
    /// Relationship name could not be resolved against the graph
    #[error("Unknown relationship: {0}")]
    UnknownRelationship(String),

    /// Table is not registered in the schema
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    /// Ordering requested on a standalone aggregate composer
    #[error("Cannot order a standalone aggregate query by '{0}'")]
    AggregateOrdering(String),

    /// Invalid builder input (bad identifier, empty update set, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Query execution error
    #[error("Query error: {0}")]
    Query(#[from] tokio_postgres::Error),

    /// Row decode/mapping error
    #[error("Decode error on column '{column}': {message}")]
    Decode { column: String, message: String },

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Row not found
    #[error("Not found: {0}")]
    NotFound(String),
}

impl ComposeError {
    /// Create a decode error for a specific column
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create an unknown-relationship error
    pub fn unknown_relationship(name: impl Into<String>) -> Self {
        Self::UnknownRelationship(name.into())
    }

    /// Check if this is an unknown-relationship error
    pub fn is_unknown_relationship(&self) -> bool {
        matches!(self, Self::UnknownRelationship(_))
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
