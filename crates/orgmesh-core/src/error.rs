//! Error types for Orgmesh

use thiserror::Error;

/// Main error type for Orgmesh operations
#[derive(Error, Debug)]
pub enum MeshError {
    /// No overlay session has been initialized for the organization
    #[error("No active session for this organization")]
    SessionNotInitialized,

    /// Caller lacks the required role for a mutation
    #[error("Permission denied")]
    PermissionDenied,

    /// Knowledge item or record was not found
    #[error("Knowledge item not found")]
    KnowledgeNotFound,

    /// Folder was not found in the organization
    #[error("Folder not found")]
    FolderNotFound,

    /// Malformed inbound payload
    #[error("Validation error: {0}")]
    Validation(String),

    /// Network-related error (publish/send failed)
    #[error("Network error: {0}")]
    Network(String),

    /// Database creation/opening error
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Table error
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    /// Storage operation error
    #[error("Storage operation error: {0}")]
    StorageOp(#[from] redb::StorageError),

    /// Commit error
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// CRDT document error
    #[error("CRDT error: {0}")]
    Crdt(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid operation for current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

/// Result type alias using MeshError
pub type MeshResult<T> = Result<T, MeshError>;
