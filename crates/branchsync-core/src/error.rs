//! Error types for branchsync

use thiserror::Error;

/// Main error type for branchsync operations
#[derive(Error, Debug)]
pub enum SyncError {
    /// Branch or object does not exist
    #[error("Does not exist: {0}")]
    NotExist(String),

    /// Branch already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Cell write exceeds the cell's byte bound
    #[error("Value too large for cell: {0}")]
    TooLarge(String),

    /// Compare-and-swap retries exhausted
    #[error("Cell contention: {0}")]
    Contention(String),

    /// Non-forced sync rejected: destination head is not an ancestor of source head
    #[error("Not a fast-forward: destination head is not an ancestor of source head")]
    NotFastForward,

    /// Active-branch switch blocked by pending staged changes
    #[error("Staging must be empty to switch to a branch with a different salt")]
    SaltMismatch,

    /// Peer response violates the wire protocol
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Peer returned success without the expected payload
    #[error("Empty response: expected {0}")]
    EmptyResponse(&'static str),

    /// Connectivity or timeout failure at the transport boundary
    #[error("Transport error: {0}")]
    Transport(String),

    /// Rejected by the remote peer's authorization policy
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Error reported by a remote peer that has no local equivalent
    #[error("Remote error: {0}")]
    Remote(String),

    /// Error during storage operations
    #[error("Storage error: {0}")]
    Storage(String),

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

    /// Cryptographic operation failed (wrong key, tampered data, malformed input)
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid operation for current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

/// Result type alias using SyncError
pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    /// Whether this error means "the thing is absent" rather than a failure.
    pub fn is_not_exist(&self) -> bool {
        matches!(self, SyncError::NotExist(_))
    }

    /// A `TooLarge` for a value of `size` bytes against a bound of `max`
    pub fn too_large(size: usize, max: usize) -> Self {
        SyncError::TooLarge(format!("{} bytes exceeds bound of {} bytes", size, max))
    }

    /// A `Contention` after `attempts` exhausted CAS retries
    pub fn contention(attempts: u32) -> Self {
        SyncError::Contention(format!("CAS retries exhausted after {} attempts", attempts))
    }
}
