use thiserror::Error;

/// The error type for key tree operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Unsupported key length or tree depth at construction.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// The secure random source could not fill a node buffer.
    #[error("secure random source unavailable: {0}")]
    RandomSourceUnavailable(#[from] rand::Error),
    /// A per-user operation received an id outside `0..users`.
    #[error("invalid user id {user} (tree has {users} users)")]
    InvalidUserId {
        /// The rejected id.
        user: usize,
        /// Number of users in the tree.
        users: usize,
    },
    /// A persisted record carries a foreign tag or is truncated or malformed.
    #[error("record format mismatch: {0}")]
    FormatMismatch(String),
    /// Underlying stream failure at the serialization boundary.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
