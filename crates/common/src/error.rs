//! Error types for the cooperative cluster engine

use thiserror::Error;

/// Common result type used throughout CoopGrid
pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by engine operations.
///
/// Every operation fails synchronously with one of these; nothing is retried
/// inside the engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Cluster, proposal, member or record absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate membership, duplicate record, or a correction that does not
    /// reference a valid original entry
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Caller supplied something the engine refuses to act on
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An ownership or energy conservation check failed
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// The record store failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Encoding or decoding a record failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Create a new not found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create a new conflict error
    pub fn conflict<S: Into<String>>(msg: S) -> Self {
        Error::Conflict(msg.into())
    }

    /// Create a new invalid argument error
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Create a new invariant violation error
    pub fn invariant<S: Into<String>>(msg: S) -> Self {
        Error::InvariantViolation(msg.into())
    }

    /// Create a new storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Error::Storage(msg.into())
    }

    /// Create a new serialization error
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        Error::Serialization(msg.into())
    }

    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Error::Configuration(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Error::InvalidArgument(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
