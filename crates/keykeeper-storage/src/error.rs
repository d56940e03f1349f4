use thiserror::Error;

use crate::provision::ProvisionError;

/// Storage-specific error types for the keykeeper credential database.
///
/// `CorruptDatabase` and `Authentication` are fatal at startup: the caller
/// must not fall back to an empty database, or the next save would
/// overwrite every enrolled coin.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The file does not have the expected shape or content
    #[error("Corrupt database: {0}")]
    CorruptDatabase(String),

    /// Wrong password, or the encrypted payload was tampered with
    #[error("Authentication failed: wrong password or tampered database")]
    Authentication,

    /// A coin is already registered under this name
    #[error("Duplicate name: {0}")]
    DuplicateName(String),

    /// A coin is already registered at this address
    #[error("Duplicate address: {0}")]
    DuplicateAddress(String),

    /// Names must contain at least one visible character
    #[error("Invalid name: {0:?}")]
    InvalidName(String),

    /// Encrypting the payload failed
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Writing the coin's key material onto the token failed
    #[error("Provisioning failed: {0}")]
    Provision(#[from] ProvisionError),

    /// File system error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<argon2::Error> for StorageError {
    fn from(error: argon2::Error) -> Self {
        StorageError::Encryption(error.to_string())
    }
}

/// Specialized result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
