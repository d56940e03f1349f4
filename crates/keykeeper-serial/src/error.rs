use keykeeper_protocol::CodecError;
use keykeeper_storage::StorageError;
use thiserror::Error;

/// Errors that end a session with the firmware.
///
/// None of these are fatal to the process: the supervisor answers every one
/// of them by closing the port and reconnecting after a fixed delay.
#[derive(Debug, Error)]
pub enum PortError {
    /// The device could not be opened
    #[error("Failed to open {path}: {reason}")]
    Open { path: String, reason: String },

    /// The port reached end of stream (unplugged or rebooting)
    #[error("Port closed")]
    Closed,

    /// An expected line did not arrive in time
    #[error("Timeout after {timeout_ms}ms waiting for {waiting_for}")]
    Timeout {
        waiting_for: String,
        timeout_ms: u64,
    },

    /// The firmware printed a line longer than the codec accepts
    #[error("Line too long: more than {max_length} bytes without newline")]
    LineTooLong { max_length: usize },

    /// Low-level I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The credential database could not be re-read before a sync
    #[error("Credential database unavailable: {0}")]
    Storage(#[from] StorageError),
}

impl From<CodecError> for PortError {
    fn from(error: CodecError) -> Self {
        match error {
            CodecError::LineTooLong { max_length } => PortError::LineTooLong { max_length },
            CodecError::Io(err) => PortError::Io(err),
        }
    }
}

impl PortError {
    pub(crate) fn timeout(waiting_for: impl Into<String>, timeout: std::time::Duration) -> Self {
        PortError::Timeout {
            waiting_for: waiting_for.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }
}

/// Result type for port operations
pub type PortResult<T> = Result<T, PortError>;
