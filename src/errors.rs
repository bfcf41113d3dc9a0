use thiserror::Error;
use uuid::Uuid;

use crate::types::Modality;

/// Session lifecycle and exclusivity errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionStateError {
    /// No session exists with this id
    #[error("session {0} not found")]
    NotFound(Uuid),

    /// Session exists but is no longer accepting signals
    #[error("session {0} is not active")]
    NotActive(Uuid),

    /// An active session already exists for the exam attempt
    #[error("attempt {0} already has an active session")]
    DuplicateSession(String),

    /// Session has already reached a terminal state
    #[error("session {0} already ended")]
    AlreadyEnded(Uuid),
}

/// Main engine error type.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Malformed or out-of-range record fields. Rejected with no state change.
    #[error("validation error: {0}")]
    Validation(String),

    /// Session not found / not active / duplicate start. Surfaced to caller.
    #[error(transparent)]
    SessionState(#[from] SessionStateError),

    /// Record timestamp precedes the last accepted timestamp for the
    /// (session, modality) pair beyond tolerance. Dropped, not fatal.
    #[error(
        "out-of-order signal for session {session_id} ({modality}): \
         record at {record_ts_ms}ms precedes last accepted at {last_ts_ms}ms"
    )]
    OutOfOrderSignal {
        session_id: Uuid,
        modality: Modality,
        record_ts_ms: u64,
        last_ts_ms: u64,
    },

    /// Transient store failure.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Invalid weights/thresholds at startup. Fatal: the engine refuses to start.
    #[error("configuration error: {0}")]
    Config(String),

    /// Caller lacks the capability for the requested operation.
    #[error("forbidden: {0}")]
    Forbidden(String),
}

// Convenience constructors for common error patterns
impl Error {
    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Create a persistence error.
    pub fn persistence(msg: impl Into<String>) -> Self {
        Error::Persistence(msg.into())
    }

    /// Create a forbidden error.
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Error::Forbidden(msg.into())
    }

    /// True if this is an out-of-order drop (normal operation, not a failure).
    pub fn is_out_of_order(&self) -> bool {
        matches!(self, Error::OutOfOrderSignal { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
