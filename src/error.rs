//! Crate-level error kinds surfaced to users.
//!
//! ERROR HANDLING
//! ==============
//! AI command failures end up as the message on a failed history entry, so
//! each variant's `Display` is the bare human-readable text. Interactive
//! edits that hit a permission problem never produce one of these; the room
//! drops them silently.

use crate::document::DocumentError;
use crate::frame::ErrorCode;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// Bad tool arguments, an unknown tool, or an oversized prompt.
    #[error("{0}")]
    Validation(String),
    /// Read-only role, or acting on a shape locked by someone else.
    #[error("{0}")]
    Permission(String),
    /// A shape reference matched nothing.
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Timeout(String),
    /// The translator failed for a reason other than a timeout.
    #[error("{0}")]
    Translator(String),
}

impl CommandError {
    /// Prefix the message with the position and name of the offending tool
    /// call. The kind is kept.
    #[must_use]
    pub fn at_call(self, index: usize, tool: &str) -> Self {
        let wrap = |msg: String| format!("call {} ({tool}): {msg}", index + 1);
        match self {
            Self::Validation(m) => Self::Validation(wrap(m)),
            Self::Permission(m) => Self::Permission(wrap(m)),
            Self::NotFound(m) => Self::NotFound(wrap(m)),
            Self::Timeout(m) => Self::Timeout(wrap(m)),
            Self::Translator(m) => Self::Translator(wrap(m)),
        }
    }
}

impl ErrorCode for CommandError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "E_VALIDATION",
            Self::Permission(_) => "E_PERMISSION",
            Self::NotFound(_) => "E_NOT_FOUND",
            Self::Timeout(_) => "E_TIMEOUT",
            Self::Translator(_) => "E_TRANSLATOR",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Translator(_))
    }
}

impl From<DocumentError> for CommandError {
    fn from(err: DocumentError) -> Self {
        match err {
            DocumentError::UnknownShape(_) => Self::NotFound(err.to_string()),
            DocumentError::DuplicateId(_)
            | DocumentError::InvalidField { .. }
            | DocumentError::InvalidValue(_)
            | DocumentError::ClockSkew { .. }
            | DocumentError::ClockExhausted => Self::Validation(err.to_string()),
        }
    }
}

/// Failures talking to a room actor.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("room unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error("not joined to a room")]
    NotJoined,
    #[error("permission denied: {0}")]
    Permission(String),
}

impl ErrorCode for RoomError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "E_ROOM_UNAVAILABLE",
            Self::Document(e) => e.error_code(),
            Self::NotJoined => "E_NOT_JOINED",
            Self::Permission(_) => "E_PERMISSION",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
