//! Structured errors raised at the engine boundary.
//!
//! Everything that crosses from the network or the user into the engine
//! is classified here so callers can decide whether a failure ends the
//! turn, is shown as a warning, or is skipped.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Categories of engine errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A stream line that is not a conforming event
    Framing,
    /// Connection dropped or the byte stream broke mid-read
    Transport,
    /// HTTP status error (4xx, 5xx)
    HttpStatus,
    /// Connection timeout or request timeout
    Timeout,
    /// Input rejected locally before any transfer
    Validation,
    /// The approval side channel refused a decision
    Rejected,
    /// Operation requires a pending checkpoint but none is open
    NoCheckpoint,
    /// Local history could not be read or written
    Storage,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Framing => write!(f, "framing"),
            ErrorKind::Transport => write!(f, "transport"),
            ErrorKind::HttpStatus => write!(f, "http_status"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::Rejected => write!(f, "rejected"),
            ErrorKind::NoCheckpoint => write!(f, "no_checkpoint"),
            ErrorKind::Storage => write!(f, "storage"),
        }
    }
}

/// Structured error with kind and optional details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineError {
    /// Error category
    pub kind: ErrorKind,
    /// One-line summary suitable for display
    pub message: String,
    /// Optional additional details (e.g., raw response body)
    pub details: Option<String>,
}

impl EngineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Creates an HTTP status error, pulling a readable message out of
    /// `{"detail": ...}` or `{"error": {"message": ...}}` bodies when present.
    pub fn http_status(status: u16, body: &str) -> Self {
        let mut err = Self::new(ErrorKind::HttpStatus, format!("HTTP {status}"));
        if body.is_empty() {
            return err;
        }

        if let Ok(json) = serde_json::from_str::<Value>(body) {
            let reason = json
                .get("detail")
                .and_then(Value::as_str)
                .or_else(|| {
                    json.get("error")
                        .and_then(|e| e.get("message"))
                        .and_then(Value::as_str)
                });
            if let Some(reason) = reason {
                err.message = format!("HTTP {status}: {reason}");
            }
        }
        err.with_details(body)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    pub fn framing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Framing, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Whether the failure ends the stream it came from.
    ///
    /// Framing errors only cost one line; everything on the connection
    /// level abandons the stream.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Transport | ErrorKind::HttpStatus | ErrorKind::Timeout
        )
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for EngineError {}

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Maps a reqwest failure onto the engine taxonomy.
pub(crate) fn classify_reqwest_error(e: &reqwest::Error) -> EngineError {
    if e.is_timeout() {
        EngineError::timeout(format!("Request timed out: {e}"))
    } else if e.is_connect() {
        EngineError::transport(format!("Connection failed: {e}"))
    } else if e.is_decode() || e.is_body() {
        EngineError::transport(format!("Response body error: {e}"))
    } else {
        EngineError::transport(format!("Network error: {e}"))
    }
}
