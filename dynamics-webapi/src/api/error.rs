//! Error types for the Web API protocol layer
//!
//! | Variant | Cause | Retryable |
//! |---------|-------|-----------|
//! | `Configuration` | malformed query or operation setup | No |
//! | `ParameterMismatch` | action/function arguments disagree with metadata | No |
//! | `RemoteOperation` | server returned a non-2xx (or a failed batch part) | 429/503 only |
//! | `ProtocolDecode` | response did not have the expected shape | No |
//! | `Transport` | the transport collaborator failed | No |
//! | `Authentication` | the token provider could not supply a token | No |
//!
//! Nothing in this crate retries on its own. Whether a write was applied before a
//! failure is only known to the caller, so the retry decision is left there.

use serde::Deserialize;
use std::fmt;
use thiserror::Error;

/// Result type for Web API operations.
pub type Result<T> = std::result::Result<T, WebApiError>;

#[derive(Error, Debug)]
pub enum WebApiError {
    /// Malformed query or operation setup. Caller's fault.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Supplied parameter names do not match the declared metadata.
    #[error("parameter mismatch (missing: [{}], unexpected: [{}])", .missing.join(", "), .extra.join(", "))]
    ParameterMismatch {
        missing: Vec<String>,
        extra: Vec<String>,
    },

    #[error(transparent)]
    RemoteOperation(#[from] RemoteOperationError),

    /// Response body did not match the expected shape.
    #[error("protocol decode error: {0}")]
    ProtocolDecode(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("authentication error: {0}")]
    Authentication(String),
}

impl WebApiError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::ProtocolDecode(message.into())
    }

    /// Only remote 429/503 responses are considered retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RemoteOperation(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// The remote error, if this is one
    pub fn as_remote(&self) -> Option<&RemoteOperationError> {
        match self {
            Self::RemoteOperation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for WebApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::ProtocolDecode(err.to_string())
    }
}

/// Error reported by the server, either for a whole request or a single batch part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteOperationError {
    /// Server error code (e.g. `0x80040217`), empty if the body carried none
    pub code: String,
    pub message: String,
    pub http_status: u16,
    /// Position of the failed operation within a batch
    pub operation_index: Option<usize>,
}

impl RemoteOperationError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, http_status: u16) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            http_status,
            operation_index: None,
        }
    }

    pub fn at_index(mut self, index: usize) -> Self {
        self.operation_index = Some(index);
        self
    }

    /// Build from a raw error response. Falls back to the body text when the
    /// payload is not the usual `{ "error": { code, message } }` envelope.
    pub fn from_response(http_status: u16, body: &str) -> Self {
        #[derive(Deserialize)]
        struct Envelope {
            error: ErrorBody,
        }

        #[derive(Deserialize)]
        struct ErrorBody {
            #[serde(default)]
            code: String,
            #[serde(default)]
            message: String,
        }

        match serde_json::from_str::<Envelope>(body) {
            Ok(envelope) => Self::new(envelope.error.code, envelope.error.message, http_status),
            Err(_) => {
                let message = body.trim();
                let message = if message.is_empty() {
                    format!("HTTP {}", http_status)
                } else {
                    message.to_string()
                };
                Self::new("", message, http_status)
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.http_status, 429 | 503)
    }
}

impl fmt::Display for RemoteOperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "remote operation failed (HTTP {}", self.http_status)?;
        if !self.code.is_empty() {
            write!(f, ", code {}", self.code)?;
        }
        if let Some(index) = self.operation_index {
            write!(f, ", operation #{}", index)?;
        }
        write!(f, "): {}", self.message)
    }
}

impl std::error::Error for RemoteOperationError {}
