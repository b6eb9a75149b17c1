//! Error types for the RPC layer.
//!
//! Rejections cross the channel as a `{ code, message }` record; the codes
//! below let the calling side map a rejection back onto an [`RpcError`].

use std::time::Duration;
use thiserror::Error;

/// Numeric rejection codes carried in the `code` field of a rejection.
pub mod codes {
    // JSON-RPC 2.0 standard range
    pub const HANDLER_NOT_FOUND: i64 = -32601;

    // Server range
    pub const HANDLER_ERROR: i64 = -32000;
}

/// Errors surfaced to the caller of an outbound call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// The remote registry has no handler under this name.
    #[error("handler not found: {name}")]
    HandlerNotFound { name: String },

    /// No result arrived within the call's timeout window.
    #[error("call to {name} timed out after {}ms", .after.as_millis())]
    Timeout { name: String, after: Duration },

    /// The remote handler failed; only its message survives the boundary.
    #[error("remote handler failed ({code}): {message}")]
    Remote { code: i64, message: String },

    /// The channel reported an error or was closed.
    #[error("connection error: {reason}")]
    ConnectionFailure { reason: String },

    /// The result for this call arrived but could not be decoded.
    #[error("malformed message: {reason}")]
    Malformed { reason: String },
}

impl RpcError {
    pub(crate) fn connection(reason: impl Into<String>) -> Self {
        Self::ConnectionFailure {
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    /// Rebuild an error from a rejection's code and message.
    ///
    /// `name` is the handler the failed call targeted.
    pub fn from_rejection(name: &str, code: i64, message: String) -> Self {
        match code {
            codes::HANDLER_NOT_FOUND => Self::HandlerNotFound {
                name: name.to_string(),
            },
            _ => Self::Remote { code, message },
        }
    }
}

/// Result type for RPC operations.
pub type RpcResult<T> = Result<T, RpcError>;

/// Error returned by a local handler body.
///
/// Only the message is sent back to the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// A required argument was absent or had the wrong shape.
    pub fn invalid_argument(index: usize, expected: &str) -> Self {
        Self::new(format!("argument {index}: expected {expected}"))
    }
}

impl From<RpcError> for HandlerError {
    fn from(err: RpcError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Errors from the underlying channel primitive.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel closed")]
    Closed,

    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Errors from the wire codec.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("back-reference to unknown node {0}")]
    DanglingReference(u64),

    #[error("unsupported callable token kind: {0}")]
    UnsupportedToken(String),

    #[error("local callable found in a transport payload")]
    UnexpectedCallable,

    #[error("cyclic value cannot be converted to plain JSON")]
    Cyclic,

    #[error("non-finite float {0} has no plain JSON form")]
    NonFinite(f64),

    #[error("invalid hex buffer: {0}")]
    Hex(#[from] hex::FromHexError),
}
