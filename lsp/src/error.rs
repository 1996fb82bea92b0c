//! Error taxonomy for the transport and session layers.
//!
//! Timeouts and closed streams are reported distinctly from protocol
//! violations: a slow server and a dead server call for different decisions
//! in the orchestrator.

use std::io;
use std::time::Duration;

use crate::message::ResponseError;
use crate::types::SessionState;

/// Violations of the framing or JSON-RPC message contract.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("header block exceeds {max} bytes without a blank-line terminator")]
    HeaderTooLarge { max: usize },

    #[error("header block is not valid UTF-8")]
    NonUtf8Header,

    #[error("missing Content-Length header")]
    MissingContentLength,

    #[error("invalid Content-Length value: {0:?}")]
    InvalidContentLength(String),

    #[error("Content-Length {len} exceeds maximum {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("stream closed inside a header block after {received} bytes")]
    TruncatedHeader { received: usize },

    #[error("stream closed after {received} of {expected} body bytes")]
    TruncatedBody { expected: usize, received: usize },

    #[error("frame body is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("not a JSON-RPC request, response, or notification: {0}")]
    InvalidMessage(String),
}

/// Every failure the transport, session, and harness can surface.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("timed out after {after:?} waiting for {operation}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("server closed its output while waiting for {operation}")]
    StreamClosed { operation: &'static str },

    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("serializing message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("server rejected `{method}`: {error}")]
    RequestFailed { method: String, error: ResponseError },

    #[error("invalid session transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },
}

impl TransportError {
    pub(crate) fn io(context: &'static str, source: io::Error) -> Self {
        Self::Io { context, source }
    }

    /// Whether the error means the session can no longer exchange messages.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Timeout { .. } | Self::RequestFailed { .. })
    }
}

pub type Result<T, E = TransportError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::message::ResponseError;

    #[test]
    fn test_fatal_classification() {
        let timeout = TransportError::Timeout {
            operation: "initialize",
            after: Duration::from_secs(1),
        };
        assert!(!timeout.is_fatal());
        assert_eq!(
            timeout.to_string(),
            "timed out after 1s waiting for initialize"
        );

        let failed = TransportError::RequestFailed {
            method: "initialize".into(),
            error: ResponseError::method_not_found("initialize"),
        };
        assert!(!failed.is_fatal());

        assert!(TransportError::StreamClosed { operation: "shutdown" }.is_fatal());
        assert!(TransportError::from(ProtocolError::MissingContentLength).is_fatal());
    }
}
