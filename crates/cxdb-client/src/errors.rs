//! Client error taxonomy.
//!
//! The router's buffering decisions hinge on telling these apart: a
//! connection error means the socket is gone and the client is already
//! `Disconnected`, while a protocol error leaves the connection usable.

use std::time::Duration;

use cxdb_core::WireError;
use thiserror::Error;

/// Errors raised by [`crate::CxdbClient`] and other [`crate::ContextStore`]s.
#[derive(Debug, Error)]
pub enum ClientError {
    /// TCP connect failed.
    #[error("failed to connect to CXDB at {addr}: {source}")]
    Connect {
        /// `host:port` that was dialed.
        addr: String,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// Connect or request did not finish in time.
    #[error("CXDB {op} timed out after {timeout:?}")]
    Timeout {
        /// Operation that timed out.
        op: &'static str,
        /// Configured limit.
        timeout: Duration,
    },

    /// The socket failed or closed mid-exchange.
    #[error("CXDB connection lost: {0}")]
    ConnectionLost(#[source] std::io::Error),

    /// An operation was attempted before `connect` or after `close`.
    #[error("not connected to CXDB")]
    NotConnected,

    /// The server replied with an ERROR frame.
    #[error("CXDB error{}: {detail}", code_suffix(.code))]
    Protocol {
        /// Server error code, absent for the raw-text fallback.
        code: Option<u32>,
        /// Server-supplied detail.
        detail: String,
    },

    /// A response was too short for the fields the RPC expects.
    #[error("{op} response too short: {got} bytes, need {need}")]
    Malformed {
        /// RPC whose response was malformed.
        op: &'static str,
        /// Bytes received.
        got: usize,
        /// Bytes required.
        need: usize,
    },

    /// Local encoding failed before anything was sent.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// Store-specific failure that fits none of the above (used by
    /// non-TCP stores).
    #[error("{0}")]
    Other(String),
}

impl ClientError {
    /// Whether this error means the connection is gone.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Timeout { .. } | Self::ConnectionLost(_)
        )
    }

    /// Whether the server answered but the answer was an error or unusable.
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Protocol { .. } | Self::Malformed { .. })
    }
}

#[allow(clippy::ref_option)]
fn code_suffix(code: &Option<u32>) -> String {
    code.map(|c| format!(" (code={c})")).unwrap_or_default()
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let lost = ClientError::ConnectionLost(std::io::Error::from(
            std::io::ErrorKind::UnexpectedEof,
        ));
        assert!(lost.is_connection_error());
        assert!(!lost.is_protocol_error());

        let timeout = ClientError::Timeout {
            op: "APPEND_TURN",
            timeout: Duration::from_secs(5),
        };
        assert!(timeout.is_connection_error());

        let proto = ClientError::Protocol {
            code: Some(7),
            detail: "bad".into(),
        };
        assert!(proto.is_protocol_error());
        assert!(!proto.is_connection_error());

        let short = ClientError::Malformed {
            op: "GET_HEAD",
            got: 4,
            need: 12,
        };
        assert!(short.is_protocol_error());

        assert!(!ClientError::NotConnected.is_connection_error());
        assert!(!ClientError::NotConnected.is_protocol_error());
    }

    #[test]
    fn protocol_display_with_and_without_code() {
        let with_code = ClientError::Protocol {
            code: Some(404),
            detail: "context not found".into(),
        };
        assert_eq!(
            with_code.to_string(),
            "CXDB error (code=404): context not found"
        );

        let raw = ClientError::Protocol {
            code: None,
            detail: "boom".into(),
        };
        assert_eq!(raw.to_string(), "CXDB error: boom");
    }

    #[test]
    fn malformed_display() {
        let err = ClientError::Malformed {
            op: "CTX_CREATE",
            got: 8,
            need: 20,
        };
        assert_eq!(err.to_string(), "CTX_CREATE response too short: 8 bytes, need 20");
    }

    #[test]
    fn wire_error_converts() {
        let err: ClientError = WireError::Encode("x".into()).into();
        assert!(!err.is_connection_error());
        assert!(err.to_string().contains("encode"));
    }
}
