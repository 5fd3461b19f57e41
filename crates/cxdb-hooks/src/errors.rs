//! Hook error types.
//!
//! None of these cross the host boundary. [`RouterError`] is the internal
//! result of each router step and ends up in a log line; [`MountError`] is
//! returned from [`crate::mount`] when the hook cannot be set up at all.

use cxdb_client::ClientError;
use cxdb_core::WireError;
use cxdb_settings::SettingsError;
use thiserror::Error;

/// Failure of one internal router step.
#[derive(Debug, Error)]
pub enum RouterError {
    /// A store RPC failed.
    #[error(transparent)]
    Store(#[from] ClientError),

    /// A record could not be encoded.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// The step needs contexts that have not been created yet.
    #[error("router not initialized")]
    NotInitialized,

    /// Registry publishing failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl RouterError {
    /// Short classification used as a structured log field.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Store(e) if e.is_connection_error() => "connection",
            Self::Store(ClientError::NotConnected) => "not_connected",
            Self::Store(e) if e.is_protocol_error() => "protocol",
            Self::Store(_) => "store",
            Self::Wire(_) => "encode",
            Self::NotInitialized => "not_initialized",
            Self::Registry(_) => "registry",
        }
    }
}

/// Registry bundle publishing errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Transport-level HTTP failure.
    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a status other than 201/204.
    #[error("registry publish returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// First 200 characters of the response body.
        body: String,
    },

    /// The bundled document is not valid JSON.
    #[error("invalid registry bundle: {0}")]
    Bundle(#[from] serde_json::Error),
}

/// Errors that prevent the hook from being mounted.
#[derive(Debug, Error)]
pub enum MountError {
    /// Settings failed to resolve or validate.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// An exclusion pattern is not a valid glob.
    #[error("invalid exclude pattern '{pattern}': {source}")]
    Pattern {
        /// The offending pattern.
        pattern: String,
        /// Glob compile error.
        #[source]
        source: globset::Error,
    },

    /// Registry client could not be constructed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Failure reported by the host coordinator.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HostError(pub String);

/// Result type for mount operations.
pub type Result<T> = std::result::Result<T, MountError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_error_kinds() {
        let lost = RouterError::from(ClientError::ConnectionLost(std::io::Error::from(
            std::io::ErrorKind::BrokenPipe,
        )));
        assert_eq!(lost.kind(), "connection");
        assert_eq!(RouterError::from(ClientError::NotConnected).kind(), "not_connected");
        let proto = RouterError::from(ClientError::Protocol {
            code: Some(1),
            detail: "x".into(),
        });
        assert_eq!(proto.kind(), "protocol");
        assert_eq!(RouterError::NotInitialized.kind(), "not_initialized");
        assert_eq!(
            RouterError::from(WireError::Encode("x".into())).kind(),
            "encode"
        );
    }

    #[test]
    fn router_error_display_is_transparent() {
        let err = RouterError::from(ClientError::NotConnected);
        assert_eq!(err.to_string(), "not connected to CXDB");
    }

    #[test]
    fn registry_status_display() {
        let err = RegistryError::Status {
            status: 500,
            body: "boom".into(),
        };
        assert_eq!(err.to_string(), "registry publish returned 500: boom");
    }

    #[test]
    fn pattern_error_display() {
        let source = globset::Glob::new("a[").unwrap_err();
        let err = MountError::Pattern {
            pattern: "a[".into(),
            source,
        };
        assert!(err.to_string().starts_with("invalid exclude pattern 'a['"));
    }
}
