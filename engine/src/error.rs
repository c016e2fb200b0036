//! Error types for the Tandem engine.

use crate::TenantId;
use thiserror::Error;

/// All possible errors from the Tandem engine.
#[derive(Debug, Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // Remote store errors
    #[error("remote store error: {0}")]
    Remote(String),

    #[error("remote store not ready after {attempts} attempts")]
    NotReady { attempts: u32 },

    #[error("tenant mismatch: expected {expected}, got {found}")]
    TenantMismatch { expected: TenantId, found: TenantId },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("configuration error: {0}")]
    Config(String),

    // Validation errors
    #[error("unknown module: {0}")]
    UnknownModule(String),
}

impl Error {
    /// Whether the failure is worth retrying on a later pass. A 4xx answer
    /// will not change on its own.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(e) => !e.status().is_some_and(|status| status.is_client_error()),
            Error::Remote(_) | Error::NotReady { .. } | Error::WebSocket(_) | Error::Io(_) => true,
            _ => false,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::UnknownModule("nomina".into());
        assert_eq!(err.to_string(), "unknown module: nomina");

        let err = Error::TenantMismatch {
            expected: "acme".into(),
            found: "globex".into(),
        };
        assert_eq!(err.to_string(), "tenant mismatch: expected acme, got globex");

        let err = Error::NotReady { attempts: 10 };
        assert_eq!(err.to_string(), "remote store not ready after 10 attempts");
    }

    #[test]
    fn transient_classification() {
        assert!(Error::Remote("timeout".into()).is_transient());
        assert!(Error::NotReady { attempts: 3 }.is_transient());
        assert!(!Error::Config("x".into()).is_transient());
        assert!(!Error::UnknownModule("x".into()).is_transient());
    }
}
