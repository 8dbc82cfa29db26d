//! Error types for the ledger sync engine.

use crate::remote::RemoteError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All possible errors surfaced across the engine/application boundary.
///
/// Conflicts are not errors: they come back as [`crate::SyncOutcome::Conflict`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Session errors
    #[error("device is offline")]
    Offline,

    #[error("no user is signed in")]
    NotAuthenticated,

    // Remote errors
    #[error("network error: {0}")]
    Network(String),

    #[error("permission denied: {0}")]
    Permission(String),

    // Data errors
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    // Local persistence errors
    #[error("storage quota exceeded: {0}")]
    StorageQuotaExceeded(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}

/// Coarse classification used to pick the next engine status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    Network,
    Offline,
    Permission,
    Unknown,
}

/// What the application should offer the user after an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecommendedAction {
    /// Try again, manually or on the next auto-sync tick
    Retry,
    /// Prompt the user to sign in again
    SignIn,
    /// Local storage is full; export or clear old data
    ExportOrClear,
    /// Nothing actionable
    None,
}

impl Error {
    /// Classify this error for status transitions.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Network(_) => ErrorClass::Network,
            Error::Offline => ErrorClass::Offline,
            Error::Permission(_) | Error::NotAuthenticated => ErrorClass::Permission,
            _ => ErrorClass::Unknown,
        }
    }

    /// The action the application should recommend.
    pub fn recommended_action(&self) -> RecommendedAction {
        match self {
            Error::Network(_) | Error::Offline => RecommendedAction::Retry,
            Error::Permission(_) | Error::NotAuthenticated => RecommendedAction::SignIn,
            Error::StorageQuotaExceeded(_) => RecommendedAction::ExportOrClear,
            _ => RecommendedAction::None,
        }
    }

    /// Whether a later attempt may succeed without user involvement.
    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::Network | ErrorClass::Offline)
    }
}

impl From<RemoteError> for Error {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Network(msg) => Error::Network(msg),
            RemoteError::Offline | RemoteError::NotConfigured => Error::Offline,
            RemoteError::Permission(msg) => Error::Permission(msg),
            RemoteError::NotFound(what) => Error::NotFound(what),
            RemoteError::VersionConflict { expected, actual } => Error::Unknown(format!(
                "remote version moved: expected {}, found {}",
                expected, actual
            )),
            RemoteError::Other(msg) => Error::Unknown(msg),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidPayload(err.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::NotFound("conflict c-1".into());
        assert_eq!(err.to_string(), "not found: conflict c-1");

        let err = Error::ChecksumMismatch {
            expected: "abc".into(),
            actual: "def".into(),
        };
        assert_eq!(err.to_string(), "checksum mismatch: expected abc, got def");
    }

    #[test]
    fn classification() {
        assert_eq!(Error::Network("reset".into()).class(), ErrorClass::Network);
        assert_eq!(Error::Offline.class(), ErrorClass::Offline);
        assert_eq!(Error::Permission("denied".into()).class(), ErrorClass::Permission);
        assert_eq!(Error::InvalidPayload("x".into()).class(), ErrorClass::Unknown);
    }

    #[test]
    fn recommended_actions() {
        assert_eq!(Error::Offline.recommended_action(), RecommendedAction::Retry);
        assert_eq!(
            Error::NotAuthenticated.recommended_action(),
            RecommendedAction::SignIn
        );
        assert_eq!(
            Error::StorageQuotaExceeded("full".into()).recommended_action(),
            RecommendedAction::ExportOrClear
        );
        assert_eq!(
            Error::Unknown("?".into()).recommended_action(),
            RecommendedAction::None
        );
        assert!(Error::Network("timeout".into()).is_retryable());
        assert!(!Error::Permission("denied".into()).is_retryable());
    }

    #[test]
    fn remote_errors_convert() {
        assert_eq!(Error::from(RemoteError::Offline), Error::Offline);
        assert_eq!(Error::from(RemoteError::NotConfigured), Error::Offline);
        assert_eq!(
            Error::from(RemoteError::Permission("rules".into())),
            Error::Permission("rules".into())
        );
    }
}
