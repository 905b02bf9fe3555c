use std::io;
use thiserror::Error;

/// Identity failures reported by a remote gateway.
///
/// These are surfaced verbatim to the user at sign-in/sign-up time.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Email address is already in use")]
    EmailInUse,

    #[error("Password is too weak")]
    WeakPassword,

    #[error("No account found for this email")]
    UserNotFound,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Remote unreachable: {0}")]
    Offline(String),

    #[error("Remote not ready: {0}")]
    NotReady(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Remote gateway is not configured")]
    NotConfigured,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Returns a stable error code for this error variant.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Io(_) => "IO_ERROR",
            Error::Json(_) => "JSON_ERROR",
            Error::InvalidFormat(_) => "INVALID_FORMAT",
            Error::Validation(_) => "VALIDATION_FAILED",
            Error::Offline(_) => "OFFLINE",
            Error::NotReady(_) => "NOT_READY",
            Error::PermissionDenied(_) => "PERMISSION_DENIED",
            Error::Auth(AuthError::InvalidCredentials) => "AUTH_INVALID_CREDENTIALS",
            Error::Auth(AuthError::EmailInUse) => "AUTH_EMAIL_IN_USE",
            Error::Auth(AuthError::WeakPassword) => "AUTH_WEAK_PASSWORD",
            Error::Auth(AuthError::UserNotFound) => "AUTH_USER_NOT_FOUND",
            Error::Remote(_) => "REMOTE_ERROR",
            Error::NotConfigured => "NOT_CONFIGURED",
            Error::Cancelled => "CANCELLED",
            Error::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Returns true if a download failing with this error is worth one more try.
    ///
    /// Only the "not ready yet" and "permission" classes qualify: both show up
    /// right after sign-in while the remote side is still settling.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::NotReady(_) | Error::PermissionDenied(_))
    }

    /// Returns true if the failure should degrade to local-only operation
    /// without bothering the user.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            Error::Offline(_) | Error::NotReady(_) | Error::PermissionDenied(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classes() {
        assert!(Error::NotReady("warming up".into()).is_retryable());
        assert!(Error::PermissionDenied("rules".into()).is_retryable());
        assert!(!Error::Offline("blocked".into()).is_retryable());
        assert!(!Error::Remote("boom".into()).is_retryable());
        assert!(!Error::Auth(AuthError::WeakPassword).is_retryable());
    }

    #[test]
    fn test_offline_is_soft() {
        assert!(Error::Offline("no network".into()).is_soft());
        assert!(!Error::InvalidFormat("x".into()).is_soft());
    }

    #[test]
    fn test_auth_codes_are_distinct() {
        let codes = [
            Error::Auth(AuthError::InvalidCredentials).code(),
            Error::Auth(AuthError::EmailInUse).code(),
            Error::Auth(AuthError::WeakPassword).code(),
            Error::Auth(AuthError::UserNotFound).code(),
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
