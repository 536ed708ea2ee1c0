//! Error taxonomy for the credential lifecycle.

use thiserror::Error;

use crate::cache::StoreError;

/// How a refresh failure should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshErrorKind {
    /// Network-level failure or a provisional server error. Retried with
    /// bounded backoff before being surfaced.
    Transient,

    /// The token endpoint rejected the refresh token (400/401-class
    /// response). Not retryable; forces re-authorization.
    Revoked,
}

impl std::fmt::Display for RefreshErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Revoked => write!(f, "revoked"),
        }
    }
}

/// Error type for credential-manager operations.
///
/// Every variant carries enough context to act on: which step failed and,
/// where the remote reported one, the OAuth error code.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The user declined consent. Not retryable; a new authorization is
    /// required.
    #[error("authorization denied: {reason}")]
    AuthDenied { reason: String },

    /// The authorization-code exchange errored or returned malformed data.
    /// Retried once internally, then surfaced.
    #[error("code exchange failed: {message}")]
    AuthExchangeFailed {
        message: String,
        /// OAuth error code reported by the token endpoint, if any.
        code: Option<String>,
    },

    /// The callback arrived on a URI other than the configured redirect URI.
    /// Configuration error; fatal.
    #[error("redirect URI mismatch: expected {expected}, received {received}")]
    RedirectMismatch { expected: String, received: String },

    /// The refresh-token exchange failed.
    ///
    /// `Transient` failures have already exhausted the retry budget when
    /// this surfaces; `Revoked` failures have forced the manager back to
    /// the unauthenticated state.
    #[error("token refresh failed ({kind}): {message}")]
    RefreshFailed {
        kind: RefreshErrorKind,
        message: String,
    },

    /// A required configuration field is absent or unusable. Fatal at
    /// startup.
    #[error("missing configuration: {field}")]
    ConfigMissing { field: &'static str },

    /// The granted scope does not cover what the caller requires.
    #[error("requested scopes not granted: {}", missing.join(", "))]
    ScopeNotGranted { missing: Vec<String> },

    /// Credential cache I/O failed.
    #[error("credential cache error: {0}")]
    Store(#[from] StoreError),
}

impl AuthError {
    /// Whether this is a refresh failure of the given kind.
    pub fn is_refresh_failure(&self, expected: RefreshErrorKind) -> bool {
        matches!(self, Self::RefreshFailed { kind, .. } if *kind == expected)
    }
}
