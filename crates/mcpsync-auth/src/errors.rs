//! Auth error types.

use chrono::{DateTime, Utc};

/// Errors produced while authenticating a handshake or refreshing a token.
///
/// Every variant terminates the handshake (or the session, on refresh) with
/// close code 4001.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No token in the query string, `Authorization` header or cookie.
    #[error("missing credential")]
    MissingCredential,

    /// The token is not three base64url segments, or its JSON is unreadable.
    #[error("malformed credential: {0}")]
    MalformedCredential(String),

    /// Signature does not verify with the configured secret and algorithm.
    #[error("invalid signature")]
    InvalidSignature,

    /// The `exp` claim is in the past.
    #[error("token expired at {expired_at}")]
    Expired {
        /// Expiry instant carried by the token.
        expired_at: DateTime<Utc>,
    },

    /// Neither `sub` nor `user_id` is present.
    #[error("token has no subject claim")]
    MissingSubject,

    /// A refreshed token names a different subject than the connection.
    #[error("refreshed token subject {actual} does not match {expected}")]
    SubjectMismatch {
        /// Subject bound to the connection.
        expected: String,
        /// Subject in the new token.
        actual: String,
    },

    /// No signing secret configured and ephemeral secrets are disabled.
    #[error("no JWT secret configured")]
    SecretNotConfigured,

    /// The configured algorithm is not an HMAC algorithm.
    #[error("unsupported JWT algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Token signing failed (development token minting only).
    #[error("failed to sign token: {0}")]
    Signing(String),
}

impl AuthError {
    /// Short stable label, used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_credential",
            Self::MalformedCredential(_) => "malformed_credential",
            Self::InvalidSignature => "invalid_signature",
            Self::Expired { .. } => "expired",
            Self::MissingSubject => "missing_subject",
            Self::SubjectMismatch { .. } => "subject_mismatch",
            Self::SecretNotConfigured => "secret_not_configured",
            Self::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            Self::Signing(_) => "signing",
        }
    }
}
