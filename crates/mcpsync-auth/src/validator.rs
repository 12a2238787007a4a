//! Token validation.
//!
//! Order of checks on every token:
//!
//! 1. structure: three non-empty base64url segments
//! 2. signature, with the configured HMAC algorithm and secret
//! 3. `exp`, when present, must not be in the past
//! 4. a subject (`sub`, falling back to `user_id`) must be present
//!
//! `exp` and subject checks are done here rather than by `jsonwebtoken` so
//! each failure maps to its own [`AuthError`] variant.

use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use mcpsync_settings::AuthSettings;
use rand::RngCore;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::errors::AuthError;
use crate::handshake::Handshake;
use crate::identity::{Identity, Role};

const EPHEMERAL_SECRET_LEN: usize = 32;

/// Verifies bearer tokens with a shared HMAC secret.
#[derive(Clone)]
pub struct AuthValidator {
    algorithm: Algorithm,
    decoding: DecodingKey,
    encoding: EncodingKey,
    validation: Validation,
}

impl std::fmt::Debug for AuthValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthValidator")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl AuthValidator {
    /// Build a validator for `secret` using an HMAC `algorithm`.
    pub fn new(secret: &[u8], algorithm: Algorithm) -> Result<Self, AuthError> {
        if !matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(AuthError::UnsupportedAlgorithm(format!("{algorithm:?}")));
        }
        if secret.is_empty() {
            return Err(AuthError::SecretNotConfigured);
        }

        let mut validation = Validation::new(algorithm);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        Ok(Self {
            algorithm,
            decoding: DecodingKey::from_secret(secret),
            encoding: EncodingKey::from_secret(secret),
            validation,
        })
    }

    /// Build from settings. Without a configured secret this fails unless
    /// `allowEphemeralSecret` is set, in which case a random per-process
    /// secret is generated (tokens then die with the process).
    pub fn from_settings(settings: &AuthSettings) -> Result<Self, AuthError> {
        let algorithm = Algorithm::from_str(&settings.jwt_algorithm)
            .map_err(|_| AuthError::UnsupportedAlgorithm(settings.jwt_algorithm.clone()))?;

        match settings.jwt_secret.as_deref() {
            Some(secret) if !secret.is_empty() => Self::new(secret.as_bytes(), algorithm),
            _ if settings.allow_ephemeral_secret => {
                warn!("no JWT secret configured, using an ephemeral secret for this process");
                let mut secret = [0u8; EPHEMERAL_SECRET_LEN];
                rand::rng().fill_bytes(&mut secret);
                Self::new(&secret, algorithm)
            }
            _ => Err(AuthError::SecretNotConfigured),
        }
    }

    /// Algorithm this validator accepts.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Extract the credential from a handshake and validate it.
    pub fn authenticate(&self, handshake: &Handshake) -> Result<Identity, AuthError> {
        let token = handshake.credential()?;
        self.validate(&token)
    }

    /// Validate a raw token.
    pub fn validate(&self, token: &str) -> Result<Identity, AuthError> {
        self.validate_at(token, Utc::now())
    }

    /// Validate a raw token against an explicit clock.
    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<Identity, AuthError> {
        check_structure(token)?;

        let data = jsonwebtoken::decode::<Map<String, Value>>(token, &self.decoding, &self.validation)
            .map_err(map_decode_error)?;
        let claims = data.claims;

        let expires_at = timestamp_claim(&claims, "exp")?;
        if let Some(exp) = expires_at {
            if exp < now {
                return Err(AuthError::Expired { expired_at: exp });
            }
        }

        let subject_id = subject(&claims).ok_or(AuthError::MissingSubject)?;
        let display_name = ["name", "username", "display_name"]
            .iter()
            .find_map(|k| claims.get(*k).and_then(Value::as_str))
            .filter(|s| !s.is_empty())
            .unwrap_or("unknown")
            .to_owned();
        let email = claims
            .get("email")
            .and_then(Value::as_str)
            .map(str::to_owned);
        let role = claims
            .get("role")
            .and_then(Value::as_str)
            .map(Role::from_claim)
            .unwrap_or_default();
        let issued_at = timestamp_claim(&claims, "iat")?;

        debug!(subject = %subject_id, %role, "token validated");
        Ok(Identity {
            subject_id,
            display_name,
            email,
            role,
            issued_at,
            expires_at,
            raw_claims: claims,
        })
    }

    /// Validate `new_token` and require it to name the same subject as
    /// `current`.
    pub fn refresh(&self, current: &Identity, new_token: &str) -> Result<Identity, AuthError> {
        let next = self.validate(new_token)?;
        if next.subject_id != current.subject_id {
            return Err(AuthError::SubjectMismatch {
                expected: current.subject_id.clone(),
                actual: next.subject_id,
            });
        }
        Ok(next)
    }

    /// Sign `claims` with this validator's secret.
    pub fn sign(&self, claims: &TokenClaims) -> Result<String, AuthError> {
        jsonwebtoken::encode(&Header::new(self.algorithm), claims, &self.encoding)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }
}

/// Claims minted by [`AuthValidator::sign`].
#[derive(Clone, Debug, Serialize)]
pub struct TokenClaims {
    /// Subject.
    pub sub: String,
    /// Display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Email address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Role.
    pub role: Role,
    /// Issued-at, seconds since epoch.
    pub iat: i64,
    /// Expiry, seconds since epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

impl TokenClaims {
    /// Claims for `sub` issued now, without expiry.
    pub fn new(sub: impl Into<String>) -> Self {
        Self {
            sub: sub.into(),
            name: None,
            email: None,
            role: Role::Student,
            iat: Utc::now().timestamp(),
            exp: None,
        }
    }

    /// Expire `ttl` after the issue time.
    #[must_use]
    pub fn expires_in(mut self, ttl: Duration) -> Self {
        self.exp = Some(self.iat + ttl.num_seconds());
        self
    }

    /// Set the role.
    #[must_use]
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Set the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the email.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

fn check_structure(token: &str) -> Result<(), AuthError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(AuthError::MalformedCredential(format!(
            "expected 3 segments, found {}",
            segments.len()
        )));
    }
    for (idx, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            return Err(AuthError::MalformedCredential(format!("segment {idx} is empty")));
        }
        let _ = URL_SAFE_NO_PAD
            .decode(segment.trim_end_matches('='))
            .map_err(|_| AuthError::MalformedCredential(format!("segment {idx} is not base64url")))?;
    }
    Ok(())
}

fn map_decode_error(err: jsonwebtoken::errors::Error) -> AuthError {
    match err.kind() {
        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => AuthError::InvalidSignature,
        ErrorKind::ExpiredSignature => AuthError::Expired {
            expired_at: Utc::now(),
        },
        other => AuthError::MalformedCredential(format!("{other:?}")),
    }
}

fn subject(claims: &Map<String, Value>) -> Option<String> {
    ["sub", "user_id"].iter().find_map(|k| match claims.get(*k)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn timestamp_claim(
    claims: &Map<String, Value>,
    name: &str,
) -> Result<Option<DateTime<Utc>>, AuthError> {
    let Some(value) = claims.get(name) else {
        return Ok(None);
    };
    let secs = value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
        .ok_or_else(|| AuthError::MalformedCredential(format!("{name} is not numeric")))?;
    DateTime::from_timestamp(secs, 0)
        .map(Some)
        .ok_or_else(|| AuthError::MalformedCredential(format!("{name} out of range")))
}
