//! Bearer token verification settings.

use serde::{Deserialize, Serialize};

/// HMAC algorithms the validator can verify with a shared secret.
pub const SUPPORTED_JWT_ALGORITHMS: &[&str] = &["HS256", "HS384", "HS512"];

/// JWT verification settings supplied by the identity layer.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Shared HMAC secret. Required unless `allow_ephemeral_secret` is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,
    /// Signing algorithm name.
    pub jwt_algorithm: String,
    /// Generate a random per-process secret when none is configured.
    ///
    /// Tokens signed by one process are rejected by every other, so this is
    /// only usable for a single local instance.
    pub allow_ephemeral_secret: bool,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            jwt_algorithm: "HS256".to_string(),
            allow_ephemeral_secret: false,
        }
    }
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "<redacted>"))
            .field("jwt_algorithm", &self.jwt_algorithm)
            .field("allow_ephemeral_secret", &self.allow_ephemeral_secret)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_secret() {
        let settings = AuthSettings {
            jwt_secret: Some("hunter2".into()),
            ..AuthSettings::default()
        };
        let debug = format!("{settings:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }
}
