//! Authenticated identity carried by a connection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Privilege level claimed by a token. Unknown or missing roles map to the
/// lowest privilege.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Lowest privilege.
    #[default]
    Student,
    /// Course staff.
    Instructor,
    /// Operators; may modify other subjects' context when the override is on.
    Admin,
}

impl Role {
    /// Parse the `role` claim, falling back to [`Role::Student`].
    pub fn from_claim(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "admin" | "administrator" => Self::Admin,
            "instructor" | "teacher" => Self::Instructor,
            _ => Self::Student,
        }
    }

    /// Whether this role may override per-source ownership.
    pub fn is_admin(self) -> bool {
        matches!(self, Self::Admin)
    }

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Instructor => "instructor",
            Self::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a successful token validation. Lives only as long as the
/// connection that presented the token.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Value of the `sub` (or `user_id`) claim.
    pub subject_id: String,
    /// `name` / `username` claim, `"unknown"` when absent.
    pub display_name: String,
    /// `email` claim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// `role` claim.
    pub role: Role,
    /// `iat` claim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<DateTime<Utc>>,
    /// `exp` claim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Every claim as decoded.
    #[serde(skip)]
    pub raw_claims: Map<String, Value>,
}

impl Identity {
    /// Default context source for a connection of this identity.
    pub fn default_source(&self, connection_id: &str) -> String {
        format!("{}_{connection_id}", self.subject_id)
    }
}
