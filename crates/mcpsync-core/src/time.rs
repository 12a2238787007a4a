//! Wire timestamps.
//!
//! Every outbound frame carries an RFC 3339 UTC timestamp with millisecond
//! precision and a `Z` suffix.

use chrono::{DateTime, SecondsFormat, Utc};

/// Format a UTC instant for the wire.
pub fn to_rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current time formatted for the wire.
pub fn now_rfc3339() -> String {
    to_rfc3339(Utc::now())
}
