//! Wire protocol: JSON text frames, each with a `type` field.
//!
//! Inbound frames parse into [`ClientMessage`]; outbound frames are
//! [`ServerMessage`] envelopes `{type, data?, error?, timestamp}`.

pub mod errors;
pub mod inbound;
pub mod outbound;

pub use errors::ProtocolError;
pub use inbound::{ClientMessage, UpdateContext, parse_client_message};
pub use outbound::{ErrorBody, OutboundType, ServerMessage};

/// Close code for authentication or token refresh failure.
pub const CLOSE_AUTH_FAILED: u16 = 4001;
/// Close code for connections idle past the connection timeout.
pub const CLOSE_IDLE_TIMEOUT: u16 = 4002;
/// Close code when the server is at its connection limit (try again later).
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;
/// Close code when a newer connection from the same peer replaces this one.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code sent to every client when the server shuts down.
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Longest close reason a control frame can carry, in bytes.
pub const MAX_CLOSE_REASON: usize = 123;

/// Truncate `reason` to fit a close frame, on a char boundary.
pub fn close_reason(reason: &str) -> &str {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason;
    }
    let mut end = MAX_CLOSE_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}
