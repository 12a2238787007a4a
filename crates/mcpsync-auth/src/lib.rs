//! # mcpsync-auth
//!
//! Authenticates WebSocket handshakes with signed bearer tokens.
//!
//! - [`Handshake`]: the query string and headers of an upgrade request, and
//!   the credential lookup order (`?token=`, `Authorization: Bearer`,
//!   `access_token` cookie)
//! - [`AuthValidator`]: structural check, HMAC signature verification,
//!   expiry and subject checks, token refresh
//! - [`Identity`]: who is on the other end of a connection
//!
//! Validation is pure: nothing here registers or remembers identities.

#![deny(unsafe_code)]

pub mod errors;
pub mod handshake;
pub mod identity;
pub mod validator;

pub use errors::AuthError;
pub use handshake::Handshake;
pub use identity::{Identity, Role};
pub use validator::{AuthValidator, TokenClaims};

/// Supported HMAC signing algorithms.
pub use jsonwebtoken::Algorithm;
