//! Credential lookup on an upgrade request.

use std::collections::HashMap;

use axum::http::{HeaderMap, header::AUTHORIZATION};
use axum_extra::extract::cookie::CookieJar;

use crate::errors::AuthError;

/// Query parameter carrying the token.
pub const TOKEN_QUERY_PARAM: &str = "token";
/// Cookie carrying the token.
pub const TOKEN_COOKIE: &str = "access_token";

/// The parts of an upgrade request that may carry a credential.
#[derive(Clone, Debug, Default)]
pub struct Handshake {
    query: HashMap<String, String>,
    headers: HeaderMap,
}

impl Handshake {
    /// Build from a parsed query string and the request headers.
    pub fn new(query: HashMap<String, String>, headers: HeaderMap) -> Self {
        Self { query, headers }
    }

    /// Find the bearer token, first match wins:
    /// query `token`, then `Authorization: Bearer`, then the `access_token`
    /// cookie. Empty values count as absent.
    pub fn credential(&self) -> Result<String, AuthError> {
        self.from_query()
            .or_else(|| self.from_authorization())
            .or_else(|| self.from_cookie())
            .ok_or(AuthError::MissingCredential)
    }

    fn from_query(&self) -> Option<String> {
        self.query
            .get(TOKEN_QUERY_PARAM)
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_owned)
    }

    fn from_authorization(&self) -> Option<String> {
        let value = self.headers.get(AUTHORIZATION)?.to_str().ok()?;
        let (scheme, token) = value.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }
        let token = token.trim();
        (!token.is_empty()).then(|| token.to_owned())
    }

    fn from_cookie(&self) -> Option<String> {
        let jar = CookieJar::from_headers(&self.headers);
        let cookie = jar.get(TOKEN_COOKIE)?;
        let token = cookie.value().trim();
        (!token.is_empty()).then(|| token.to_owned())
    }
}
