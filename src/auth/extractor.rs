//! Credential extraction from HTTP requests.
//!
//! Access tokens travel in `Authorization: Bearer <token>`. Refresh tokens
//! travel in the `refresh_token` cookie, or in a JSON body for clients that
//! cannot keep cookies.

use http::HeaderMap;
use http::header::{AUTHORIZATION, COOKIE};
use serde::Deserialize;

use crate::auth::error::{AuthError, AuthResult};
use crate::types::RefreshToken;

/// Cookie carrying the refresh token.
pub const REFRESH_COOKIE: &str = "refresh_token";

#[derive(Debug, Deserialize)]
struct RefreshBody {
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Extract the bearer token from the `Authorization` header.
///
/// The header must be exactly `Bearer` and the token separated by a single
/// space.
pub fn bearer_token(headers: &HeaderMap) -> AuthResult<&str> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::TokenNotProvided)?
        .to_str()
        .map_err(|_| AuthError::TokenNotValid)?;

    let parts: Vec<&str> = value.split(' ').collect();
    match parts.as_slice() {
        ["Bearer", token] if !token.is_empty() => Ok(*token),
        _ => Err(AuthError::TokenNotValid),
    }
}

/// Read a named cookie from every `Cookie` header on the request.
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

/// Refresh token from the cookie, falling back to `{"refresh_token": ...}`.
pub fn refresh_token(headers: &HeaderMap, body: &[u8]) -> AuthResult<RefreshToken> {
    if let Some(value) = cookie_value(headers, REFRESH_COOKIE)
        && !value.is_empty()
    {
        return Ok(RefreshToken::new(value));
    }

    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(AuthError::TokenNotProvided);
    }

    let parsed: RefreshBody =
        serde_json::from_slice(body).map_err(|_| AuthError::MalformedBody)?;
    match parsed.refresh_token {
        Some(token) if !token.is_empty() => Ok(RefreshToken::new(token)),
        _ => Err(AuthError::TokenNotProvided),
    }
}

/// `Set-Cookie` value installing a refresh token.
pub fn refresh_cookie(token: &RefreshToken, max_age_seconds: i64, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Strict; Max-Age={}",
        REFRESH_COOKIE,
        token.as_str(),
        max_age_seconds.max(0)
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// `Set-Cookie` value removing the refresh token.
pub fn clear_refresh_cookie(secure: bool) -> String {
    let mut cookie = format!(
        "{}=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0",
        REFRESH_COOKIE
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}
