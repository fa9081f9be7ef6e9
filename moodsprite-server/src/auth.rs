//! Authentication gate.
//!
//! Identity is either a static bearer token from config or a header set by a
//! fronting auth proxy. Anything else is anonymous and gets refused.

use axum::http::{header, HeaderMap};
use moodsprite_core::config::AuthConfig;

/// Resolve the caller's user id, or `None` when unauthenticated.
pub fn authenticate(headers: &HeaderMap, config: &AuthConfig) -> Option<String> {
    if let Some(token) = bearer_token(headers) {
        if let Some(user_id) = config.user_for_token(token) {
            return Some(user_id.to_string());
        }
    }

    let name = config.trusted_header.as_deref()?;
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}
