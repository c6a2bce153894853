//! # Authentication Module
//!
//! API key authentication for the Sightline HTTP API.
//!
//! ## Configuration
//!
//! - `SIGHTLINE_API_KEY`: If set, all requests except `/health` require this key
//!
//! Send the key in the Authorization header, with or without the scheme,
//! or in `X-Api-Key`:
//! ```text
//! Authorization: Bearer <your-api-key>
//! X-Api-Key: <your-api-key>
//! ```

use axum::{
    body::Body,
    http::{HeaderMap, Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "SIGHTLINE_API_KEY";

/// Alternative header for clients that cannot set `Authorization`.
pub const API_KEY_HEADER: &str = "x-api-key";

/// The configured API key, or `None` when authentication is disabled.
pub fn get_api_key_from_env() -> Option<String> {
    std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty())
}

/// Compare two keys in constant time over the longer of the two lengths.
fn keys_match(provided: &[u8], expected: &[u8]) -> bool {
    let max_len = provided.len().max(expected.len());
    let mut padded_provided = vec![0u8; max_len];
    let mut padded_expected = vec![0u8; max_len];
    if let Some(dst) = padded_provided.get_mut(..provided.len()) {
        dst.copy_from_slice(provided);
    }
    if let Some(dst) = padded_expected.get_mut(..expected.len()) {
        dst.copy_from_slice(expected);
    }

    let bytes_match: bool = padded_provided.ct_eq(&padded_expected).into();
    bytes_match && provided.len() == expected.len()
}

/// Key presented by the client: `Authorization` (with or without the
/// `Bearer ` scheme) first, then `X-Api-Key`.
fn presented_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        return Some(value.strip_prefix("Bearer ").unwrap_or(value));
    }
    headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok())
}

/// API key authentication middleware.
///
/// `/health` is always allowed. Without a configured key every request is
/// allowed.
pub async fn api_key_auth_middleware(
    request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, &'static str)> {
    let Some(expected) = get_api_key_from_env() else {
        return Ok(next.run(request).await);
    };
    if request.uri().path() == "/health" {
        return Ok(next.run(request).await);
    }

    let verdict = match presented_key(request.headers()) {
        None => Err("missing_key"),
        Some(key) if keys_match(key.as_bytes(), expected.as_bytes()) => Ok(()),
        Some(_) => Err("invalid_key"),
    };

    match verdict {
        Ok(()) => Ok(next.run(request).await),
        Err(reason) => {
            tracing::warn!(
                path = %request.uri().path(),
                reason,
                "rejected unauthenticated request"
            );
            Err((StatusCode::UNAUTHORIZED, "Unauthorized"))
        }
    }
}
