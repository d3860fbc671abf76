//! Bearer-token authentication.
//!
//! `ADMIN_TOKEN` is read once at startup and cached as a SHA-256 digest in
//! `AppState`; requests compare in constant time. The WebSocket upgrade
//! paths accept the same token via `?token=` because browsers cannot set
//! headers on upgrade requests.

use axum::body::Body;
use axum::extract::State;
use axum::http::{Method, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use sg_domain::Error;

use crate::api::error::ApiError;
use crate::state::AppState;

pub fn token_hash(token: &str) -> Vec<u8> {
    Sha256::digest(token.as_bytes()).to_vec()
}

/// Constant-time check of a presented token against the cached digest.
pub fn token_matches(state: &AppState, presented: &str) -> bool {
    match &state.admin_token_hash {
        Some(expected) => {
            let presented = Sha256::digest(presented.as_bytes());
            bool::from(presented.ct_eq(expected.as_slice()))
        }
        None => false,
    }
}

/// Header-based check for handlers that live on otherwise-public paths
/// (mixed-method routes cannot sit behind the route-tree middleware).
pub fn require_bearer(state: &AppState, headers: &axum::http::HeaderMap) -> Result<(), Error> {
    let provided = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");
    if token_matches(state, provided) {
        Ok(())
    } else {
        Err(Error::Unauthorized)
    }
}

/// Middleware for the protected route tree.
pub async fn require_admin_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    // CORS preflights never carry credentials.
    if req.method() == Method::OPTIONS {
        return next.run(req).await;
    }

    let provided = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    if token_matches(&state, provided) {
        next.run(req).await
    } else {
        ApiError(Error::Unauthorized).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_sha256_of_token() {
        let hash = token_hash("secret");
        assert_eq!(hash.len(), 32);
        assert_eq!(hash, Sha256::digest(b"secret").to_vec());
    }
}
