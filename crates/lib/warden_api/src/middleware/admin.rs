//! Administrative authentication: static bearer token.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum::http::header::AUTHORIZATION;
use sha2::{Digest, Sha256};

use crate::AppState;
use crate::error::AppError;

fn digest(token: &str) -> [u8; 32] {
    Sha256::digest(token.as_bytes()).into()
}

/// Whether `presented` matches the configured admin token. Compared by
/// SHA-256 digest so timing does not depend on the common prefix.
pub fn token_matches(expected: &str, presented: &str) -> bool {
    digest(expected) == digest(presented)
}

/// Axum middleware: requires `Authorization: Bearer <admin token>`.
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let expected = state
        .config
        .admin_token
        .as_deref()
        .ok_or_else(|| AppError::Unauthorized("Admin access is not configured".into()))?;

    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing authorization header".into()))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Unauthorized("Invalid authorization scheme".into()))?;

    if !token_matches(expected, token.trim()) {
        return Err(AppError::Unauthorized("Invalid admin token".into()));
    }

    Ok(next.run(request).await)
}
