//! Authorize-time gate.
//!
//! An authorize request naming a disabled client is answered with a `302`
//! to the approval page instead of reaching the engine. The approval page
//! receives the full original URL as `returnUrl` so the flow can resume once
//! an administrator approves the client.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode, Uri, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::info;

use crate::AppState;
use crate::error::AppError;

const FORWARDED_PROTO: &str = "x-forwarded-proto";
const FORWARDED_HOST: &str = "x-forwarded-host";

/// Whether `path` is `prefix` or lies beneath it, segment-wise and ignoring
/// ASCII case.
pub fn starts_with_segments(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if path.len() < prefix.len() || !path.is_char_boundary(prefix.len()) {
        return false;
    }
    let (head, rest) = path.split_at(prefix.len());
    head.eq_ignore_ascii_case(prefix) && (rest.is_empty() || rest.starts_with('/'))
}

/// First `client_id` in the query string.
pub fn client_id_param(uri: &Uri) -> Option<String> {
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == "client_id")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Rebuild the URL the user agent requested.
///
/// Without a configured public URL the origin comes from the request URI
/// itself when it is absolute (HTTP/2, absolute-form HTTP/1.1), then from the
/// forwarding headers, then from `Host`.
pub fn original_url(public_url: Option<&str>, headers: &HeaderMap, uri: &Uri) -> String {
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let base = match public_url {
        Some(base) => base.trim_end_matches('/').to_string(),
        None => {
            let scheme = uri
                .scheme_str()
                .or_else(|| header_str(headers, FORWARDED_PROTO))
                .unwrap_or("http");
            let host = uri
                .authority()
                .map(|a| a.as_str())
                .or_else(|| header_str(headers, FORWARDED_HOST))
                .or_else(|| header_str(headers, header::HOST.as_str()))
                .unwrap_or("localhost");
            format!("{scheme}://{host}")
        }
    };
    format!("{base}{path_and_query}")
}

/// `Location` of the approval page for `return_url`.
pub fn approval_location(approval_path: &str, return_url: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(return_url.as_bytes()).collect();
    format!("{approval_path}?returnUrl={encoded}")
}

/// Axum middleware guarding the authorize endpoint.
///
/// The record is read on every request; there is no cache to go stale after
/// an approval.
pub async fn authorize_gate(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if !starts_with_segments(request.uri().path(), &state.config.authorize_path) {
        return Ok(next.run(request).await);
    }
    let Some(client_id) = client_id_param(request.uri()) else {
        return Ok(next.run(request).await);
    };

    let client = state.clients.find_by_client_id(&client_id).await?;
    match client {
        Some(client) if !client.enabled => {
            let return_url = original_url(
                state.config.public_url.as_deref(),
                request.headers(),
                request.uri(),
            );
            info!(client_id = %client.client_id, "authorize request for disabled client, redirecting to approval");
            let location = approval_location(&state.config.approval_path, &return_url);
            Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response())
        }
        _ => Ok(next.run(request).await),
    }
}
