//! Pass-through to the upstream protocol engine.
//!
//! Everything warden does not route itself (discovery, token, userinfo, and
//! authorize requests the gate lets through) is relayed verbatim. Redirects
//! from the engine are returned to the caller, never followed.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, StatusCode, header};
use axum::response::Response;

use crate::AppState;
use crate::error::AppError;

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Headers scoped to a single connection, never forwarded.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    header::HOST,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

fn forwardable(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    for name in &HOP_BY_HOP {
        out.remove(name);
    }
    out.remove("keep-alive");
    out
}

/// Failure to set up the engine proxy.
#[derive(Debug, thiserror::Error)]
pub enum EngineProxyError {
    #[error("invalid engine URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("failed to build engine HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// HTTP client bound to the engine's base URL.
#[derive(Clone, Debug)]
pub struct EngineProxy {
    client: reqwest::Client,
    base: url::Url,
}

impl EngineProxy {
    pub fn new(base: &str) -> Result<Self, EngineProxyError> {
        let base = url::Url::parse(base)?;
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client, base })
    }

    /// Upstream URL for a request path and optional query.
    pub fn target(&self, path_and_query: &str) -> String {
        format!(
            "{}{}",
            self.base.as_str().trim_end_matches('/'),
            path_and_query
        )
    }
}

/// Fallback handler: forwards to the engine, or 404 without one.
pub async fn forward_handler(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, AppError> {
    let Some(engine) = state.engine.as_ref() else {
        return Err(AppError::NotFound(format!(
            "No route for {}",
            request.uri().path()
        )));
    };

    let (parts, body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let target = engine.target(path_and_query);

    let body_bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to read request body: {e}")))?;

    let upstream = engine
        .client
        .request(parts.method, target.as_str())
        .headers(forwardable(&parts.headers))
        .body(body_bytes)
        .send()
        .await
        .map_err(|e| AppError::Upstream(format!("{target}: {e}")))?;

    let status = StatusCode::from_u16(upstream.status().as_u16())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut response_builder = Response::builder().status(status);
    if let Some(headers) = response_builder.headers_mut() {
        headers.extend(forwardable(upstream.headers()));
    }

    response_builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| AppError::Internal(format!("Response build failed: {e}")))
}
