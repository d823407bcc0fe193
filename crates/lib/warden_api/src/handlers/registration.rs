//! Dynamic client registration handler.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use warden_core::registration::{RegistrationRequest, RegistrationResponse};

use crate::AppState;
use crate::error::AppResult;

/// `POST /connect/register`: register a client; it starts out disabled.
pub async fn register_handler(
    State(state): State<AppState>,
    Json(body): Json<RegistrationRequest>,
) -> AppResult<(StatusCode, Json<RegistrationResponse>)> {
    let response = state.registration.process(&body).await?;
    Ok((StatusCode::CREATED, Json(response)))
}
