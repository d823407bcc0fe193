//! Administrative client lifecycle handlers.
//!
//! Mutations redirect back to the client list. Acting on a client that no
//! longer exists, for example one the sweep just removed, is a no-op.

use axum::Json;
use axum::extract::{Path, State};
use axum::response::Redirect;
use chrono::Utc;
use warden_core::lifecycle;
use warden_core::models::ClientSummary;

use crate::error::AppResult;
use crate::{AppState, CLIENTS_PATH};

/// `GET /clients`: every client, newest first, with derived status.
pub async fn list_clients_handler(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<ClientSummary>>> {
    let summaries =
        lifecycle::list_clients(state.clients.as_ref(), Utc::now(), &state.config.policy).await?;
    Ok(Json(summaries))
}

/// `POST /clients/{id}/approve`
pub async fn approve_client_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Redirect> {
    lifecycle::approve(state.clients.as_ref(), id).await?;
    Ok(Redirect::to(CLIENTS_PATH))
}

/// `POST /clients/{id}/disable`
pub async fn disable_client_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Redirect> {
    lifecycle::disable(state.clients.as_ref(), id).await?;
    Ok(Redirect::to(CLIENTS_PATH))
}

/// `POST /clients/{id}/delete` and `DELETE /clients/{id}`
pub async fn delete_client_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Redirect> {
    lifecycle::delete(state.clients.as_ref(), id).await?;
    Ok(Redirect::to(CLIENTS_PATH))
}
