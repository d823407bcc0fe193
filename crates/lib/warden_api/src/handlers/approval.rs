//! Approval surface reached from the authorize-time gate.

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::{Form, Json};
use serde::{Deserialize, Serialize};
use warden_core::lifecycle;
use warden_core::models::{ClientStatus, ClientSummary};

use crate::error::AppResult;
use crate::{AppState, CLIENTS_PATH};

#[derive(Debug, Deserialize)]
pub struct ApprovalQuery {
    #[serde(rename = "returnUrl")]
    pub return_url: Option<String>,
}

/// Body of the approval page.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalPage {
    pub return_url: String,
    pub pending_clients: Vec<ClientSummary>,
}

#[derive(Debug, Deserialize)]
pub struct ApproveForm {
    pub id: i64,
    #[serde(rename = "returnUrl", default)]
    pub return_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DenyForm {
    pub id: i64,
}

/// `GET <approval-path>?returnUrl=…`: pending clients plus where to resume.
pub async fn approval_page_handler(
    State(state): State<AppState>,
    Query(query): Query<ApprovalQuery>,
) -> AppResult<Response> {
    let Some(return_url) = query.return_url.filter(|u| !u.is_empty()) else {
        return Ok(Redirect::to(CLIENTS_PATH).into_response());
    };

    let pending_clients = lifecycle::list_pending(state.clients.as_ref())
        .await?
        .iter()
        .map(|c| ClientSummary::from_record(c, ClientStatus::PendingApproval))
        .collect();

    Ok(Json(ApprovalPage {
        return_url,
        pending_clients,
    })
    .into_response())
}

/// `POST <approval-path>/approve`: enable, then resume the interrupted flow.
pub async fn approve_handler(
    State(state): State<AppState>,
    Form(form): Form<ApproveForm>,
) -> AppResult<Redirect> {
    lifecycle::approve(state.clients.as_ref(), form.id).await?;
    let target = lifecycle::approval_return_target(form.return_url.as_deref());
    Ok(match target {
        Some(url) => Redirect::to(url.as_str()),
        None => Redirect::to(CLIENTS_PATH),
    })
}

/// `POST <approval-path>/deny`: delete the client outright.
pub async fn deny_handler(
    State(state): State<AppState>,
    Form(form): Form<DenyForm>,
) -> AppResult<Redirect> {
    lifecycle::delete(state.clients.as_ref(), form.id).await?;
    Ok(Redirect::to(CLIENTS_PATH))
}
