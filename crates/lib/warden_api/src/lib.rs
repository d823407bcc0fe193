//! # warden_api
//!
//! HTTP surface for the DCR client lifecycle: registration, the
//! authorize-time gate, administrative approval, and pass-through to the
//! protocol engine.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use warden_core::registration::{
    QuarantiningProcessor, RegistrationProcessor, StoreRegistrationProcessor,
};
use warden_core::store::ClientStore;

use crate::config::ApiConfig;
use crate::handlers::engine::{EngineProxy, EngineProxyError};
use crate::handlers::{approval, clients, engine, registration};

/// Dynamic client registration endpoint.
pub const REGISTRATION_PATH: &str = "/connect/register";

/// Administrative client listing; also the fallback redirect target.
pub const CLIENTS_PATH: &str = "/clients";

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Configuration store.
    pub clients: Arc<dyn ClientStore>,
    /// Registration pipeline, quarantining every new client.
    pub registration: Arc<dyn RegistrationProcessor>,
    /// Upstream protocol engine, when configured.
    pub engine: Option<EngineProxy>,
    /// API configuration.
    pub config: ApiConfig,
}

impl AppState {
    /// Wire the registration pipeline and engine proxy over `clients`.
    pub fn new(clients: Arc<dyn ClientStore>, config: ApiConfig) -> Result<Self, EngineProxyError> {
        let registration = QuarantiningProcessor::new(
            StoreRegistrationProcessor::new(
                clients.clone(),
                config.policy.default_refresh_token_lifetime,
            ),
            clients.clone(),
        );
        let engine = config.engine_url.as_deref().map(EngineProxy::new).transpose()?;
        Ok(Self {
            clients,
            registration: Arc::new(registration),
            engine,
            config,
        })
    }
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let approval_path = state.config.approval_path.trim_end_matches('/').to_string();

    // Public routes (no auth required)
    let public = Router::new().route(REGISTRATION_PATH, post(registration::register_handler));

    // Administrative routes (require the admin token)
    let admin = Router::new()
        .route(CLIENTS_PATH, get(clients::list_clients_handler))
        .route(
            "/clients/{id}",
            axum::routing::delete(clients::delete_client_handler),
        )
        .route("/clients/{id}/approve", post(clients::approve_client_handler))
        .route("/clients/{id}/disable", post(clients::disable_client_handler))
        .route("/clients/{id}/delete", post(clients::delete_client_handler))
        .route(&approval_path, get(approval::approval_page_handler))
        .route(
            &format!("{approval_path}/approve"),
            post(approval::approve_handler),
        )
        .route(&format!("{approval_path}/deny"), post(approval::deny_handler))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::admin::require_admin,
        ));

    Router::new()
        .merge(public)
        .merge(admin)
        .fallback(engine::forward_handler)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::gate::authorize_gate,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
