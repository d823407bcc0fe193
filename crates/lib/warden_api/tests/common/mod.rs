//! Shared helpers for router tests.

#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, header};
use chrono::{Duration, Utc};
use warden_api::AppState;
use warden_api::config::ApiConfig;
use warden_core::models::{ClientProperty, ClientRecord, NewClient};
use warden_core::store::{ClientStore, MemoryStore};

pub const ADMIN_TOKEN: &str = "test-admin-token";

pub fn config() -> ApiConfig {
    ApiConfig {
        admin_token: Some(ADMIN_TOKEN.into()),
        ..ApiConfig::default()
    }
}

pub fn app_with(store: Arc<MemoryStore>, config: ApiConfig) -> Router {
    let state = AppState::new(store, config).expect("state");
    warden_api::router(state)
}

pub fn app(store: Arc<MemoryStore>) -> Router {
    app_with(store, config())
}

pub async fn dcr_client(store: &MemoryStore, client_id: &str, enabled: bool) -> ClientRecord {
    store
        .create(NewClient {
            client_id: client_id.into(),
            enabled,
            created: Some(Utc::now() - Duration::minutes(5)),
            redirect_uris: vec!["https://app.example/cb".into()],
            allowed_grant_types: vec!["authorization_code".into()],
            allowed_scopes: vec!["mcp:tools".into()],
            properties: vec![ClientProperty::new("origin", "dcr")],
            ..Default::default()
        })
        .await
        .expect("create client")
}

pub fn admin(req: axum::http::request::Builder) -> axum::http::request::Builder {
    req.header(header::AUTHORIZATION, format!("Bearer {ADMIN_TOKEN}"))
}

pub fn location(resp: &Response<Body>) -> String {
    resp.headers()
        .get(header::LOCATION)
        .expect("location header")
        .to_str()
        .expect("ascii location")
        .to_string()
}

pub async fn json(resp: Response<Body>) -> serde_json::Value {
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("parse JSON")
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).expect("request")
}
