//! API server configuration.

use warden_core::policy::LifecyclePolicy;

/// Default authorize endpoint guarded by the gate.
pub const DEFAULT_AUTHORIZE_PATH: &str = "/connect/authorize";

/// Default path of the approval surface.
pub const DEFAULT_APPROVAL_PATH: &str = "/client-approval";

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:3200").
    pub bind_addr: String,
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Bearer token for the administrative routes. Unset locks them.
    pub admin_token: Option<String>,
    /// Externally visible base URL, used to rebuild gated authorize URLs.
    pub public_url: Option<String>,
    /// Upstream protocol engine for unmatched requests.
    pub engine_url: Option<String>,
    pub authorize_path: String,
    pub approval_path: String,
    pub policy: LifecyclePolicy,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3200".into(),
            database_url: "postgres://localhost:5432/warden".into(),
            admin_token: None,
            public_url: None,
            engine_url: None,
            authorize_path: DEFAULT_AUTHORIZE_PATH.into(),
            approval_path: DEFAULT_APPROVAL_PATH.into(),
            policy: LifecyclePolicy::default(),
        }
    }
}
