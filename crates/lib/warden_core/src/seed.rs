//! Static clients and API resources loaded from a YAML seed file.
//!
//! ```yaml
//! api_resources:
//!   - name: https://gateway.example/weather/mcp
//!     display_name: Weather MCP
//!     scopes: ["mcp:tools"]
//! clients:
//!   - client_id: admin-portal
//!     client_name: Admin portal
//!     secret: change-me
//!     grant_types: [authorization_code, refresh_token]
//!     redirect_uris: [https://portal.example/signin-oidc]
//!     scopes: [openid, profile]
//! ```
//!
//! Seeding only inserts what is missing by name or client id. Existing
//! records, including DCR clients, are never touched.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::models::client::DEFAULT_REFRESH_TOKEN_LIFETIME_SECS;
use crate::models::{ApiResource, ClientSecret, NewClient};
use crate::registration::hash_secret;
use crate::store::{ClientStore, StoreError};

/// Seed errors.
#[derive(Debug, Error)]
pub enum SeedError {
    #[error("Failed to read seed file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid seed file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// A statically provisioned client.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedClient {
    pub client_id: String,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub client_uri: Option<String>,
    /// Plaintext secret; stored hashed.
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub grant_types: Vec<String>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub post_logout_redirect_uris: Vec<String>,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub refresh_token_lifetime_secs: Option<i32>,
}

impl SeedClient {
    fn into_new_client(self) -> NewClient {
        NewClient {
            client_id: self.client_id,
            client_name: self.client_name,
            client_uri: self.client_uri,
            enabled: true,
            created: None,
            absolute_refresh_token_lifetime: self
                .refresh_token_lifetime_secs
                .unwrap_or(DEFAULT_REFRESH_TOKEN_LIFETIME_SECS),
            redirect_uris: self.redirect_uris,
            post_logout_redirect_uris: self.post_logout_redirect_uris,
            allowed_grant_types: self.grant_types,
            allowed_scopes: self.scopes,
            allowed_cors_origins: self.cors_origins,
            client_secrets: self
                .secret
                .iter()
                .map(|s| ClientSecret {
                    value: hash_secret(s),
                    description: Some("seed".into()),
                    expiration: None,
                })
                .collect(),
            ..Default::default()
        }
    }
}

/// Contents of a seed file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub api_resources: Vec<ApiResource>,
    #[serde(default)]
    pub clients: Vec<SeedClient>,
}

impl SeedData {
    pub fn from_yaml(yaml: &str) -> Result<Self, SeedError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, SeedError> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
    }
}

/// Counts of records inserted by [`ensure_seed_data`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub api_resources: usize,
    pub clients: usize,
}

/// Insert seed resources and clients that do not exist yet.
pub async fn ensure_seed_data(
    store: &dyn ClientStore,
    seed: SeedData,
) -> Result<SeedReport, SeedError> {
    let mut report = SeedReport::default();

    for resource in &seed.api_resources {
        if store.ensure_api_resource(resource).await? {
            debug!(name = %resource.name, "seeded API resource");
            report.api_resources += 1;
        }
    }

    // Static clients are checked one by one so that existing DCR clients
    // never mask a missing static one.
    for client in seed.clients {
        if store.find_by_client_id(&client.client_id).await?.is_some() {
            continue;
        }
        let record = store.create(client.into_new_client()).await?;
        debug!(client_id = %record.client_id, "seeded static client");
        report.clients += 1;
    }

    info!(
        api_resources = report.api_resources,
        clients = report.clients,
        "seed data applied"
    );
    Ok(report)
}
