//! Dynamic client registration pipeline (RFC 7591).
//!
//! Registration is two stages composed through [`RegistrationProcessor`]:
//!
//! 1. [`StoreRegistrationProcessor`] validates the metadata, mints the client
//!    id and secret, and persists the base record, the way a protocol
//!    engine's built-in handler does.
//! 2. [`QuarantiningProcessor`] wraps any inner stage, then re-reads the
//!    persisted record and quarantines it: disabled, tagged `origin=dcr`,
//!    and given default scopes if none were requested.
//!
//! The wire response of the inner stage is passed through untouched.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{Duration, Utc};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::models::{ClientRecord, ClientSecret, NewClient, Provenance};
use crate::store::{ClientStore, StoreError};

const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
const GRANT_CLIENT_CREDENTIALS: &str = "client_credentials";
const GRANT_REFRESH_TOKEN: &str = "refresh_token";
const SUPPORTED_GRANT_TYPES: [&str; 3] = [
    GRANT_AUTHORIZATION_CODE,
    GRANT_CLIENT_CREDENTIALS,
    GRANT_REFRESH_TOKEN,
];

const AUTH_METHOD_NONE: &str = "none";
const DEFAULT_AUTH_METHOD: &str = "client_secret_basic";

const CLIENT_ID_LENGTH: usize = 32;
const CLIENT_SECRET_LENGTH: usize = 48;

/// Registration errors, reported to the caller in RFC 7591 form.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("Invalid redirect URI: {0}")]
    InvalidRedirectUri(String),

    #[error("Invalid client metadata: {0}")]
    InvalidClientMetadata(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl RegistrationError {
    /// RFC 7591 `error` code.
    pub fn code(&self) -> &'static str {
        match self {
            RegistrationError::InvalidRedirectUri(_) => "invalid_redirect_uri",
            RegistrationError::InvalidClientMetadata(_) => "invalid_client_metadata",
            RegistrationError::Store(_) => "server_error",
        }
    }
}

/// Client metadata submitted to the registration endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrationRequest {
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub post_logout_redirect_uris: Vec<String>,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub client_uri: Option<String>,
    #[serde(default)]
    pub grant_types: Option<Vec<String>>,
    #[serde(default)]
    pub response_types: Option<Vec<String>>,
    #[serde(default)]
    pub token_endpoint_auth_method: Option<String>,
    /// Space-delimited scope list.
    #[serde(default)]
    pub scope: Option<String>,
}

impl RegistrationRequest {
    /// Requested scopes, split and deduplicated in first-seen order.
    pub fn scopes(&self) -> Vec<String> {
        let mut scopes: Vec<String> = Vec::new();
        for scope in self.scope.as_deref().unwrap_or("").split_whitespace() {
            if !scopes.iter().any(|s| s == scope) {
                scopes.push(scope.to_string());
            }
        }
        scopes
    }
}

/// Successful registration response (RFC 7591 section 3.2.1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationResponse {
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub client_id_issued_at: i64,
    /// Zero means the secret never expires.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret_expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_uri: Option<String>,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub token_endpoint_auth_method: String,
}

/// One stage of the registration pipeline.
#[async_trait]
pub trait RegistrationProcessor: Send + Sync {
    async fn process(
        &self,
        request: &RegistrationRequest,
    ) -> Result<RegistrationResponse, RegistrationError>;
}

/// Base stage: validate, mint credentials, persist.
pub struct StoreRegistrationProcessor {
    store: Arc<dyn ClientStore>,
    refresh_token_lifetime: Duration,
}

impl StoreRegistrationProcessor {
    pub fn new(store: Arc<dyn ClientStore>, refresh_token_lifetime: Duration) -> Self {
        Self {
            store,
            refresh_token_lifetime,
        }
    }
}

fn generate_token(len: usize) -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// SHA-256 a client secret for storage, base64 encoded.
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    STANDARD.encode(hasher.finalize())
}

fn validate_redirect_uris(uris: &[String], grant_types: &[String]) -> Result<(), RegistrationError> {
    let needs_redirect = grant_types.iter().any(|g| g == GRANT_AUTHORIZATION_CODE);
    if needs_redirect && uris.is_empty() {
        return Err(RegistrationError::InvalidRedirectUri(
            "at least one redirect_uri is required for authorization_code".into(),
        ));
    }
    for uri in uris {
        let parsed = url::Url::parse(uri)
            .map_err(|_| RegistrationError::InvalidRedirectUri(format!("not an absolute URL: {uri}")))?;
        if parsed.fragment().is_some() {
            return Err(RegistrationError::InvalidRedirectUri(format!(
                "redirect_uri must not contain a fragment: {uri}"
            )));
        }
    }
    Ok(())
}

fn validate_grant_types(grant_types: &[String], confidential: bool) -> Result<(), RegistrationError> {
    if let Some(unsupported) = grant_types
        .iter()
        .find(|g| !SUPPORTED_GRANT_TYPES.contains(&g.as_str()))
    {
        return Err(RegistrationError::InvalidClientMetadata(format!(
            "unsupported grant_type: {unsupported}"
        )));
    }
    if !confidential && grant_types.iter().any(|g| g == GRANT_CLIENT_CREDENTIALS) {
        return Err(RegistrationError::InvalidClientMetadata(
            "client_credentials requires a confidential client".into(),
        ));
    }
    Ok(())
}

#[async_trait]
impl RegistrationProcessor for StoreRegistrationProcessor {
    async fn process(
        &self,
        request: &RegistrationRequest,
    ) -> Result<RegistrationResponse, RegistrationError> {
        let grant_types = match &request.grant_types {
            Some(g) if !g.is_empty() => g.clone(),
            _ => vec![GRANT_AUTHORIZATION_CODE.to_string()],
        };
        let auth_method = request
            .token_endpoint_auth_method
            .clone()
            .unwrap_or_else(|| DEFAULT_AUTH_METHOD.to_string());
        let confidential = auth_method != AUTH_METHOD_NONE;

        validate_grant_types(&grant_types, confidential)?;
        validate_redirect_uris(&request.redirect_uris, &grant_types)?;

        let client_id = generate_token(CLIENT_ID_LENGTH);
        let client_secret = confidential.then(|| generate_token(CLIENT_SECRET_LENGTH));
        let scopes = request.scopes();
        let now = Utc::now();

        let new_client = NewClient {
            client_id: client_id.clone(),
            client_name: request.client_name.clone(),
            client_uri: request.client_uri.clone(),
            enabled: true,
            created: Some(now),
            absolute_refresh_token_lifetime: i32::try_from(
                self.refresh_token_lifetime.num_seconds(),
            )
            .unwrap_or(i32::MAX),
            redirect_uris: request.redirect_uris.clone(),
            post_logout_redirect_uris: request.post_logout_redirect_uris.clone(),
            allowed_grant_types: grant_types.clone(),
            allowed_scopes: scopes.clone(),
            client_secrets: client_secret
                .iter()
                .map(|s| ClientSecret {
                    value: hash_secret(s),
                    description: None,
                    expiration: None,
                })
                .collect(),
            ..Default::default()
        };

        let record = self.store.create(new_client).await?;
        debug!(client_id = %record.client_id, "persisted registered client");

        Ok(RegistrationResponse {
            client_id,
            client_secret_expires_at: client_secret.as_ref().map(|_| 0),
            client_secret,
            client_id_issued_at: record.created.timestamp(),
            client_name: record.client_name,
            client_uri: record.client_uri,
            redirect_uris: record.redirect_uris,
            grant_types,
            scope: (!scopes.is_empty()).then(|| scopes.join(" ")),
            token_endpoint_auth_method: auth_method,
        })
    }
}

/// Post-processing stage: quarantine whatever the inner stage registered.
pub struct QuarantiningProcessor<P> {
    inner: P,
    store: Arc<dyn ClientStore>,
}

impl<P: RegistrationProcessor> QuarantiningProcessor<P> {
    pub fn new(inner: P, store: Arc<dyn ClientStore>) -> Self {
        Self { inner, store }
    }
}

impl<P> QuarantiningProcessor<P> {
    async fn quarantine(&self, client: &mut ClientRecord) -> Result<(), StoreError> {
        if client.allowed_scopes.is_empty() {
            for scope in self.store.enabled_resource_scopes().await? {
                client.allow_scope(&scope);
            }
        }
        self.store.update(client).await?;
        Ok(())
    }
}

#[async_trait]
impl<P: RegistrationProcessor> RegistrationProcessor for QuarantiningProcessor<P> {
    async fn process(
        &self,
        request: &RegistrationRequest,
    ) -> Result<RegistrationResponse, RegistrationError> {
        let response = self.inner.process(request).await?;

        // The registration already succeeded for the caller; a record that
        // cannot be read back yet is left alone.
        let Some(mut client) = self.store.find_by_client_id(&response.client_id).await? else {
            return Ok(response);
        };

        client.enabled = false;
        client.tag(Provenance::DynamicRegistration);

        // An enabled, untagged record would escape both sweep passes, so a
        // failed quarantine removes what the inner stage persisted.
        if let Err(e) = self.quarantine(&mut client).await {
            error!(client_id = %client.client_id, error = %e, "failed to quarantine DCR client");
            if let Err(cleanup) = self.store.delete(client.id).await {
                error!(
                    client_id = %client.client_id,
                    error = %cleanup,
                    "failed to remove unquarantined DCR client"
                );
            }
            return Err(e.into());
        }
        info!(
            client_id = %client.client_id,
            scopes = ?client.allowed_scopes,
            "DCR client registered as disabled (pending approval)"
        );

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ApiResource;
    use crate::store::{DynamicClientFilter, MemoryStore};

    async fn store_with_resources(resources: &[(&str, bool, &[&str])]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for (name, enabled, scopes) in resources {
            store
                .ensure_api_resource(&ApiResource {
                    name: name.to_string(),
                    display_name: None,
                    enabled: *enabled,
                    scopes: scopes.iter().map(|s| s.to_string()).collect(),
                })
                .await
                .expect("seed resource");
        }
        store
    }

    fn pipeline(store: &Arc<MemoryStore>) -> QuarantiningProcessor<StoreRegistrationProcessor> {
        let dyn_store: Arc<dyn ClientStore> = store.clone();
        QuarantiningProcessor::new(
            StoreRegistrationProcessor::new(dyn_store.clone(), Duration::days(30)),
            dyn_store,
        )
    }

    fn request(scope: Option<&str>) -> RegistrationRequest {
        RegistrationRequest {
            redirect_uris: vec!["http://localhost:6274/oauth/callback".into()],
            client_name: Some("MCP Inspector".into()),
            token_endpoint_auth_method: Some("none".into()),
            scope: scope.map(String::from),
            ..Default::default()
        }
    }

    async fn registered(store: &MemoryStore, response: &RegistrationResponse) -> ClientRecord {
        store
            .find_by_client_id(&response.client_id)
            .await
            .expect("lookup")
            .expect("client persisted")
    }

    #[tokio::test]
    async fn registered_client_is_quarantined_and_tagged() {
        let store = store_with_resources(&[]).await;
        let response = pipeline(&store)
            .process(&RegistrationRequest {
                redirect_uris: Vec::new(),
                grant_types: Some(vec!["client_credentials".into()]),
                ..Default::default()
            })
            .await
            .expect("register");

        let client = registered(&store, &response).await;
        assert!(!client.enabled);
        assert!(client.is_dynamically_registered());
        assert_eq!(
            client
                .properties
                .iter()
                .filter(|p| p.key == "origin" && p.value == "dcr")
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn empty_scope_request_is_backfilled_with_enabled_resource_scopes() {
        let store = store_with_resources(&[
            ("https://gateway/weather/mcp", true, &["mcp:tools"]),
            ("https://gateway/mixed/mcp", true, &["mcp:tools", "extra"]),
            ("https://gateway/legacy/mcp", false, &["legacy"]),
        ])
        .await;

        let response = pipeline(&store).process(&request(None)).await.expect("register");
        let client = registered(&store, &response).await;

        let mut scopes = client.allowed_scopes.clone();
        scopes.sort();
        assert_eq!(scopes, vec!["extra", "mcp:tools"]);
    }

    #[tokio::test]
    async fn requested_scopes_are_not_backfilled() {
        let store = store_with_resources(&[
            ("https://gateway/weather/mcp", true, &["mcp:tools"]),
            ("https://gateway/mixed/mcp", true, &["mcp:tools", "extra"]),
        ])
        .await;

        let response = pipeline(&store)
            .process(&request(Some("mcp:tools")))
            .await
            .expect("register");
        let client = registered(&store, &response).await;

        assert_eq!(client.allowed_scopes, vec!["mcp:tools"]);
        assert!(!client.enabled);
    }

    #[tokio::test]
    async fn response_is_passed_through_unchanged() {
        struct Fixed(RegistrationResponse);

        #[async_trait]
        impl RegistrationProcessor for Fixed {
            async fn process(
                &self,
                _request: &RegistrationRequest,
            ) -> Result<RegistrationResponse, RegistrationError> {
                Ok(self.0.clone())
            }
        }

        let expected = RegistrationResponse {
            client_id: "never-persisted".into(),
            client_secret: None,
            client_id_issued_at: 0,
            client_secret_expires_at: None,
            client_name: None,
            client_uri: None,
            redirect_uris: Vec::new(),
            grant_types: vec!["authorization_code".into()],
            scope: None,
            token_endpoint_auth_method: "none".into(),
        };

        let store = Arc::new(MemoryStore::new());
        let processor = QuarantiningProcessor::new(Fixed(expected.clone()), store.clone());

        let response = processor.process(&request(None)).await.expect("register");
        assert_eq!(response, expected);
        assert_eq!(store.client_count(), 0);
    }

    #[tokio::test]
    async fn confidential_client_gets_hashed_secret() {
        let store = store_with_resources(&[]).await;
        let response = pipeline(&store)
            .process(&RegistrationRequest {
                redirect_uris: vec!["https://app.example/cb".into()],
                ..Default::default()
            })
            .await
            .expect("register");

        let secret = response.client_secret.clone().expect("secret issued");
        assert_eq!(response.client_secret_expires_at, Some(0));
        let client = registered(&store, &response).await;
        assert_eq!(client.client_secrets.len(), 1);
        assert_eq!(client.client_secrets[0].value, hash_secret(&secret));
        assert_ne!(client.client_secrets[0].value, secret);
    }

    #[tokio::test]
    async fn authorization_code_requires_redirect_uri() {
        let store = store_with_resources(&[]).await;
        let err = pipeline(&store)
            .process(&RegistrationRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_redirect_uri");
        assert_eq!(store.client_count(), 0);
    }

    #[tokio::test]
    async fn relative_redirect_uri_is_rejected() {
        let store = store_with_resources(&[]).await;
        let err = pipeline(&store)
            .process(&RegistrationRequest {
                redirect_uris: vec!["/callback".into()],
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::InvalidRedirectUri(_)));
    }

    #[tokio::test]
    async fn public_client_cannot_use_client_credentials() {
        let store = store_with_resources(&[]).await;
        let err = pipeline(&store)
            .process(&RegistrationRequest {
                grant_types: Some(vec!["client_credentials".into()]),
                token_endpoint_auth_method: Some("none".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_client_metadata");
    }

    /// Store whose resource lookup always fails.
    struct NoResourceStore {
        inner: Arc<MemoryStore>,
    }

    #[async_trait]
    impl ClientStore for NoResourceStore {
        async fn find(&self, id: i64) -> crate::store::Result<Option<ClientRecord>> {
            self.inner.find(id).await
        }
        async fn find_by_client_id(
            &self,
            client_id: &str,
        ) -> crate::store::Result<Option<ClientRecord>> {
            self.inner.find_by_client_id(client_id).await
        }
        async fn list(&self) -> crate::store::Result<Vec<ClientRecord>> {
            self.inner.list().await
        }
        async fn find_dynamic(
            &self,
            filter: DynamicClientFilter,
        ) -> crate::store::Result<Vec<ClientRecord>> {
            self.inner.find_dynamic(filter).await
        }
        async fn create(&self, client: NewClient) -> crate::store::Result<ClientRecord> {
            self.inner.create(client).await
        }
        async fn update(&self, client: &ClientRecord) -> crate::store::Result<bool> {
            self.inner.update(client).await
        }
        async fn set_enabled(
            &self,
            id: i64,
            enabled: bool,
        ) -> crate::store::Result<Option<ClientRecord>> {
            self.inner.set_enabled(id, enabled).await
        }
        async fn delete(&self, id: i64) -> crate::store::Result<Option<ClientRecord>> {
            self.inner.delete(id).await
        }
        async fn delete_many(&self, ids: &[i64]) -> crate::store::Result<u64> {
            self.inner.delete_many(ids).await
        }
        async fn enabled_resource_scopes(&self) -> crate::store::Result<Vec<String>> {
            Err(StoreError::DbError(sqlx::Error::PoolTimedOut))
        }
        async fn ensure_api_resource(&self, resource: &ApiResource) -> crate::store::Result<bool> {
            self.inner.ensure_api_resource(resource).await
        }
    }

    #[tokio::test]
    async fn failed_quarantine_removes_the_registered_client() {
        let store = Arc::new(MemoryStore::new());
        let failing: Arc<dyn ClientStore> = Arc::new(NoResourceStore {
            inner: store.clone(),
        });
        let processor = QuarantiningProcessor::new(
            StoreRegistrationProcessor::new(failing.clone(), Duration::days(30)),
            failing,
        );

        let err = processor.process(&request(None)).await.unwrap_err();

        assert_eq!(err.code(), "server_error");
        assert_eq!(store.client_count(), 0);
    }

    #[test]
    fn requested_scopes_are_deduplicated() {
        let req = request(Some("mcp:tools  extra mcp:tools"));
        assert_eq!(req.scopes(), vec!["mcp:tools", "extra"]);
    }
}
