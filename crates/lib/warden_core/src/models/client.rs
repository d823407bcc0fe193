//! OAuth client domain models.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Property key used to record where a client came from.
pub const ORIGIN_PROPERTY_KEY: &str = "origin";

/// Value of [`ORIGIN_PROPERTY_KEY`] for clients created via dynamic registration.
pub const ORIGIN_DCR: &str = "dcr";

/// Fallback absolute refresh-token lifetime: 30 days.
pub const DEFAULT_REFRESH_TOKEN_LIFETIME_SECS: i32 = 30 * 24 * 3600;

/// Free-form key/value property attached to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientProperty {
    pub key: String,
    pub value: String,
}

impl ClientProperty {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Hashed client secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSecret {
    /// SHA-256 hash of the secret, base64 encoded. Never the plaintext.
    pub value: String,
    pub description: Option<String>,
    pub expiration: Option<DateTime<Utc>>,
}

/// Claim issued into tokens for this client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientClaim {
    pub claim_type: String,
    pub value: String,
}

/// How a client record came to exist.
///
/// Persisted as the `origin` property so the protocol engine's schema stays
/// untouched; this enum is the typed view over that string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Provisioned by an administrator or seed data.
    Static,
    /// Created through the dynamic client registration endpoint.
    DynamicRegistration,
}

impl Provenance {
    /// Derive provenance from a property bag.
    pub fn from_properties(properties: &[ClientProperty]) -> Self {
        let tagged = properties
            .iter()
            .any(|p| p.key == ORIGIN_PROPERTY_KEY && p.value == ORIGIN_DCR);
        if tagged {
            Provenance::DynamicRegistration
        } else {
            Provenance::Static
        }
    }

    /// The property that records this provenance, if any.
    pub fn property(self) -> Option<ClientProperty> {
        match self {
            Provenance::Static => None,
            Provenance::DynamicRegistration => {
                Some(ClientProperty::new(ORIGIN_PROPERTY_KEY, ORIGIN_DCR))
            }
        }
    }
}

/// A client record together with all of its owned collections.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientRecord {
    /// Internal row key.
    pub id: i64,
    pub client_id: String,
    pub client_name: Option<String>,
    pub client_uri: Option<String>,
    pub enabled: bool,
    pub created: DateTime<Utc>,
    /// Seconds. Zero or negative means "use the default".
    pub absolute_refresh_token_lifetime: i32,
    pub redirect_uris: Vec<String>,
    pub post_logout_redirect_uris: Vec<String>,
    pub allowed_grant_types: Vec<String>,
    pub allowed_scopes: Vec<String>,
    pub allowed_cors_origins: Vec<String>,
    pub identity_provider_restrictions: Vec<String>,
    pub client_secrets: Vec<ClientSecret>,
    pub claims: Vec<ClientClaim>,
    pub properties: Vec<ClientProperty>,
}

impl ClientRecord {
    pub fn provenance(&self) -> Provenance {
        Provenance::from_properties(&self.properties)
    }

    pub fn is_dynamically_registered(&self) -> bool {
        self.provenance() == Provenance::DynamicRegistration
    }

    /// Tag the record with `provenance`. Adding an existing tag is a no-op.
    pub fn tag(&mut self, provenance: Provenance) {
        if let Some(property) = provenance.property()
            && !self.properties.contains(&property)
        {
            self.properties.push(property);
        }
    }

    /// Grant `scope` unless it is already allowed.
    pub fn allow_scope(&mut self, scope: &str) {
        if !self.allowed_scopes.iter().any(|s| s == scope) {
            self.allowed_scopes.push(scope.to_string());
        }
    }

    /// The record's refresh-token lifetime, or `default` when unset.
    pub fn effective_refresh_token_lifetime(&self, default: Duration) -> Duration {
        if self.absolute_refresh_token_lifetime > 0 {
            Duration::seconds(i64::from(self.absolute_refresh_token_lifetime))
        } else {
            default
        }
    }

    /// Name shown to administrators; falls back to the client id.
    pub fn display_name(&self) -> &str {
        self.client_name.as_deref().unwrap_or(&self.client_id)
    }
}

/// Input for creating a client record. The store assigns `id`.
#[derive(Debug, Clone, Default)]
pub struct NewClient {
    pub client_id: String,
    pub client_name: Option<String>,
    pub client_uri: Option<String>,
    pub enabled: bool,
    pub created: Option<DateTime<Utc>>,
    pub absolute_refresh_token_lifetime: i32,
    pub redirect_uris: Vec<String>,
    pub post_logout_redirect_uris: Vec<String>,
    pub allowed_grant_types: Vec<String>,
    pub allowed_scopes: Vec<String>,
    pub allowed_cors_origins: Vec<String>,
    pub identity_provider_restrictions: Vec<String>,
    pub client_secrets: Vec<ClientSecret>,
    pub claims: Vec<ClientClaim>,
    pub properties: Vec<ClientProperty>,
}

impl NewClient {
    /// Materialize the record with the key and creation time chosen by a store.
    pub fn into_record(self, id: i64, now: DateTime<Utc>) -> ClientRecord {
        ClientRecord {
            id,
            client_id: self.client_id,
            client_name: self.client_name,
            client_uri: self.client_uri,
            enabled: self.enabled,
            created: self.created.unwrap_or(now),
            absolute_refresh_token_lifetime: self.absolute_refresh_token_lifetime,
            redirect_uris: self.redirect_uris,
            post_logout_redirect_uris: self.post_logout_redirect_uris,
            allowed_grant_types: self.allowed_grant_types,
            allowed_scopes: self.allowed_scopes,
            allowed_cors_origins: self.allowed_cors_origins,
            identity_provider_restrictions: self.identity_provider_restrictions,
            client_secrets: self.client_secrets,
            claims: self.claims,
            properties: self.properties,
        }
    }
}

/// Status shown on the administrative surface. Derived on read, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientStatus {
    PendingApproval,
    Active,
    Expired,
}

impl ClientStatus {
    /// Derive the display status.
    ///
    /// `Expired` only labels enabled clients older than `expiry_age`; it does
    /// not drive deletion.
    pub fn derive(
        enabled: bool,
        created: DateTime<Utc>,
        now: DateTime<Utc>,
        expiry_age: Duration,
    ) -> Self {
        if !enabled {
            ClientStatus::PendingApproval
        } else if created < now - expiry_age {
            ClientStatus::Expired
        } else {
            ClientStatus::Active
        }
    }
}

/// Client row as listed on the administrative surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSummary {
    pub id: i64,
    pub client_id: String,
    pub client_name: String,
    pub client_uri: Option<String>,
    pub redirect_uris: Vec<String>,
    pub allowed_grant_types: Vec<String>,
    pub allowed_scopes: Vec<String>,
    pub created: DateTime<Utc>,
    pub status: ClientStatus,
}

impl ClientSummary {
    pub fn from_record(record: &ClientRecord, status: ClientStatus) -> Self {
        Self {
            id: record.id,
            client_id: record.client_id.clone(),
            client_name: record.display_name().to_string(),
            client_uri: record.client_uri.clone(),
            redirect_uris: record.redirect_uris.clone(),
            allowed_grant_types: record.allowed_grant_types.clone(),
            allowed_scopes: record.allowed_scopes.clone(),
            created: record.created,
            status,
        }
    }
}
