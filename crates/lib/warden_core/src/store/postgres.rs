//! PostgreSQL store over the configuration and operational schemas.
//!
//! Each trait call acquires its own connection or transaction from the pool.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use super::{ClientStore, DynamicClientFilter, GrantStore, Result, StoreError};
use crate::models::{
    ApiResource, ClientClaim, ClientProperty, ClientRecord, ClientSecret, NewClient,
    client::{ORIGIN_DCR, ORIGIN_PROPERTY_KEY},
};

const CLIENT_COLUMNS: &str =
    "id, client_id, client_name, client_uri, enabled, created, absolute_refresh_token_lifetime";

/// Every table holding rows owned by a client, keyed by `client_id`.
const CHILD_TABLES: [&str; 9] = [
    "client_redirect_uris",
    "client_post_logout_redirect_uris",
    "client_grant_types",
    "client_scopes",
    "client_cors_origins",
    "client_idp_restrictions",
    "client_secrets",
    "client_claims",
    "client_properties",
];

type ClientRow = (
    i64,
    String,
    Option<String>,
    Option<String>,
    bool,
    DateTime<Utc>,
    i32,
);

/// Single-column string collections owned by a client.
#[derive(Debug, Clone, Copy)]
enum Collection {
    RedirectUris,
    PostLogoutRedirectUris,
    GrantTypes,
    Scopes,
    CorsOrigins,
    IdpRestrictions,
}

impl Collection {
    const ALL: [Collection; 6] = [
        Collection::RedirectUris,
        Collection::PostLogoutRedirectUris,
        Collection::GrantTypes,
        Collection::Scopes,
        Collection::CorsOrigins,
        Collection::IdpRestrictions,
    ];

    fn table(self) -> &'static str {
        match self {
            Collection::RedirectUris => "client_redirect_uris",
            Collection::PostLogoutRedirectUris => "client_post_logout_redirect_uris",
            Collection::GrantTypes => "client_grant_types",
            Collection::Scopes => "client_scopes",
            Collection::CorsOrigins => "client_cors_origins",
            Collection::IdpRestrictions => "client_idp_restrictions",
        }
    }

    fn column(self) -> &'static str {
        match self {
            Collection::RedirectUris => "redirect_uri",
            Collection::PostLogoutRedirectUris => "post_logout_redirect_uri",
            Collection::GrantTypes => "grant_type",
            Collection::Scopes => "scope",
            Collection::CorsOrigins => "origin",
            Collection::IdpRestrictions => "provider",
        }
    }

    fn values(self, record: &ClientRecord) -> &[String] {
        match self {
            Collection::RedirectUris => &record.redirect_uris,
            Collection::PostLogoutRedirectUris => &record.post_logout_redirect_uris,
            Collection::GrantTypes => &record.allowed_grant_types,
            Collection::Scopes => &record.allowed_scopes,
            Collection::CorsOrigins => &record.allowed_cors_origins,
            Collection::IdpRestrictions => &record.identity_provider_restrictions,
        }
    }

    fn values_mut(self, record: &mut ClientRecord) -> &mut Vec<String> {
        match self {
            Collection::RedirectUris => &mut record.redirect_uris,
            Collection::PostLogoutRedirectUris => &mut record.post_logout_redirect_uris,
            Collection::GrantTypes => &mut record.allowed_grant_types,
            Collection::Scopes => &mut record.allowed_scopes,
            Collection::CorsOrigins => &mut record.allowed_cors_origins,
            Collection::IdpRestrictions => &mut record.identity_provider_restrictions,
        }
    }
}

/// Client and grant store backed by a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn record_from_row(row: ClientRow) -> ClientRecord {
    let (id, client_id, client_name, client_uri, enabled, created, lifetime) = row;
    ClientRecord {
        id,
        client_id,
        client_name,
        client_uri,
        enabled,
        created,
        absolute_refresh_token_lifetime: lifetime,
        redirect_uris: Vec::new(),
        post_logout_redirect_uris: Vec::new(),
        allowed_grant_types: Vec::new(),
        allowed_scopes: Vec::new(),
        allowed_cors_origins: Vec::new(),
        identity_provider_restrictions: Vec::new(),
        client_secrets: Vec::new(),
        claims: Vec::new(),
        properties: Vec::new(),
    }
}

/// Attach every owned collection to the given client rows.
async fn load_records(conn: &mut PgConnection, rows: Vec<ClientRow>) -> Result<Vec<ClientRecord>> {
    let mut records: Vec<ClientRecord> = rows.into_iter().map(record_from_row).collect();
    if records.is_empty() {
        return Ok(records);
    }
    let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
    let index: HashMap<i64, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

    for collection in Collection::ALL {
        let sql = format!(
            "SELECT client_id, {} FROM {} WHERE client_id = ANY($1) ORDER BY id",
            collection.column(),
            collection.table()
        );
        let rows = sqlx::query_as::<_, (i64, String)>(&sql)
            .bind(&ids)
            .fetch_all(&mut *conn)
            .await?;
        for (owner, value) in rows {
            if let Some(&i) = index.get(&owner) {
                collection.values_mut(&mut records[i]).push(value);
            }
        }
    }

    let secrets = sqlx::query_as::<_, (i64, String, Option<String>, Option<DateTime<Utc>>)>(
        "SELECT client_id, value, description, expiration FROM client_secrets \
         WHERE client_id = ANY($1) ORDER BY id",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;
    for (owner, value, description, expiration) in secrets {
        if let Some(&i) = index.get(&owner) {
            records[i].client_secrets.push(ClientSecret {
                value,
                description,
                expiration,
            });
        }
    }

    let claims = sqlx::query_as::<_, (i64, String, String)>(
        "SELECT client_id, type, value FROM client_claims WHERE client_id = ANY($1) ORDER BY id",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;
    for (owner, claim_type, value) in claims {
        if let Some(&i) = index.get(&owner) {
            records[i].claims.push(ClientClaim { claim_type, value });
        }
    }

    let properties = sqlx::query_as::<_, (i64, String, String)>(
        "SELECT client_id, key, value FROM client_properties WHERE client_id = ANY($1) ORDER BY id",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;
    for (owner, key, value) in properties {
        if let Some(&i) = index.get(&owner) {
            records[i].properties.push(ClientProperty { key, value });
        }
    }

    Ok(records)
}

async fn load_one(conn: &mut PgConnection, id: i64) -> Result<Option<ClientRecord>> {
    let sql = format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE id = $1");
    let row = sqlx::query_as::<_, ClientRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    match row {
        Some(row) => Ok(load_records(conn, vec![row]).await?.pop()),
        None => Ok(None),
    }
}

/// Write every owned collection of `record` under `id`.
async fn insert_children(conn: &mut PgConnection, id: i64, record: &ClientRecord) -> Result<()> {
    for collection in Collection::ALL {
        let sql = format!(
            "INSERT INTO {} (client_id, {}) VALUES ($1, $2)",
            collection.table(),
            collection.column()
        );
        for value in collection.values(record) {
            sqlx::query(&sql)
                .bind(id)
                .bind(value)
                .execute(&mut *conn)
                .await?;
        }
    }

    for secret in &record.client_secrets {
        sqlx::query(
            "INSERT INTO client_secrets (client_id, value, description, expiration) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(id)
        .bind(&secret.value)
        .bind(&secret.description)
        .bind(secret.expiration)
        .execute(&mut *conn)
        .await?;
    }

    for claim in &record.claims {
        sqlx::query("INSERT INTO client_claims (client_id, type, value) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(&claim.claim_type)
            .bind(&claim.value)
            .execute(&mut *conn)
            .await?;
    }

    for property in &record.properties {
        sqlx::query("INSERT INTO client_properties (client_id, key, value) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(&property.key)
            .bind(&property.value)
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

/// Remove every owned row of the given clients.
///
/// The foreign keys cascade as well; deleting explicitly keeps the store
/// correct against schemas created without `ON DELETE CASCADE`.
async fn delete_children(conn: &mut PgConnection, ids: &[i64]) -> Result<()> {
    for table in CHILD_TABLES {
        let sql = format!("DELETE FROM {table} WHERE client_id = ANY($1)");
        sqlx::query(&sql).bind(ids).execute(&mut *conn).await?;
    }
    Ok(())
}

#[async_trait]
impl ClientStore for PgStore {
    async fn find(&self, id: i64) -> Result<Option<ClientRecord>> {
        let mut conn = self.pool.acquire().await?;
        load_one(&mut conn, id).await
    }

    async fn find_by_client_id(&self, client_id: &str) -> Result<Option<ClientRecord>> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE client_id = $1");
        let row = sqlx::query_as::<_, ClientRow>(&sql)
            .bind(client_id)
            .fetch_optional(&mut *conn)
            .await?;
        match row {
            Some(row) => Ok(load_records(&mut conn, vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<ClientRecord>> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!("SELECT {CLIENT_COLUMNS} FROM clients ORDER BY created DESC, id DESC");
        let rows = sqlx::query_as::<_, ClientRow>(&sql)
            .fetch_all(&mut *conn)
            .await?;
        load_records(&mut conn, rows).await
    }

    async fn find_dynamic(&self, filter: DynamicClientFilter) -> Result<Vec<ClientRecord>> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!(
            "SELECT {CLIENT_COLUMNS} FROM clients c \
             WHERE c.enabled = $1 \
               AND ($2::timestamptz IS NULL OR c.created < $2) \
               AND EXISTS (SELECT 1 FROM client_properties p \
                           WHERE p.client_id = c.id AND p.key = $3 AND p.value = $4) \
             ORDER BY c.created DESC, c.id DESC"
        );
        let rows = sqlx::query_as::<_, ClientRow>(&sql)
            .bind(filter.enabled)
            .bind(filter.created_before)
            .bind(ORIGIN_PROPERTY_KEY)
            .bind(ORIGIN_DCR)
            .fetch_all(&mut *conn)
            .await?;
        load_records(&mut conn, rows).await
    }

    async fn create(&self, client: NewClient) -> Result<ClientRecord> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query_as::<_, (i64, DateTime<Utc>)>(
            "INSERT INTO clients \
             (client_id, client_name, client_uri, enabled, absolute_refresh_token_lifetime, created) \
             VALUES ($1, $2, $3, $4, $5, COALESCE($6, now())) \
             RETURNING id, created",
        )
        .bind(&client.client_id)
        .bind(&client.client_name)
        .bind(&client.client_uri)
        .bind(client.enabled)
        .bind(client.absolute_refresh_token_lifetime)
        .bind(client.created)
        .fetch_one(&mut *tx)
        .await;

        let (id, created) = match inserted {
            Ok(row) => row,
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(StoreError::Conflict(format!(
                    "client id '{}' already exists",
                    client.client_id
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let record = client.into_record(id, created);
        insert_children(&mut tx, id, &record).await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn update(&self, client: &ClientRecord) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE clients SET client_name = $2, client_uri = $3, enabled = $4, \
             absolute_refresh_token_lifetime = $5 WHERE id = $1",
        )
        .bind(client.id)
        .bind(&client.client_name)
        .bind(&client.client_uri)
        .bind(client.enabled)
        .bind(client.absolute_refresh_token_lifetime)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            return Ok(false);
        }

        delete_children(&mut tx, &[client.id]).await?;
        insert_children(&mut tx, client.id, client).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn set_enabled(&self, id: i64, enabled: bool) -> Result<Option<ClientRecord>> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query("UPDATE clients SET enabled = $2 WHERE id = $1")
            .bind(id)
            .bind(enabled)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if updated == 0 {
            return Ok(None);
        }
        let record = load_one(&mut tx, id).await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn delete(&self, id: i64) -> Result<Option<ClientRecord>> {
        let mut tx = self.pool.begin().await?;
        let Some(record) = load_one(&mut tx, id).await? else {
            return Ok(None);
        };
        delete_children(&mut tx, &[id]).await?;
        sqlx::query("DELETE FROM clients WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(Some(record))
    }

    async fn delete_many(&self, ids: &[i64]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        delete_children(&mut tx, ids).await?;
        let removed = sqlx::query("DELETE FROM clients WHERE id = ANY($1)")
            .bind(ids)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(removed)
    }

    async fn enabled_resource_scopes(&self) -> Result<Vec<String>> {
        let scopes = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT s.scope FROM api_resource_scopes s \
             JOIN api_resources r ON r.id = s.api_resource_id \
             WHERE r.enabled \
             ORDER BY s.scope",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(scopes)
    }

    async fn ensure_api_resource(&self, resource: &ApiResource) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO api_resources (name, display_name, enabled) VALUES ($1, $2, $3) \
             ON CONFLICT (name) DO NOTHING RETURNING id",
        )
        .bind(&resource.name)
        .bind(&resource.display_name)
        .bind(resource.enabled)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(id) = id else {
            return Ok(false);
        };

        for scope in &resource.scopes {
            sqlx::query("INSERT INTO api_resource_scopes (api_resource_id, scope) VALUES ($1, $2)")
                .bind(id)
                .bind(scope)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(true)
    }
}

#[async_trait]
impl GrantStore for PgStore {
    async fn active_client_ids(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT client_id FROM persisted_grants \
             WHERE expiration IS NULL OR expiration > $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}
