//! Storage seams for client records and persisted grants.
//!
//! The lifecycle logic only talks to these traits. `postgres::PgStore` is the
//! production implementation over the engine's schema; `memory::MemoryStore`
//! keeps everything in process for tests and local runs.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{ApiResource, ClientRecord, NewClient};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    DbError(#[from] sqlx::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Filter over dynamically registered clients (`origin=dcr`).
#[derive(Debug, Clone, Copy)]
pub struct DynamicClientFilter {
    pub enabled: bool,
    /// Only records created strictly before this instant.
    pub created_before: Option<DateTime<Utc>>,
}

/// Configuration store: clients and API resources.
///
/// Every call is its own unit of work; implementations must not cache
/// records between calls.
#[async_trait]
pub trait ClientStore: Send + Sync {
    /// Load a record and all of its collections by internal key.
    async fn find(&self, id: i64) -> Result<Option<ClientRecord>>;

    /// Load a record and all of its collections by client id (exact match).
    async fn find_by_client_id(&self, client_id: &str) -> Result<Option<ClientRecord>>;

    /// All records, newest first.
    async fn list(&self) -> Result<Vec<ClientRecord>>;

    /// Records tagged `origin=dcr` matching `filter`.
    async fn find_dynamic(&self, filter: DynamicClientFilter) -> Result<Vec<ClientRecord>>;

    /// Insert a record. Fails with [`StoreError::Conflict`] on a duplicate client id.
    async fn create(&self, client: NewClient) -> Result<ClientRecord>;

    /// Replace the record's mutable fields and collections in one transaction.
    /// Returns `false` when the record no longer exists.
    async fn update(&self, client: &ClientRecord) -> Result<bool>;

    /// Flip the enabled flag. Returns the updated record, or `None` if absent.
    async fn set_enabled(&self, id: i64, enabled: bool) -> Result<Option<ClientRecord>>;

    /// Remove a record with every owned collection. Returns what was removed.
    async fn delete(&self, id: i64) -> Result<Option<ClientRecord>>;

    /// Remove a batch of records in one transaction. Returns rows removed.
    async fn delete_many(&self, ids: &[i64]) -> Result<u64>;

    /// Distinct scopes declared by enabled API resources.
    async fn enabled_resource_scopes(&self) -> Result<Vec<String>>;

    /// Insert the resource unless one with the same name exists.
    /// Returns `true` if inserted.
    async fn ensure_api_resource(&self, resource: &ApiResource) -> Result<bool>;
}

/// Operational store: persisted grants.
#[async_trait]
pub trait GrantStore: Send + Sync {
    /// Distinct client ids with at least one grant that has no expiration or
    /// expires after `now`.
    async fn active_client_ids(&self, now: DateTime<Utc>) -> Result<Vec<String>>;
}
