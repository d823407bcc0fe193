//! Administrative state transitions for client records.
//!
//! Each operation is a single store round-trip. A missing record is a no-op
//! reported as `Ok(None)`. Concurrent actions on the same record resolve to
//! whichever transaction commits last.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::models::{ClientRecord, ClientStatus, ClientSummary};
use crate::policy::LifecyclePolicy;
use crate::store::{ClientStore, Result};

/// All clients, newest first, with their derived status.
pub async fn list_clients(
    store: &dyn ClientStore,
    now: DateTime<Utc>,
    policy: &LifecyclePolicy,
) -> Result<Vec<ClientSummary>> {
    let records = store.list().await?;
    Ok(records
        .iter()
        .map(|r| {
            let status = ClientStatus::derive(r.enabled, r.created, now, policy.status_expiry_age);
            ClientSummary::from_record(r, status)
        })
        .collect())
}

/// Disabled clients awaiting a decision, newest first.
pub async fn list_pending(store: &dyn ClientStore) -> Result<Vec<ClientRecord>> {
    let records = store.list().await?;
    Ok(records.into_iter().filter(|r| !r.enabled).collect())
}

/// Enable a client. Approving an enabled client changes nothing.
pub async fn approve(store: &dyn ClientStore, id: i64) -> Result<Option<ClientRecord>> {
    let client = store.set_enabled(id, true).await?;
    if let Some(c) = &client {
        info!(client_id = %c.client_id, "client approved");
    }
    Ok(client)
}

/// Disable a client. Provenance tags are left as they are.
pub async fn disable(store: &dyn ClientStore, id: i64) -> Result<Option<ClientRecord>> {
    let client = store.set_enabled(id, false).await?;
    if let Some(c) = &client {
        info!(client_id = %c.client_id, "client disabled");
    }
    Ok(client)
}

/// Delete a client and every owned collection.
pub async fn delete(store: &dyn ClientStore, id: i64) -> Result<Option<ClientRecord>> {
    let client = store.delete(id).await?;
    if let Some(c) = &client {
        info!(client_id = %c.client_id, "client deleted");
    }
    Ok(client)
}

/// Where to send the browser after approval: `return_url` when it is an
/// absolute URL, otherwise nowhere in particular.
pub fn approval_return_target(return_url: Option<&str>) -> Option<url::Url> {
    let raw = return_url?.trim();
    if raw.is_empty() {
        return None;
    }
    url::Url::parse(raw).ok().filter(|u| u.has_host())
}
