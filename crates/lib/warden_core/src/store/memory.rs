//! In-process store for tests and local development.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{ClientStore, DynamicClientFilter, GrantStore, Result, StoreError};
use crate::models::{ApiResource, ClientRecord, NewClient, PersistedGrant};

/// Client, resource and grant tables held in concurrent maps.
///
/// A record lives in a single map entry, so removing the entry removes every
/// owned collection with it. `client_ids` indexes the public identifier and is
/// the only place uniqueness is decided.
#[derive(Debug)]
pub struct MemoryStore {
    clients: DashMap<i64, ClientRecord>,
    client_ids: DashMap<String, i64>,
    resources: DashMap<String, ApiResource>,
    grants: DashMap<String, PersistedGrant>,
    next_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
            client_ids: DashMap::new(),
            resources: DashMap::new(),
            grants: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }

    /// Add or replace a persisted grant.
    pub fn insert_grant(&self, grant: PersistedGrant) {
        self.grants.insert(grant.key.clone(), grant);
    }

    /// Number of client records.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn newest_first(mut records: Vec<ClientRecord>) -> Vec<ClientRecord> {
    records.sort_by(|a, b| b.created.cmp(&a.created).then(b.id.cmp(&a.id)));
    records
}

#[async_trait]
impl ClientStore for MemoryStore {
    async fn find(&self, id: i64) -> Result<Option<ClientRecord>> {
        Ok(self.clients.get(&id).map(|r| r.value().clone()))
    }

    async fn find_by_client_id(&self, client_id: &str) -> Result<Option<ClientRecord>> {
        let Some(id) = self.client_ids.get(client_id).map(|r| *r.value()) else {
            return Ok(None);
        };
        Ok(self.clients.get(&id).map(|r| r.value().clone()))
    }

    async fn list(&self) -> Result<Vec<ClientRecord>> {
        let records = self.clients.iter().map(|r| r.value().clone()).collect();
        Ok(newest_first(records))
    }

    async fn find_dynamic(&self, filter: DynamicClientFilter) -> Result<Vec<ClientRecord>> {
        let records = self
            .clients
            .iter()
            .filter(|r| r.enabled == filter.enabled && r.is_dynamically_registered())
            .filter(|r| filter.created_before.is_none_or(|cutoff| r.created < cutoff))
            .map(|r| r.value().clone())
            .collect();
        Ok(newest_first(records))
    }

    async fn create(&self, client: NewClient) -> Result<ClientRecord> {
        match self.client_ids.entry(client.client_id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!(
                "client id '{}' already exists",
                client.client_id
            ))),
            Entry::Vacant(slot) => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                let record = client.into_record(id, Utc::now());
                self.clients.insert(id, record.clone());
                slot.insert(id);
                Ok(record)
            }
        }
    }

    async fn update(&self, client: &ClientRecord) -> Result<bool> {
        match self.clients.get_mut(&client.id) {
            Some(mut existing) => {
                let created = existing.created;
                let client_id = std::mem::take(&mut existing.client_id);
                *existing = client.clone();
                existing.created = created;
                existing.client_id = client_id;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_enabled(&self, id: i64, enabled: bool) -> Result<Option<ClientRecord>> {
        Ok(self.clients.get_mut(&id).map(|mut r| {
            r.enabled = enabled;
            r.value().clone()
        }))
    }

    async fn delete(&self, id: i64) -> Result<Option<ClientRecord>> {
        let removed = self.clients.remove(&id).map(|(_, r)| r);
        if let Some(record) = &removed {
            self.client_ids.remove(&record.client_id);
        }
        Ok(removed)
    }

    async fn delete_many(&self, ids: &[i64]) -> Result<u64> {
        let mut removed = 0;
        for id in ids {
            if let Some((_, record)) = self.clients.remove(id) {
                self.client_ids.remove(&record.client_id);
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn enabled_resource_scopes(&self) -> Result<Vec<String>> {
        let scopes: BTreeSet<String> = self
            .resources
            .iter()
            .filter(|r| r.enabled)
            .flat_map(|r| r.scopes.clone())
            .collect();
        Ok(scopes.into_iter().collect())
    }

    async fn ensure_api_resource(&self, resource: &ApiResource) -> Result<bool> {
        match self.resources.entry(resource.name.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(resource.clone());
                Ok(true)
            }
        }
    }
}

#[async_trait]
impl GrantStore for MemoryStore {
    async fn active_client_ids(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let ids: BTreeSet<String> = self
            .grants
            .iter()
            .filter(|g| g.is_live(now))
            .map(|g| g.client_id.clone())
            .collect();
        Ok(ids.into_iter().collect())
    }
}
