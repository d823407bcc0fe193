//! Periodic removal of stale dynamically registered clients.
//!
//! Every `sweep_interval` the service runs two passes over DCR-tagged
//! records:
//!
//! - **unapproved expiry**: disabled clients older than `unapproved_max_age`.
//! - **abandonment expiry**: enabled clients with no live grant whose
//!   refresh-token lifetime has fully elapsed since creation.
//!
//! Passes are independent. A failing pass is logged and retried on the next
//! iteration; it never stops the loop or the other pass.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::models::ClientRecord;
use crate::policy::LifecyclePolicy;
use crate::store::{ClientStore, DynamicClientFilter, GrantStore, StoreError};

/// Outcome of one sweep. A pass is `Err` when its store work failed.
#[derive(Debug)]
pub struct SweepReport {
    pub unapproved: Result<u64, StoreError>,
    pub abandoned: Result<u64, StoreError>,
}

impl SweepReport {
    /// Total records removed by the passes that succeeded.
    pub fn removed(&self) -> u64 {
        self.unapproved.as_ref().copied().unwrap_or(0)
            + self.abandoned.as_ref().copied().unwrap_or(0)
    }
}

/// Whether an enabled DCR client is safe to delete.
///
/// `active` holds lowercased client ids with at least one live grant.
pub fn is_abandoned(
    client: &ClientRecord,
    active: &HashSet<String>,
    now: DateTime<Utc>,
    default_lifetime: Duration,
) -> bool {
    if active.contains(&client.client_id.to_lowercase()) {
        return false;
    }
    client.created + client.effective_refresh_token_lifetime(default_lifetime) < now
}

/// Background cleanup of quarantined and dormant DCR clients.
#[derive(Clone)]
pub struct CleanupService {
    clients: Arc<dyn ClientStore>,
    grants: Arc<dyn GrantStore>,
    policy: LifecyclePolicy,
}

impl CleanupService {
    pub fn new(
        clients: Arc<dyn ClientStore>,
        grants: Arc<dyn GrantStore>,
        policy: LifecyclePolicy,
    ) -> Self {
        Self {
            clients,
            grants,
            policy,
        }
    }

    /// Spawn the sweep loop. It exits once `ct` is cancelled.
    pub fn spawn(self, ct: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(ct).await })
    }

    /// Sweep every `sweep_interval` until `ct` is cancelled.
    ///
    /// A non-positive interval disables the loop rather than spinning.
    pub async fn run(&self, ct: CancellationToken) {
        let interval = match self.policy.sweep_interval.to_std() {
            Ok(interval) if !interval.is_zero() => interval,
            _ => {
                error!(
                    interval_secs = self.policy.sweep_interval.num_seconds(),
                    "sweep interval must be positive, client cleanup disabled"
                );
                return;
            }
        };
        info!(interval_secs = interval.as_secs(), "client cleanup service started");

        loop {
            tokio::select! {
                _ = ct.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            let now = Utc::now();
            if let Err(e) = self.remove_unapproved(now).await {
                error!(error = %e, "error cleaning up unapproved DCR clients");
            }
            if ct.is_cancelled() {
                break;
            }
            if let Err(e) = self.remove_abandoned(now).await {
                error!(error = %e, "error cleaning up abandoned DCR clients");
            }
        }

        debug!("client cleanup service stopped");
    }

    /// Run both passes once against `now`.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let unapproved = self.remove_unapproved(now).await;
        if let Err(e) = &unapproved {
            error!(error = %e, "error cleaning up unapproved DCR clients");
        }
        let abandoned = self.remove_abandoned(now).await;
        if let Err(e) = &abandoned {
            error!(error = %e, "error cleaning up abandoned DCR clients");
        }
        SweepReport {
            unapproved,
            abandoned,
        }
    }

    /// Delete disabled DCR clients created before `now - unapproved_max_age`.
    pub async fn remove_unapproved(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let cutoff = now - self.policy.unapproved_max_age;
        let stale = self
            .clients
            .find_dynamic(DynamicClientFilter {
                enabled: false,
                created_before: Some(cutoff),
            })
            .await?;

        if stale.is_empty() {
            return Ok(0);
        }

        for client in &stale {
            info!(
                client_id = %client.client_id,
                created = %client.created,
                "removing unapproved DCR client"
            );
        }

        let ids: Vec<i64> = stale.iter().map(|c| c.id).collect();
        let removed = self.clients.delete_many(&ids).await?;
        info!(count = removed, "removed unapproved DCR clients");
        Ok(removed)
    }

    /// Delete enabled DCR clients with no live grant and an elapsed
    /// refresh-token lifetime.
    pub async fn remove_abandoned(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let enabled = self
            .clients
            .find_dynamic(DynamicClientFilter {
                enabled: true,
                created_before: None,
            })
            .await?;

        if enabled.is_empty() {
            return Ok(0);
        }

        let active: HashSet<String> = self
            .grants
            .active_client_ids(now)
            .await?
            .into_iter()
            .map(|id| id.to_lowercase())
            .collect();

        let abandoned: Vec<&ClientRecord> = enabled
            .iter()
            .filter(|c| is_abandoned(c, &active, now, self.policy.default_refresh_token_lifetime))
            .collect();

        if abandoned.is_empty() {
            return Ok(0);
        }

        for client in &abandoned {
            info!(
                client_id = %client.client_id,
                created = %client.created,
                "removing abandoned DCR client"
            );
        }

        let ids: Vec<i64> = abandoned.iter().map(|c| c.id).collect();
        let removed = self.clients.delete_many(&ids).await?;
        info!(count = removed, "removed abandoned DCR clients");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::models::{ApiResource, NewClient, PersistedGrant, Provenance};
    use crate::store::MemoryStore;

    fn dcr_client(client_id: &str, enabled: bool, created: DateTime<Utc>) -> NewClient {
        NewClient {
            client_id: client_id.into(),
            enabled,
            created: Some(created),
            properties: Provenance::DynamicRegistration.property().into_iter().collect(),
            ..Default::default()
        }
    }

    fn grant(key: &str, client_id: &str, expiration: Option<DateTime<Utc>>) -> PersistedGrant {
        PersistedGrant {
            key: key.into(),
            grant_type: "refresh_token".into(),
            subject_id: Some("alice".into()),
            client_id: client_id.into(),
            creation_time: Utc::now(),
            expiration,
        }
    }

    fn service(store: &Arc<MemoryStore>) -> CleanupService {
        CleanupService::new(store.clone(), store.clone(), LifecyclePolicy::default())
    }

    async fn remaining(store: &MemoryStore) -> Vec<String> {
        let mut ids: Vec<String> = store
            .list()
            .await
            .expect("list")
            .into_iter()
            .map(|c| c.client_id)
            .collect();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn unapproved_boundary() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store
            .create(dcr_client("stale", false, now - Duration::hours(1) - Duration::seconds(1)))
            .await
            .expect("create");
        store
            .create(dcr_client("fresh", false, now - Duration::minutes(59)))
            .await
            .expect("create");

        let report = service(&store).sweep(now).await;

        assert_eq!(report.unapproved.expect("pass A"), 1);
        assert_eq!(remaining(&store).await, vec!["fresh"]);
    }

    #[tokio::test]
    async fn unapproved_cutoff_is_strict() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store
            .create(dcr_client("exact", false, now - Duration::hours(1)))
            .await
            .expect("create");

        let removed = service(&store).remove_unapproved(now).await.expect("pass A");

        assert_eq!(removed, 0);
        assert_eq!(store.client_count(), 1);
    }

    #[tokio::test]
    async fn static_clients_are_never_swept() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let old = now - Duration::days(365);
        for (id, enabled) in [("static-disabled", false), ("static-enabled", true)] {
            store
                .create(NewClient {
                    client_id: id.into(),
                    enabled,
                    created: Some(old),
                    ..Default::default()
                })
                .await
                .expect("create");
        }

        let report = service(&store).sweep(now).await;

        assert_eq!(report.removed(), 0);
        assert_eq!(store.client_count(), 2);
    }

    #[tokio::test]
    async fn abandoned_client_without_grants_is_removed() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store
            .create(dcr_client("dormant", true, now - Duration::days(31)))
            .await
            .expect("create");
        store
            .create(dcr_client("recent", true, now - Duration::days(29)))
            .await
            .expect("create");

        let report = service(&store).sweep(now).await;

        assert_eq!(report.abandoned.expect("pass B"), 1);
        assert_eq!(remaining(&store).await, vec!["recent"]);
    }

    #[tokio::test]
    async fn live_grant_keeps_client_regardless_of_age() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store
            .create(dcr_client("Busy-Client", true, now - Duration::days(400)))
            .await
            .expect("create");
        store
            .create(dcr_client("forever", true, now - Duration::days(400)))
            .await
            .expect("create");
        // Grant ids match case-insensitively.
        store.insert_grant(grant("g1", "busy-client", Some(now + Duration::days(1))));
        store.insert_grant(grant("g2", "forever", None));

        let report = service(&store).sweep(now).await;

        assert_eq!(report.abandoned.expect("pass B"), 0);
        assert_eq!(store.client_count(), 2);
    }

    #[tokio::test]
    async fn expired_grants_do_not_keep_client() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store
            .create(dcr_client("lapsed", true, now - Duration::days(31)))
            .await
            .expect("create");
        store.insert_grant(grant("g1", "lapsed", Some(now - Duration::seconds(1))));

        let removed = service(&store).remove_abandoned(now).await.expect("pass B");

        assert_eq!(removed, 1);
        assert_eq!(store.client_count(), 0);
    }

    #[tokio::test]
    async fn record_lifetime_overrides_default() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let mut short = dcr_client("short-lived", true, now - Duration::hours(2));
        short.absolute_refresh_token_lifetime = 3600;
        store.create(short).await.expect("create");

        let removed = service(&store).remove_abandoned(now).await.expect("pass B");

        assert_eq!(removed, 1);
    }

    #[test]
    fn abandonment_uses_default_when_lifetime_unset() {
        let now = Utc::now();
        let mut client = dcr_client("x", true, now - Duration::days(30) - Duration::seconds(1))
            .into_record(1, now);
        client.absolute_refresh_token_lifetime = 0;
        let active = HashSet::new();

        assert!(is_abandoned(&client, &active, now, Duration::days(30)));
        client.created = now - Duration::days(30);
        assert!(!is_abandoned(&client, &active, now, Duration::days(30)));
    }

    /// Client store whose DCR query fails for disabled clients only.
    struct FlakyStore {
        inner: Arc<MemoryStore>,
    }

    #[async_trait]
    impl ClientStore for FlakyStore {
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
            if !filter.enabled {
                return Err(StoreError::DbError(sqlx::Error::PoolTimedOut));
            }
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
            self.inner.enabled_resource_scopes().await
        }
        async fn ensure_api_resource(&self, resource: &ApiResource) -> crate::store::Result<bool> {
            self.inner.ensure_api_resource(resource).await
        }
    }

    #[tokio::test]
    async fn failing_pass_does_not_stop_the_other() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store
            .create(dcr_client("dormant", true, now - Duration::days(31)))
            .await
            .expect("create");
        let flaky = Arc::new(FlakyStore {
            inner: store.clone(),
        });
        let service = CleanupService::new(flaky, store.clone(), LifecyclePolicy::default());

        let report = service.sweep(now).await;

        assert!(report.unapproved.is_err());
        assert_eq!(report.abandoned.expect("pass B"), 1);
        assert_eq!(store.client_count(), 0);
    }

    #[tokio::test]
    async fn loop_stops_promptly_on_cancel() {
        let store = Arc::new(MemoryStore::new());
        let ct = CancellationToken::new();
        let handle = service(&store).spawn(ct.clone());

        ct.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("loop exited before the sweep interval")
            .expect("task did not panic");
    }

    #[tokio::test]
    async fn non_positive_interval_does_not_start_the_loop() {
        let store = Arc::new(MemoryStore::new());
        store
            .create(dcr_client("stale", false, Utc::now() - Duration::hours(2)))
            .await
            .expect("create");

        for interval in [Duration::zero(), Duration::seconds(-5)] {
            let policy = LifecyclePolicy {
                sweep_interval: interval,
                ..LifecyclePolicy::default()
            };
            let handle = CleanupService::new(store.clone(), store.clone(), policy)
                .spawn(CancellationToken::new());

            tokio::time::timeout(std::time::Duration::from_secs(1), handle)
                .await
                .expect("loop returned without cancellation")
                .expect("task did not panic");
        }
        assert_eq!(store.client_count(), 1);
    }

    #[tokio::test]
    async fn loop_sweeps_each_interval() {
        let store = Arc::new(MemoryStore::new());
        store
            .create(dcr_client("stale", false, Utc::now() - Duration::hours(2)))
            .await
            .expect("create");
        let policy = LifecyclePolicy {
            sweep_interval: Duration::milliseconds(10),
            ..LifecyclePolicy::default()
        };
        let ct = CancellationToken::new();
        let handle = CleanupService::new(store.clone(), store.clone(), policy).spawn(ct.clone());

        for _ in 0..100 {
            if store.client_count() == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        ct.cancel();
        handle.await.expect("task did not panic");

        assert_eq!(store.client_count(), 0);
    }
}
