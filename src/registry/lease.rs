//! Lease-backed registry
//!
//! Every write is attached to a lease owned by the registry. A background
//! [`PeriodicTimer`] keeps the lease alive; if the process dies (or the
//! refresh loop gives up) the coordination store expires the lease and every
//! entry written through this registry disappears.
//!
//! Local keys are mapped into the store under a root namespace:
//! `/my/service` with root `/registry` is stored as `/registry/my/service`.

use crate::common::{
    Config, Error, LeaseSettings, Lifecycle, LifecycleState, PeriodicTimer, Result,
};
use crate::registry::contract::{Condition, Registry, Scan};
use crate::registry::key::{Key, SEPARATOR};
use crate::registry::store::{
    Compare, CoordinationStore, LeaseId, PrefixOptions, StoreRecord, Transaction, TxnOp,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

struct LeaseState {
    lifecycle: Lifecycle,
    lease: Option<LeaseId>,
    refresh: Option<PeriodicTimer>,
}

pub struct LeaseBackedRegistry<S: CoordinationStore + ?Sized + 'static> {
    store: Arc<S>,
    settings: LeaseSettings,
    root: Key,
    state: RwLock<LeaseState>,
}

impl<S: CoordinationStore + ?Sized + 'static> LeaseBackedRegistry<S> {
    pub fn new(store: Arc<S>, settings: LeaseSettings, root: Key) -> Self {
        Self {
            store,
            settings,
            root,
            state: RwLock::new(LeaseState {
                lifecycle: Lifecycle::new("lease-backed registry"),
                lease: None,
                refresh: None,
            }),
        }
    }

    /// Registry using the lease settings and root namespace of `config`.
    pub fn from_config(store: Arc<S>, config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(store, config.lease.settings(), config.root()?))
    }

    pub fn root(&self) -> &Key {
        &self.root
    }

    pub fn settings(&self) -> &LeaseSettings {
        &self.settings
    }

    pub async fn lifecycle_state(&self) -> LifecycleState {
        self.state.read().await.lifecycle.state()
    }

    /// Lease currently held, if initialized.
    pub async fn lease_id(&self) -> Option<LeaseId> {
        self.state.read().await.lease
    }

    /// Whether the lease refresh loop is alive. `false` after it gave up on
    /// repeated failures, which means the lease is about to expire.
    pub async fn refresh_running(&self) -> bool {
        self.state
            .read()
            .await
            .refresh
            .as_ref()
            .is_some_and(PeriodicTimer::is_running)
    }

    /// Consecutive lease refresh failures.
    pub async fn refresh_failure_count(&self) -> u64 {
        self.state
            .read()
            .await
            .refresh
            .as_ref()
            .map_or(0, PeriodicTimer::failure_count)
    }

    async fn active_lease(&self) -> Result<LeaseId> {
        let state = self.state.read().await;
        state.lifecycle.ensure_initialized()?;
        state
            .lease
            .ok_or_else(|| Error::Internal("initialized registry holds no lease".into()))
    }

    fn store_key(&self, key: &Key) -> String {
        self.root.relative(key).to_string()
    }

    fn local_key(&self, record: &StoreRecord) -> Result<Key> {
        Key::create(&record.key)?.remove_parent(&self.root)
    }

    fn refresh_timer(&self, lease: LeaseId) -> Result<PeriodicTimer> {
        let store = self.store.clone();
        let timer = PeriodicTimer::new(
            format!("lease-refresh-{}", lease),
            self.settings.refresh_interval,
            move || {
                let store = store.clone();
                async move {
                    store.refresh_lease(lease).await.map_err(|e| {
                        warn!(lease = %lease, "Failed to refresh lease: {}", e);
                        e
                    })
                }
            },
        )?;
        Ok(timer.with_max_failure_count(self.settings.max_refresh_failures))
    }
}

#[async_trait]
impl<S: CoordinationStore + ?Sized + 'static> Registry for LeaseBackedRegistry<S> {
    async fn setup(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.lifecycle.check_can_initialize()?;
        self.settings.validate()?;

        let granted_ttl = self.settings.granted_ttl()?;
        let lease = self.store.create_lease(granted_ttl).await?;
        let started = self
            .refresh_timer(lease)
            .and_then(|timer| timer.start().map(|_| timer));
        let timer = match started {
            Ok(timer) => timer,
            Err(e) => {
                if let Err(revoke_err) = self.store.revoke_lease(lease).await {
                    warn!(lease = %lease, "Failed to revoke lease after setup error: {}", revoke_err);
                }
                return Err(e);
            }
        };

        state.lease = Some(lease);
        state.refresh = Some(timer);
        state.lifecycle.mark_initialized()?;

        info!(
            lease = %lease,
            root = %self.root,
            ttl = ?granted_ttl,
            refresh_interval = ?self.settings.refresh_interval,
            "Lease-backed registry initialized"
        );
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if state.lifecycle.state() == LifecycleState::Destroyed {
            debug!("Lease-backed registry already destroyed");
            return Ok(());
        }

        // Revoke first so the store drops our keys before local cleanup completes.
        let revoked = match state.lease.take() {
            Some(lease) => match self.store.revoke_lease(lease).await {
                Ok(()) => {
                    info!(lease = %lease, "Lease revoked");
                    Ok(())
                }
                Err(Error::LeaseNotFound(_)) => {
                    warn!(lease = %lease, "Lease had already expired");
                    Ok(())
                }
                Err(e) => Err(e),
            },
            None => Ok(()),
        };

        if let Some(timer) = state.refresh.take() {
            timer.stop().await;
        }
        state.lifecycle.mark_destroyed();
        info!(root = %self.root, "Lease-backed registry destroyed");
        revoked
    }

    async fn store_entries(
        &self,
        entries: Vec<(Key, String)>,
        condition: Option<Condition>,
    ) -> Result<bool> {
        let lease = self.active_lease().await?;
        if entries.is_empty() {
            return Ok(true);
        }

        if entries.len() == 1 && condition.is_none() {
            let (key, value) = &entries[0];
            let store_key = self.store_key(key);
            debug!(key = %store_key, lease = %lease, "Put");
            self.store.put(&store_key, value, Some(lease)).await?;
            return Ok(true);
        }

        let puts: Vec<TxnOp> = entries
            .iter()
            .map(|(key, value)| TxnOp::Put {
                key: self.store_key(key),
                value: value.clone(),
                lease: Some(lease),
            })
            .collect();

        let txn = match &condition {
            None => Transaction {
                compare: Vec::new(),
                success: puts,
                failure: Vec::new(),
            },
            Some(Condition::Present(key)) => Transaction {
                compare: vec![Compare::exists(self.store_key(key))],
                success: puts,
                failure: Vec::new(),
            },
            Some(Condition::Absent(key)) => Transaction {
                compare: vec![Compare::exists(self.store_key(key))],
                success: Vec::new(),
                failure: puts,
            },
        };

        let response = self.store.transaction(txn).await?;
        let applied = !response.responses.is_empty();
        debug!(
            entries = entries.len(),
            ?condition,
            applied,
            "Transactional put"
        );
        Ok(applied)
    }

    async fn load_entry(&self, key: &Key) -> Result<String> {
        self.active_lease().await?;
        let store_key = self.store_key(key);
        match self.store.get(&store_key).await? {
            Some(record) => Ok(record.value),
            None => Err(Error::KeyDoesNotExist(key.to_string())),
        }
    }

    async fn scan_entries(&self, parent: &Key, scan: Scan) -> Result<Vec<(Key, String)>> {
        self.active_lease().await?;
        let parent_key = self.store_key(parent);
        let prefix = if parent_key.ends_with(SEPARATOR) {
            parent_key.clone()
        } else {
            format!("{}{}", parent_key, SEPARATOR)
        };
        let options = PrefixOptions {
            sort_by_creation: scan.keep_order,
            keys_only: scan.keys_only,
        };

        let mut entries = Vec::new();
        if !scan.exclude_parent && !parent.is_root() {
            if let Some(record) = self.store.get(&parent_key).await? {
                let value = if scan.keys_only { String::new() } else { record.value };
                entries.push((parent.clone(), value));
            }
        }

        for record in self.store.get_with_prefix(&prefix, options).await? {
            let key = self.local_key(&record)?;
            if scan.recursive || key.is_immediate_parent(parent) {
                entries.push((key, record.value));
            }
        }
        debug!(prefix = %prefix, found = entries.len(), "Prefix scan");
        Ok(entries)
    }

    async fn remove_entry(&self, key: &Key) -> Result<bool> {
        self.active_lease().await?;
        self.store.delete(&self.store_key(key)).await
    }
}

impl<S: CoordinationStore + ?Sized + 'static> std::fmt::Debug for LeaseBackedRegistry<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseBackedRegistry")
            .field("root", &self.root)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::contract::{ListOptions, RegistryExt};
    use crate::registry::local_store::LocalStore;
    use std::time::Duration;

    fn registry(store: &Arc<LocalStore>) -> LeaseBackedRegistry<LocalStore> {
        let settings = LeaseSettings::with_ttl(Duration::from_secs(5));
        LeaseBackedRegistry::new(store.clone(), settings, Key::create("/registry").unwrap())
    }

    #[tokio::test]
    async fn test_keys_are_stored_under_root() {
        let store = Arc::new(LocalStore::new());
        let registry = registry(&store);
        registry.setup().await.unwrap();

        registry.put("/svc/a", "1").await.unwrap();
        let record = store.get("/registry/svc/a").await.unwrap().unwrap();
        assert_eq!(record.value, "1");
        assert_eq!(record.lease, registry.lease_id().await);

        let keys = registry.list_keys("/svc", ListOptions::default()).await.unwrap();
        assert_eq!(keys, vec!["/svc/a"]);

        registry.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_multi_put_is_applied() {
        let store = Arc::new(LocalStore::new());
        let registry = registry(&store);
        registry.setup().await.unwrap();

        registry
            .put_all([("/m/a", "1"), ("/m/b", "2")])
            .await
            .unwrap();
        assert_eq!(registry.get("/m/b").await.unwrap(), "2");
        assert_eq!(store.len(), 2);

        registry.destroy().await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_setup_failure_leaves_registry_uninitialized() {
        let store = Arc::new(LocalStore::new());
        store.set_available(false);
        let registry = registry(&store);

        assert!(matches!(registry.setup().await, Err(Error::Store(_))));
        assert_eq!(registry.lifecycle_state().await, LifecycleState::Created);
        assert!(registry.lease_id().await.is_none());

        store.set_available(true);
        registry.setup().await.unwrap();
        assert_eq!(registry.lifecycle_state().await, LifecycleState::Initialized);
        assert!(registry.refresh_running().await);
        registry.destroy().await.unwrap();
        assert!(!registry.refresh_running().await);
    }

    #[tokio::test]
    async fn test_invalid_settings_rejected_at_setup() {
        let store = Arc::new(LocalStore::new());
        let settings = LeaseSettings {
            refresh_interval: Duration::from_secs(60),
            ..LeaseSettings::with_ttl(Duration::from_secs(5))
        };
        let registry = LeaseBackedRegistry::new(store.clone(), settings, Key::root());
        assert!(matches!(registry.setup().await, Err(Error::InvalidConfig(_))));
        assert_eq!(store.lease_count(), 0);
    }

    #[tokio::test]
    async fn test_oversized_ttl_rejected_at_setup() {
        let store = Arc::new(LocalStore::new());
        let settings = LeaseSettings::with_ttl(Duration::from_secs(u64::MAX / 2));
        let registry = LeaseBackedRegistry::new(store.clone(), settings, Key::root());
        assert!(matches!(registry.setup().await, Err(Error::InvalidConfig(_))));
        assert_eq!(registry.lifecycle_state().await, LifecycleState::Created);
        assert_eq!(store.lease_count(), 0);
    }
}
