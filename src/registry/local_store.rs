//! In-process coordination store
//!
//! Linearizable single-process store with etcd semantics: a global revision
//! counter, per-key create/mod revisions and versions, and leases whose
//! attached keys are deleted when the lease is revoked or expires. Expired
//! leases are swept lazily at the start of every call.

use crate::common::{Error, Result};
use crate::registry::store::{
    CoordinationStore, LeaseId, PrefixOptions, StoreRecord, Transaction, TxnOp, TxnOpResponse,
    TxnResponse,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct LeaseState {
    ttl: Duration,
    deadline: Instant,
    keys: HashSet<String>,
}

#[derive(Debug)]
struct StoreState {
    revision: i64,
    next_lease: i64,
    kvs: BTreeMap<String, StoreRecord>,
    leases: HashMap<LeaseId, LeaseState>,
    available: bool,
}

impl StoreState {
    fn new() -> Self {
        Self {
            revision: 0,
            next_lease: 1,
            kvs: BTreeMap::new(),
            leases: HashMap::new(),
            available: true,
        }
    }

    /// Delete keys of every lease past its deadline. Returns the number of expired leases.
    fn sweep(&mut self, now: Instant) -> usize {
        let expired: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            if let Some(lease) = self.leases.remove(id) {
                tracing::debug!(lease = %id, keys = lease.keys.len(), "Lease expired");
                self.drop_lease_keys(*id, lease.keys);
            }
        }
        expired.len()
    }

    fn drop_lease_keys(&mut self, id: LeaseId, keys: HashSet<String>) {
        let mut deleted = false;
        for key in keys {
            if self.kvs.get(&key).is_some_and(|r| r.lease == Some(id)) {
                self.kvs.remove(&key);
                deleted = true;
            }
        }
        if deleted {
            self.revision += 1;
        }
    }

    fn version(&self, key: &str) -> i64 {
        self.kvs.get(key).map_or(0, |r| r.version)
    }

    fn check_lease(&self, lease: Option<LeaseId>) -> Result<()> {
        match lease {
            Some(id) if !self.leases.contains_key(&id) => Err(Error::LeaseNotFound(id.0)),
            _ => Ok(()),
        }
    }

    fn apply_put(&mut self, key: &str, value: &str, lease: Option<LeaseId>, revision: i64) {
        let previous = self.kvs.get(key).cloned();
        if let Some(old) = previous.as_ref().and_then(|r| r.lease) {
            if Some(old) != lease {
                if let Some(state) = self.leases.get_mut(&old) {
                    state.keys.remove(key);
                }
            }
        }
        if let Some(id) = lease {
            if let Some(state) = self.leases.get_mut(&id) {
                state.keys.insert(key.to_string());
            }
        }

        let record = StoreRecord {
            key: key.to_string(),
            value: value.to_string(),
            create_revision: previous.as_ref().map_or(revision, |r| r.create_revision),
            mod_revision: revision,
            version: previous.as_ref().map_or(0, |r| r.version) + 1,
            lease,
        };
        self.kvs.insert(key.to_string(), record);
    }

    fn apply_delete(&mut self, key: &str) -> bool {
        match self.kvs.remove(key) {
            Some(record) => {
                if let Some(state) = record.lease.and_then(|id| self.leases.get_mut(&id)) {
                    state.keys.remove(key);
                }
                true
            }
            None => false,
        }
    }
}

/// In-process [`CoordinationStore`].
#[derive(Debug)]
pub struct LocalStore {
    state: Mutex<StoreState>,
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState::new()),
        }
    }

    /// Simulate the store becoming unreachable (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.lock_raw().available = available;
        tracing::info!(available, "Local store availability changed");
    }

    /// Sweep expired leases now. Returns how many expired.
    pub fn expire_leases(&self) -> usize {
        self.lock_raw().sweep(Instant::now())
    }

    /// Number of live leases.
    pub fn lease_count(&self) -> usize {
        let mut state = self.lock_raw();
        state.sweep(Instant::now());
        state.leases.len()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        let mut state = self.lock_raw();
        state.sweep(Instant::now());
        state.kvs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current store revision.
    pub fn revision(&self) -> i64 {
        self.lock_raw().revision
    }

    fn lock_raw(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock for a client call: fails while unavailable, sweeps expired leases otherwise.
    fn lock(&self) -> Result<MutexGuard<'_, StoreState>> {
        let mut state = self.lock_raw();
        if !state.available {
            return Err(Error::Store("local store is unavailable".into()));
        }
        state.sweep(Instant::now());
        Ok(state)
    }
}

#[async_trait]
impl CoordinationStore for LocalStore {
    async fn get(&self, key: &str) -> Result<Option<StoreRecord>> {
        Ok(self.lock()?.kvs.get(key).cloned())
    }

    async fn get_with_prefix(&self, prefix: &str, options: PrefixOptions) -> Result<Vec<StoreRecord>> {
        let state = self.lock()?;
        let mut records: Vec<StoreRecord> = state
            .kvs
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(_, record)| record.clone())
            .collect();

        if options.sort_by_creation {
            records.sort_by_key(|r| r.create_revision);
        }
        if options.keys_only {
            for record in &mut records {
                record.value.clear();
            }
        }
        Ok(records)
    }

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> Result<i64> {
        let mut state = self.lock()?;
        state.check_lease(lease)?;
        state.revision += 1;
        let revision = state.revision;
        state.apply_put(key, value, lease, revision);
        Ok(revision)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut state = self.lock()?;
        let deleted = state.apply_delete(key);
        if deleted {
            state.revision += 1;
        }
        Ok(deleted)
    }

    async fn transaction(&self, txn: Transaction) -> Result<TxnResponse> {
        let mut state = self.lock()?;
        let succeeded = txn
            .compare
            .iter()
            .all(|compare| compare.evaluate(state.version(&compare.key)));
        let ops = if succeeded { txn.success } else { txn.failure };

        // Validate before mutating so a bad lease leaves the store untouched.
        for op in &ops {
            if let TxnOp::Put { lease, .. } = op {
                state.check_lease(*lease)?;
            }
        }

        let revision = state.revision + 1;
        let mut changed = false;
        let mut responses = Vec::with_capacity(ops.len());
        for op in ops {
            match op {
                TxnOp::Put { key, value, lease } => {
                    state.apply_put(&key, &value, lease, revision);
                    changed = true;
                    responses.push(TxnOpResponse::Put { revision });
                }
                TxnOp::Delete { key } => {
                    let deleted = state.apply_delete(&key);
                    changed |= deleted;
                    responses.push(TxnOpResponse::Delete { deleted });
                }
            }
        }
        if changed {
            state.revision = revision;
        }

        Ok(TxnResponse {
            succeeded,
            responses,
        })
    }

    async fn create_lease(&self, ttl: Duration) -> Result<LeaseId> {
        if ttl.is_zero() {
            return Err(Error::Store("lease ttl must be positive".into()));
        }
        let deadline = lease_deadline(ttl)?;
        let mut state = self.lock()?;
        let id = LeaseId(state.next_lease);
        state.next_lease += 1;
        state.leases.insert(
            id,
            LeaseState {
                ttl,
                deadline,
                keys: HashSet::new(),
            },
        );
        tracing::debug!(lease = %id, ?ttl, "Lease granted");
        Ok(id)
    }

    async fn refresh_lease(&self, lease: LeaseId) -> Result<()> {
        let mut state = self.lock()?;
        let entry = state
            .leases
            .get_mut(&lease)
            .ok_or(Error::LeaseNotFound(lease.0))?;
        entry.deadline = lease_deadline(entry.ttl)?;
        Ok(())
    }

    async fn revoke_lease(&self, lease: LeaseId) -> Result<()> {
        let mut state = self.lock()?;
        let entry = state
            .leases
            .remove(&lease)
            .ok_or(Error::LeaseNotFound(lease.0))?;
        state.drop_lease_keys(lease, entry.keys);
        tracing::debug!(lease = %lease, "Lease revoked");
        Ok(())
    }
}

fn lease_deadline(ttl: Duration) -> Result<Instant> {
    Instant::now()
        .checked_add(ttl)
        .ok_or_else(|| Error::Store(format!("lease ttl {:?} is out of range", ttl)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::store::Compare;

    fn put_op(key: &str, value: &str) -> TxnOp {
        TxnOp::Put {
            key: key.into(),
            value: value.into(),
            lease: None,
        }
    }

    #[tokio::test]
    async fn test_put_tracks_versions() {
        let store = LocalStore::new();
        let r1 = store.put("/a", "1", None).await.unwrap();
        let r2 = store.put("/a", "2", None).await.unwrap();

        let record = store.get("/a").await.unwrap().unwrap();
        assert_eq!(record.value, "2");
        assert_eq!(record.version, 2);
        assert_eq!(record.create_revision, r1);
        assert_eq!(record.mod_revision, r2);
        assert!(store.get("/missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_prefix_scan_ordering() {
        let store = LocalStore::new();
        store.put("/p/b", "1", None).await.unwrap();
        store.put("/p/a", "2", None).await.unwrap();
        store.put("/q", "3", None).await.unwrap();

        let by_key = store.get_with_prefix("/p/", PrefixOptions::default()).await.unwrap();
        let keys: Vec<_> = by_key.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["/p/a", "/p/b"]);

        let options = PrefixOptions {
            sort_by_creation: true,
            keys_only: true,
        };
        let by_creation = store.get_with_prefix("/p/", options).await.unwrap();
        let keys: Vec<_> = by_creation.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["/p/b", "/p/a"]);
        assert!(by_creation.iter().all(|r| r.value.is_empty()));
    }

    #[tokio::test]
    async fn test_transaction_branches() {
        let store = LocalStore::new();
        let txn = Transaction {
            compare: vec![Compare::exists("/x")],
            success: vec![],
            failure: vec![put_op("/x", "1"), put_op("/y", "1")],
        };
        let response = store.transaction(txn.clone()).await.unwrap();
        assert!(!response.succeeded);
        assert_eq!(response.responses.len(), 2);
        assert_eq!(store.len(), 2);

        let response = store.transaction(txn).await.unwrap();
        assert!(response.succeeded);
        assert!(response.responses.is_empty());
    }

    #[tokio::test]
    async fn test_transaction_with_unknown_lease_applies_nothing() {
        let store = LocalStore::new();
        let txn = Transaction {
            compare: vec![],
            success: vec![
                put_op("/a", "1"),
                TxnOp::Put {
                    key: "/b".into(),
                    value: "1".into(),
                    lease: Some(LeaseId(42)),
                },
            ],
            failure: vec![],
        };
        assert!(matches!(
            store.transaction(txn).await,
            Err(Error::LeaseNotFound(42))
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_revoke_deletes_attached_keys() {
        let store = LocalStore::new();
        let lease = store.create_lease(Duration::from_secs(60)).await.unwrap();
        store.put("/leased", "1", Some(lease)).await.unwrap();
        store.put("/plain", "1", None).await.unwrap();

        store.revoke_lease(lease).await.unwrap();
        assert!(store.get("/leased").await.unwrap().is_none());
        assert!(store.get("/plain").await.unwrap().is_some());
        assert!(matches!(
            store.refresh_lease(lease).await,
            Err(Error::LeaseNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_lease_expiry_and_refresh() {
        let store = LocalStore::new();
        let lease = store.create_lease(Duration::from_millis(400)).await.unwrap();
        store.put("/k", "v", Some(lease)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        store.refresh_lease(lease).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(store.get("/k").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(store.expire_leases(), 1);
        assert!(store.get("/k").await.unwrap().is_none());
        assert_eq!(store.lease_count(), 0);
    }

    #[tokio::test]
    async fn test_out_of_range_lease_ttl_rejected() {
        let store = LocalStore::new();
        let result = store.create_lease(Duration::from_secs(u64::MAX / 2)).await;
        assert!(matches!(result, Err(Error::Store(_))));
        assert_eq!(store.lease_count(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_calls() {
        let store = LocalStore::new();
        store.set_available(false);
        assert!(matches!(store.get("/k").await, Err(Error::Store(_))));
        assert!(store.create_lease(Duration::from_secs(1)).await.is_err());

        store.set_available(true);
        assert!(store.get("/k").await.unwrap().is_none());
    }
}
