//! Coordination store interface
//!
//! The lease-backed registry talks to an external, lease-capable key-value
//! store through this trait. The request/response shapes follow etcd's KV,
//! transaction and lease APIs.

use crate::common::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lease identifier assigned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeaseId(pub i64);

impl std::fmt::Display for LeaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// A key-value record as held by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreRecord {
    pub key: String,
    pub value: String,
    /// Revision at which the key was created.
    pub create_revision: i64,
    /// Revision of the last modification.
    pub mod_revision: i64,
    /// Number of writes since creation (1 for a new key, 0 when absent).
    pub version: i64,
    pub lease: Option<LeaseId>,
}

/// Options for prefix reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrefixOptions {
    /// Sort by creation revision instead of key order.
    pub sort_by_creation: bool,
    /// Return keys with empty values.
    pub keys_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Equal,
    Greater,
    Less,
    NotEqual,
}

/// Transaction guard on a key's version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compare {
    pub key: String,
    pub op: CompareOp,
    pub version: i64,
}

impl Compare {
    /// Holds iff the key currently exists.
    pub fn exists(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            op: CompareOp::Greater,
            version: 0,
        }
    }

    /// Evaluate against the key's current version (0 when absent).
    pub fn evaluate(&self, current: i64) -> bool {
        match self.op {
            CompareOp::Equal => current == self.version,
            CompareOp::Greater => current > self.version,
            CompareOp::Less => current < self.version,
            CompareOp::NotEqual => current != self.version,
        }
    }
}

/// Operation inside a transaction branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxnOp {
    Put {
        key: String,
        value: String,
        lease: Option<LeaseId>,
    },
    Delete {
        key: String,
    },
}

/// Outcome of a single transaction operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxnOpResponse {
    Put { revision: i64 },
    Delete { deleted: bool },
}

/// All `compare` guards are evaluated atomically; `success` runs if every
/// guard holds, `failure` otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub compare: Vec<Compare>,
    pub success: Vec<TxnOp>,
    pub failure: Vec<TxnOp>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnResponse {
    /// Whether every compare guard held.
    pub succeeded: bool,
    /// Responses of the branch that ran.
    pub responses: Vec<TxnOpResponse>,
}

#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<StoreRecord>>;

    /// Records whose key starts with `prefix`.
    async fn get_with_prefix(&self, prefix: &str, options: PrefixOptions) -> Result<Vec<StoreRecord>>;

    /// Upsert, optionally attaching the key to a lease. Returns the new revision.
    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> Result<i64>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn transaction(&self, txn: Transaction) -> Result<TxnResponse>;

    async fn create_lease(&self, ttl: Duration) -> Result<LeaseId>;

    /// Reset the lease deadline to a full TTL from now.
    async fn refresh_lease(&self, lease: LeaseId) -> Result<()>;

    /// Revoke the lease and delete every key attached to it.
    async fn revoke_lease(&self, lease: LeaseId) -> Result<()>;
}
