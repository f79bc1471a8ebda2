//! Service registry
//!
//! - `key`: hierarchical key model
//! - `contract`: backend primitives and the public operations derived from them
//! - `memory`: in-memory backend
//! - `store`: coordination store interface (etcd-like KV, transactions, leases)
//! - `local_store`: in-process coordination store
//! - `lease`: registry whose entries live on a refreshed lease

pub mod contract;
pub mod key;
pub mod lease;
pub mod local_store;
pub mod memory;
pub mod store;

pub use contract::{Condition, ListOptions, Registry, RegistryExt, Scan};
pub use key::{normalize_key, IntoKey, Key};
pub use lease::LeaseBackedRegistry;
pub use local_store::LocalStore;
pub use memory::InMemoryRegistry;
pub use store::{
    Compare, CompareOp, CoordinationStore, LeaseId, PrefixOptions, StoreRecord, Transaction,
    TxnOp, TxnOpResponse, TxnResponse,
};
