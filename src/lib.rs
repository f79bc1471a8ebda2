//! # scoutlight
//!
//! Service registration and discovery for clustered applications:
//! - Hierarchical keys (`/cluster/services/name/members/id`)
//! - Pluggable registry backends (in-memory, lease-backed coordination store)
//! - Lease refresh with bounded-failure self-termination
//! - Round-robin service location over live instances
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            ServiceDiscovery               │
//! │  register / list / update / locate        │
//! └───────────┬──────────────────────────────┘
//!             │ Registry + RegistryExt
//!   ┌─────────┴───────────┬──────────────────┐
//!   │                     │                  │
//! ┌─▼────────────────┐  ┌─▼───────────────────────┐
//! │ InMemoryRegistry │  │ LeaseBackedRegistry      │
//! │  (ordered map)   │  │  + PeriodicTimer refresh │
//! └──────────────────┘  └─┬────────────────────────┘
//!                         │ CoordinationStore
//!                       ┌─▼──────────────────────┐
//!                       │ etcd-like store         │
//!                       │ (LocalStore in-process) │
//!                       └────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use scoutlight::discovery::{Properties, ServiceDiscovery, ServiceLocator};
//! use scoutlight::registry::{InMemoryRegistry, Registry};
//! use std::sync::Arc;
//!
//! # async fn demo() -> scoutlight::Result<()> {
//! let registry: Arc<dyn Registry> = Arc::new(InMemoryRegistry::new());
//! let discovery = ServiceDiscovery::new(registry);
//!
//! let instance = discovery
//!     .register_service("my_cluster", "printer", Properties::new())
//!     .await?;
//! let locator = discovery.create_service_locator("my_cluster", "printer")?;
//! assert_eq!(locator.find_service().await?, instance.instance_id);
//! # Ok(())
//! # }
//! ```

pub mod common;
pub mod discovery;
pub mod registry;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use discovery::{ServiceDiscovery, ServiceInstance, ServiceLocator};
pub use registry::{InMemoryRegistry, Key, LeaseBackedRegistry, Registry, RegistryExt};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
