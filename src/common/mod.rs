//! Common utilities and types shared across scoutlight

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod timer;
pub mod utils;

pub use config::{Config, LeaseConfig, LeaseSettings, StoreConfig, MAX_LEASE_TTL};
pub use error::{Error, Result};
pub use lifecycle::{Lifecycle, LifecycleState};
pub use timer::{PeriodicTimer, DEFAULT_MAX_FAILURE_COUNT};
pub use utils::{parse_duration, IdentifierGenerator, Uuid4IdentifierGenerator};
