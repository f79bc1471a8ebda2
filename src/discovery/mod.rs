//! Service discovery on top of the registry
//!
//! Instances register under `/<cluster>/services/<service>/members/<id>`;
//! consumers list them or pick one through a [`ServiceLocator`].

pub mod keys;
pub mod locator;
pub mod properties;
pub mod service;

pub use keys::ClusterKeys;
pub use locator::{RoundRobinServiceLocator, ServiceLocator};
pub use properties::{JsonPropertiesConverter, Properties, PropertiesConverter, ServiceInstance};
pub use service::ServiceDiscovery;
