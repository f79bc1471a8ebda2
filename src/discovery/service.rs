//! Service discovery facade

use crate::common::{Error, IdentifierGenerator, Result, Uuid4IdentifierGenerator};
use crate::discovery::keys::{ClusterKeys, SERVICES_SEGMENT};
use crate::discovery::locator::RoundRobinServiceLocator;
use crate::discovery::properties::{
    JsonPropertiesConverter, Properties, PropertiesConverter, ServiceInstance,
};
use crate::registry::{Key, ListOptions, Registry, RegistryExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Attempts at finding an unused instance id before registration gives up.
const MAX_REGISTRATION_ATTEMPTS: usize = 10;

/// Cluster, service and instance management on top of a [`Registry`].
pub struct ServiceDiscovery<R: Registry + ?Sized = dyn Registry> {
    registry: Arc<R>,
    id_generator: Arc<dyn IdentifierGenerator>,
    converter: Arc<dyn PropertiesConverter>,
}

impl<R: Registry + ?Sized> Clone for ServiceDiscovery<R> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            id_generator: self.id_generator.clone(),
            converter: self.converter.clone(),
        }
    }
}

impl<R: Registry + ?Sized> ServiceDiscovery<R> {
    /// Facade with UUID instance ids and JSON properties.
    pub fn new(registry: Arc<R>) -> Self {
        Self {
            registry,
            id_generator: Arc::new(Uuid4IdentifierGenerator),
            converter: Arc::new(JsonPropertiesConverter),
        }
    }

    pub fn with_identifier_generator(mut self, generator: Arc<dyn IdentifierGenerator>) -> Self {
        self.id_generator = generator;
        self
    }

    pub fn with_properties_converter(mut self, converter: Arc<dyn PropertiesConverter>) -> Self {
        self.converter = converter;
        self
    }

    pub fn registry(&self) -> &Arc<R> {
        &self.registry
    }

    /// Clusters that have at least one service entry.
    pub async fn list_clusters(&self) -> Result<Vec<String>> {
        let keys = self
            .registry
            .list_keys(Key::root(), ListOptions::recursive())
            .await?;

        let mut clusters = BTreeSet::new();
        for raw in keys {
            let key = Key::create(&raw)?;
            if let [cluster, services, ..] = key.parts() {
                if services == SERVICES_SEGMENT {
                    clusters.insert(cluster.clone());
                }
            }
        }
        Ok(clusters.into_iter().collect())
    }

    /// Services known in `cluster_id`.
    pub async fn list_services(&self, cluster_id: &str) -> Result<Vec<String>> {
        let keys = ClusterKeys::new(cluster_id)?;
        let services_key = keys.services_key();
        let entries = self
            .registry
            .list_keys(services_key, ListOptions::recursive())
            .await?;

        let mut services = BTreeSet::new();
        for raw in entries {
            let key = Key::create(&raw)?;
            if let Some(name) = key.parts().get(services_key.len()) {
                services.insert(name.clone());
            }
        }
        Ok(services.into_iter().collect())
    }

    /// Live instances of a service with their properties.
    pub async fn list_service_instances(
        &self,
        cluster_id: &str,
        service_name: &str,
    ) -> Result<Vec<ServiceInstance>> {
        let members_key = ClusterKeys::new(cluster_id)?.service_members_key(service_name)?;
        let entries = self
            .registry
            .fetch(&members_key, ListOptions::default())
            .await?;

        entries
            .into_iter()
            .map(|(raw, value)| {
                let key = Key::create(&raw)?;
                Ok(ServiceInstance {
                    cluster_id: cluster_id.to_string(),
                    service_name: service_name.to_string(),
                    instance_id: key.name().unwrap_or_default().to_string(),
                    properties: self.converter.from_string(&value)?,
                })
            })
            .collect()
    }

    /// Register a new instance under a freshly generated id.
    pub async fn register_service(
        &self,
        cluster_id: &str,
        service_name: &str,
        properties: Properties,
    ) -> Result<ServiceInstance> {
        let keys = ClusterKeys::new(cluster_id)?;
        let value = self.converter.to_string(&properties)?;

        for attempt in 1..=MAX_REGISTRATION_ATTEMPTS {
            let instance_id = self.id_generator.generate();
            let key = keys.service_instance_key(service_name, &instance_id)?;
            if self.registry.put_if_not_exist(&key, value.as_str()).await? {
                info!(
                    cluster = cluster_id,
                    service = service_name,
                    instance = %instance_id,
                    "Service instance registered"
                );
                return Ok(ServiceInstance {
                    cluster_id: cluster_id.to_string(),
                    service_name: service_name.to_string(),
                    instance_id,
                    properties,
                });
            }
            warn!(key = %key, attempt, "Instance id already taken, generating another");
        }

        Err(Error::Internal(format!(
            "could not allocate a unique instance id for service '{}' after {} attempts",
            service_name, MAX_REGISTRATION_ATTEMPTS
        )))
    }

    /// Remove an instance; returns whether it existed.
    pub async fn unregister_service(
        &self,
        cluster_id: &str,
        service_name: &str,
        instance_id: &str,
    ) -> Result<bool> {
        let key = ClusterKeys::new(cluster_id)?.service_instance_key(service_name, instance_id)?;
        let existed = self.registry.delete(&key).await?;
        debug!(key = %key, existed, "Service instance unregistered");
        Ok(existed)
    }

    /// Replace the properties of an existing instance.
    pub async fn update_service(
        &self,
        cluster_id: &str,
        service_name: &str,
        instance_id: &str,
        properties: &Properties,
    ) -> Result<()> {
        let key = ClusterKeys::new(cluster_id)?.service_instance_key(service_name, instance_id)?;
        let value = self.converter.to_string(properties)?;
        if !self.registry.replace(&key, value).await? {
            return Err(Error::ServiceUnavailable(format!(
                "Service instance '{}' of '{}' does not exist",
                instance_id, service_name
            )));
        }
        debug!(key = %key, "Service instance updated");
        Ok(())
    }

    /// One instance with its properties.
    pub async fn get_service_instance(
        &self,
        cluster_id: &str,
        service_name: &str,
        instance_id: &str,
    ) -> Result<ServiceInstance> {
        let key = ClusterKeys::new(cluster_id)?.service_instance_key(service_name, instance_id)?;
        let value = match self.registry.get(&key).await {
            Ok(value) => value,
            Err(Error::KeyDoesNotExist(_)) => {
                return Err(Error::ServiceUnavailable(format!(
                    "Service instance '{}' of '{}' does not exist",
                    instance_id, service_name
                )))
            }
            Err(e) => return Err(e),
        };

        Ok(ServiceInstance {
            cluster_id: cluster_id.to_string(),
            service_name: service_name.to_string(),
            instance_id: instance_id.to_string(),
            properties: self.converter.from_string(&value)?,
        })
    }

    /// Round-robin locator over the live instances of a service.
    pub fn create_service_locator(
        &self,
        cluster_id: &str,
        service_name: &str,
    ) -> Result<RoundRobinServiceLocator<R>> {
        let members_key = ClusterKeys::new(cluster_id)?.service_members_key(service_name)?;
        Ok(RoundRobinServiceLocator::new(
            self.registry.clone(),
            service_name,
            members_key,
        ))
    }
}

impl<R: Registry + ?Sized> std::fmt::Debug for ServiceDiscovery<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDiscovery").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryRegistry;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Hands out ids from a fixed list, repeating the last one.
    struct ScriptedIds {
        ids: Vec<&'static str>,
        next: AtomicUsize,
    }

    impl IdentifierGenerator for ScriptedIds {
        fn generate(&self) -> String {
            let i = self.next.fetch_add(1, Ordering::SeqCst);
            self.ids[i.min(self.ids.len() - 1)].to_string()
        }
    }

    fn discovery(ids: Vec<&'static str>) -> ServiceDiscovery<InMemoryRegistry> {
        ServiceDiscovery::new(Arc::new(InMemoryRegistry::new())).with_identifier_generator(
            Arc::new(ScriptedIds {
                ids,
                next: AtomicUsize::new(0),
            }),
        )
    }

    #[tokio::test]
    async fn test_register_retries_on_id_collision() {
        let discovery = discovery(vec!["a", "a", "b"]);
        let first = discovery
            .register_service("c", "svc", Properties::new())
            .await
            .unwrap();
        let second = discovery
            .register_service("c", "svc", Properties::new())
            .await
            .unwrap();
        assert_eq!(first.instance_id, "a");
        assert_eq!(second.instance_id, "b");
    }

    #[tokio::test]
    async fn test_register_gives_up_after_repeated_collisions() {
        let discovery = discovery(vec!["same"]);
        discovery
            .register_service("c", "svc", Properties::new())
            .await
            .unwrap();
        assert!(matches!(
            discovery.register_service("c", "svc", Properties::new()).await,
            Err(Error::Internal(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_stored_properties() {
        let discovery = discovery(vec!["x"]);
        discovery
            .registry()
            .put("/c/services/svc/members/x", "{broken")
            .await
            .unwrap();
        assert!(matches!(
            discovery.get_service_instance("c", "svc", "x").await,
            Err(Error::MalformedProperties(_))
        ));
    }
}
