//! Canonical discovery keys
//!
//! ```text
//! /<cluster>                                         cluster
//! /<cluster>/services                                services of the cluster
//! /<cluster>/services/<service>                      one service
//! /<cluster>/services/<service>/members              live instances
//! /<cluster>/services/<service>/members/<instance>   one instance, value = properties
//! ```

use crate::common::{Error, Result};
use crate::registry::key::{Key, SEPARATOR};

pub const SERVICES_SEGMENT: &str = "services";
pub const MEMBERS_SEGMENT: &str = "members";

/// Validate a single path component (cluster id, service name, instance id).
pub fn validate_segment(kind: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidKey(format!("{} must be a non-empty string", kind)));
    }
    if value.contains(SEPARATOR) {
        return Err(Error::InvalidKey(format!(
            "{} must not contain '{}': {:?}",
            kind, SEPARATOR, value
        )));
    }
    Ok(())
}

/// Keys of one cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterKeys {
    cluster_key: Key,
    services_key: Key,
}

impl ClusterKeys {
    pub fn new(cluster_id: &str) -> Result<Self> {
        validate_segment("cluster id", cluster_id)?;
        let cluster_key = Key::create(cluster_id)?;
        let services_key = cluster_key.relative(SERVICES_SEGMENT);
        Ok(Self {
            cluster_key,
            services_key,
        })
    }

    /// `/<cluster>`
    pub fn cluster_key(&self) -> &Key {
        &self.cluster_key
    }

    /// `/<cluster>/services`
    pub fn services_key(&self) -> &Key {
        &self.services_key
    }

    /// `/<cluster>/services/<service>`
    pub fn service_key(&self, service_name: &str) -> Result<Key> {
        validate_segment("service name", service_name)?;
        Ok(self.services_key.relative(service_name))
    }

    /// `/<cluster>/services/<service>/members`
    pub fn service_members_key(&self, service_name: &str) -> Result<Key> {
        Ok(self.service_key(service_name)?.relative(MEMBERS_SEGMENT))
    }

    /// `/<cluster>/services/<service>/members/<instance>`
    pub fn service_instance_key(&self, service_name: &str, instance_id: &str) -> Result<Key> {
        validate_segment("instance id", instance_id)?;
        Ok(self.service_members_key(service_name)?.relative(instance_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_keys_layout() {
        let keys = ClusterKeys::new("my_cluster").unwrap();
        assert_eq!(keys.cluster_key().as_str(), "/my_cluster");
        assert_eq!(keys.services_key().as_str(), "/my_cluster/services");
        assert_eq!(
            keys.service_key("printer").unwrap().as_str(),
            "/my_cluster/services/printer"
        );
        assert_eq!(
            keys.service_members_key("printer").unwrap().as_str(),
            "/my_cluster/services/printer/members"
        );
        assert_eq!(
            keys.service_instance_key("printer", "abc").unwrap().as_str(),
            "/my_cluster/services/printer/members/abc"
        );
    }

    #[test]
    fn test_invalid_segments() {
        assert!(ClusterKeys::new("").is_err());
        assert!(ClusterKeys::new("a/b").is_err());

        let keys = ClusterKeys::new("c").unwrap();
        assert!(matches!(keys.service_key(" "), Err(Error::InvalidKey(_))));
        assert!(keys.service_instance_key("svc", "x/y").is_err());
    }
}
