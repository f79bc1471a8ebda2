//! Service instance properties and their stored representation

use crate::common::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Properties advertised by a service instance.
pub type Properties = BTreeMap<String, String>;

/// A registered service instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub cluster_id: String,
    pub service_name: String,
    pub instance_id: String,
    pub properties: Properties,
}

/// Converts properties to and from the string value kept in the registry.
pub trait PropertiesConverter: Send + Sync {
    fn to_string(&self, properties: &Properties) -> Result<String>;

    /// Fails with [`crate::Error::MalformedProperties`] on unparseable input.
    fn from_string(&self, raw: &str) -> Result<Properties>;
}

/// Stores properties as a JSON object.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonPropertiesConverter;

impl PropertiesConverter for JsonPropertiesConverter {
    fn to_string(&self, properties: &Properties) -> Result<String> {
        Ok(serde_json::to_string(properties)?)
    }

    fn from_string(&self, raw: &str) -> Result<Properties> {
        if raw.trim().is_empty() {
            return Ok(Properties::new());
        }
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Error;

    #[test]
    fn test_json_converter() {
        let converter = JsonPropertiesConverter;
        let mut properties = Properties::new();
        properties.insert("host".into(), "10.0.0.1".into());
        properties.insert("port".into(), "8080".into());

        let raw = converter.to_string(&properties).unwrap();
        assert_eq!(raw, r#"{"host":"10.0.0.1","port":"8080"}"#);
        assert_eq!(converter.from_string(&raw).unwrap(), properties);
        assert!(converter.from_string("").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_properties() {
        let converter = JsonPropertiesConverter;
        assert!(matches!(
            converter.from_string("{not json"),
            Err(Error::MalformedProperties(_))
        ));
        assert!(converter.from_string("[1, 2]").is_err());
    }
}
