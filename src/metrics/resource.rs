//! Deduplicated metric resource descriptors.

use std::collections::BTreeMap;

/// Resource attribute keys with this prefix are excluded from resource
/// identity (case-insensitive), as are non-string attribute values.
pub const RESERVED_KEY_PREFIX: &str = "telemetry.sdk.";

/// One producing process/service, identified by the full attribute set.
///
/// The store keeps exactly one instance per distinct attribute set; metric
/// streams reference their resource by pointer identity.
#[derive(Debug)]
pub struct MetricResource {
    attributes: BTreeMap<String, String>,
    key: String,
}

impl MetricResource {
    pub(crate) fn new(attributes: BTreeMap<String, String>) -> Self {
        let key = attributes
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect::<Vec<_>>()
            .join("; ");

        Self { attributes, key }
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Display key used by the query API to address a resource.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn matches(&self, attributes: &BTreeMap<String, String>) -> bool {
        self.attributes == *attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_joins_sorted_attributes() {
        let resource = MetricResource::new(BTreeMap::from([
            ("service.name".to_string(), "api".to_string()),
            ("host.name".to_string(), "box1".to_string()),
        ]));

        assert_eq!(resource.key(), "host.name: box1; service.name: api");
    }

    #[test]
    fn identity_is_full_attribute_set_equality() {
        let attrs = BTreeMap::from([("a".to_string(), "1".to_string())]);
        let resource = MetricResource::new(attrs.clone());

        assert!(resource.matches(&attrs));
        assert!(!resource.matches(&BTreeMap::from([("a".to_string(), "2".to_string())])));
    }
}
