//! Label sets used to mark spec sources and derived resources.

use std::collections::BTreeMap;

use assembly_naming::Role;
use serde::{Deserialize, Serialize};

/// Label keys and well-known values.
pub mod label_keys {
    /// What kind of object carries the label (`cluster`, or a role name).
    pub const KIND: &str = "assembly.io/kind";
    /// The assembly type.
    pub const TYPE: &str = "assembly.io/type";
    /// The assembly a derived resource belongs to.
    pub const CLUSTER: &str = "assembly.io/cluster";

    /// `kind` value of a spec source.
    pub const KIND_CLUSTER: &str = "cluster";
    /// The only assembly type this operator manages.
    pub const TYPE_KAFKA: &str = "kafka";
}

/// An ordered set of labels that doubles as an equality selector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Labels(BTreeMap<String, String>);

impl Labels {
    /// An empty label set; as a selector it matches everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Labels with the given `kind`.
    #[must_use]
    pub fn for_kind(kind: &str) -> Self {
        Self::new().with(label_keys::KIND, kind)
    }

    /// The selector for spec sources of Kafka assemblies.
    #[must_use]
    pub fn spec_sources() -> Self {
        Self::for_kind(label_keys::KIND_CLUSTER).with_kafka_type()
    }

    /// Labels for a resource derived from `assembly` for `role`.
    #[must_use]
    pub fn for_derived(assembly: &str, role: Role) -> Self {
        Self::for_kind(role.as_str())
            .with_kafka_type()
            .with_cluster(assembly)
    }

    /// The selector for every resource derived from any assembly.
    #[must_use]
    pub fn derived() -> Self {
        Self::new().with_kafka_type()
    }

    /// Adds the Kafka assembly type.
    #[must_use]
    pub fn with_kafka_type(self) -> Self {
        self.with(label_keys::TYPE, label_keys::TYPE_KAFKA)
    }

    /// Adds the owning assembly name.
    #[must_use]
    pub fn with_cluster(self, assembly: &str) -> Self {
        self.with(label_keys::CLUSTER, assembly)
    }

    /// Adds an arbitrary label.
    #[must_use]
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }

    /// Returns the value of `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Returns true if every label in `self` is present with the same value in `other`.
    #[must_use]
    pub fn selects(&self, other: &Labels) -> bool {
        self.0
            .iter()
            .all(|(k, v)| other.0.get(k).is_some_and(|ov| ov == v))
    }

    /// Returns true if there are no labels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the labels in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl std::fmt::Display for Labels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pairs: Vec<String> = self.iter().map(|(k, v)| format!("{k}={v}")).collect();
        f.write_str(&pairs.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_selector_matches_everything() {
        let labels = Labels::for_derived("c", Role::Kafka);
        assert!(Labels::new().selects(&labels));
    }

    #[test]
    fn test_spec_selector_does_not_match_derived() {
        let derived = Labels::for_derived("c", Role::Kafka);
        assert!(!Labels::spec_sources().selects(&derived));
        assert!(Labels::derived().selects(&derived));
    }

    #[test]
    fn test_display_is_sorted() {
        let labels = Labels::for_derived("c", Role::Zookeeper);
        assert_eq!(
            labels.to_string(),
            "assembly.io/cluster=c,assembly.io/kind=zookeeper,assembly.io/type=kafka"
        );
    }
}
