//! Storage configuration for clustered sub-components.

use std::fmt;

use assembly_naming::Role;
use serde::{Deserialize, Serialize};

use crate::ModelError;

/// How a clustered sub-component stores its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageType {
    /// Scratch storage that lives and dies with the member.
    Ephemeral,
    /// One persistent volume claim per replica, provisioned by the platform.
    PersistentClaim,
    /// Pre-provisioned node-local storage; never claim-managed.
    Local,
}

impl StorageType {
    /// Returns the wire name of the storage type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ephemeral => "ephemeral",
            Self::PersistentClaim => "persistent-claim",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage configuration for one clustered sub-component.
///
/// `type`, `size` and `class` are fixed once the workload set exists;
/// `delete-claim` may change at any time and is always read from the
/// current spec when claims are about to be removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub storage_type: StorageType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,

    #[serde(default, rename = "class", skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,

    #[serde(default, rename = "delete-claim")]
    pub delete_claim: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::ephemeral()
    }
}

impl StorageConfig {
    /// Ephemeral storage.
    #[must_use]
    pub fn ephemeral() -> Self {
        Self {
            storage_type: StorageType::Ephemeral,
            size: None,
            storage_class: None,
            delete_claim: false,
        }
    }

    /// Persistent-claim storage.
    #[must_use]
    pub fn persistent_claim(
        size: impl Into<String>,
        storage_class: Option<String>,
        delete_claim: bool,
    ) -> Self {
        Self {
            storage_type: StorageType::PersistentClaim,
            size: Some(size.into()),
            storage_class,
            delete_claim,
        }
    }

    /// Parses and normalizes a storage JSON object for `role`.
    ///
    /// Class and delete-claim only mean something for persistent claims and
    /// are dropped for the other types.
    pub fn from_json(role: Role, json: &str) -> Result<Self, ModelError> {
        let invalid = |reason: String| ModelError::InvalidStorage { role, reason };

        let mut config: StorageConfig =
            serde_json::from_str(json).map_err(|e| invalid(e.to_string()))?;

        match config.storage_type {
            StorageType::PersistentClaim => {
                if config.size.as_deref().map_or(true, str::is_empty) {
                    return Err(invalid("persistent-claim storage requires a size".into()));
                }
            }
            StorageType::Ephemeral | StorageType::Local => {
                config.storage_class = None;
                config.delete_claim = false;
            }
        }

        Ok(config)
    }

    /// Returns true if this engine owns per-replica claims for this storage.
    #[must_use]
    pub fn is_claim_managed(&self) -> bool {
        self.storage_type == StorageType::PersistentClaim
    }

    /// Returns true if claims should be deleted when their replica goes away.
    #[must_use]
    pub fn deletes_claims(&self) -> bool {
        self.is_claim_managed() && self.delete_claim
    }

    /// Returns true if the immutable part (type, size, class) differs from `other`.
    #[must_use]
    pub fn immutable_differs(&self, other: &StorageConfig) -> bool {
        self.storage_type != other.storage_type
            || self.size != other.size
            || self.storage_class != other.storage_class
    }

    /// Combines the immutable part of `self` with the mutable delete-claim of `requested`.
    #[must_use]
    pub fn with_delete_claim_of(&self, requested: &StorageConfig) -> StorageConfig {
        StorageConfig {
            delete_claim: self.is_claim_managed() && requested.delete_claim,
            ..self.clone()
        }
    }

    /// Serializes to the JSON form used in spec sources and annotations.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{\"type\":\"ephemeral\"}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_persistent_claim() {
        let config = StorageConfig::from_json(
            Role::Kafka,
            r#"{"type": "persistent-claim", "size": "123", "class": "foo", "delete-claim": true}"#,
        )
        .unwrap();

        assert_eq!(config.storage_type, StorageType::PersistentClaim);
        assert_eq!(config.size.as_deref(), Some("123"));
        assert_eq!(config.storage_class.as_deref(), Some("foo"));
        assert!(config.deletes_claims());
    }

    #[test]
    fn test_delete_claim_defaults_to_false() {
        let config = StorageConfig::from_json(
            Role::Kafka,
            r#"{"type": "persistent-claim", "size": "1Gi"}"#,
        )
        .unwrap();
        assert!(!config.delete_claim);
        assert!(config.is_claim_managed());
    }

    #[test]
    fn test_local_drops_claim_settings() {
        let config = StorageConfig::from_json(
            Role::Zookeeper,
            r#"{"type": "local", "size": "123", "class": "foo", "delete-claim": true}"#,
        )
        .unwrap();

        assert_eq!(config.storage_type, StorageType::Local);
        assert_eq!(config.storage_class, None);
        assert!(!config.is_claim_managed());
        assert!(!config.deletes_claims());
    }

    #[test]
    fn test_persistent_claim_requires_size() {
        let err = StorageConfig::from_json(Role::Kafka, r#"{"type": "persistent-claim"}"#)
            .unwrap_err();
        assert!(matches!(err, ModelError::InvalidStorage { role: Role::Kafka, .. }));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let err = StorageConfig::from_json(Role::Kafka, r#"{"type": "tape"}"#).unwrap_err();
        assert!(matches!(err, ModelError::InvalidStorage { .. }));
    }

    #[test]
    fn test_non_boolean_delete_claim_rejected() {
        let err = StorageConfig::from_json(
            Role::Kafka,
            r#"{"type": "persistent-claim", "size": "1", "delete-claim": "yes"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::InvalidStorage { .. }));
    }

    #[test]
    fn test_with_delete_claim_of_keeps_class() {
        let live = StorageConfig::persistent_claim("123", Some("foo".into()), false);
        let requested = StorageConfig::persistent_claim("123", Some("foo2".into()), true);

        assert!(live.immutable_differs(&requested));
        let effective = live.with_delete_claim_of(&requested);
        assert_eq!(effective.storage_class.as_deref(), Some("foo"));
        assert!(effective.delete_claim);
    }

    #[test]
    fn test_json_roundtrip_uses_wire_names() {
        let config = StorageConfig::persistent_claim("5Gi", Some("fast".into()), true);
        let json = config.to_json();
        assert!(json.contains("\"delete-claim\":true"));
        assert!(json.contains("\"type\":\"persistent-claim\""));
        assert_eq!(StorageConfig::from_json(Role::Kafka, &json).unwrap(), config);
    }
}
