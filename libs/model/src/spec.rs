//! The assembly specification and its parser.

use std::collections::BTreeMap;

use assembly_naming::{AssemblyId, Role};
use serde::{Deserialize, Serialize};

use crate::{ModelError, StorageConfig};

/// Spec-source keys.
pub mod keys {
    pub const KAFKA_REPLICAS: &str = "kafka-nodes";
    pub const KAFKA_STORAGE: &str = "kafka-storage";
    pub const KAFKA_METRICS_CONFIG: &str = "kafka-metrics-config";
    pub const KAFKA_IMAGE: &str = "kafka-image";

    pub const ZOOKEEPER_REPLICAS: &str = "zookeeper-nodes";
    pub const ZOOKEEPER_STORAGE: &str = "zookeeper-storage";
    pub const ZOOKEEPER_METRICS_CONFIG: &str = "zookeeper-metrics-config";
    pub const ZOOKEEPER_IMAGE: &str = "zookeeper-image";

    pub const TOPIC_CONTROLLER_CONFIG: &str = "topic-controller-config";
}

/// Replica count used when the spec source does not set one.
pub const DEFAULT_REPLICAS: u32 = 3;

/// Default Kafka image.
pub const DEFAULT_KAFKA_IMAGE: &str = "assembly/kafka:latest";

/// Default ZooKeeper image.
pub const DEFAULT_ZOOKEEPER_IMAGE: &str = "assembly/zookeeper:latest";

/// Default topic controller image.
pub const DEFAULT_TOPIC_CONTROLLER_IMAGE: &str = "assembly/topic-controller:latest";

/// Per-role key names.
struct RoleKeys {
    replicas: &'static str,
    storage: &'static str,
    metrics: &'static str,
    image: &'static str,
    default_image: &'static str,
}

impl RoleKeys {
    fn for_role(role: Role) -> Self {
        match role {
            Role::Kafka => Self {
                replicas: keys::KAFKA_REPLICAS,
                storage: keys::KAFKA_STORAGE,
                metrics: keys::KAFKA_METRICS_CONFIG,
                image: keys::KAFKA_IMAGE,
                default_image: DEFAULT_KAFKA_IMAGE,
            },
            Role::Zookeeper | Role::TopicController => Self {
                replicas: keys::ZOOKEEPER_REPLICAS,
                storage: keys::ZOOKEEPER_STORAGE,
                metrics: keys::ZOOKEEPER_METRICS_CONFIG,
                image: keys::ZOOKEEPER_IMAGE,
                default_image: DEFAULT_ZOOKEEPER_IMAGE,
            },
        }
    }
}

/// Desired state of one clustered sub-component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub replicas: u32,
    pub storage: StorageConfig,
    /// Opaque metrics configuration, passed through to the metrics config object.
    pub metrics_config: serde_json::Value,
    pub image: String,
}

/// A parsed assembly specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblySpec {
    pub id: AssemblyId,
    pub zookeeper: ClusterSpec,
    pub kafka: ClusterSpec,
    /// Opaque topic controller configuration; `None` means no management deployment.
    pub topic_controller_config: Option<serde_json::Value>,
}

impl AssemblySpec {
    /// Parses a spec source's data.
    ///
    /// Missing keys fall back to defaults; present but malformed keys fail the
    /// whole parse.
    pub fn from_data(id: AssemblyId, data: &BTreeMap<String, String>) -> Result<Self, ModelError> {
        let zookeeper = parse_cluster(Role::Zookeeper, data)?;
        let kafka = parse_cluster(Role::Kafka, data)?;
        let topic_controller_config = data
            .get(keys::TOPIC_CONTROLLER_CONFIG)
            .map(|raw| parse_json(keys::TOPIC_CONTROLLER_CONFIG, raw))
            .transpose()?;

        Ok(Self {
            id,
            zookeeper,
            kafka,
            topic_controller_config,
        })
    }

    /// Renders the spec back into spec-source data.
    #[must_use]
    pub fn to_data(&self) -> BTreeMap<String, String> {
        let mut data = BTreeMap::new();
        for role in Role::CLUSTERED {
            let k = RoleKeys::for_role(role);
            let cluster = self.cluster(role);
            data.insert(k.replicas.to_string(), cluster.replicas.to_string());
            data.insert(k.storage.to_string(), cluster.storage.to_json());
            data.insert(k.metrics.to_string(), cluster.metrics_config.to_string());
            data.insert(k.image.to_string(), cluster.image.clone());
        }
        if let Some(config) = &self.topic_controller_config {
            data.insert(keys::TOPIC_CONTROLLER_CONFIG.to_string(), config.to_string());
        }
        data
    }

    /// Returns the spec of a clustered role.
    ///
    /// `Role::TopicController` is not clustered and maps to the ZooKeeper spec
    /// only so this stays total; callers iterate [`Role::CLUSTERED`].
    #[must_use]
    pub fn cluster(&self, role: Role) -> &ClusterSpec {
        match role {
            Role::Kafka => &self.kafka,
            Role::Zookeeper | Role::TopicController => &self.zookeeper,
        }
    }
}

fn parse_cluster(role: Role, data: &BTreeMap<String, String>) -> Result<ClusterSpec, ModelError> {
    let k = RoleKeys::for_role(role);

    let replicas = match data.get(k.replicas) {
        Some(raw) => parse_replicas(role, raw)?,
        None => DEFAULT_REPLICAS,
    };

    let storage = match data.get(k.storage) {
        Some(raw) => StorageConfig::from_json(role, raw)?,
        None => StorageConfig::default(),
    };

    let metrics_config = match data.get(k.metrics) {
        Some(raw) => parse_json(k.metrics, raw)?,
        None => serde_json::json!({}),
    };

    let image = data
        .get(k.image)
        .cloned()
        .unwrap_or_else(|| k.default_image.to_string());

    Ok(ClusterSpec {
        replicas,
        storage,
        metrics_config,
        image,
    })
}

fn parse_replicas(role: Role, raw: &str) -> Result<u32, ModelError> {
    let invalid = |reason: String| ModelError::InvalidReplicas {
        role,
        value: raw.to_string(),
        reason,
    };

    let replicas: u32 = raw.trim().parse().map_err(|e| invalid(format!("{e}")))?;
    if replicas == 0 {
        return Err(invalid("must be at least 1".to_string()));
    }
    Ok(replicas)
}

fn parse_json(key: &'static str, raw: &str) -> Result<serde_json::Value, ModelError> {
    serde_json::from_str(raw).map_err(|e| ModelError::InvalidJson {
        key,
        reason: e.to_string(),
    })
}
