//! Manifest types for each managed resource kind.

use std::collections::BTreeMap;

use assembly_model::{Labels, StorageConfig};
use serde::{Deserialize, Serialize};

use super::{Kind, ObjectMeta, Resource, ResourceKind};

/// Annotation on a workload set recording its effective storage configuration.
pub const STORAGE_ANNOTATION: &str = "assembly.io/storage";

/// Cluster IP value marking a headless service.
pub const HEADLESS_CLUSTER_IP: &str = "None";

// =============================================================================
// ConfigMap
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigMap {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl ResourceKind for ConfigMap {
    const KIND: Kind = Kind::ConfigMap;

    fn into_resource(self) -> Resource {
        Resource::ConfigMap(self)
    }

    fn from_resource(resource: Resource) -> Option<Self> {
        match resource {
            Resource::ConfigMap(r) => Some(r),
            _ => None,
        }
    }

    fn retain_immutable(&mut self, _live: &Self) -> Vec<&'static str> {
        Vec::new()
    }
}

// =============================================================================
// Service
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    pub name: String,
    pub port: u16,
}

impl ServicePort {
    pub fn new(name: &str, port: u16) -> Self {
        Self {
            name: name.to_string(),
            port,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// `None` until the platform assigns one; [`HEADLESS_CLUSTER_IP`] for headless services.
    #[serde(default)]
    pub cluster_ip: Option<String>,
    pub selector: Labels,
    pub ports: Vec<ServicePort>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub metadata: ObjectMeta,
    pub spec: ServiceSpec,
}

impl ResourceKind for Service {
    const KIND: Kind = Kind::Service;

    fn into_resource(self) -> Resource {
        Resource::Service(self)
    }

    fn from_resource(resource: Resource) -> Option<Self> {
        match resource {
            Resource::Service(r) => Some(r),
            _ => None,
        }
    }

    fn retain_immutable(&mut self, live: &Self) -> Vec<&'static str> {
        let mut retained = Vec::new();
        // An unset desired IP just means "let the platform choose".
        if self.spec.cluster_ip.is_some() && self.spec.cluster_ip != live.spec.cluster_ip {
            retained.push("cluster_ip");
        }
        self.spec.cluster_ip = live.spec.cluster_ip.clone();
        retained
    }
}

// =============================================================================
// Pod template (shared by workload sets, deployments and pods)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub ports: Vec<ServicePort>,
    #[serde(default)]
    pub volume_mounts: Vec<VolumeMount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VolumeSource {
    EmptyDir,
    HostPath { path: String },
    ConfigMap { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    pub source: VolumeSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodTemplate {
    pub labels: Labels,
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
}

// =============================================================================
// PersistentVolumeClaim
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimSpec {
    #[serde(default)]
    pub storage_class: Option<String>,
    pub size: String,
}

/// A claim template inside a workload set; the platform stamps one claim per
/// member from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimTemplate {
    pub name: String,
    pub spec: ClaimSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentVolumeClaim {
    pub metadata: ObjectMeta,
    pub spec: ClaimSpec,
}

impl ResourceKind for PersistentVolumeClaim {
    const KIND: Kind = Kind::PersistentVolumeClaim;

    fn into_resource(self) -> Resource {
        Resource::PersistentVolumeClaim(self)
    }

    fn from_resource(resource: Resource) -> Option<Self> {
        match resource {
            Resource::PersistentVolumeClaim(r) => Some(r),
            _ => None,
        }
    }

    fn retain_immutable(&mut self, live: &Self) -> Vec<&'static str> {
        let mut retained = Vec::new();
        if self.spec.storage_class != live.spec.storage_class {
            retained.push("storage_class");
        }
        if self.spec.size != live.spec.size {
            retained.push("size");
        }
        self.spec = live.spec.clone();
        retained
    }
}

// =============================================================================
// StatefulSet
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatefulSetSpec {
    pub replicas: u32,
    pub service_name: String,
    pub selector: Labels,
    pub template: PodTemplate,
    #[serde(default)]
    pub volume_claim_templates: Vec<ClaimTemplate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatefulSet {
    pub metadata: ObjectMeta,
    pub spec: StatefulSetSpec,
}

impl StatefulSet {
    /// The storage configuration recorded on this set, if any.
    pub fn recorded_storage(&self) -> Option<StorageConfig> {
        self.metadata
            .annotations
            .get(STORAGE_ANNOTATION)
            .and_then(|raw| serde_json::from_str(raw).ok())
    }

    /// The storage class of the first claim template, if claim-backed.
    pub fn storage_class(&self) -> Option<&str> {
        self.spec
            .volume_claim_templates
            .first()
            .and_then(|t| t.spec.storage_class.as_deref())
    }

    fn data_volume(&self) -> Option<&Volume> {
        self.spec
            .template
            .volumes
            .iter()
            .find(|v| v.name == assembly_naming::CLAIM_TEMPLATE_NAME)
    }
}

impl ResourceKind for StatefulSet {
    const KIND: Kind = Kind::StatefulSet;

    fn into_resource(self) -> Resource {
        Resource::StatefulSet(self)
    }

    fn from_resource(resource: Resource) -> Option<Self> {
        match resource {
            Resource::StatefulSet(r) => Some(r),
            _ => None,
        }
    }

    /// Selector, service name and everything that defines the storage type,
    /// size and class stay as first created. Delete-claim in the storage
    /// annotation is the one storage setting that follows the desired spec.
    fn retain_immutable(&mut self, live: &Self) -> Vec<&'static str> {
        let mut retained = Vec::new();

        if self.spec.selector != live.spec.selector {
            retained.push("selector");
            self.spec.selector = live.spec.selector.clone();
        }
        if self.spec.service_name != live.spec.service_name {
            retained.push("service_name");
            self.spec.service_name = live.spec.service_name.clone();
        }
        if self.spec.volume_claim_templates != live.spec.volume_claim_templates {
            retained.push("volume_claim_templates");
            self.spec.volume_claim_templates = live.spec.volume_claim_templates.clone();
        }

        let live_volume = live.data_volume().cloned();
        if self.data_volume() != live_volume.as_ref() {
            retained.push("data_volume");
            self.spec
                .template
                .volumes
                .retain(|v| v.name != assembly_naming::CLAIM_TEMPLATE_NAME);
            if let Some(volume) = live_volume {
                self.spec.template.volumes.push(volume);
            }
        }

        if let (Some(live_storage), Some(desired_storage)) =
            (live.recorded_storage(), self.recorded_storage())
        {
            if live_storage.immutable_differs(&desired_storage) {
                retained.push("storage");
            }
            self.metadata.annotations.insert(
                STORAGE_ANNOTATION.to_string(),
                live_storage.with_delete_claim_of(&desired_storage).to_json(),
            );
        }

        retained
    }
}

// =============================================================================
// Deployment
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    pub replicas: u32,
    pub selector: Labels,
    pub template: PodTemplate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub metadata: ObjectMeta,
    pub spec: DeploymentSpec,
}

impl ResourceKind for Deployment {
    const KIND: Kind = Kind::Deployment;

    fn into_resource(self) -> Resource {
        Resource::Deployment(self)
    }

    fn from_resource(resource: Resource) -> Option<Self> {
        match resource {
            Resource::Deployment(r) => Some(r),
            _ => None,
        }
    }

    fn retain_immutable(&mut self, live: &Self) -> Vec<&'static str> {
        if self.spec.selector == live.spec.selector {
            return Vec::new();
        }
        self.spec.selector = live.spec.selector.clone();
        vec!["selector"]
    }
}

// =============================================================================
// Pod (created by the platform for workload-set members, never by the reconciler)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    pub metadata: ObjectMeta,
    pub spec: PodTemplate,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assembly_naming::Role;

    fn set_with(storage: &StorageConfig, class: Option<&str>) -> StatefulSet {
        let labels = Labels::for_derived("c", Role::Kafka);
        let mut metadata = ObjectMeta::new("ns", "c-kafka", labels.clone());
        metadata
            .annotations
            .insert(STORAGE_ANNOTATION.to_string(), storage.to_json());
        StatefulSet {
            metadata,
            spec: StatefulSetSpec {
                replicas: 3,
                service_name: "c-kafka-headless".into(),
                selector: labels.clone(),
                template: PodTemplate {
                    labels,
                    containers: Vec::new(),
                    volumes: Vec::new(),
                },
                volume_claim_templates: vec![ClaimTemplate {
                    name: "data".into(),
                    spec: ClaimSpec {
                        storage_class: class.map(str::to_string),
                        size: "123".into(),
                    },
                }],
            },
        }
    }

    #[test]
    fn test_statefulset_keeps_storage_class() {
        let live_storage = StorageConfig::persistent_claim("123", Some("foo".into()), false);
        let desired_storage = StorageConfig::persistent_claim("123", Some("foo2".into()), true);
        let live = set_with(&live_storage, Some("foo"));
        let mut desired = set_with(&desired_storage, Some("foo2"));
        desired.spec.replicas = 4;

        let retained = desired.retain_immutable(&live);

        assert!(retained.contains(&"volume_claim_templates"));
        assert!(retained.contains(&"storage"));
        assert_eq!(desired.storage_class(), Some("foo"));
        assert_eq!(desired.spec.replicas, 4);
        let recorded = desired.recorded_storage().unwrap();
        assert_eq!(recorded.storage_class.as_deref(), Some("foo"));
        assert!(recorded.delete_claim);
    }

    #[test]
    fn test_statefulset_identical_retains_nothing() {
        let storage = StorageConfig::persistent_claim("123", Some("foo".into()), false);
        let live = set_with(&storage, Some("foo"));
        let mut desired = live.clone();
        assert!(desired.retain_immutable(&live).is_empty());
        assert_eq!(desired, live);
    }

    #[test]
    fn test_service_keeps_assigned_cluster_ip() {
        let labels = Labels::for_derived("c", Role::Kafka);
        let mut live = Service {
            metadata: ObjectMeta::new("ns", "c-kafka", labels.clone()),
            spec: ServiceSpec {
                cluster_ip: Some("10.96.0.7".into()),
                selector: labels,
                ports: vec![ServicePort::new("clients", 9092)],
            },
        };
        let mut desired = live.clone();
        desired.spec.cluster_ip = None;

        assert!(desired.retain_immutable(&live).is_empty());
        assert_eq!(desired, live);

        live.spec.ports.clear();
        assert_ne!(desired.mutable_view(), live.mutable_view());
    }

    #[test]
    fn test_resource_json_is_kind_tagged() {
        let cm = ConfigMap {
            metadata: ObjectMeta::new("ns", "c", Labels::spec_sources()),
            data: BTreeMap::new(),
        };
        let json = serde_json::to_value(cm.into_resource()).unwrap();
        assert_eq!(json["kind"], "ConfigMap");
        let back: Resource = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind(), Kind::ConfigMap);
    }
}
