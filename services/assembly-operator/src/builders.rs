//! Desired-manifest builders.
//!
//! Everything here is a pure function of the parsed spec and the effective
//! storage of each clustered role. The same inputs always produce the same
//! manifests, which is what makes a repeated reconcile write nothing.

use std::collections::BTreeMap;

use assembly_model::{
    AssemblySpec, ClusterSpec, Labels, StorageConfig, DEFAULT_TOPIC_CONTROLLER_IMAGE,
};
use assembly_naming::{
    cluster_name, controller_name, headless_name, metrics_config_name, AssemblyId, Role,
    CLAIM_TEMPLATE_NAME,
};
use assembly_reconcile::Desired;

use crate::resources::{
    ConfigMap, Container, Deployment, DeploymentSpec, ObjectMeta, PodTemplate, Service,
    ServicePort, ServiceSpec, StatefulSet, StatefulSetSpec, Volume, VolumeMount, VolumeSource,
    HEADLESS_CLUSTER_IP, STORAGE_ANNOTATION,
};
use crate::storage;

/// Key of the metrics blob inside a metrics config object.
pub const METRICS_CONFIG_KEY: &str = "metrics-config.json";

/// Port exposed for metrics scraping when metrics are configured.
pub const METRICS_PORT: u16 = 9404;

const METRICS_VOLUME: &str = "metrics-config";
const METRICS_MOUNT_PATH: &str = "/opt/metrics";

pub const ZOOKEEPER_CLIENT_PORT: u16 = 2181;
pub const ZOOKEEPER_CLUSTERING_PORT: u16 = 2888;
pub const ZOOKEEPER_LEADER_ELECTION_PORT: u16 = 3888;
pub const KAFKA_CLIENT_PORT: u16 = 9092;

// =============================================================================
// Clustered roles
// =============================================================================

/// Manifest-building capability of one clustered sub-component.
///
/// Implementors supply the role-specific ports, paths and environment; the
/// provided methods assemble the manifests the same way for every role.
pub trait ClusterModel: Send + Sync {
    fn role(&self) -> Role;

    /// Ports of the client service.
    fn client_ports(&self) -> Vec<ServicePort>;

    /// Ports of the headless service used for member-to-member traffic.
    fn peer_ports(&self) -> Vec<ServicePort>;

    /// Where the data volume is mounted.
    fn data_path(&self) -> &'static str;

    fn env(&self, id: &AssemblyId, cluster: &ClusterSpec) -> BTreeMap<String, String>;

    fn labels(&self, id: &AssemblyId) -> Labels {
        Labels::for_derived(id.name(), self.role())
    }

    fn metrics_config(&self, id: &AssemblyId, cluster: &ClusterSpec) -> ConfigMap {
        let name = metrics_config_name(id.name(), self.role());
        ConfigMap {
            metadata: ObjectMeta::new(id.namespace(), &name, self.labels(id)),
            data: BTreeMap::from([(
                METRICS_CONFIG_KEY.to_string(),
                cluster.metrics_config.to_string(),
            )]),
        }
    }

    fn service(&self, id: &AssemblyId, cluster: &ClusterSpec) -> Service {
        let name = cluster_name(id.name(), self.role());
        let mut ports = self.client_ports();
        if metrics_enabled(cluster) {
            ports.push(ServicePort::new("metrics", METRICS_PORT));
        }
        Service {
            metadata: ObjectMeta::new(id.namespace(), &name, self.labels(id)),
            spec: ServiceSpec {
                cluster_ip: None,
                selector: self.labels(id),
                ports,
            },
        }
    }

    fn headless_service(&self, id: &AssemblyId) -> Service {
        let name = headless_name(id.name(), self.role());
        Service {
            metadata: ObjectMeta::new(id.namespace(), &name, self.labels(id)),
            spec: ServiceSpec {
                cluster_ip: Some(HEADLESS_CLUSTER_IP.to_string()),
                selector: self.labels(id),
                ports: self.peer_ports(),
            },
        }
    }

    /// The workload set for this role, backed by `storage`.
    ///
    /// `storage` must already be the effective configuration, see
    /// [`storage::effective_storage`].
    fn stateful_set(
        &self,
        id: &AssemblyId,
        cluster: &ClusterSpec,
        storage: &StorageConfig,
    ) -> StatefulSet {
        let role = self.role();
        let name = cluster_name(id.name(), role);
        let labels = self.labels(id);

        let mut metadata = ObjectMeta::new(id.namespace(), &name, labels.clone());
        metadata
            .annotations
            .insert(STORAGE_ANNOTATION.to_string(), storage.to_json());

        let mut ports = self.client_ports();
        ports.extend(self.peer_ports());
        ports.dedup();
        if metrics_enabled(cluster) {
            ports.push(ServicePort::new("metrics", METRICS_PORT));
        }

        let container = Container {
            name: role.as_str().to_string(),
            image: cluster.image.clone(),
            env: self.env(id, cluster),
            ports,
            volume_mounts: vec![
                VolumeMount {
                    name: CLAIM_TEMPLATE_NAME.to_string(),
                    mount_path: self.data_path().to_string(),
                },
                VolumeMount {
                    name: METRICS_VOLUME.to_string(),
                    mount_path: METRICS_MOUNT_PATH.to_string(),
                },
            ],
        };

        let mut volumes = vec![Volume {
            name: METRICS_VOLUME.to_string(),
            source: VolumeSource::ConfigMap {
                name: metrics_config_name(id.name(), role),
            },
        }];
        volumes.extend(storage::data_volume(storage, id, role));

        StatefulSet {
            metadata,
            spec: StatefulSetSpec {
                replicas: cluster.replicas,
                service_name: headless_name(id.name(), role),
                selector: labels.clone(),
                template: PodTemplate {
                    labels,
                    containers: vec![container],
                    volumes,
                },
                volume_claim_templates: storage::claim_template(storage).into_iter().collect(),
            },
        }
    }
}

fn metrics_enabled(cluster: &ClusterSpec) -> bool {
    match &cluster.metrics_config {
        serde_json::Value::Null => false,
        serde_json::Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}

/// The ZooKeeper ensemble.
pub struct ZookeeperCluster;

impl ClusterModel for ZookeeperCluster {
    fn role(&self) -> Role {
        Role::Zookeeper
    }

    fn client_ports(&self) -> Vec<ServicePort> {
        vec![ServicePort::new("clients", ZOOKEEPER_CLIENT_PORT)]
    }

    fn peer_ports(&self) -> Vec<ServicePort> {
        vec![
            ServicePort::new("clients", ZOOKEEPER_CLIENT_PORT),
            ServicePort::new("clustering", ZOOKEEPER_CLUSTERING_PORT),
            ServicePort::new("leader-election", ZOOKEEPER_LEADER_ELECTION_PORT),
        ]
    }

    fn data_path(&self) -> &'static str {
        "/var/lib/zookeeper"
    }

    fn env(&self, _id: &AssemblyId, cluster: &ClusterSpec) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("ZOOKEEPER_NODE_COUNT".to_string(), cluster.replicas.to_string()),
            (
                "ZOOKEEPER_METRICS_ENABLED".to_string(),
                metrics_enabled(cluster).to_string(),
            ),
        ])
    }
}

/// The Kafka brokers.
pub struct KafkaCluster;

impl ClusterModel for KafkaCluster {
    fn role(&self) -> Role {
        Role::Kafka
    }

    fn client_ports(&self) -> Vec<ServicePort> {
        vec![ServicePort::new("clients", KAFKA_CLIENT_PORT)]
    }

    fn peer_ports(&self) -> Vec<ServicePort> {
        vec![ServicePort::new("clients", KAFKA_CLIENT_PORT)]
    }

    fn data_path(&self) -> &'static str {
        "/var/lib/kafka"
    }

    fn env(&self, id: &AssemblyId, cluster: &ClusterSpec) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("KAFKA_ZOOKEEPER_CONNECT".to_string(), zookeeper_connect(id)),
            (
                "KAFKA_DEFAULT_REPLICATION_FACTOR".to_string(),
                cluster.replicas.min(3).to_string(),
            ),
            (
                "KAFKA_METRICS_ENABLED".to_string(),
                metrics_enabled(cluster).to_string(),
            ),
        ])
    }
}

/// The model for a clustered role; `None` for the topic controller.
pub fn cluster_model(role: Role) -> Option<&'static dyn ClusterModel> {
    match role {
        Role::Zookeeper => Some(&ZookeeperCluster),
        Role::Kafka => Some(&KafkaCluster),
        Role::TopicController => None,
    }
}

fn zookeeper_connect(id: &AssemblyId) -> String {
    format!(
        "{}:{ZOOKEEPER_CLIENT_PORT}",
        cluster_name(id.name(), Role::Zookeeper)
    )
}

// =============================================================================
// Topic controller
// =============================================================================

/// The management deployment, built from the opaque controller config.
///
/// The config may override the image with a string `image` field.
pub fn topic_controller(id: &AssemblyId, config: &serde_json::Value) -> Deployment {
    let name = controller_name(id.name());
    let labels = Labels::for_derived(id.name(), Role::TopicController);
    let image = config
        .get("image")
        .and_then(serde_json::Value::as_str)
        .unwrap_or(DEFAULT_TOPIC_CONTROLLER_IMAGE)
        .to_string();

    let env = BTreeMap::from([
        ("TOPIC_CONTROLLER_CONFIG".to_string(), config.to_string()),
        (
            "KAFKA_BOOTSTRAP_SERVERS".to_string(),
            format!("{}:{KAFKA_CLIENT_PORT}", cluster_name(id.name(), Role::Kafka)),
        ),
        ("ZOOKEEPER_CONNECT".to_string(), zookeeper_connect(id)),
        ("NAMESPACE".to_string(), id.namespace().to_string()),
    ]);

    Deployment {
        metadata: ObjectMeta::new(id.namespace(), &name, labels.clone()),
        spec: DeploymentSpec {
            replicas: 1,
            selector: labels.clone(),
            template: PodTemplate {
                labels,
                containers: vec![Container {
                    name: Role::TopicController.as_str().to_string(),
                    image,
                    env,
                    ports: Vec::new(),
                    volume_mounts: Vec::new(),
                }],
                volumes: Vec::new(),
            },
        },
    }
}

// =============================================================================
// Desired resource set
// =============================================================================

/// Every derived resource of one assembly, keyed by name.
///
/// Claims are not listed: they are provisioned by the workload sets and
/// released by [`storage`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesiredResources {
    pub config_maps: BTreeMap<String, Desired<ConfigMap>>,
    pub services: BTreeMap<String, Desired<Service>>,
    pub stateful_sets: BTreeMap<String, Desired<StatefulSet>>,
    pub deployments: BTreeMap<String, Desired<Deployment>>,
}

impl DesiredResources {
    /// The resources `spec` calls for.
    ///
    /// `effective_storage` returns the storage to build each clustered role
    /// with.
    pub fn for_spec(
        spec: &AssemblySpec,
        effective_storage: impl Fn(Role) -> StorageConfig,
    ) -> Self {
        let id = &spec.id;
        let mut desired = Self::default();

        for role in Role::CLUSTERED {
            let Some(model) = cluster_model(role) else {
                continue;
            };
            let cluster = spec.cluster(role);

            let metrics = model.metrics_config(id, cluster);
            desired
                .config_maps
                .insert(metrics.metadata.name.clone(), Desired::Present(metrics));

            for svc in [model.service(id, cluster), model.headless_service(id)] {
                desired
                    .services
                    .insert(svc.metadata.name.clone(), Desired::Present(svc));
            }

            let set = model.stateful_set(id, cluster, &effective_storage(role));
            desired
                .stateful_sets
                .insert(set.metadata.name.clone(), Desired::Present(set));
        }

        desired.deployments.insert(
            controller_name(id.name()),
            Desired::from_option(
                spec.topic_controller_config
                    .as_ref()
                    .map(|config| topic_controller(id, config)),
            ),
        );

        desired
    }

    /// Every derived resource of `assembly`, wanted gone.
    pub fn absent(assembly: &str) -> Self {
        let mut desired = Self::default();
        for role in Role::CLUSTERED {
            desired
                .config_maps
                .insert(metrics_config_name(assembly, role), Desired::Absent);
            desired
                .services
                .insert(cluster_name(assembly, role), Desired::Absent);
            desired
                .services
                .insert(headless_name(assembly, role), Desired::Absent);
            desired
                .stateful_sets
                .insert(cluster_name(assembly, role), Desired::Absent);
        }
        desired
            .deployments
            .insert(controller_name(assembly), Desired::Absent);
        desired
    }

    /// Total number of resources.
    pub(crate) fn len(&self) -> usize {
        self.config_maps.len()
            + self.services.len()
            + self.stateful_sets.len()
            + self.deployments.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assembly_model::{StorageType, keys};
    use assembly_naming::claim_name;

    fn spec(data: &[(&str, &str)]) -> AssemblySpec {
        let data = data
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AssemblySpec::from_data(AssemblyId::new("my-namespace", "my-cluster").unwrap(), &data)
            .unwrap()
    }

    fn requested(spec: &AssemblySpec) -> impl Fn(Role) -> StorageConfig + '_ {
        move |role| spec.cluster(role).storage.clone()
    }

    #[test]
    fn test_names_follow_scheme() {
        let spec = spec(&[(keys::TOPIC_CONTROLLER_CONFIG, "{}")]);
        let desired = DesiredResources::for_spec(&spec, requested(&spec));

        let names: Vec<&str> = desired.services.keys().map(String::as_str).collect();
        assert_eq!(
            names,
            vec![
                "my-cluster-kafka",
                "my-cluster-kafka-headless",
                "my-cluster-zookeeper",
                "my-cluster-zookeeper-headless",
            ]
        );
        assert!(desired.config_maps.contains_key("my-cluster-kafka-metrics-config"));
        assert!(desired.config_maps.contains_key("my-cluster-zookeeper-metrics-config"));
        assert!(desired.stateful_sets.contains_key("my-cluster-kafka"));
        assert!(desired.deployments["my-cluster-topic-controller"].is_present());
        assert_eq!(desired.len(), 9);
    }

    #[test]
    fn test_no_controller_config_means_absent_deployment() {
        let spec = spec(&[]);
        let desired = DesiredResources::for_spec(&spec, requested(&spec));
        assert_eq!(desired.deployments["my-cluster-topic-controller"], Desired::Absent);
    }

    #[test]
    fn test_absent_covers_every_name() {
        let spec = spec(&[(keys::TOPIC_CONTROLLER_CONFIG, "{}")]);
        let present = DesiredResources::for_spec(&spec, requested(&spec));
        let absent = DesiredResources::absent("my-cluster");

        assert!(present.config_maps.keys().eq(absent.config_maps.keys()));
        assert!(present.services.keys().eq(absent.services.keys()));
        assert!(present.stateful_sets.keys().eq(absent.stateful_sets.keys()));
        assert!(present.deployments.keys().eq(absent.deployments.keys()));
    }

    #[test]
    fn test_persistent_claim_set_uses_claim_template() {
        let spec = spec(&[
            (keys::KAFKA_REPLICAS, "3"),
            (
                keys::KAFKA_STORAGE,
                r#"{"type": "persistent-claim", "size": "123", "class": "foo"}"#,
            ),
        ]);
        let set = KafkaCluster.stateful_set(&spec.id, &spec.kafka, &spec.kafka.storage);

        assert_eq!(set.spec.replicas, 3);
        assert_eq!(set.spec.service_name, "my-cluster-kafka-headless");
        assert_eq!(set.storage_class(), Some("foo"));
        assert_eq!(set.recorded_storage(), Some(spec.kafka.storage.clone()));
        assert!(set
            .spec
            .template
            .volumes
            .iter()
            .all(|v| v.name != CLAIM_TEMPLATE_NAME));
        // The platform names claims from the template and the member.
        let template = &set.spec.volume_claim_templates[0];
        assert_eq!(
            format!("{}-my-cluster-kafka-0", template.name),
            claim_name("my-cluster-kafka", 0)
        );
    }

    #[test]
    fn test_ephemeral_set_uses_empty_dir() {
        let spec = spec(&[]);
        let set = ZookeeperCluster.stateful_set(&spec.id, &spec.zookeeper, &spec.zookeeper.storage);

        assert_eq!(spec.zookeeper.storage.storage_type, StorageType::Ephemeral);
        assert!(set.spec.volume_claim_templates.is_empty());
        assert!(set.spec.template.volumes.contains(&Volume {
            name: CLAIM_TEMPLATE_NAME.to_string(),
            source: VolumeSource::EmptyDir,
        }));
    }

    #[test]
    fn test_metrics_port_only_with_metrics_config() {
        let plain = spec(&[]);
        let with_metrics = spec(&[(
            keys::KAFKA_METRICS_CONFIG,
            r#"{"lowercaseOutputName": true}"#,
        )]);

        let svc = KafkaCluster.service(&plain.id, &plain.kafka);
        assert!(svc.spec.ports.iter().all(|p| p.port != METRICS_PORT));

        let svc = KafkaCluster.service(&with_metrics.id, &with_metrics.kafka);
        assert!(svc.spec.ports.iter().any(|p| p.port == METRICS_PORT));
    }

    #[test]
    fn test_topic_controller_image_override() {
        let id = AssemblyId::new("ns", "c").unwrap();
        let default = topic_controller(&id, &serde_json::json!({}));
        assert_eq!(default.spec.template.containers[0].image, DEFAULT_TOPIC_CONTROLLER_IMAGE);

        let custom = topic_controller(&id, &serde_json::json!({"image": "custom:1"}));
        assert_eq!(custom.spec.template.containers[0].image, "custom:1");
        assert_eq!(
            custom.spec.template.containers[0].env["KAFKA_BOOTSTRAP_SERVERS"],
            "c-kafka:9092"
        );
    }
}
