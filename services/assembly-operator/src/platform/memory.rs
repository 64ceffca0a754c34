//! In-memory platform for tests and local runs.
//!
//! Besides storing resources it simulates the platform's own controllers for
//! workload sets: members `{set}-{i}` are created and pruned to match the
//! replica count, and one claim per member is provisioned from each claim
//! template. Claims are never deleted by the simulation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

use assembly_model::Labels;
use assembly_naming::{member_index, member_name};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{PlatformApi, PlatformError, PlatformResult, Scope};
use crate::resources::{
    Kind, ObjectMeta, PersistentVolumeClaim, Pod, Resource, ResourceKind, StatefulSet,
};

/// A platform call, used to target injected faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PlatformOp {
    Get,
    Create,
    Patch,
    Delete,
    List,
}

type Key = (Kind, String, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, Resource>,
    faults: BTreeSet<(Kind, PlatformOp)>,
}

impl State {
    fn check_fault(&self, kind: Kind, op: PlatformOp) -> PlatformResult<()> {
        if self.faults.contains(&(kind, op)) {
            return Err(PlatformError::Unavailable(format!(
                "injected fault on {op:?} {kind}"
            )));
        }
        Ok(())
    }

    /// Brings the members and claims of `set` in line with its replica count.
    fn sync_members(&mut self, set: &StatefulSet) {
        let namespace = &set.metadata.namespace;
        let cluster = &set.metadata.name;

        let stale: Vec<Key> = self
            .objects
            .keys()
            .filter(|(kind, ns, name)| {
                *kind == Kind::Pod
                    && ns == namespace
                    && member_index(cluster, name).is_some_and(|i| i >= set.spec.replicas)
            })
            .cloned()
            .collect();
        for key in stale {
            debug!(namespace = %key.1, pod = %key.2, "[MOCK] Removing member");
            self.objects.remove(&key);
        }

        for index in 0..set.spec.replicas {
            let member = member_name(cluster, index);
            let pod_key = (Kind::Pod, namespace.clone(), member.clone());
            if !self.objects.contains_key(&pod_key) {
                debug!(namespace = %namespace, pod = %member, "[MOCK] Starting member");
                let pod = Pod {
                    metadata: ObjectMeta::new(namespace, &member, set.spec.template.labels.clone()),
                    spec: set.spec.template.clone(),
                };
                self.objects.insert(pod_key, Resource::Pod(pod));
            }

            for template in &set.spec.volume_claim_templates {
                let claim = format!("{}-{member}", template.name);
                let claim_key = (Kind::PersistentVolumeClaim, namespace.clone(), claim.clone());
                if !self.objects.contains_key(&claim_key) {
                    debug!(namespace = %namespace, claim = %claim, "[MOCK] Provisioning claim");
                    let pvc = PersistentVolumeClaim {
                        metadata: ObjectMeta::new(namespace, &claim, set.spec.selector.clone()),
                        spec: template.spec.clone(),
                    };
                    self.objects.insert(claim_key, pvc.into_resource());
                }
            }
        }
    }

    fn remove_members(&mut self, set: &StatefulSet) {
        let namespace = &set.metadata.namespace;
        let cluster = &set.metadata.name;
        self.objects.retain(|(kind, ns, name), _| {
            !(*kind == Kind::Pod && ns == namespace && member_index(cluster, name).is_some())
        });
    }
}

/// In-memory platform implementation.
pub struct InMemoryPlatform {
    state: RwLock<State>,

    /// Creates, patches and deletes issued through [`PlatformApi`].
    writes: AtomicU64,

    /// Counter for assigning service cluster IPs.
    ip_counter: AtomicU64,
}

impl InMemoryPlatform {
    /// Create an empty platform.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            writes: AtomicU64::new(0),
            ip_counter: AtomicU64::new(0),
        }
    }

    /// Store a resource out-of-band, replacing any existing one.
    ///
    /// Not counted as a write.
    pub async fn insert(&self, resource: Resource) {
        let mut state = self.state.write().await;
        let resource = self.assign_cluster_ip(resource);
        if let Resource::StatefulSet(set) = &resource {
            state.sync_members(set);
        }
        state.objects.insert(key_of(&resource), resource);
    }

    /// Remove a resource out-of-band. Not counted as a write.
    pub async fn remove(&self, kind: Kind, namespace: &str, name: &str) -> Option<Resource> {
        let mut state = self.state.write().await;
        state
            .objects
            .remove(&(kind, namespace.to_string(), name.to_string()))
    }

    /// Read a resource as its concrete type.
    pub async fn fetch<K: ResourceKind>(&self, namespace: &str, name: &str) -> Option<K> {
        let state = self.state.read().await;
        state
            .objects
            .get(&(K::KIND, namespace.to_string(), name.to_string()))
            .cloned()
            .and_then(K::from_resource)
    }

    /// Names of every resource of `kind` in `namespace`, in order.
    pub async fn names(&self, kind: Kind, namespace: &str) -> Vec<String> {
        let state = self.state.read().await;
        state
            .objects
            .keys()
            .filter(|(k, ns, _)| *k == kind && ns == namespace)
            .map(|(_, _, name)| name.clone())
            .collect()
    }

    /// Number of writes issued through [`PlatformApi`] so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every `op` on `kind` fail with [`PlatformError::Unavailable`].
    pub async fn fail_on(&self, kind: Kind, op: PlatformOp) {
        self.state.write().await.faults.insert((kind, op));
    }

    /// Remove all injected faults.
    pub async fn clear_faults(&self) {
        self.state.write().await.faults.clear();
    }

    fn assign_cluster_ip(&self, resource: Resource) -> Resource {
        match resource {
            Resource::Service(mut svc) if svc.spec.cluster_ip.is_none() => {
                let n = self.ip_counter.fetch_add(1, Ordering::SeqCst) + 1;
                svc.spec.cluster_ip = Some(format!("10.96.{}.{}", n / 256, n % 256));
                Resource::Service(svc)
            }
            other => other,
        }
    }
}

impl Default for InMemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

fn key_of(resource: &Resource) -> Key {
    let meta = resource.metadata();
    (resource.kind(), meta.namespace.clone(), meta.name.clone())
}

/// Returns the first immutable field that differs between `live` and `next`.
fn immutable_violation(live: &Resource, next: &Resource) -> Option<&'static str> {
    match (live, next) {
        (Resource::Service(l), Resource::Service(n)) => {
            (l.spec.cluster_ip != n.spec.cluster_ip).then_some("cluster_ip")
        }
        (Resource::Deployment(l), Resource::Deployment(n)) => {
            (l.spec.selector != n.spec.selector).then_some("selector")
        }
        (Resource::PersistentVolumeClaim(l), Resource::PersistentVolumeClaim(n)) => {
            (l.spec != n.spec).then_some("spec")
        }
        (Resource::StatefulSet(l), Resource::StatefulSet(n)) => {
            if l.spec.selector != n.spec.selector {
                Some("selector")
            } else if l.spec.service_name != n.spec.service_name {
                Some("service_name")
            } else if l.spec.volume_claim_templates != n.spec.volume_claim_templates {
                Some("volume_claim_templates")
            } else {
                None
            }
        }
        _ => None,
    }
}

#[async_trait]
impl PlatformApi for InMemoryPlatform {
    async fn get(
        &self,
        kind: Kind,
        namespace: &str,
        name: &str,
    ) -> PlatformResult<Option<Resource>> {
        let state = self.state.read().await;
        state.check_fault(kind, PlatformOp::Get)?;
        Ok(state
            .objects
            .get(&(kind, namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn create(&self, resource: Resource) -> PlatformResult<Resource> {
        let mut state = self.state.write().await;
        let kind = resource.kind();
        state.check_fault(kind, PlatformOp::Create)?;

        let key = key_of(&resource);
        if key.2.is_empty() {
            return Err(PlatformError::Invalid {
                kind,
                name: key.2,
                reason: "name must not be empty".to_string(),
            });
        }
        if state.objects.contains_key(&key) {
            return Err(PlatformError::AlreadyExists {
                kind,
                namespace: key.1,
                name: key.2,
            });
        }

        let resource = self.assign_cluster_ip(resource);
        if let Resource::StatefulSet(set) = &resource {
            state.sync_members(set);
        }
        debug!(kind = %kind, namespace = %key.1, name = %key.2, "[MOCK] Created resource");
        state.objects.insert(key, resource.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(resource)
    }

    async fn patch(&self, resource: Resource) -> PlatformResult<Resource> {
        let mut state = self.state.write().await;
        let kind = resource.kind();
        state.check_fault(kind, PlatformOp::Patch)?;

        let key = key_of(&resource);
        let Some(live) = state.objects.get(&key) else {
            return Err(PlatformError::NotFound {
                kind,
                namespace: key.1,
                name: key.2,
            });
        };
        if let Some(field) = immutable_violation(live, &resource) {
            return Err(PlatformError::Invalid {
                kind,
                name: key.2,
                reason: format!("field '{field}' is immutable"),
            });
        }

        if let Resource::StatefulSet(set) = &resource {
            state.sync_members(set);
        }
        debug!(kind = %kind, namespace = %key.1, name = %key.2, "[MOCK] Patched resource");
        state.objects.insert(key, resource.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(resource)
    }

    async fn delete(&self, kind: Kind, namespace: &str, name: &str) -> PlatformResult<()> {
        let mut state = self.state.write().await;
        state.check_fault(kind, PlatformOp::Delete)?;

        let removed = state
            .objects
            .remove(&(kind, namespace.to_string(), name.to_string()))
            .ok_or_else(|| PlatformError::NotFound {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;
        if let Resource::StatefulSet(set) = &removed {
            state.remove_members(set);
        }
        debug!(kind = %kind, namespace, name, "[MOCK] Deleted resource");
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list(
        &self,
        kind: Kind,
        scope: &Scope,
        selector: &Labels,
    ) -> PlatformResult<Vec<Resource>> {
        let state = self.state.read().await;
        state.check_fault(kind, PlatformOp::List)?;
        Ok(state
            .objects
            .iter()
            .filter(|((k, ns, _), r)| {
                *k == kind && scope.includes(ns) && selector.selects(&r.metadata().labels)
            })
            .map(|(_, r)| r.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{
        ClaimSpec, ClaimTemplate, ConfigMap, PodTemplate, Service, ServiceSpec, StatefulSetSpec,
    };
    use assembly_naming::Role;

    fn set(replicas: u32) -> StatefulSet {
        let labels = Labels::for_derived("c", Role::Kafka);
        StatefulSet {
            metadata: ObjectMeta::new("ns", "c-kafka", labels.clone()),
            spec: StatefulSetSpec {
                replicas,
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
                        storage_class: None,
                        size: "1Gi".into(),
                    },
                }],
            },
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let platform = InMemoryPlatform::new();
        let cm = ConfigMap {
            metadata: ObjectMeta::new("ns", "cm", Labels::new()),
            data: BTreeMap::new(),
        };
        platform.create(cm.clone().into_resource()).await.unwrap();

        let got = platform.get(Kind::ConfigMap, "ns", "cm").await.unwrap();
        assert_eq!(got, Some(cm.clone().into_resource()));
        assert_eq!(platform.write_count(), 1);

        let err = platform.create(cm.into_resource()).await.unwrap_err();
        assert!(matches!(err, PlatformError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_service_gets_cluster_ip() {
        let platform = InMemoryPlatform::new();
        let svc = Service {
            metadata: ObjectMeta::new("ns", "svc", Labels::new()),
            spec: ServiceSpec {
                cluster_ip: None,
                selector: Labels::new(),
                ports: Vec::new(),
            },
        };
        let created = platform.create(svc.clone().into_resource()).await.unwrap();
        let Resource::Service(created) = created else {
            panic!("expected a service");
        };
        assert!(created.spec.cluster_ip.is_some());

        let err = platform.patch(svc.into_resource()).await.unwrap_err();
        assert!(matches!(err, PlatformError::Invalid { .. }));
    }

    #[tokio::test]
    async fn test_statefulset_members_follow_replicas() {
        let platform = InMemoryPlatform::new();
        platform.create(set(3).into_resource()).await.unwrap();
        assert_eq!(
            platform.names(Kind::Pod, "ns").await,
            vec!["c-kafka-0", "c-kafka-1", "c-kafka-2"]
        );
        assert_eq!(platform.names(Kind::PersistentVolumeClaim, "ns").await.len(), 3);

        platform.patch(set(1).into_resource()).await.unwrap();
        assert_eq!(platform.names(Kind::Pod, "ns").await, vec!["c-kafka-0"]);
        assert_eq!(platform.names(Kind::PersistentVolumeClaim, "ns").await.len(), 3);

        platform.delete(Kind::StatefulSet, "ns", "c-kafka").await.unwrap();
        assert!(platform.names(Kind::Pod, "ns").await.is_empty());
        assert_eq!(platform.names(Kind::PersistentVolumeClaim, "ns").await.len(), 3);
    }

    #[tokio::test]
    async fn test_injected_fault() {
        let platform = InMemoryPlatform::new();
        platform.fail_on(Kind::StatefulSet, PlatformOp::Create).await;
        let err = platform.create(set(1).into_resource()).await.unwrap_err();
        assert!(matches!(err, PlatformError::Unavailable(_)));
        assert_eq!(platform.write_count(), 0);

        platform.clear_faults().await;
        platform.create(set(1).into_resource()).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_filters_scope_and_selector() {
        let platform = InMemoryPlatform::new();
        for (ns, name, labels) in [
            ("a", "one", Labels::spec_sources()),
            ("b", "two", Labels::spec_sources()),
            ("a", "three", Labels::new()),
        ] {
            platform
                .insert(
                    ConfigMap {
                        metadata: ObjectMeta::new(ns, name, labels),
                        data: BTreeMap::new(),
                    }
                    .into_resource(),
                )
                .await;
        }

        let all = platform
            .list(Kind::ConfigMap, &Scope::AllNamespaces, &Labels::spec_sources())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let in_a = platform
            .list(
                Kind::ConfigMap,
                &Scope::Namespace("a".into()),
                &Labels::spec_sources(),
            )
            .await
            .unwrap();
        assert_eq!(in_a.len(), 1);
        assert_eq!(in_a[0].metadata().name, "one");
    }
}
