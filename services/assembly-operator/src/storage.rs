//! Storage lifecycle of clustered sub-components.
//!
//! Three storage types are supported:
//! - `ephemeral`: an `emptyDir` data volume, no claims
//! - `persistent-claim`: one claim per member, provisioned by the platform from
//!   the workload set's claim template and named `data-{cluster}-{i}`
//! - `local`: a pre-provisioned `hostPath` data volume, no claims
//!
//! Type, size and class are fixed when the workload set is first created. The
//! delete-claim flag is read from the current spec whenever claims are about to
//! lose their member, on scale-down and on full deletion.

use std::collections::BTreeMap;
use std::sync::Arc;

use assembly_model::{StorageConfig, StorageType};
use assembly_naming::{claim_name, cluster_name, AssemblyId, Role, CLAIM_TEMPLATE_NAME};
use assembly_reconcile::{Applied, Desired, DriftWarning, OperationFailure};
use futures_util::future::join_all;
use tracing::{debug, info};

use crate::platform::PlatformApi;
use crate::resources::{
    ClaimSpec, ClaimTemplate, PersistentVolumeClaim, ResourceKind, ResourceOperator, StatefulSet,
    Volume, VolumeSource,
};

/// Root under which local storage is expected to be provisioned.
pub const LOCAL_STORAGE_ROOT: &str = "/var/lib/assembly";

/// The claim template a workload set needs for `storage`, if claim-backed.
pub fn claim_template(storage: &StorageConfig) -> Option<ClaimTemplate> {
    if !storage.is_claim_managed() {
        return None;
    }
    Some(ClaimTemplate {
        name: CLAIM_TEMPLATE_NAME.to_string(),
        spec: ClaimSpec {
            storage_class: storage.storage_class.clone(),
            size: storage.size.clone().unwrap_or_default(),
        },
    })
}

/// The pod-template data volume for `storage`; `None` when a claim template
/// provides it.
pub fn data_volume(storage: &StorageConfig, id: &AssemblyId, role: Role) -> Option<Volume> {
    let source = match storage.storage_type {
        StorageType::PersistentClaim => return None,
        StorageType::Ephemeral => VolumeSource::EmptyDir,
        StorageType::Local => VolumeSource::HostPath {
            path: format!(
                "{LOCAL_STORAGE_ROOT}/{}/{}",
                id.namespace(),
                cluster_name(id.name(), role)
            ),
        },
    };
    Some(Volume {
        name: CLAIM_TEMPLATE_NAME.to_string(),
        source,
    })
}

/// Claims owned by a workload set with `replicas` members.
///
/// Empty unless the storage is claim-managed.
pub fn owned_claims(cluster: &str, storage: &StorageConfig, replicas: u32) -> Vec<String> {
    if !storage.is_claim_managed() {
        return Vec::new();
    }
    (0..replicas).map(|i| claim_name(cluster, i)).collect()
}

/// Existing claims, keyed by member index, that no member of a `replicas`
/// sized workload set uses any more and that `storage` says to delete.
///
/// Taken from what exists rather than the replica change of one pass, so a
/// release that failed earlier is picked up again.
pub fn claims_beyond(
    storage: &StorageConfig,
    existing: &BTreeMap<u32, String>,
    replicas: u32,
) -> Vec<String> {
    if !storage.deletes_claims() {
        return Vec::new();
    }
    existing.range(replicas..).map(|(_, name)| name.clone()).collect()
}

/// Claims to delete when a workload set of `replicas` members is removed.
pub fn claims_released_on_delete(
    cluster: &str,
    storage: &StorageConfig,
    replicas: u32,
) -> Vec<String> {
    if !storage.deletes_claims() {
        return Vec::new();
    }
    owned_claims(cluster, storage, replicas)
}

/// The storage configuration a live workload set was created with.
///
/// Read from its storage annotation, or inferred from its volumes when the
/// annotation is missing. An inferred configuration never deletes claims.
pub fn recorded_storage(set: &StatefulSet) -> StorageConfig {
    if let Some(recorded) = set.recorded_storage() {
        return recorded;
    }

    if let Some(template) = set.spec.volume_claim_templates.first() {
        return StorageConfig::persistent_claim(
            template.spec.size.clone(),
            template.spec.storage_class.clone(),
            false,
        );
    }

    let local = set.spec.template.volumes.iter().any(|v| {
        v.name == CLAIM_TEMPLATE_NAME && matches!(v.source, VolumeSource::HostPath { .. })
    });
    if local {
        StorageConfig {
            storage_type: StorageType::Local,
            ..StorageConfig::ephemeral()
        }
    } else {
        StorageConfig::ephemeral()
    }
}

/// The storage to build a workload set with, given the live one (if any) and
/// the requested configuration.
///
/// Type, size and class come from the live set; delete-claim comes from the
/// request. Each ignored change is reported as a [`DriftWarning`].
pub fn effective_storage(
    live: Option<&StatefulSet>,
    requested: &StorageConfig,
) -> (StorageConfig, Vec<DriftWarning>) {
    let Some(live) = live else {
        return (requested.clone(), Vec::new());
    };

    let current = recorded_storage(live);
    let name = &live.metadata.name;
    let warn = |field: &'static str, requested: String, effective: String| DriftWarning {
        kind: StatefulSet::KIND.as_str(),
        name: name.clone(),
        field,
        requested,
        effective,
    };

    let mut warnings = Vec::new();
    if current.storage_type != requested.storage_type {
        warnings.push(warn(
            "storage.type",
            requested.storage_type.to_string(),
            current.storage_type.to_string(),
        ));
    }
    if current.size != requested.size {
        warnings.push(warn(
            "storage.size",
            display_opt(&requested.size),
            display_opt(&current.size),
        ));
    }
    if current.storage_class != requested.storage_class {
        warnings.push(warn(
            "storage.class",
            display_opt(&requested.storage_class),
            display_opt(&current.storage_class),
        ));
    }

    (current.with_delete_claim_of(requested), warnings)
}

fn display_opt(value: &Option<String>) -> String {
    value.clone().unwrap_or_else(|| "<none>".to_string())
}

/// Deletes claims released by scale-down or deletion.
#[derive(Clone)]
pub struct StorageLifecycle {
    claims: ResourceOperator<PersistentVolumeClaim>,
}

impl StorageLifecycle {
    pub fn new(platform: Arc<dyn PlatformApi>) -> Self {
        Self {
            claims: ResourceOperator::new(platform),
        }
    }

    /// Ensure every claim in `names` is absent.
    ///
    /// Returns one result per claim, in input order.
    pub async fn release_claims(
        &self,
        namespace: &str,
        names: Vec<String>,
    ) -> Vec<(String, Result<Applied, OperationFailure>)> {
        if names.is_empty() {
            return Vec::new();
        }
        info!(namespace, count = names.len(), "Releasing claims");

        let results = join_all(
            names
                .iter()
                .map(|name| self.claims.reconcile(namespace, name, Desired::Absent)),
        )
        .await;

        for (name, result) in names.iter().zip(&results) {
            if let Ok(applied) = result {
                debug!(namespace, claim = %name, action = %applied.action, "Claim released");
            }
        }
        names.into_iter().zip(results).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::{ClusterModel, KafkaCluster};
    use crate::platform::InMemoryPlatform;
    use crate::resources::Kind;
    use assembly_model::{AssemblySpec, ClusterSpec};
    use assembly_reconcile::Action;

    fn id() -> AssemblyId {
        AssemblyId::new("ns", "c").unwrap()
    }

    fn kafka_set(storage: &StorageConfig, replicas: u32) -> StatefulSet {
        let spec = AssemblySpec::from_data(id(), &BTreeMap::new()).unwrap();
        let cluster = ClusterSpec {
            replicas,
            storage: storage.clone(),
            ..spec.kafka
        };
        KafkaCluster.stateful_set(&id(), &cluster, storage)
    }

    #[test]
    fn test_owned_claims_only_for_persistent_claim() {
        let pvc = StorageConfig::persistent_claim("1Gi", None, false);
        assert_eq!(
            owned_claims("c-kafka", &pvc, 3),
            vec!["data-c-kafka-0", "data-c-kafka-1", "data-c-kafka-2"]
        );
        assert!(owned_claims("c-kafka", &StorageConfig::ephemeral(), 3).is_empty());

        let local = StorageConfig {
            storage_type: StorageType::Local,
            ..StorageConfig::ephemeral()
        };
        assert!(owned_claims("c-kafka", &local, 3).is_empty());
    }

    #[test]
    fn test_scale_down_honours_delete_claim() {
        let keep = StorageConfig::persistent_claim("1Gi", None, false);
        let delete = StorageConfig::persistent_claim("1Gi", None, true);

        let existing: BTreeMap<u32, String> =
            (0..3).map(|i| (i, claim_name("c-kafka", i))).collect();

        assert!(claims_beyond(&keep, &existing, 1).is_empty());
        assert_eq!(
            claims_beyond(&delete, &existing, 1),
            vec!["data-c-kafka-1", "data-c-kafka-2"]
        );
        assert!(claims_beyond(&delete, &existing, 3).is_empty());
        assert!(claims_beyond(&StorageConfig::ephemeral(), &existing, 0).is_empty());
    }

    #[test]
    fn test_delete_releases_all_or_nothing() {
        let keep = StorageConfig::persistent_claim("1Gi", None, false);
        let delete = StorageConfig::persistent_claim("1Gi", None, true);
        assert!(claims_released_on_delete("c-kafka", &keep, 3).is_empty());
        assert_eq!(claims_released_on_delete("c-kafka", &delete, 3).len(), 3);
    }

    #[test]
    fn test_effective_storage_keeps_class_and_takes_delete_claim() {
        let live = kafka_set(
            &StorageConfig::persistent_claim("123", Some("foo".into()), false),
            3,
        );
        let requested = StorageConfig::persistent_claim("123", Some("foo2".into()), true);

        let (effective, warnings) = effective_storage(Some(&live), &requested);

        assert_eq!(effective.storage_class.as_deref(), Some("foo"));
        assert!(effective.delete_claim);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field, "storage.class");
        assert_eq!(warnings[0].requested, "foo2");
        assert_eq!(warnings[0].effective, "foo");
    }

    #[test]
    fn test_effective_storage_without_live_set() {
        let requested = StorageConfig::persistent_claim("1Gi", None, true);
        let (effective, warnings) = effective_storage(None, &requested);
        assert_eq!(effective, requested);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_recorded_storage_inferred_without_annotation() {
        let storage = StorageConfig::persistent_claim("1Gi", Some("fast".into()), true);
        let mut set = kafka_set(&storage, 1);
        set.metadata.annotations.clear();

        let inferred = recorded_storage(&set);
        assert_eq!(inferred.storage_type, StorageType::PersistentClaim);
        assert_eq!(inferred.storage_class.as_deref(), Some("fast"));
        assert!(!inferred.delete_claim);
    }

    #[tokio::test]
    async fn test_release_claims() {
        let platform = Arc::new(InMemoryPlatform::new());
        let storage = StorageConfig::persistent_claim("1Gi", None, true);
        platform.insert(kafka_set(&storage, 2).into_resource()).await;
        assert_eq!(platform.names(Kind::PersistentVolumeClaim, "ns").await.len(), 2);

        let lifecycle = StorageLifecycle::new(platform.clone());
        let results = lifecycle
            .release_claims("ns", claims_released_on_delete("c-kafka", &storage, 3))
            .await;

        let actions: Vec<Action> = results
            .into_iter()
            .map(|(_, r)| r.unwrap().action)
            .collect();
        assert_eq!(
            actions,
            vec![Action::Deleted, Action::Deleted, Action::AlreadyAbsent]
        );
        assert!(platform.names(Kind::PersistentVolumeClaim, "ns").await.is_empty());
    }
}
