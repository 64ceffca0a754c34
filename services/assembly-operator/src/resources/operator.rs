//! The generic per-kind resource operator.

use std::marker::PhantomData;
use std::sync::Arc;

use assembly_reconcile::{Action, Applied, Attempt, Desired, OperationFailure, SpecHash};
use tracing::{debug, instrument};

use super::ResourceKind;
use crate::platform::{PlatformApi, PlatformError};

/// Converges one resource of kind `K` to a desired-or-absent state.
///
/// Every call issues at most one platform write. Platform errors are returned
/// as [`OperationFailure`]s and never retried here.
pub struct ResourceOperator<K> {
    platform: Arc<dyn PlatformApi>,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Clone for ResourceOperator<K> {
    fn clone(&self) -> Self {
        Self {
            platform: Arc::clone(&self.platform),
            _kind: PhantomData,
        }
    }
}

impl<K: ResourceKind> ResourceOperator<K> {
    pub fn new(platform: Arc<dyn PlatformApi>) -> Self {
        Self {
            platform,
            _kind: PhantomData,
        }
    }

    /// Read the live resource, if any.
    pub async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, OperationFailure> {
        self.platform
            .get(K::KIND, namespace, name)
            .await
            .map(|found| found.and_then(K::from_resource))
            .map_err(|e| failure::<K>(namespace, name, Attempt::Read, e))
    }

    /// Converge `namespace/name` to `desired`.
    #[instrument(skip(self, desired), fields(kind = %K::KIND))]
    pub async fn reconcile(
        &self,
        namespace: &str,
        name: &str,
        desired: Desired<K>,
    ) -> Result<Applied, OperationFailure> {
        let live = self.get(namespace, name).await?;

        match (desired, live) {
            (Desired::Absent, None) => Ok(Applied::new(Action::AlreadyAbsent)),

            (Desired::Absent, Some(_)) => {
                match self.platform.delete(K::KIND, namespace, name).await {
                    Ok(()) => Ok(Applied::new(Action::Deleted)),
                    // Removed by someone else since the read.
                    Err(e) if e.is_not_found() => Ok(Applied::new(Action::AlreadyAbsent)),
                    Err(e) => Err(failure::<K>(namespace, name, Attempt::Delete, e)),
                }
            }

            (Desired::Present(manifest), None) => {
                self.platform
                    .create(manifest.into_resource())
                    .await
                    .map_err(|e| failure::<K>(namespace, name, Attempt::Create, e))?;
                Ok(Applied::new(Action::Created))
            }

            (Desired::Present(mut manifest), Some(live)) => {
                let retained = manifest.retain_immutable(&live);
                if !retained.is_empty() {
                    debug!(fields = ?retained, "Keeping immutable fields from live object");
                }

                let desired_hash = SpecHash::from_json(&manifest.mutable_view());
                let live_hash = SpecHash::from_json(&live.mutable_view());
                if desired_hash == live_hash {
                    return Ok(Applied {
                        action: Action::Unchanged,
                        retained,
                    });
                }

                debug!(live = %live_hash, desired = %desired_hash, "Patching");
                self.platform
                    .patch(manifest.into_resource())
                    .await
                    .map_err(|e| failure::<K>(namespace, name, Attempt::Patch, e))?;
                Ok(Applied {
                    action: Action::Patched,
                    retained,
                })
            }
        }
    }
}

fn failure<K: ResourceKind>(
    namespace: &str,
    name: &str,
    attempt: Attempt,
    cause: PlatformError,
) -> OperationFailure {
    OperationFailure {
        kind: K::KIND.as_str(),
        namespace: namespace.to_string(),
        name: name.to_string(),
        attempt,
        message: cause.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::platform::{InMemoryPlatform, PlatformOp};
    use crate::resources::{ConfigMap, Deployment, DeploymentSpec, Kind, ObjectMeta, PodTemplate};
    use assembly_model::Labels;

    fn config_map(value: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta::new("ns", "cm", Labels::new()),
            data: BTreeMap::from([("key".to_string(), value.to_string())]),
        }
    }

    fn setup() -> (Arc<InMemoryPlatform>, ResourceOperator<ConfigMap>) {
        let platform = Arc::new(InMemoryPlatform::new());
        let op = ResourceOperator::new(platform.clone());
        (platform, op)
    }

    #[tokio::test]
    async fn test_create_then_unchanged() {
        let (platform, op) = setup();

        let first = op.reconcile("ns", "cm", Desired::Present(config_map("a"))).await;
        assert_eq!(first.unwrap().action, Action::Created);

        let second = op.reconcile("ns", "cm", Desired::Present(config_map("a"))).await;
        assert_eq!(second.unwrap().action, Action::Unchanged);
        assert_eq!(platform.write_count(), 1);
    }

    #[tokio::test]
    async fn test_patch_on_mutable_change() {
        let (platform, op) = setup();
        op.reconcile("ns", "cm", Desired::Present(config_map("a"))).await.unwrap();

        let applied = op
            .reconcile("ns", "cm", Desired::Present(config_map("b")))
            .await
            .unwrap();
        assert_eq!(applied.action, Action::Patched);

        let live = platform.fetch::<ConfigMap>("ns", "cm").await.unwrap();
        assert_eq!(live.data["key"], "b");
    }

    #[tokio::test]
    async fn test_absent_deletes_once() {
        let (platform, op) = setup();
        op.reconcile("ns", "cm", Desired::Present(config_map("a"))).await.unwrap();

        let deleted = op.reconcile("ns", "cm", Desired::Absent).await.unwrap();
        assert_eq!(deleted.action, Action::Deleted);
        let again = op.reconcile("ns", "cm", Desired::Absent).await.unwrap();
        assert_eq!(again.action, Action::AlreadyAbsent);
        assert_eq!(platform.write_count(), 2);
    }

    #[tokio::test]
    async fn test_immutable_selector_is_retained() {
        let platform = Arc::new(InMemoryPlatform::new());
        let op = ResourceOperator::<Deployment>::new(platform.clone());
        let deployment = |selector: &str, replicas: u32| Deployment {
            metadata: ObjectMeta::new("ns", "d", Labels::new()),
            spec: DeploymentSpec {
                replicas,
                selector: Labels::for_kind(selector),
                template: PodTemplate {
                    labels: Labels::new(),
                    containers: Vec::new(),
                    volumes: Vec::new(),
                },
            },
        };

        op.reconcile("ns", "d", Desired::Present(deployment("a", 1))).await.unwrap();

        // Selector-only change: nothing to write.
        let applied = op
            .reconcile("ns", "d", Desired::Present(deployment("b", 1)))
            .await
            .unwrap();
        assert_eq!(applied.action, Action::Unchanged);
        assert_eq!(applied.retained, vec!["selector"]);
        assert_eq!(platform.write_count(), 1);

        let applied = op
            .reconcile("ns", "d", Desired::Present(deployment("b", 2)))
            .await
            .unwrap();
        assert_eq!(applied.action, Action::Patched);

        let live = platform.fetch::<Deployment>("ns", "d").await.unwrap();
        assert_eq!(live.spec.selector, Labels::for_kind("a"));
        assert_eq!(live.spec.replicas, 2);
    }

    #[tokio::test]
    async fn test_platform_error_becomes_failure() {
        let (platform, op) = setup();
        platform.fail_on(Kind::ConfigMap, PlatformOp::Create).await;

        let failure = op
            .reconcile("ns", "cm", Desired::Present(config_map("a")))
            .await
            .unwrap_err();
        assert_eq!(failure.kind, "ConfigMap");
        assert_eq!(failure.attempt, Attempt::Create);
        assert_eq!(failure.name, "cm");
    }
}
