//! Per-assembly reconciliation.
//!
//! A reconcile reads the assembly's spec source and takes one of two branches:
//! - **present**: derive every resource from the parsed spec, converge each
//!   one, then release claims left behind by a scale-down
//! - **absent**: ensure every derived resource is gone, then release claims
//!   according to the last known delete-claim policy
//!
//! Per-resource operations are independent. They run as tasks bounded by a
//! semaphore and all of them are joined before the reconcile returns. A failed
//! operation never stops the others and nothing already applied is undone.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use assembly_model::{AssemblySpec, Labels, ModelError, StorageConfig};
use assembly_naming::{cluster_name, AssemblyId, Role};
use assembly_reconcile::{
    Applied, Attempt, Desired, DriftWarning, OperationFailure, OperationRecord, OutcomeCollector,
};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{Id as TaskId, JoinSet};
use tracing::{debug, error, info, instrument, warn};

use crate::builders::DesiredResources;
use crate::index::AssemblyIndex;
use crate::platform::PlatformApi;
use crate::resources::{
    ConfigMap, Deployment, Kind, PersistentVolumeClaim, ResourceKind, ResourceOperator, Service,
    StatefulSet,
};
use crate::storage::{self, StorageLifecycle};

/// Result type for assembly reconciles.
pub type AssemblyResult<T> = Result<T, AssemblyError>;

/// Why a reconcile did not fully converge.
#[derive(Debug, Error)]
pub enum AssemblyError {
    /// The spec source is malformed; nothing was written.
    #[error("invalid spec source: {0}")]
    SpecParse(#[from] ModelError),

    /// The spec source could not be read; nothing was written.
    #[error("cannot read spec source: {0}")]
    SpecSource(OperationFailure),

    /// One or more sub-operations failed. The others were still applied.
    ///
    /// `spec` is the spec the present branch was converging towards.
    #[error("{} sub-operation(s) failed; first: {}", .failures.len(), first_cause(.failures))]
    Incomplete {
        failures: Vec<OperationFailure>,
        spec: Option<Box<AssemblySpec>>,
    },

    /// The reconcile task panicked or was cancelled before finishing.
    #[error("reconcile aborted: {0}")]
    Aborted(String),
}

fn first_cause(failures: &[OperationFailure]) -> String {
    failures
        .first()
        .map(ToString::to_string)
        .unwrap_or_default()
}

/// Which branch a reconcile took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    /// The spec source exists: create or update.
    Present,
    /// The spec source is gone: delete.
    Absent,
}

/// Caller-supplied context for one reconcile.
#[derive(Debug, Clone, Default)]
pub struct ReconcileContext {
    /// What caused the reconcile, for logs.
    pub trigger: &'static str,

    /// The spec seen by the last present-branch reconcile that got past
    /// parsing, whether or not every sub-operation succeeded.
    ///
    /// The absent branch takes each role's delete-claim policy and replica
    /// count from here, falling back to the live workload sets.
    pub last_known: Option<AssemblySpec>,
}

impl ReconcileContext {
    pub fn new(trigger: &'static str) -> Self {
        Self {
            trigger,
            last_known: None,
        }
    }

    #[must_use]
    pub fn with_last_known(mut self, spec: Option<AssemblySpec>) -> Self {
        self.last_known = spec;
        self
    }
}

/// Outcome of a reconcile in which every sub-operation succeeded.
#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub id: AssemblyId,
    pub branch: Branch,
    pub records: Vec<OperationRecord>,
    /// Requested changes to immutable fields that were not applied.
    pub warnings: Vec<DriftWarning>,
    /// The parsed spec; `None` on the absent branch.
    pub spec: Option<AssemblySpec>,
    pub completed_at: DateTime<Utc>,
}

impl ReconcileReport {
    /// Number of platform writes performed.
    pub fn writes(&self) -> usize {
        self.records.iter().filter(|r| r.action.is_write()).count()
    }

    /// Records for resources of `kind`.
    pub fn records_for(&self, kind: Kind) -> impl Iterator<Item = &OperationRecord> {
        self.records.iter().filter(move |r| r.kind == kind.as_str())
    }
}

/// Converges one assembly at a time.
pub struct AssemblyReconciler {
    config_maps: ResourceOperator<ConfigMap>,
    services: ResourceOperator<Service>,
    stateful_sets: ResourceOperator<StatefulSet>,
    deployments: ResourceOperator<Deployment>,
    storage: StorageLifecycle,
    index: AssemblyIndex,

    /// Bounds concurrent per-resource operations within one reconcile.
    permits: Arc<Semaphore>,
}

impl AssemblyReconciler {
    /// Create a reconciler running at most `max_concurrent_operations`
    /// platform operations at once per reconcile.
    pub fn new(platform: Arc<dyn PlatformApi>, max_concurrent_operations: usize) -> Self {
        Self {
            config_maps: ResourceOperator::new(Arc::clone(&platform)),
            services: ResourceOperator::new(Arc::clone(&platform)),
            stateful_sets: ResourceOperator::new(Arc::clone(&platform)),
            deployments: ResourceOperator::new(Arc::clone(&platform)),
            storage: StorageLifecycle::new(Arc::clone(&platform)),
            index: AssemblyIndex::new(platform),
            permits: Arc::new(Semaphore::new(max_concurrent_operations.max(1))),
        }
    }

    /// Run one convergence pass for `id`.
    ///
    /// Callers must not run two reconciles for the same identity at once.
    #[instrument(skip(self, id, ctx), fields(assembly = %id, trigger = ctx.trigger))]
    pub async fn reconcile_assembly(
        &self,
        id: &AssemblyId,
        ctx: &ReconcileContext,
    ) -> AssemblyResult<ReconcileReport> {
        let source = self
            .config_maps
            .get(id.namespace(), id.name())
            .await
            .map_err(AssemblyError::SpecSource)?
            // A same-named object without spec-source labels is not a spec source.
            .filter(|cm| Labels::spec_sources().selects(&cm.metadata.labels));

        let result = match source {
            Some(source) => self.reconcile_present(id, source).await,
            None => self.reconcile_absent(id, ctx).await,
        };

        match &result {
            Ok(report) => info!(
                branch = ?report.branch,
                writes = report.writes(),
                warnings = report.warnings.len(),
                "Assembly reconciled"
            ),
            Err(e) => error!(error = %e, "Assembly reconcile failed"),
        }
        result
    }

    async fn reconcile_present(
        &self,
        id: &AssemblyId,
        source: ConfigMap,
    ) -> AssemblyResult<ReconcileReport> {
        let spec = AssemblySpec::from_data(id.clone(), &source.data)?;
        let namespace = id.namespace();
        let mut outcomes = OutcomeCollector::new();

        // Roles whose live set could not be read are left alone this pass:
        // without it neither the effective storage nor the scale-down is known.
        let mut live_sets: BTreeMap<Role, Option<StatefulSet>> = BTreeMap::new();
        for role in Role::CLUSTERED {
            match self.stateful_sets.get(namespace, &cluster_name(id.name(), role)).await {
                Ok(live) => {
                    live_sets.insert(role, live);
                }
                Err(failure) => outcomes.fail(failure),
            }
        }

        let mut warnings = Vec::new();
        let mut effective: BTreeMap<Role, StorageConfig> = BTreeMap::new();
        for (role, live) in &live_sets {
            let (storage, drift) =
                storage::effective_storage(live.as_ref(), &spec.cluster(*role).storage);
            warnings.extend(drift);
            effective.insert(*role, storage);
        }
        for warning in &warnings {
            warn!(%warning, "Ignoring change to immutable field");
        }

        let mut desired = DesiredResources::for_spec(&spec, |role| {
            effective
                .get(&role)
                .cloned()
                .unwrap_or_else(|| spec.cluster(role).storage.clone())
        });
        for role in Role::CLUSTERED {
            if !live_sets.contains_key(&role) {
                desired.stateful_sets.remove(&cluster_name(id.name(), role));
            }
        }

        debug!(resources = desired.len(), "Applying desired resources");
        let applied = self.apply(namespace, desired, &mut outcomes).await;

        for (role, live) in &live_sets {
            let cluster = cluster_name(id.name(), *role);
            if !applied.contains(&(Kind::StatefulSet, cluster.clone())) {
                continue;
            }
            let to = spec.cluster(*role).replicas;
            if let Some(from) = live.as_ref().map(|set| set.spec.replicas) {
                if to < from {
                    info!(cluster = %cluster, from, to, "Scaled down");
                }
            }
            let Some(storage) = effective.get(role).filter(|s| s.deletes_claims()) else {
                continue;
            };
            match self.existing_claims(id, *role).await {
                Ok(existing) => {
                    let released = storage::claims_beyond(storage, &existing, to);
                    self.release(namespace, released, &mut outcomes).await;
                }
                Err(failure) => outcomes.fail(failure),
            }
        }

        let records = match outcomes.finish() {
            Ok(records) => records,
            Err(failures) => {
                let spec = Some(Box::new(spec));
                return Err(AssemblyError::Incomplete { failures, spec });
            }
        };

        Ok(ReconcileReport {
            id: id.clone(),
            branch: Branch::Present,
            records,
            warnings,
            spec: Some(spec),
            completed_at: Utc::now(),
        })
    }

    async fn reconcile_absent(
        &self,
        id: &AssemblyId,
        ctx: &ReconcileContext,
    ) -> AssemblyResult<ReconcileReport> {
        let namespace = id.namespace();
        let mut outcomes = OutcomeCollector::new();

        // Claims to release per workload set, once that set is gone.
        let mut pending_claims: Vec<(String, Vec<String>)> = Vec::new();
        for role in Role::CLUSTERED {
            let cluster = cluster_name(id.name(), role);
            let live = match self.stateful_sets.get(namespace, &cluster).await {
                Ok(live) => live,
                Err(failure) => {
                    outcomes.fail(failure);
                    None
                }
            };
            let snapshot = ctx.last_known.as_ref().map(|spec| spec.cluster(role));

            let storage = snapshot
                .map(|c| c.storage.clone())
                .or_else(|| live.as_ref().map(storage::recorded_storage));
            let replicas = snapshot
                .map(|c| c.replicas)
                .max(live.as_ref().map(|set| set.spec.replicas));

            match (storage, replicas) {
                (Some(storage), Some(replicas)) => {
                    let mut claims =
                        storage::claims_released_on_delete(&cluster, &storage, replicas);
                    if storage.deletes_claims() {
                        // Also catch claims beyond the known replica count.
                        match self.existing_claims(id, role).await {
                            Ok(existing) => {
                                claims.extend(storage::claims_beyond(&storage, &existing, replicas))
                            }
                            Err(failure) => outcomes.fail(failure),
                        }
                    } else if storage.is_claim_managed() {
                        info!(
                            cluster = %cluster,
                            replicas,
                            "Keeping claims (delete-claim is false)"
                        );
                    }
                    pending_claims.push((cluster, claims));
                }
                _ => warn!(
                    cluster = %cluster,
                    "No last-known spec or live workload set; keeping any claims"
                ),
            }
        }

        let applied = self
            .apply(namespace, DesiredResources::absent(id.name()), &mut outcomes)
            .await;

        for (cluster, claims) in pending_claims {
            if applied.contains(&(Kind::StatefulSet, cluster)) {
                self.release(namespace, claims, &mut outcomes).await;
            }
        }

        let records = outcomes
            .finish()
            .map_err(|failures| AssemblyError::Incomplete {
                failures,
                spec: None,
            })?;

        Ok(ReconcileReport {
            id: id.clone(),
            branch: Branch::Absent,
            records,
            warnings: Vec::new(),
            spec: None,
            completed_at: Utc::now(),
        })
    }

    /// Converge every resource in `desired` and record each outcome.
    ///
    /// Returns the resources that converged.
    async fn apply(
        &self,
        namespace: &str,
        desired: DesiredResources,
        outcomes: &mut OutcomeCollector,
    ) -> BTreeSet<(Kind, String)> {
        let mut fan_out = FanOut::new(Arc::clone(&self.permits));
        fan_out.spawn_all(&self.config_maps, namespace, desired.config_maps);
        fan_out.spawn_all(&self.services, namespace, desired.services);
        fan_out.spawn_all(&self.stateful_sets, namespace, desired.stateful_sets);
        fan_out.spawn_all(&self.deployments, namespace, desired.deployments);
        fan_out.join(namespace, outcomes).await
    }

    async fn existing_claims(
        &self,
        id: &AssemblyId,
        role: Role,
    ) -> Result<BTreeMap<u32, String>, OperationFailure> {
        self.index
            .claims_of(id.namespace(), id.name(), role)
            .await
            .map_err(|e| OperationFailure {
                kind: PersistentVolumeClaim::KIND.as_str(),
                namespace: id.namespace().to_string(),
                name: cluster_name(id.name(), role),
                attempt: Attempt::Read,
                message: e.to_string(),
            })
    }

    async fn release(&self, namespace: &str, claims: Vec<String>, outcomes: &mut OutcomeCollector) {
        for (claim, result) in self.storage.release_claims(namespace, claims).await {
            outcomes.record(PersistentVolumeClaim::KIND.as_str(), claim, result);
        }
    }
}

type TaskOutput = (Kind, String, Result<Applied, OperationFailure>);

/// One task per resource, bounded by a shared semaphore.
struct FanOut {
    permits: Arc<Semaphore>,
    tasks: JoinSet<TaskOutput>,
    /// What each task was doing, for tasks that panic.
    inflight: HashMap<TaskId, (Kind, String, Attempt)>,
}

impl FanOut {
    fn new(permits: Arc<Semaphore>) -> Self {
        Self {
            permits,
            tasks: JoinSet::new(),
            inflight: HashMap::new(),
        }
    }

    fn spawn_all<K: ResourceKind>(
        &mut self,
        operator: &ResourceOperator<K>,
        namespace: &str,
        resources: BTreeMap<String, Desired<K>>,
    ) {
        for (name, desired) in resources {
            let attempt = if desired.is_present() {
                Attempt::Patch
            } else {
                Attempt::Delete
            };
            let operator = operator.clone();
            let permits = Arc::clone(&self.permits);
            let namespace = namespace.to_string();
            let task_name = name.clone();

            let handle = self.tasks.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => operator.reconcile(&namespace, &task_name, desired).await,
                    Err(closed) => Err(OperationFailure {
                        kind: K::KIND.as_str(),
                        namespace,
                        name: task_name.clone(),
                        attempt,
                        message: closed.to_string(),
                    }),
                };
                (K::KIND, task_name, result)
            });
            self.inflight.insert(handle.id(), (K::KIND, name, attempt));
        }
    }

    async fn join(
        mut self,
        namespace: &str,
        outcomes: &mut OutcomeCollector,
    ) -> BTreeSet<(Kind, String)> {
        let mut converged = BTreeSet::new();

        while let Some(joined) = self.tasks.join_next_with_id().await {
            match joined {
                Ok((task_id, (kind, name, result))) => {
                    self.inflight.remove(&task_id);
                    if result.is_ok() {
                        converged.insert((kind, name.clone()));
                    }
                    outcomes.record(kind.as_str(), name, result);
                }
                Err(join_error) => {
                    let Some((kind, name, attempt)) = self.inflight.remove(&join_error.id())
                    else {
                        continue;
                    };
                    error!(
                        kind = %kind,
                        name = %name,
                        error = %join_error,
                        "Resource task aborted"
                    );
                    outcomes.fail(OperationFailure {
                        kind: kind.as_str(),
                        namespace: namespace.to_string(),
                        name,
                        attempt,
                        message: join_error.to_string(),
                    });
                }
            }
        }

        converged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{InMemoryPlatform, PlatformOp};
    use crate::resources::ObjectMeta;
    use assembly_model::keys;
    use assembly_reconcile::Action;

    fn id() -> AssemblyId {
        AssemblyId::new("ns", "c").unwrap()
    }

    fn source(pairs: &[(&str, &str)]) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta::new("ns", "c", Labels::spec_sources()),
            data: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    async fn setup(pairs: &[(&str, &str)]) -> (Arc<InMemoryPlatform>, AssemblyReconciler) {
        let platform = Arc::new(InMemoryPlatform::new());
        platform.insert(source(pairs).into_resource()).await;
        let reconciler = AssemblyReconciler::new(platform.clone(), 4);
        (platform, reconciler)
    }

    #[tokio::test]
    async fn test_present_creates_everything() {
        let (platform, reconciler) = setup(&[(keys::TOPIC_CONTROLLER_CONFIG, "{}")]).await;

        let report = reconciler
            .reconcile_assembly(&id(), &ReconcileContext::new("test"))
            .await
            .unwrap();

        assert_eq!(report.branch, Branch::Present);
        assert_eq!(report.writes(), 9);
        assert_eq!(platform.write_count(), 9);
        assert!(report
            .records_for(Kind::StatefulSet)
            .all(|r| r.action == Action::Created));
    }

    #[tokio::test]
    async fn test_unlabelled_source_takes_absent_branch() {
        let platform = Arc::new(InMemoryPlatform::new());
        let mut cm = source(&[]);
        cm.metadata.labels = Labels::new();
        platform.insert(cm.into_resource()).await;
        let reconciler = AssemblyReconciler::new(platform.clone(), 4);

        let report = reconciler
            .reconcile_assembly(&id(), &ReconcileContext::default())
            .await
            .unwrap();
        assert_eq!(report.branch, Branch::Absent);
        assert_eq!(report.writes(), 0);
    }

    #[tokio::test]
    async fn test_parse_failure_writes_nothing() {
        let (platform, reconciler) = setup(&[(keys::KAFKA_REPLICAS, "lots")]).await;

        let err = reconciler
            .reconcile_assembly(&id(), &ReconcileContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AssemblyError::SpecParse(_)));
        assert_eq!(platform.write_count(), 0);
    }

    #[tokio::test]
    async fn test_unreadable_source() {
        let (platform, reconciler) = setup(&[]).await;
        platform.fail_on(Kind::ConfigMap, PlatformOp::Get).await;

        let err = reconciler
            .reconcile_assembly(&id(), &ReconcileContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AssemblyError::SpecSource(_)));
        assert_eq!(platform.write_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_on_one_kind_does_not_stop_others() {
        let (platform, reconciler) = setup(&[]).await;
        platform.fail_on(Kind::Service, PlatformOp::Create).await;

        let err = reconciler
            .reconcile_assembly(&id(), &ReconcileContext::default())
            .await
            .unwrap_err();

        let AssemblyError::Incomplete { failures, spec } = &err else {
            panic!("expected incomplete, got {err}");
        };
        assert_eq!(failures.len(), 4);
        assert_eq!(spec.as_ref().map(|s| s.id.clone()), Some(id()));
        assert!(failures.iter().all(|f| f.kind == "Service"));
        assert!(err
            .to_string()
            .starts_with("4 sub-operation(s) failed; first: failed to create Service"));

        assert_eq!(platform.names(Kind::StatefulSet, "ns").await.len(), 2);
        assert_eq!(platform.names(Kind::ConfigMap, "ns").await.len(), 3);
    }

    #[tokio::test]
    async fn test_unreadable_set_skips_that_role() {
        let (platform, reconciler) = setup(&[]).await;
        platform.fail_on(Kind::StatefulSet, PlatformOp::Get).await;

        let err = reconciler
            .reconcile_assembly(&id(), &ReconcileContext::default())
            .await
            .unwrap_err();
        let AssemblyError::Incomplete { failures, .. } = err else {
            panic!("expected incomplete");
        };
        assert_eq!(failures.len(), 2);
        assert!(platform.names(Kind::StatefulSet, "ns").await.is_empty());
        assert_eq!(platform.names(Kind::Service, "ns").await.len(), 4);
    }
}
