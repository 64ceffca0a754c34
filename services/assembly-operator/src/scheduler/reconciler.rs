//! Reconcile-all sweeps.
//!
//! A sweep:
//! - Enumerates spec sources matching the selector (present identities)
//! - Enumerates identities that still own derived resources
//! - Reconciles every present identity and every known or owning identity
//!   whose spec source is gone, each exactly once

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use assembly_model::{AssemblySpec, Labels};
use assembly_naming::AssemblyId;
use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use crate::assembly::{
    AssemblyError, AssemblyReconciler, AssemblyResult, Branch, ReconcileContext, ReconcileReport,
};
use crate::index::AssemblyIndex;
use crate::platform::{PlatformApi, PlatformError, Scope};

/// Identities the caller has seen, with the last spec each reconciled with.
///
/// The absent branch reads delete-claim policies from these snapshots.
#[derive(Debug, Clone, Default)]
pub struct KnownAssemblies {
    specs: BTreeMap<AssemblyId, Option<AssemblySpec>>,
}

impl KnownAssemblies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `spec` as the last known spec of its identity.
    pub fn remember(&mut self, spec: AssemblySpec) {
        self.specs.insert(spec.id.clone(), Some(spec));
    }

    /// Track an identity without a spec snapshot.
    pub fn track(&mut self, id: AssemblyId) {
        self.specs.entry(id).or_default();
    }

    /// Stop tracking an identity. Returns true if it was known.
    pub fn forget(&mut self, id: &AssemblyId) -> bool {
        self.specs.remove(id).is_some()
    }

    pub fn last_known(&self, id: &AssemblyId) -> Option<&AssemblySpec> {
        self.specs.get(id).and_then(Option::as_ref)
    }

    pub fn contains(&self, id: &AssemblyId) -> bool {
        self.specs.contains_key(id)
    }

    pub fn identities(&self) -> impl Iterator<Item = &AssemblyId> {
        self.specs.keys()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Fold a sweep's outcomes in.
    ///
    /// Present-branch reconciles that got past parsing are remembered, even
    /// when some sub-operation failed, so a later deletion uses the newest
    /// delete-claim policy. Successful absent-branch reconciles are
    /// forgotten. Any other failure leaves the entry as it was.
    pub fn apply(&mut self, sweep: &SweepReport) {
        for (id, outcome) in &sweep.outcomes {
            match outcome {
                Ok(report) => match (report.branch, &report.spec) {
                    (Branch::Present, Some(spec)) => self.remember(spec.clone()),
                    (Branch::Present, None) => self.track(id.clone()),
                    (Branch::Absent, _) => {
                        self.forget(id);
                    }
                },
                Err(AssemblyError::Incomplete {
                    spec: Some(spec),
                    ..
                }) => self.remember(spec.as_ref().clone()),
                Err(_) => {}
            }
        }
    }
}

/// Outcome of one reconcile-all sweep.
#[derive(Debug)]
pub struct SweepReport {
    pub started_at: DateTime<Utc>,
    pub outcomes: BTreeMap<AssemblyId, AssemblyResult<ReconcileReport>>,
    /// Set when spec sources could not be listed; nothing was reconciled.
    pub enumeration_error: Option<PlatformError>,
}

impl SweepReport {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            outcomes: BTreeMap::new(),
            enumeration_error: None,
        }
    }

    /// Identities whose reconcile fully succeeded.
    pub fn succeeded(&self) -> impl Iterator<Item = &AssemblyId> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_ok())
            .map(|(id, _)| id)
    }

    /// Identities whose reconcile failed, with the error.
    pub fn failed(&self) -> impl Iterator<Item = (&AssemblyId, &AssemblyError)> {
        self.outcomes
            .iter()
            .filter_map(|(id, outcome)| outcome.as_ref().err().map(|e| (id, e)))
    }

    /// Number of identities that took `branch` successfully.
    pub fn count(&self, branch: Branch) -> usize {
        self.outcomes
            .values()
            .filter(|outcome| matches!(outcome, Ok(report) if report.branch == branch))
            .count()
    }

    /// Returns true if every identity reconciled and enumeration worked.
    pub fn is_clean(&self) -> bool {
        self.enumeration_error.is_none() && self.outcomes.values().all(Result::is_ok)
    }
}

/// Drives [`AssemblyReconciler`] for every assembly matching a selector.
pub struct ReconcileAllScheduler {
    index: AssemblyIndex,
    reconciler: Arc<AssemblyReconciler>,

    /// Bounds concurrent assembly reconciles within one sweep.
    permits: Arc<Semaphore>,
}

impl ReconcileAllScheduler {
    /// Create a new scheduler.
    pub fn new(
        platform: Arc<dyn PlatformApi>,
        max_concurrent_reconciles: usize,
        max_concurrent_operations: usize,
    ) -> Self {
        Self {
            index: AssemblyIndex::new(Arc::clone(&platform)),
            reconciler: Arc::new(AssemblyReconciler::new(platform, max_concurrent_operations)),
            permits: Arc::new(Semaphore::new(max_concurrent_reconciles.max(1))),
        }
    }

    /// Reconcile every assembly in `scope` once.
    ///
    /// Present identities are the spec sources matching `selector`. Absent
    /// identities are those in `known` or owning derived resources, minus the
    /// present ones.
    #[instrument(skip(self, selector, scope, known), fields(scope = %scope, selector = %selector))]
    pub async fn reconcile_all(
        &self,
        selector: &Labels,
        scope: &Scope,
        known: &KnownAssemblies,
    ) -> SweepReport {
        let mut sweep = SweepReport::new();

        let (present, owners) = tokio::join!(
            self.index.spec_sources(scope, selector),
            self.index.owners_of_derived(scope),
        );
        let present = match present {
            Ok(present) => present,
            Err(e) => {
                error!(error = %e, "Failed to list spec sources; skipping sweep");
                sweep.enumeration_error = Some(e);
                return sweep;
            }
        };
        let owners = owners.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to list derived resources; using known identities only");
            BTreeSet::new()
        });

        let absent: BTreeSet<AssemblyId> = known
            .identities()
            .filter(|id| scope.includes(id.namespace()))
            .cloned()
            .chain(owners)
            .filter(|id| !present.contains(id))
            .collect();

        info!(
            present = present.len(),
            absent = absent.len(),
            "Starting reconcile-all sweep"
        );

        let mut tasks = JoinSet::new();
        let mut inflight = HashMap::new();
        for id in present.into_iter().chain(absent) {
            let reconciler = Arc::clone(&self.reconciler);
            let permits = Arc::clone(&self.permits);
            let ctx =
                ReconcileContext::new("sweep").with_last_known(known.last_known(&id).cloned());
            let task_id = id.clone();

            let handle = tasks.spawn(async move {
                // The semaphore is never closed; a missing permit only lifts the bound.
                let _permit = permits.acquire_owned().await.ok();
                let outcome = reconciler.reconcile_assembly(&task_id, &ctx).await;
                (task_id, outcome)
            });
            inflight.insert(handle.id(), id);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((task, (id, outcome))) => {
                    inflight.remove(&task);
                    sweep.outcomes.insert(id, outcome);
                }
                Err(join_error) => {
                    let Some(id) = inflight.remove(&join_error.id()) else {
                        continue;
                    };
                    error!(assembly = %id, error = %join_error, "Reconcile task aborted");
                    sweep
                        .outcomes
                        .insert(id, Err(AssemblyError::Aborted(join_error.to_string())));
                }
            }
        }

        info!(
            reconciled = sweep.succeeded().count(),
            failed = sweep.failed().count(),
            "Reconcile-all sweep complete"
        );
        sweep
    }
}
