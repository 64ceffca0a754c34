//! Reconcile-all background worker.
//!
//! Runs a reconcile-all sweep on a periodic interval. Sweeps run one after
//! another, so no identity is ever reconciled twice at once.

use std::sync::Arc;
use std::time::Duration;

use assembly_model::Labels;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument, warn};

use super::reconciler::{KnownAssemblies, ReconcileAllScheduler, SweepReport};
use crate::platform::{PlatformApi, Scope};

/// Worker that runs reconcile-all sweeps until shutdown.
pub struct ReconcileWorker {
    scheduler: ReconcileAllScheduler,
    selector: Labels,
    scope: Scope,
    interval: Duration,
    known: Mutex<KnownAssemblies>,
}

impl ReconcileWorker {
    /// Create a new worker sweeping spec sources in `scope`.
    pub fn new(
        platform: Arc<dyn PlatformApi>,
        scope: Scope,
        interval: Duration,
        max_concurrent_reconciles: usize,
        max_concurrent_operations: usize,
    ) -> Self {
        Self {
            scheduler: ReconcileAllScheduler::new(
                platform,
                max_concurrent_reconciles,
                max_concurrent_operations,
            ),
            selector: Labels::spec_sources(),
            scope,
            interval,
            known: Mutex::new(KnownAssemblies::new()),
        }
    }

    /// Run the worker until shutdown is signaled.
    ///
    /// The first sweep runs immediately.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            scope = %self.scope,
            "Starting reconcile worker"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.sweep().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Reconcile worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Run a single sweep and fold its outcomes into the known set.
    pub async fn sweep(&self) -> SweepReport {
        let mut known = self.known.lock().await;
        let report = self
            .scheduler
            .reconcile_all(&self.selector, &self.scope, &known)
            .await;
        known.apply(&report);
        debug!(known = known.len(), "Known assemblies updated");

        for (id, error) in report.failed() {
            warn!(assembly = %id, error = %error, "Assembly not converged; retrying next sweep");
        }
        report
    }

    /// A copy of the known assemblies.
    pub async fn known(&self) -> KnownAssemblies {
        self.known.lock().await.clone()
    }
}
