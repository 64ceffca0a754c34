//! Reconcile-all scheduling.
//!
//! The scheduler is responsible for:
//! - Enumerating assemblies by spec source and by derived-resource ownership
//! - Running one reconcile per identity per sweep, bounded in concurrency
//! - Tracking known assemblies and their last reconciled specs across sweeps

mod reconciler;
mod worker;

pub use reconciler::{KnownAssemblies, ReconcileAllScheduler, SweepReport};
pub use worker::ReconcileWorker;
