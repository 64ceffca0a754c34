//! Assembly operator library.
//!
//! The operator keeps each declared assembly (a ZooKeeper ensemble, a Kafka
//! cluster and an optional topic controller) converged with the resources of
//! a cluster-management platform.
//!
//! ## Architecture
//!
//! ```text
//! ReconcileWorker            (periodic sweeps, owns the known-assemblies set)
//! └── ReconcileAllScheduler  (enumerates identities via AssemblyIndex)
//!     └── AssemblyReconciler (one convergence pass per identity)
//!         ├── ResourceOperator<K>  (generic per-kind create/patch/delete)
//!         └── StorageLifecycle     (per-replica claims, delete-claim policy)
//! ```
//!
//! The binary ships a `main.rs`; this library surface exists for integration
//! testing and reuse.

pub mod assembly;
pub mod builders;
pub mod config;
pub mod index;
pub mod platform;
pub mod resources;
pub mod scheduler;
pub mod storage;

pub use assembly::{AssemblyError, AssemblyReconciler, Branch, ReconcileContext, ReconcileReport};
pub use index::AssemblyIndex;
pub use platform::{InMemoryPlatform, PlatformApi, PlatformError, Scope};
pub use scheduler::{KnownAssemblies, ReconcileAllScheduler, ReconcileWorker, SweepReport};
