//! # assembly-naming
//!
//! Assembly identities and the deterministic naming scheme for derived
//! resources.
//!
//! ## Design Principles
//!
//! - Resource names are a pure function of the assembly name, the
//!   sub-component role and (for members and claims) the replica index
//! - No ownership index is stored anywhere; the name is the only link
//!   between an assembly and the resources derived from it
//! - Identities have a canonical `namespace/name` form with strict parsing
//!
//! ## Naming Scheme
//!
//! For an assembly called `my-cluster`:
//!
//! - `my-cluster-kafka`, `my-cluster-kafka-headless`
//! - `my-cluster-zookeeper`, `my-cluster-zookeeper-headless`
//! - `my-cluster-kafka-metrics-config`
//! - `my-cluster-topic-controller`
//! - `my-cluster-kafka-0` (member), `data-my-cluster-kafka-0` (claim)

mod error;
mod names;
mod types;

pub use error::NamingError;
pub use names::*;
pub use types::*;
