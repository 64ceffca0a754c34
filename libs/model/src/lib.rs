//! # assembly-model
//!
//! The typed assembly specification consumed by the reconciler.
//!
//! ## Design Principles
//!
//! - A spec source is a flat key/value map (the data of a config object);
//!   nested settings such as storage are JSON strings under a single key
//! - Parsing is all-or-nothing: a malformed source yields a [`ModelError`]
//!   and nothing downstream is attempted
//! - A parsed [`AssemblySpec`] is immutable for the duration of one reconcile
//!
//! ## Spec Source Keys
//!
//! See [`keys`] for the full list. Per clustered role there is a replica
//! count, a storage JSON object, a metrics blob and an image; the topic
//! controller has a single optional config blob.

mod error;
mod labels;
mod spec;
mod storage;

pub use error::ModelError;
pub use labels::*;
pub use spec::*;
pub use storage::*;
