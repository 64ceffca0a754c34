//! Platform API interface.
//!
//! The platform API abstracts the cluster-management platform that stores
//! resources:
//! - Point reads, creates, patches and deletes by kind and name
//! - Label-selector listing within a namespace or across all namespaces
//!
//! An in-memory implementation is provided for testing and local runs.

mod memory;

use std::fmt;

use assembly_model::Labels;
use async_trait::async_trait;
use thiserror::Error;

use crate::resources::{Kind, Resource};

pub use memory::{InMemoryPlatform, PlatformOp};

/// Errors returned by a platform implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: Kind,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: Kind,
        namespace: String,
        name: String,
    },

    #[error("invalid {kind} {name}: {reason}")]
    Invalid {
        kind: Kind,
        name: String,
        reason: String,
    },

    #[error("platform unavailable: {0}")]
    Unavailable(String),
}

impl PlatformError {
    /// Returns true if the error reports a missing resource.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type PlatformResult<T> = Result<T, PlatformError>;

/// The namespaces a list query covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Namespace(String),
    AllNamespaces,
}

impl Scope {
    /// Returns true if `namespace` is inside this scope.
    pub fn includes(&self, namespace: &str) -> bool {
        match self {
            Self::Namespace(ns) => ns == namespace,
            Self::AllNamespaces => true,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Namespace(ns) => f.write_str(ns),
            Self::AllNamespaces => f.write_str("*"),
        }
    }
}

/// Cluster-management platform interface.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// Read one resource; `Ok(None)` if it does not exist.
    async fn get(&self, kind: Kind, namespace: &str, name: &str)
        -> PlatformResult<Option<Resource>>;

    /// Create a resource. Fails with `AlreadyExists` if the name is taken.
    async fn create(&self, resource: Resource) -> PlatformResult<Resource>;

    /// Replace an existing resource. Fails with `NotFound` if it does not
    /// exist and `Invalid` if an immutable field changes.
    async fn patch(&self, resource: Resource) -> PlatformResult<Resource>;

    /// Delete a resource. Fails with `NotFound` if it does not exist.
    async fn delete(&self, kind: Kind, namespace: &str, name: &str) -> PlatformResult<()>;

    /// List resources of `kind` in `scope` whose labels match `selector`.
    async fn list(
        &self,
        kind: Kind,
        scope: &Scope,
        selector: &Labels,
    ) -> PlatformResult<Vec<Resource>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_includes() {
        assert!(Scope::AllNamespaces.includes("anything"));
        assert!(Scope::Namespace("a".into()).includes("a"));
        assert!(!Scope::Namespace("a".into()).includes("b"));
    }

    #[test]
    fn test_error_display() {
        let err = PlatformError::NotFound {
            kind: Kind::Service,
            namespace: "ns".into(),
            name: "svc".into(),
        };
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Service ns/svc not found");
    }
}
