//! Platform resource model and the generic per-kind operator.
//!
//! Manifests are deliberately minimal: they carry only the fields the
//! reconciler derives from an assembly spec plus the few fields the platform
//! assigns itself (such as a service's cluster IP).

mod manifests;
mod operator;

use std::collections::BTreeMap;
use std::fmt;

use assembly_model::Labels;
use serde::{Deserialize, Serialize};

pub use manifests::*;
pub use operator::ResourceOperator;

/// Resource kinds known to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Kind {
    ConfigMap,
    Service,
    StatefulSet,
    Deployment,
    PersistentVolumeClaim,
    Pod,
}

impl Kind {
    /// Returns the kind's name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigMap => "ConfigMap",
            Self::Service => "Service",
            Self::StatefulSet => "StatefulSet",
            Self::Deployment => "Deployment",
            Self::PersistentVolumeClaim => "PersistentVolumeClaim",
            Self::Pod => "Pod",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifying metadata shared by every resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ObjectMeta {
    /// Metadata with the given identity and labels.
    pub fn new(namespace: &str, name: &str, labels: Labels) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            labels,
            annotations: BTreeMap::new(),
        }
    }
}

/// Any resource stored on the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Resource {
    ConfigMap(ConfigMap),
    Service(Service),
    StatefulSet(StatefulSet),
    Deployment(Deployment),
    PersistentVolumeClaim(PersistentVolumeClaim),
    Pod(Pod),
}

impl Resource {
    /// Returns the kind of this resource.
    pub fn kind(&self) -> Kind {
        match self {
            Self::ConfigMap(_) => Kind::ConfigMap,
            Self::Service(_) => Kind::Service,
            Self::StatefulSet(_) => Kind::StatefulSet,
            Self::Deployment(_) => Kind::Deployment,
            Self::PersistentVolumeClaim(_) => Kind::PersistentVolumeClaim,
            Self::Pod(_) => Kind::Pod,
        }
    }

    /// Returns the resource's metadata.
    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::ConfigMap(r) => &r.metadata,
            Self::Service(r) => &r.metadata,
            Self::StatefulSet(r) => &r.metadata,
            Self::Deployment(r) => &r.metadata,
            Self::PersistentVolumeClaim(r) => &r.metadata,
            Self::Pod(r) => &r.metadata,
        }
    }
}

/// A resource kind the reconciler manages through [`ResourceOperator`].
///
/// Each kind decides which of its fields are immutable once created. The
/// operator copies those from the live object before comparing, so a change
/// requested for an immutable field is never written.
pub trait ResourceKind: Clone + Serialize + Send + Sync + 'static {
    /// The platform kind.
    const KIND: Kind;

    /// Wraps into the platform's resource enum.
    fn into_resource(self) -> Resource;

    /// Unwraps from the platform's resource enum, if the kind matches.
    fn from_resource(resource: Resource) -> Option<Self>;

    /// Copies immutable fields from `live` into `self`.
    ///
    /// Returns the names of fields whose desired value was overridden.
    fn retain_immutable(&mut self, live: &Self) -> Vec<&'static str>;

    /// The projection compared to decide whether a patch is needed.
    ///
    /// After [`retain_immutable`](Self::retain_immutable) the immutable fields
    /// are equal on both sides, so the whole serialized manifest works.
    fn mutable_view(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
