//! Label-selector queries over spec sources and derived resources.
//!
//! This is the only place that lists resources by selector. Everything else
//! addresses resources by their deterministic names.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use assembly_model::{label_keys, Labels};
use assembly_naming::{claim_index, cluster_name, AssemblyId, Role};
use futures_util::future::try_join;
use tracing::warn;

use crate::platform::{PlatformApi, PlatformResult, Scope};
use crate::resources::{Kind, Resource};

/// Enumerates assembly identities and the claims of their members.
#[derive(Clone)]
pub struct AssemblyIndex {
    platform: Arc<dyn PlatformApi>,
}

impl AssemblyIndex {
    pub fn new(platform: Arc<dyn PlatformApi>) -> Self {
        Self { platform }
    }

    /// Identities of the spec sources in `scope` matching `selector`.
    pub async fn spec_sources(
        &self,
        scope: &Scope,
        selector: &Labels,
    ) -> PlatformResult<BTreeSet<AssemblyId>> {
        let sources = self.platform.list(Kind::ConfigMap, scope, selector).await?;
        Ok(sources
            .iter()
            .filter_map(|source| {
                let meta = source.metadata();
                identity(&meta.namespace, &meta.name)
            })
            .collect())
    }

    /// Identities that still own a workload set or deployment in `scope`,
    /// read from the `assembly.io/cluster` label.
    pub async fn owners_of_derived(&self, scope: &Scope) -> PlatformResult<BTreeSet<AssemblyId>> {
        let selector = Labels::derived();
        let (sets, deployments) = try_join(
            self.platform.list(Kind::StatefulSet, scope, &selector),
            self.platform.list(Kind::Deployment, scope, &selector),
        )
        .await?;

        Ok(sets
            .iter()
            .chain(deployments.iter())
            .filter_map(owner_of)
            .collect())
    }

    /// Claims that currently exist for the `role` members of `assembly`,
    /// keyed by member index.
    pub async fn claims_of(
        &self,
        namespace: &str,
        assembly: &str,
        role: Role,
    ) -> PlatformResult<BTreeMap<u32, String>> {
        let cluster = cluster_name(assembly, role);
        let claims = self
            .platform
            .list(
                Kind::PersistentVolumeClaim,
                &Scope::Namespace(namespace.to_string()),
                &Labels::for_derived(assembly, role),
            )
            .await?;

        Ok(claims
            .iter()
            .filter_map(|claim| {
                let name = &claim.metadata().name;
                claim_index(&cluster, name).map(|index| (index, name.clone()))
            })
            .collect())
    }
}

fn owner_of(resource: &Resource) -> Option<AssemblyId> {
    let meta = resource.metadata();
    let owner = meta.labels.get(label_keys::CLUSTER)?;
    identity(&meta.namespace, owner)
}

fn identity(namespace: &str, name: &str) -> Option<AssemblyId> {
    match AssemblyId::new(namespace, name) {
        Ok(id) => Some(id),
        Err(e) => {
            warn!(namespace, name, error = %e, "Skipping resource with invalid assembly identity");
            None
        }
    }
}
