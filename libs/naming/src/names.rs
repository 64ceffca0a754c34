//! The deterministic naming scheme.
//!
//! Every function here is pure: the same inputs always produce the same name,
//! which is what lets a reconcile recompute the full derived-resource set
//! without any stored bookkeeping.

use crate::Role;

/// Name of the volume-claim template inside a workload set.
pub const CLAIM_TEMPLATE_NAME: &str = "data";

/// Name of the workload set and client service for a clustered role.
#[must_use]
pub fn cluster_name(assembly: &str, role: Role) -> String {
    format!("{assembly}-{role}")
}

/// Name of the headless (per-member DNS) service for a clustered role.
#[must_use]
pub fn headless_name(assembly: &str, role: Role) -> String {
    format!("{assembly}-{role}-headless")
}

/// Name of the metrics config object for a clustered role.
#[must_use]
pub fn metrics_config_name(assembly: &str, role: Role) -> String {
    format!("{assembly}-{role}-metrics-config")
}

/// Name of the management deployment.
#[must_use]
pub fn controller_name(assembly: &str) -> String {
    format!("{assembly}-{}", Role::TopicController)
}

/// Name of the member at `index` of a workload set.
#[must_use]
pub fn member_name(cluster_name: &str, index: u32) -> String {
    format!("{cluster_name}-{index}")
}

/// Name of the volume claim backing the member at `index` of a workload set.
///
/// Matches what the platform provisions from the `data` claim template.
#[must_use]
pub fn claim_name(cluster_name: &str, index: u32) -> String {
    format!("{CLAIM_TEMPLATE_NAME}-{}", member_name(cluster_name, index))
}

/// Recovers the replica index from a member name, if it belongs to `cluster_name`.
#[must_use]
pub fn member_index(cluster_name: &str, member: &str) -> Option<u32> {
    member
        .strip_prefix(cluster_name)?
        .strip_prefix('-')?
        .parse()
        .ok()
}

/// Recovers the replica index from a claim name, if it belongs to `cluster_name`.
#[must_use]
pub fn claim_index(cluster_name: &str, claim: &str) -> Option<u32> {
    let member = claim.strip_prefix(CLAIM_TEMPLATE_NAME)?.strip_prefix('-')?;
    member_index(cluster_name, member)
}
