//! Reconciliation primitives.
//!
//! This library provides the vocabulary shared by every per-kind resource
//! operator and by the assembly-level reconciler:
//!
//! - **Desired state**: a resource is either wanted with a given manifest or
//!   wanted gone ([`Desired`]).
//! - **Action**: what a single operator call did to converge ([`Action`]).
//! - **Aggregation**: sub-operation outcomes are collected and surfaced once
//!   per reconcile ([`OutcomeCollector`]).
//!
//! # Invariants
//!
//! - All operations are idempotent
//! - Decisions are deterministic given the same inputs
//! - A failed sub-operation never prevents the others from being attempted,
//!   and nothing already applied is rolled back

use std::fmt;
use std::time::Duration;

use sha2::{Digest, Sha256};
use thiserror::Error;

// =============================================================================
// Desired state
// =============================================================================

/// The desired state of one resource.
#[derive(Debug, Clone, PartialEq)]
pub enum Desired<T> {
    /// The resource should exist and match this manifest.
    Present(T),
    /// The resource should not exist.
    Absent,
}

impl<T> Desired<T> {
    /// Returns true if the resource should exist.
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    /// Converts from `Option`.
    pub fn from_option(value: Option<T>) -> Self {
        match value {
            Some(v) => Self::Present(v),
            None => Self::Absent,
        }
    }
}

// =============================================================================
// Actions and outcomes
// =============================================================================

/// What a single operator call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// The resource was absent and has been created.
    Created,
    /// The resource existed with different mutable fields and has been patched.
    Patched,
    /// The resource already matched.
    Unchanged,
    /// The resource existed and has been deleted.
    Deleted,
    /// The resource was already absent.
    AlreadyAbsent,
}

impl Action {
    /// Returns true if the action performed a platform write.
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Created | Self::Patched | Self::Deleted)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Patched => "patched",
            Self::Unchanged => "unchanged",
            Self::Deleted => "deleted",
            Self::AlreadyAbsent => "already_absent",
        })
    }
}

/// The platform call a failed operation was attempting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    Read,
    Create,
    Patch,
    Delete,
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Create => "create",
            Self::Patch => "patch",
            Self::Delete => "delete",
        })
    }
}

/// Successful result of one operator call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub action: Action,
    /// Immutable fields whose desired value differed from the live object
    /// and was therefore ignored.
    pub retained: Vec<&'static str>,
}

impl Applied {
    /// An outcome with no retained fields.
    pub fn new(action: Action) -> Self {
        Self {
            action,
            retained: Vec::new(),
        }
    }
}

/// A single resource operation that failed against the platform.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to {attempt} {kind} {namespace}/{name}: {message}")]
pub struct OperationFailure {
    pub kind: &'static str,
    pub namespace: String,
    pub name: String,
    pub attempt: Attempt,
    pub message: String,
}

/// A record of one sub-operation that succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRecord {
    pub kind: &'static str,
    pub name: String,
    pub action: Action,
}

/// A requested change that was not applied because the field is immutable.
///
/// Non-fatal: the reconcile still succeeds, but the effective state differs
/// from what the spec asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftWarning {
    pub kind: &'static str,
    pub name: String,
    pub field: &'static str,
    pub requested: String,
    pub effective: String,
}

impl fmt::Display for DriftWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: immutable field '{}' kept as '{}' (requested '{}')",
            self.kind, self.name, self.field, self.effective, self.requested
        )
    }
}

/// Collects sub-operation outcomes for one reconcile.
#[derive(Debug, Default)]
pub struct OutcomeCollector {
    records: Vec<OperationRecord>,
    failures: Vec<OperationFailure>,
}

impl OutcomeCollector {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the result of one operator call.
    pub fn record(
        &mut self,
        kind: &'static str,
        name: impl Into<String>,
        result: Result<Applied, OperationFailure>,
    ) {
        match result {
            Ok(applied) => self.records.push(OperationRecord {
                kind,
                name: name.into(),
                action: applied.action,
            }),
            Err(failure) => self.failures.push(failure),
        }
    }

    /// Record a failure that did not come from an operator call.
    pub fn fail(&mut self, failure: OperationFailure) {
        self.failures.push(failure);
    }

    /// Consume the collector: all records if nothing failed, otherwise every failure.
    pub fn finish(self) -> Result<Vec<OperationRecord>, Vec<OperationFailure>> {
        if self.failures.is_empty() {
            Ok(self.records)
        } else {
            Err(self.failures)
        }
    }
}

// =============================================================================
// Spec hashing
// =============================================================================

/// A spec hash for deterministic comparison.
///
/// Used to decide whether the mutable projection of a live resource differs
/// from the desired one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpecHash(String);

impl SpecHash {
    /// Compute a spec hash from canonical JSON.
    pub fn from_json(json: &serde_json::Value) -> Self {
        let canonical = canonical_json(json);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let result = hasher.finalize();
        Self(format!("sha256:{}", hex::encode(&result[..16]))) // First 16 bytes (128 bits)
    }

    /// Get the hash string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpecHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Produce canonical JSON (sorted keys, no extra whitespace).
fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut pairs: Vec<_> = map.iter().collect();
            pairs.sort_by_key(|(k, _)| *k);
            let inner: Vec<String> = pairs
                .iter()
                .map(|(k, v)| format!("\"{}\":{}", escape_json_string(k), canonical_json(v)))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        serde_json::Value::Array(arr) => {
            let inner: Vec<String> = arr.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        serde_json::Value::String(s) => format!("\"{}\"", escape_json_string(s)),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => "null".to_string(),
    }
}

fn escape_json_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}

/// Default reconciliation interval.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(30);
