//! Error types for spec-source parsing.

use assembly_naming::Role;
use thiserror::Error;

/// Errors raised while parsing a spec source into an [`AssemblySpec`](crate::AssemblySpec).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// The replica count is not a positive integer.
    #[error("invalid {role} replica count '{value}': {reason}")]
    InvalidReplicas {
        role: Role,
        value: String,
        reason: String,
    },

    /// The storage configuration is invalid.
    #[error("invalid {role} storage: {reason}")]
    InvalidStorage { role: Role, reason: String },

    /// A JSON-valued key could not be parsed.
    #[error("invalid JSON under key '{key}': {reason}")]
    InvalidJson { key: &'static str, reason: String },

    /// A required field is missing.
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}
