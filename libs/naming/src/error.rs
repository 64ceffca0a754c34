//! Error types for identity parsing and name validation.

use thiserror::Error;

/// Errors that can occur when parsing identities or validating names.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NamingError {
    /// The input string is empty.
    #[error("identity cannot be empty")]
    Empty,

    /// The identity is missing the `/` separator between namespace and name.
    #[error("identity missing '/' separator: {0}")]
    MissingSeparator(String),

    /// A namespace or name is not a valid DNS-1123 label.
    #[error("invalid {field} '{value}': {reason}")]
    InvalidLabel {
        field: &'static str,
        value: String,
        reason: &'static str,
    },

    /// The role string is unknown.
    #[error("unknown role: {0}")]
    UnknownRole(String),
}

impl NamingError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, NamingError::Empty)
    }
}
