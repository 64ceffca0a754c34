//! Identity types: assemblies and their sub-component roles.

use std::fmt;
use std::str::FromStr;

use crate::NamingError;

/// Maximum length of a DNS-1123 label.
pub const MAX_LABEL_LEN: usize = 63;

// =============================================================================
// Assembly Identity
// =============================================================================

/// The identity of one declared assembly: its namespace and name.
///
/// The canonical string form is `namespace/name`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AssemblyId {
    namespace: String,
    name: String,
}

impl AssemblyId {
    /// Creates an identity after validating both parts as DNS-1123 labels.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Result<Self, NamingError> {
        let namespace = namespace.into();
        let name = name.into();
        validate_label("namespace", &namespace)?;
        validate_label("name", &name)?;
        Ok(Self { namespace, name })
    }

    /// Parses an identity from its `namespace/name` form.
    pub fn parse(s: &str) -> Result<Self, NamingError> {
        if s.is_empty() {
            return Err(NamingError::Empty);
        }

        let Some((namespace, name)) = s.split_once('/') else {
            return Err(NamingError::MissingSeparator(s.to_string()));
        };

        Self::new(namespace, name)
    }

    /// Returns the namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the assembly name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for AssemblyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for AssemblyId {
    type Err = NamingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for AssemblyId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for AssemblyId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Validates a DNS-1123 label: lowercase alphanumerics and `-`, starting and
/// ending with an alphanumeric, at most 63 characters.
pub fn validate_label(field: &'static str, value: &str) -> Result<(), NamingError> {
    let invalid = |reason| NamingError::InvalidLabel {
        field,
        value: value.to_string(),
        reason,
    };

    if value.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if value.len() > MAX_LABEL_LEN {
        return Err(invalid("must be at most 63 characters"));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(invalid("must contain only lowercase alphanumerics and '-'"));
    }
    if value.starts_with('-') || value.ends_with('-') {
        return Err(invalid("must start and end with an alphanumeric"));
    }
    Ok(())
}

// =============================================================================
// Sub-component Role
// =============================================================================

/// The sub-component of an assembly a derived resource belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    /// The coordination-service ensemble.
    Zookeeper,
    /// The distributed-log brokers.
    Kafka,
    /// The companion management process.
    TopicController,
}

impl Role {
    /// Roles that run as stateful workload sets.
    pub const CLUSTERED: [Role; 2] = [Role::Zookeeper, Role::Kafka];

    /// Returns the role's name as used in resource names and labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Zookeeper => "zookeeper",
            Self::Kafka => "kafka",
            Self::TopicController => "topic-controller",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = NamingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "zookeeper" => Ok(Self::Zookeeper),
            "kafka" => Ok(Self::Kafka),
            "topic-controller" => Ok(Self::TopicController),
            other => Err(NamingError::UnknownRole(other.to_string())),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
