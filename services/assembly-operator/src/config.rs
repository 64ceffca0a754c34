//! Configuration for the assembly operator.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use assembly_reconcile::DEFAULT_RECONCILE_INTERVAL;

use crate::platform::Scope;

/// Operator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace to watch; `None` means all namespaces.
    pub namespace: Option<String>,

    /// Interval between reconcile-all sweeps.
    pub reconcile_interval: Duration,

    /// Assemblies reconciled at once within a sweep.
    pub max_concurrent_reconciles: usize,

    /// Resource operations run at once within one reconcile.
    pub max_concurrent_operations: usize,

    /// Log level (trace, debug, info, warn, error), used when `RUST_LOG` is unset.
    pub log_level: String,

    /// JSON file of spec sources to preload into the in-memory platform.
    pub seed_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let namespace = lookup("ASSEMBLY_NAMESPACE").filter(|ns| !ns.is_empty());

        let reconcile_interval = lookup("ASSEMBLY_RECONCILE_INTERVAL_SECS")
            .map(|v| v.parse::<u64>().map(Duration::from_secs))
            .transpose()
            .context("invalid ASSEMBLY_RECONCILE_INTERVAL_SECS")?
            .unwrap_or(DEFAULT_RECONCILE_INTERVAL);

        let max_concurrent_reconciles = lookup("ASSEMBLY_MAX_CONCURRENT_RECONCILES")
            .map(|v| v.parse::<usize>())
            .transpose()
            .context("invalid ASSEMBLY_MAX_CONCURRENT_RECONCILES")?
            .unwrap_or(4);

        let max_concurrent_operations = lookup("ASSEMBLY_MAX_CONCURRENT_OPERATIONS")
            .map(|v| v.parse::<usize>())
            .transpose()
            .context("invalid ASSEMBLY_MAX_CONCURRENT_OPERATIONS")?
            .unwrap_or(8);

        let log_level = lookup("ASSEMBLY_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let seed_file = lookup("ASSEMBLY_SEED_FILE").map(PathBuf::from);

        Ok(Self {
            namespace,
            reconcile_interval,
            max_concurrent_reconciles,
            max_concurrent_operations,
            log_level,
            seed_file,
        })
    }

    /// The namespaces sweeps cover.
    pub fn scope(&self) -> Scope {
        match &self.namespace {
            Some(ns) => Scope::Namespace(ns.clone()),
            None => Scope::AllNamespaces,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.scope(), Scope::AllNamespaces);
        assert_eq!(config.reconcile_interval, Duration::from_secs(30));
        assert_eq!(config.max_concurrent_reconciles, 4);
        assert_eq!(config.max_concurrent_operations, 8);
        assert_eq!(config.log_level, "info");
        assert!(config.seed_file.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("ASSEMBLY_NAMESPACE", "kafka"),
            ("ASSEMBLY_RECONCILE_INTERVAL_SECS", "5"),
            ("ASSEMBLY_MAX_CONCURRENT_OPERATIONS", "2"),
        ]))
        .unwrap();
        assert_eq!(config.scope(), Scope::Namespace("kafka".into()));
        assert_eq!(config.reconcile_interval, Duration::from_secs(5));
        assert_eq!(config.max_concurrent_operations, 2);
    }

    #[test]
    fn test_invalid_number_is_an_error() {
        let err = Config::from_lookup(lookup(&[("ASSEMBLY_MAX_CONCURRENT_RECONCILES", "many")]))
            .unwrap_err();
        assert!(err.to_string().contains("ASSEMBLY_MAX_CONCURRENT_RECONCILES"));
    }
}
