//! Engine configuration.
//!
//! All knobs are plain serde structs with defaults. Environment overrides:
//!
//! - `RECON_MAX_RETRIES`: retries per section (default: 3)
//! - `RECON_BASE_DELAY_MS`: exponential backoff base (default: 1000)
//! - `RECON_CALL_TIMEOUT_SECS`: per-call oracle deadline, `0` disables (default: 120)
//! - `RECON_MAX_CONCURRENCY`: sections reconstructed at once (default: 1)
//! - `RECON_VERSION_BUMP`: `patch`, `minor` or `major` (default: patch)

use serde::{Deserialize, Serialize};

use crate::canonical::canonical_hash_hex;
use crate::partition::PartitionPolicy;
use crate::retry::{BackoffStrategy, RetryPolicy};
use crate::version::Bump;

/// Error type for configuration loading.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable held an unusable value.
    #[error("Invalid value {value:?} for {var}")]
    Invalid {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },
}

/// Full configuration of a reconstruction engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-section retry policy.
    pub retry: RetryPolicy,
    /// Section sizing.
    pub partition: PartitionPolicy,
    /// Sections reconstructed concurrently. `1` is sequential.
    pub max_concurrency: usize,
    /// Version component bumped per run.
    pub version_bump: Bump,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            partition: PartitionPolicy::default(),
            max_concurrency: 1,
            version_bump: Bump::Patch,
        }
    }
}

impl EngineConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Defaults with overrides from an arbitrary lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(n) = parse_var::<u32>(&lookup, "RECON_MAX_RETRIES")? {
            config.retry.max_retries = n;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "RECON_BASE_DELAY_MS")? {
            config.retry.backoff = BackoffStrategy::Exponential { base_ms: ms };
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "RECON_CALL_TIMEOUT_SECS")? {
            config.retry.call_timeout_secs = (secs > 0).then_some(secs);
        }
        if let Some(n) = parse_var::<usize>(&lookup, "RECON_MAX_CONCURRENCY")? {
            if n == 0 {
                return Err(ConfigError::Invalid {
                    var: "RECON_MAX_CONCURRENCY",
                    value: n.to_string(),
                });
            }
            config.max_concurrency = n;
        }
        if let Some(raw) = lookup("RECON_VERSION_BUMP") {
            config.version_bump = Bump::parse(&raw).ok_or(ConfigError::Invalid {
                var: "RECON_VERSION_BUMP",
                value: raw,
            })?;
        }

        Ok(config)
    }

    /// Stable fingerprint of the configuration, recorded with every result.
    pub fn params_hash(&self) -> String {
        canonical_hash_hex(self)
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.max_concurrency, 1);
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn test_overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("RECON_MAX_RETRIES", "5"),
            ("RECON_BASE_DELAY_MS", "10"),
            ("RECON_CALL_TIMEOUT_SECS", "0"),
            ("RECON_MAX_CONCURRENCY", "4"),
            ("RECON_VERSION_BUMP", "Minor"),
        ]))
        .unwrap();
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.backoff, BackoffStrategy::Exponential { base_ms: 10 });
        assert_eq!(config.retry.call_timeout_secs, None);
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.version_bump, Bump::Minor);
    }

    #[test]
    fn test_invalid_values() {
        let err = EngineConfig::from_lookup(lookup(&[("RECON_MAX_RETRIES", "lots")])).unwrap_err();
        assert_eq!(err, ConfigError::Invalid { var: "RECON_MAX_RETRIES", value: "lots".into() });
        assert!(EngineConfig::from_lookup(lookup(&[("RECON_MAX_CONCURRENCY", "0")])).is_err());
        assert!(EngineConfig::from_lookup(lookup(&[("RECON_VERSION_BUMP", "huge")])).is_err());
    }

    #[test]
    fn test_params_hash_tracks_changes() {
        let a = EngineConfig::default();
        let mut b = EngineConfig::default();
        assert_eq!(a.params_hash(), b.params_hash());
        b.max_concurrency = 2;
        assert_ne!(a.params_hash(), b.params_hash());
    }
}
