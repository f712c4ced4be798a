// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

//! Probe configuration (strict parsing).
//!
//! ```yaml
//! enabled: true
//! targets:
//!   - { type_name: actor::ActorCell, method: invoke, kind: invoke }
//!   - { type_name: dispatch::Envelope, method: new, kind: envelope-create }
//! timestamps:
//!   sweep_interval: 4096
//! aggregator:
//!   stripes: 32
//!   cas_retry_limit: 64
//! sharding:
//!   number_of_shards: 100
//! ```
//!
//! Every section and field is optional; omitted values take the defaults
//! [`ProbeConfig::default`] reports. Unknown fields are rejected.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::instrument::Target;
use crate::metrics::{StripedCounter, TimerMetric};
use crate::shard::DEFAULT_NUMBER_OF_SHARDS;

pub fn load_from_file(path: impl AsRef<Path>) -> Result<ProbeConfig> {
    let path = path.as_ref();
    let s = fs::read_to_string(path).map_err(|e| {
        Error::configuration(format!("read config {} failed: {e}", path.display()))
    })?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<ProbeConfig> {
    let cfg: ProbeConfig =
        serde_yaml::from_str(s).map_err(|e| Error::configuration(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeConfig {
    /// When false, installation attaches nothing.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "Target::defaults")]
    pub targets: Vec<Target>,

    #[serde(default)]
    pub timestamps: TimestampConfig,

    #[serde(default)]
    pub aggregator: AggregatorConfig,

    #[serde(default)]
    pub sharding: ShardingConfig,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            targets: Target::defaults(),
            timestamps: TimestampConfig::default(),
            aggregator: AggregatorConfig::default(),
            sharding: ShardingConfig::default(),
        }
    }
}

impl ProbeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.targets.is_empty() {
            return Err(Error::configuration("targets must not be empty"));
        }
        for (i, target) in self.targets.iter().enumerate() {
            if target.type_name.is_empty() || target.method.is_empty() {
                return Err(Error::configuration(format!(
                    "targets[{i}] must name both type_name and method"
                )));
            }
        }

        self.timestamps.validate()?;
        self.aggregator.validate()?;
        self.sharding.validate()?;

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimestampConfig {
    /// Minimum insertions between sweeps of records whose envelope is gone.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: u64,
}

impl Default for TimestampConfig {
    fn default() -> Self {
        Self {
            sweep_interval: default_sweep_interval(),
        }
    }
}

impl TimestampConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval == 0 {
            return Err(Error::configuration(
                "timestamps.sweep_interval must be greater than 0",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregatorConfig {
    #[serde(default = "default_stripes")]
    pub stripes: usize,

    /// Attempts a min/max update makes before it is dropped.
    #[serde(default = "default_cas_retry_limit")]
    pub cas_retry_limit: u32,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            stripes: default_stripes(),
            cas_retry_limit: default_cas_retry_limit(),
        }
    }
}

impl AggregatorConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.stripes.is_power_of_two() {
            return Err(Error::configuration(
                "aggregator.stripes must be a power of two",
            ));
        }
        if self.cas_retry_limit == 0 {
            return Err(Error::configuration(
                "aggregator.cas_retry_limit must be greater than 0",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShardingConfig {
    /// Fixed for the lifetime of a deployment; changing it moves every entity.
    #[serde(default = "default_number_of_shards")]
    pub number_of_shards: u32,
}

impl Default for ShardingConfig {
    fn default() -> Self {
        Self {
            number_of_shards: default_number_of_shards(),
        }
    }
}

impl ShardingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.number_of_shards == 0 {
            return Err(Error::configuration(
                "sharding.number_of_shards must be greater than 0",
            ));
        }
        Ok(())
    }
}

fn default_enabled() -> bool {
    true
}
fn default_sweep_interval() -> u64 {
    4096
}
fn default_stripes() -> usize {
    StripedCounter::DEFAULT_STRIPES
}
fn default_cas_retry_limit() -> u32 {
    TimerMetric::DEFAULT_CAS_RETRY_LIMIT
}
fn default_number_of_shards() -> u32 {
    DEFAULT_NUMBER_OF_SHARDS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::JoinPointKind;

    #[test]
    fn test_empty_document_takes_defaults() {
        let cfg = load_from_str("{}").unwrap();
        assert!(cfg.enabled);
        assert_eq!(cfg.targets, Target::defaults());
        assert_eq!(cfg.timestamps.sweep_interval, 4096);
        assert_eq!(cfg.aggregator.stripes, 32);
        assert_eq!(cfg.aggregator.cas_retry_limit, 64);
        assert_eq!(cfg.sharding.number_of_shards, 100);
    }

    #[test]
    fn test_default_is_valid() {
        ProbeConfig::default().validate().unwrap();
    }

    #[test]
    fn test_full_document() {
        let yaml = r#"
enabled: false
targets:
  - type_name: host::Cell
    method: receive
    kind: invoke
timestamps:
  sweep_interval: 128
aggregator:
  stripes: 8
  cas_retry_limit: 16
sharding:
  number_of_shards: 10
"#;
        let cfg = load_from_str(yaml).unwrap();
        assert!(!cfg.enabled);
        assert_eq!(cfg.targets.len(), 1);
        assert_eq!(cfg.targets[0].kind, JoinPointKind::Invoke);
        assert_eq!(cfg.timestamps.sweep_interval, 128);
        assert_eq!(cfg.aggregator.stripes, 8);
        assert_eq!(cfg.aggregator.cas_retry_limit, 16);
        assert_eq!(cfg.sharding.number_of_shards, 10);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let err = load_from_str("sharding:\n  shards: 10\n").unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("invalid yaml"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        for (yaml, field) in [
            ("sharding:\n  number_of_shards: 0\n", "number_of_shards"),
            ("timestamps:\n  sweep_interval: 0\n", "sweep_interval"),
            ("aggregator:\n  stripes: 12\n", "stripes"),
            ("aggregator:\n  cas_retry_limit: 0\n", "cas_retry_limit"),
            ("targets: []\n", "targets"),
        ] {
            let err = load_from_str(yaml).unwrap_err();
            assert!(err.is_configuration(), "{yaml}");
            assert!(err.to_string().contains(field), "{err}");
        }
    }

    #[test]
    fn test_missing_file() {
        let err = load_from_file("/nonexistent/actor-probe.yaml").unwrap_err();
        assert!(err.to_string().contains("read config"));
    }
}
