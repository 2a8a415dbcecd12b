//! Engine configuration, loaded from JSON.
//!
//! ```json
//! {
//!   "aggregation": {
//!     "center": { "max_iterations": 100, "tolerance": 1e-7, "min_distance": 1e-9 },
//!     "outlier_policy": { "median_multiple": { "multiple": 3.0, "min_radius": 1e-6 } },
//!     "quorum": "majority"
//!   },
//!   "sharing": { "holders": 5, "threshold": 3 },
//!   "rounds": { "collection_timeout_ms": 5000, "audit_interval": 1, "audit_tolerance": 1e-4 },
//!   "retry": { "max_attempts": 5, "initial_backoff_ms": 10, "max_backoff_ms": 500 }
//! }
//! ```
//!
//! Every section and field is optional; missing values take their defaults.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::aggregators::AggregationConfig;
use crate::error::ConfigError;
use crate::ledger::RetryPolicy;
use crate::sharing::MAX_SHARES;

/// `(t, n)` threshold parameters for one key epoch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharingConfig {
    /// Number of share holders `n`
    pub holders: usize,
    /// Shares needed to reconstruct `t`
    pub threshold: usize,
}

impl Default for SharingConfig {
    fn default() -> Self {
        Self {
            holders: 5,
            threshold: 3,
        }
    }
}

/// Round timing and audit cadence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundConfig {
    /// How long the coordinator waits for device updates
    pub collection_timeout_ms: u64,
    /// Audit every this many rounds; 0 disables auditing
    pub audit_interval: u64,
    /// Largest elementwise difference between published and recomputed
    /// aggregates that still passes audit
    pub audit_tolerance: f32,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            collection_timeout_ms: 5_000,
            audit_interval: 1,
            audit_tolerance: 1e-4,
        }
    }
}

impl RoundConfig {
    /// Collection deadline as a [`Duration`].
    pub fn collection_timeout(&self) -> Duration {
        Duration::from_millis(self.collection_timeout_ms)
    }

    /// Whether round `round` is due for an audit.
    pub fn audit_due(&self, round: u64) -> bool {
        self.audit_interval > 0 && round % self.audit_interval == 0
    }
}

/// Top-level configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Robust aggregation
    pub aggregation: AggregationConfig,
    /// Threshold key sharing
    pub sharing: SharingConfig,
    /// Round timing and audit
    pub rounds: RoundConfig,
    /// Ledger retry budget
    pub retry: RetryPolicy,
}

impl EngineConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let SharingConfig { holders, threshold } = self.sharing;
        if threshold == 0 || threshold > holders || holders > MAX_SHARES {
            return Err(ConfigError::Invalid(format!(
                "sharing requires 1 <= threshold <= holders <= {}, got threshold={} holders={}",
                MAX_SHARES, threshold, holders
            )));
        }

        let center = &self.aggregation.center;
        if center.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "center.max_iterations must be positive".to_string(),
            ));
        }
        if !(center.tolerance.is_finite() && center.tolerance >= 0.0) {
            return Err(ConfigError::Invalid(
                "center.tolerance must be finite and non-negative".to_string(),
            ));
        }
        if !(center.min_distance.is_finite() && center.min_distance > 0.0) {
            return Err(ConfigError::Invalid(
                "center.min_distance must be positive".to_string(),
            ));
        }

        self.aggregation
            .outlier_policy
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if !(self.rounds.audit_tolerance.is_finite() && self.rounds.audit_tolerance >= 0.0) {
            return Err(ConfigError::Invalid(
                "rounds.audit_tolerance must be finite and non-negative".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
