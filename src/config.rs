// SPDX-License-Identifier: Apache-2.0

//! Core configuration
//!
//! One immutable [`LensConfig`] is constructed at process start and passed by
//! reference into every component constructor. No component reads ambient
//! environment state directly.

use serde::{Deserialize, Serialize};

/// Anomaly-detection sensitivity profile.
///
/// Maps to a z-score threshold: the number of standard deviations a metric
/// must stray from the entity's own mean before a finding is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Low,
    Medium,
    High,
}

impl Default for Sensitivity {
    fn default() -> Self {
        Self::Medium
    }
}

/// z-score thresholds per sensitivity profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensitivityThresholds {
    #[serde(default = "default_low_z")]
    pub low: f64,
    #[serde(default = "default_medium_z")]
    pub medium: f64,
    #[serde(default = "default_high_z")]
    pub high: f64,
}

impl SensitivityThresholds {
    pub fn threshold(&self, sensitivity: Sensitivity) -> f64 {
        match sensitivity {
            Sensitivity::Low => self.low,
            Sensitivity::Medium => self.medium,
            Sensitivity::High => self.high,
        }
    }
}

impl Default for SensitivityThresholds {
    fn default() -> Self {
        Self {
            low: default_low_z(),
            medium: default_medium_z(),
            high: default_high_z(),
        }
    }
}

/// Configuration for the whole core.
///
/// Every value has a serde default so a partial config file (or `Default`)
/// yields a working setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LensConfig {
    /// Hard ceiling on returned rows; caller limits are clamped to this.
    #[serde(default = "default_max_rows")]
    pub max_rows: u32,

    /// Row limit applied when the caller does not supply one.
    #[serde(default = "default_rows")]
    pub default_rows: u32,

    /// Hard ceiling on per-query wall-clock time.
    #[serde(default = "default_max_timeout_secs")]
    pub max_timeout_secs: u32,

    /// Timeout applied when the caller does not supply one.
    #[serde(default = "default_max_timeout_secs")]
    pub default_timeout_secs: u32,

    /// Hard ceiling on result size; not caller-adjustable.
    #[serde(default = "default_max_result_bytes")]
    pub max_result_bytes: u64,

    /// Maximum concurrently checked-out source sessions.
    #[serde(default = "default_pool_max_sessions")]
    pub pool_max_sessions: usize,

    /// How long to wait for a server-side cancel to be acknowledged before
    /// forcibly discarding the session.
    #[serde(default = "default_cancel_grace_secs")]
    pub cancel_grace_secs: u64,

    /// `(database, schema)` namespaces statements are allowed to reference.
    #[serde(default = "default_permitted_namespaces")]
    pub permitted_namespaces: Vec<(String, String)>,

    /// z-score thresholds for the three sensitivity profiles.
    #[serde(default)]
    pub sensitivity_thresholds: SensitivityThresholds,

    /// Deviations at or beyond this z-score are reported HIGH regardless of
    /// the active profile.
    #[serde(default = "default_extreme_z")]
    pub extreme_z: f64,

    /// Entities with fewer historical observations than this are skipped by
    /// the anomaly engine rather than false-flagged.
    #[serde(default = "default_min_observations")]
    pub min_observations: usize,

    /// Roles whose grant always warrants a finding.
    #[serde(default = "default_sensitive_roles")]
    pub sensitive_roles: Vec<String>,

    /// Distinct new roles a grantee may accumulate inside the sliding window
    /// before a RapidAccumulation finding is emitted.
    #[serde(default = "default_rapid_accumulation_count")]
    pub rapid_accumulation_count: usize,

    /// Sliding window for rapid-accumulation detection.
    #[serde(default = "default_rapid_accumulation_window_hours")]
    pub rapid_accumulation_window_hours: i64,

    /// Novel-object count at which a NewObjectAccess finding becomes HIGH.
    #[serde(default = "default_novelty_high_count")]
    pub novelty_high_count: usize,

    /// Per-credit price used by the cost templates.
    #[serde(default = "default_credit_price")]
    pub credit_price: f64,
}

impl LensConfig {
    /// The fully-qualified prefix for the permitted namespace used when
    /// rendering templates, e.g. `SNOWFLAKE.ACCOUNT_USAGE`.
    ///
    /// A deserialized config may carry an explicitly empty namespace list
    /// (serde defaults only cover absent fields); templates then render
    /// against the default namespace rather than panicking.
    pub fn namespace_prefix(&self) -> String {
        match self.permitted_namespaces.first() {
            Some((db, schema)) => format!("{db}.{schema}"),
            None => {
                let namespaces = default_permitted_namespaces();
                let (db, schema) = &namespaces[0];
                format!("{db}.{schema}")
            }
        }
    }
}

impl Default for LensConfig {
    fn default() -> Self {
        Self {
            max_rows: default_max_rows(),
            default_rows: default_rows(),
            max_timeout_secs: default_max_timeout_secs(),
            default_timeout_secs: default_max_timeout_secs(),
            max_result_bytes: default_max_result_bytes(),
            pool_max_sessions: default_pool_max_sessions(),
            cancel_grace_secs: default_cancel_grace_secs(),
            permitted_namespaces: default_permitted_namespaces(),
            sensitivity_thresholds: SensitivityThresholds::default(),
            extreme_z: default_extreme_z(),
            min_observations: default_min_observations(),
            sensitive_roles: default_sensitive_roles(),
            rapid_accumulation_count: default_rapid_accumulation_count(),
            rapid_accumulation_window_hours: default_rapid_accumulation_window_hours(),
            novelty_high_count: default_novelty_high_count(),
            credit_price: default_credit_price(),
        }
    }
}

fn default_max_rows() -> u32 {
    10_000
}

fn default_rows() -> u32 {
    1_000
}

fn default_max_timeout_secs() -> u32 {
    300
}

fn default_max_result_bytes() -> u64 {
    100 * 1024 * 1024
}

fn default_pool_max_sessions() -> usize {
    4
}

fn default_cancel_grace_secs() -> u64 {
    5
}

fn default_permitted_namespaces() -> Vec<(String, String)> {
    vec![("SNOWFLAKE".to_string(), "ACCOUNT_USAGE".to_string())]
}

fn default_low_z() -> f64 {
    3.0
}

fn default_medium_z() -> f64 {
    2.0
}

fn default_high_z() -> f64 {
    1.5
}

fn default_extreme_z() -> f64 {
    4.0
}

fn default_min_observations() -> usize {
    5
}

fn default_sensitive_roles() -> Vec<String> {
    vec![
        "ACCOUNTADMIN".to_string(),
        "SECURITYADMIN".to_string(),
        "SYSADMIN".to_string(),
    ]
}

fn default_rapid_accumulation_count() -> usize {
    3
}

fn default_rapid_accumulation_window_hours() -> i64 {
    24
}

fn default_novelty_high_count() -> usize {
    5
}

fn default_credit_price() -> f64 {
    4.00
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_fills_defaults() {
        let config: LensConfig = serde_json::from_str(r#"{"max_rows": 500}"#).unwrap();
        assert_eq!(config.max_rows, 500);
        assert_eq!(config.max_timeout_secs, 300);
        assert_eq!(config.max_result_bytes, 100 * 1024 * 1024);
        assert_eq!(config.sensitivity_thresholds.medium, 2.0);
    }

    #[test]
    fn namespace_prefix_renders_first_namespace() {
        let config = LensConfig::default();
        assert_eq!(config.namespace_prefix(), "SNOWFLAKE.ACCOUNT_USAGE");
    }

    #[test]
    fn explicitly_empty_namespaces_fall_back_to_the_default_prefix() {
        let config: LensConfig =
            serde_json::from_str(r#"{"permitted_namespaces": []}"#).unwrap();
        assert!(config.permitted_namespaces.is_empty());
        assert_eq!(config.namespace_prefix(), "SNOWFLAKE.ACCOUNT_USAGE");
    }

    #[test]
    fn sensitivity_maps_to_thresholds() {
        let thresholds = SensitivityThresholds::default();
        assert_eq!(thresholds.threshold(Sensitivity::Low), 3.0);
        assert_eq!(thresholds.threshold(Sensitivity::Medium), 2.0);
        assert_eq!(thresholds.threshold(Sensitivity::High), 1.5);
    }
}
