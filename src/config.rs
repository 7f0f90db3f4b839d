//! Configuration types for strata-metrics.

use serde::{Deserialize, Serialize};

use crate::distribution::DEFAULT_PRECISION;

/// Configuration for the shared metric registries.
///
/// This struct can be deserialized from TOML, YAML, JSON, or environment variables
/// using figment. Every per-metric property is kept as its raw string here and
/// parsed once when the registries are built.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MetricsConfig {
    /// Application name, added to every metric as the `_app` tag
    #[serde(default)]
    pub app_name: Option<String>,

    /// Global tags, e.g. `"env=prod,region=us\,east"`
    #[serde(default)]
    pub tags: Option<String>,

    /// Whether the Prometheus scrape backend is available (default: true)
    #[serde(default = "default_prometheus_enabled")]
    pub prometheus_enabled: bool,

    /// Significant digits kept by percentile histograms, 0-5 (default: 3)
    #[serde(default = "default_percentile_precision")]
    pub percentile_precision: u8,

    /// Published percentiles per metric name, e.g. `"http.*=0.5,0.99"`
    #[serde(default)]
    pub percentiles: Option<String>,

    /// Histogram bucket bounds per metric name
    #[serde(default)]
    pub histogram_buckets: Option<String>,

    /// Timer bucket bounds per metric name, with ms/s/m/h suffixes
    #[serde(default)]
    pub timer_buckets: Option<String>,

    /// Publish default buckets for matching metrics, e.g. `"http.*=true"`
    #[serde(default)]
    pub percentiles_histogram_enabled: Option<String>,

    /// Lowest expected histogram value per metric name
    #[serde(default)]
    pub histogram_min_value: Option<String>,

    /// Highest expected histogram value per metric name
    #[serde(default)]
    pub histogram_max_value: Option<String>,

    /// Shortest expected timer duration per metric name
    #[serde(default)]
    pub timer_min_value: Option<String>,

    /// Longest expected timer duration per metric name
    #[serde(default)]
    pub timer_max_value: Option<String>,
}

fn default_prometheus_enabled() -> bool {
    true
}

fn default_percentile_precision() -> u8 {
    DEFAULT_PRECISION
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            app_name: None,
            tags: None,
            prometheus_enabled: default_prometheus_enabled(),
            percentile_precision: default_percentile_precision(),
            percentiles: None,
            histogram_buckets: None,
            timer_buckets: None,
            percentiles_histogram_enabled: None,
            histogram_min_value: None,
            histogram_max_value: None,
            timer_min_value: None,
            timer_max_value: None,
        }
    }
}

impl MetricsConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// The application name, ignoring blank values.
    pub fn effective_app_name(&self) -> Option<&str> {
        self.app_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MetricsConfig::default();
        assert!(config.app_name.is_none());
        assert!(config.tags.is_none());
        assert!(config.prometheus_enabled);
        assert_eq!(config.percentile_precision, 3);
        assert!(config.percentiles.is_none());
        assert!(config.timer_buckets.is_none());
    }

    #[test]
    fn test_effective_app_name() {
        let mut config = MetricsConfig::default();
        assert_eq!(config.effective_app_name(), None);

        config.app_name = Some("   ".to_string());
        assert_eq!(config.effective_app_name(), None);

        config.app_name = Some("orders".to_string());
        assert_eq!(config.effective_app_name(), Some("orders"));
    }

    #[test]
    fn test_deserialize_config() {
        let toml = r#"
            app_name = "orders"
            tags = "env=prod,region=eu"
            prometheus_enabled = false
            percentile_precision = 2
            percentiles = "http.*=0.5,0.99"
            timer_buckets = "http.*=10ms,1s"
        "#;

        let config: MetricsConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.app_name, Some("orders".to_string()));
        assert_eq!(config.tags, Some("env=prod,region=eu".to_string()));
        assert!(!config.prometheus_enabled);
        assert_eq!(config.percentile_precision, 2);
        assert_eq!(config.percentiles, Some("http.*=0.5,0.99".to_string()));
        assert_eq!(config.timer_buckets, Some("http.*=10ms,1s".to_string()));
        assert!(config.histogram_buckets.is_none());
    }
}
