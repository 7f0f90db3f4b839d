//! Builder pattern for constructing shared metric registries.
//!
//! The builder supports multiple configuration sources using figment:
//! - Default values
//! - Config files (TOML, YAML, JSON)
//! - Environment variables
//! - Programmatic overrides
//! - CLI arguments via clap

use crate::config::MetricsConfig;
use crate::error::Result;
use crate::shared::SharedMetricRegistries;

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use std::path::Path;

/// Builder for constructing [`SharedMetricRegistries`].
///
/// Configuration sources are merged in the following order (later sources override earlier):
/// 1. Default values
/// 2. Config files (in order added)
/// 3. Environment variables
/// 4. Programmatic overrides
///
/// # Examples
///
/// ```ignore
/// use strata_metrics::MetricsBuilder;
///
/// let registries = MetricsBuilder::new()
///     .file("metrics.toml")
///     .env_prefix("STRATA")
///     .app_name("orders")
///     .global_tags("env=prod,region=eu")
///     .build()?;
/// ```
#[derive(Debug)]
pub struct MetricsBuilder {
    figment: Figment,
}

impl Default for MetricsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            figment: Figment::from(Serialized::defaults(MetricsConfig::default())),
        }
    }

    /// Add a configuration file.
    ///
    /// Supports TOML, YAML, and JSON formats (detected by extension).
    /// Files are merged in the order they are added. Missing files are skipped.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref();
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        self.figment = match extension.to_lowercase().as_str() {
            "toml" => self.figment.merge(Toml::file(path)),
            "yaml" | "yml" => self.figment.merge(Yaml::file(path)),
            "json" => self.figment.merge(Json::file(path)),
            _ => {
                // Default to TOML
                self.figment.merge(Toml::file(path))
            }
        };
        self
    }

    /// Add environment variables with a prefix.
    ///
    /// Environment variables are expected in the format `{PREFIX}_{KEY}`,
    /// e.g., `STRATA_APP_NAME`, `STRATA_TAGS`, `STRATA_TIMER_BUCKETS`.
    pub fn env_prefix(mut self, prefix: &str) -> Self {
        self.figment = self.figment.merge(Env::prefixed(&format!("{prefix}_")));
        self
    }

    /// Set the application name, exported as the `_app` tag.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("app_name", name.into()));
        self
    }

    /// Set the global tags.
    ///
    /// Format: `"env=prod,region=us\,east"`. Commas and equal signs inside
    /// values are escaped with a backslash.
    pub fn global_tags(mut self, tags: impl Into<String>) -> Self {
        self.figment = self.figment.merge(Serialized::default("tags", tags.into()));
        self
    }

    /// Enable or disable the Prometheus backend.
    ///
    /// With it disabled, meters still record values but nothing can be exported.
    pub fn prometheus_enabled(mut self, enabled: bool) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("prometheus_enabled", enabled));
        self
    }

    /// Set the number of significant digits kept by percentile histograms.
    pub fn percentile_precision(mut self, digits: u8) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("percentile_precision", digits));
        self
    }

    /// Set published percentiles per metric name.
    ///
    /// Format: `"http.*=0.5,0.95;db.query=0.99"`. A name without values disables percentiles.
    pub fn percentiles(mut self, spec: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("percentiles", spec.into()));
        self
    }

    /// Set histogram bucket bounds per metric name, e.g. `"sizes=10,100,1000"`.
    pub fn histogram_buckets(mut self, spec: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("histogram_buckets", spec.into()));
        self
    }

    /// Set timer bucket bounds per metric name, e.g. `"reqLatency=50ms,1s"`.
    pub fn timer_buckets(mut self, spec: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("timer_buckets", spec.into()));
        self
    }

    /// Publish default buckets for matching metrics, e.g. `"http.*=true"`.
    pub fn percentiles_histogram_enabled(mut self, spec: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("percentiles_histogram_enabled", spec.into()));
        self
    }

    pub fn histogram_min_value(mut self, spec: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("histogram_min_value", spec.into()));
        self
    }

    pub fn histogram_max_value(mut self, spec: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("histogram_max_value", spec.into()));
        self
    }

    pub fn timer_min_value(mut self, spec: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("timer_min_value", spec.into()));
        self
    }

    pub fn timer_max_value(mut self, spec: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("timer_max_value", spec.into()));
        self
    }

    /// Apply CLI argument overrides.
    ///
    /// This method applies any non-None values from the `MetricsArgs` struct.
    pub fn with_cli_args(mut self, args: &MetricsArgs) -> Self {
        if let Some(ref name) = args.metrics_app_name {
            self.figment = self
                .figment
                .merge(Serialized::default("app_name", name.clone()));
        }
        if let Some(ref tags) = args.metrics_tags {
            self.figment = self.figment.merge(Serialized::default("tags", tags.clone()));
        }
        if let Some(enabled) = args.metrics_prometheus_enabled {
            self.figment = self
                .figment
                .merge(Serialized::default("prometheus_enabled", enabled));
        }
        if let Some(digits) = args.metrics_percentile_precision {
            self.figment = self
                .figment
                .merge(Serialized::default("percentile_precision", digits));
        }
        if let Some(ref spec) = args.metrics_percentiles {
            self.figment = self
                .figment
                .merge(Serialized::default("percentiles", spec.clone()));
        }
        if let Some(ref spec) = args.metrics_timer_buckets {
            self.figment = self
                .figment
                .merge(Serialized::default("timer_buckets", spec.clone()));
        }
        self
    }

    /// Extract the configuration without building registries.
    pub fn config(&self) -> Result<MetricsConfig> {
        let config: MetricsConfig = self.figment.extract().map_err(Box::new)?;
        Ok(config)
    }

    /// Build the registries.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration extraction fails
    /// - Global tags are malformed
    /// - A distribution property is malformed or the precision is out of range
    pub fn build(self) -> Result<SharedMetricRegistries> {
        SharedMetricRegistries::from_config(self.config()?)
    }
}

/// CLI arguments for metrics configuration.
///
/// Use with clap's `Parser` derive macro. These arguments can be applied
/// to a `MetricsBuilder` using `with_cli_args`.
///
/// # Examples
///
/// ```ignore
/// use clap::Parser;
/// use strata_metrics::{MetricsArgs, MetricsBuilder};
///
/// #[derive(Parser)]
/// struct MyArgs {
///     #[command(flatten)]
///     metrics: MetricsArgs,
/// }
///
/// let args = MyArgs::parse();
/// let registries = MetricsBuilder::new()
///     .with_cli_args(&args.metrics)
///     .build()?;
/// ```
#[derive(Debug, Default, Clone, clap::Args)]
pub struct MetricsArgs {
    /// Application name, exported as the `_app` tag
    #[arg(long)]
    pub metrics_app_name: Option<String>,

    /// Global tags (e.g., "env=prod,region=eu")
    #[arg(long)]
    pub metrics_tags: Option<String>,

    /// Enable the Prometheus backend
    #[arg(long)]
    pub metrics_prometheus_enabled: Option<bool>,

    /// Significant digits kept by percentile histograms
    #[arg(long)]
    pub metrics_percentile_precision: Option<u8>,

    /// Published percentiles per metric name
    #[arg(long)]
    pub metrics_percentiles: Option<String>,

    /// Timer bucket bounds per metric name
    #[arg(long)]
    pub metrics_timer_buckets: Option<String>,
}
