//! # strata-metrics
//!
//! **Scoped metric registries over one shared meter store**
//!
//! Metrics are grouped into scopes (`application`, `base`, `vendor`, or any
//! custom name). Every scope has its own [`MetricRegistry`], and all of them
//! write into one process-wide meter store that is exported in the Prometheus
//! text format.
//!
//! ## Features
//!
//! - **Scoped Registries**: One registry per scope, created on first use and shared by every caller
//! - **Strict Scope Isolation**: A registration in one scope never creates a meter in another
//! - **Counters, Gauges, Histograms, Timers**: Thread-safe adapters with percentile snapshots
//! - **Global Tags**: Attach `env=prod,region=eu` style tags to every exported meter
//! - **Counted/Timed Members**: Map members to metrics and fail loudly when nothing is mapped
//! - **Scrape Handler**: Transport-agnostic `/metrics` request handling
//! - **Flexible Configuration**: Configure via files (TOML/YAML/JSON), environment variables, or code
//! - **CLI Integration**: Built-in clap support for command-line overrides
//!
//! ## Quick Start
//!
//! ```ignore
//! use strata_metrics::{MetricsBuilder, Tag};
//! use std::time::Duration;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registries = MetricsBuilder::new()
//!         .app_name("orders")
//!         .global_tags("env=prod")
//!         .build()?;
//!
//!     let app = registries.application();
//!     app.counter_with_tags("requests", &[Tag::new("method", "GET")?])?.inc();
//!     app.timer("reqLatency")?.update(Duration::from_millis(12));
//!
//!     // Platform metrics live in the base scope
//!     registries.base();
//!
//!     let text = registries.exporter()?.export_all_scopes()?.body;
//!     println!("{text}");
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! Configuration sources are merged in order (later sources override earlier):
//!
//! 1. Default values
//! 2. Config files (via `.file()`)
//! 3. Environment variables (via `.env_prefix()`)
//! 4. Programmatic overrides
//! 5. CLI arguments (via `.with_cli_args()`)
//!
//! ### Config File Example (TOML)
//!
//! ```toml
//! app_name = "orders"
//! tags = "env=prod,region=eu"
//! percentile_precision = 3
//! percentiles = "http.*=0.5,0.95,0.99"
//! timer_buckets = "reqLatency=50ms,250ms,1s"
//! percentiles_histogram_enabled = "db.*=true"
//! ```
//!
//! ### Environment Variables
//!
//! With `.env_prefix("STRATA")`:
//! - `STRATA_APP_NAME=orders`
//! - `STRATA_TAGS=env=prod`
//! - `STRATA_PROMETHEUS_ENABLED=false`
//! - `STRATA_TIMER_BUCKETS=reqLatency=50ms,1s`
//!
//! ### CLI Arguments
//!
//! ```ignore
//! use clap::Parser;
//! use strata_metrics::{MetricsArgs, MetricsBuilder};
//!
//! #[derive(Parser)]
//! struct MyArgs {
//!     #[command(flatten)]
//!     metrics: MetricsArgs,
//! }
//!
//! let args = MyArgs::parse();
//! let registries = MetricsBuilder::new()
//!     .file("metrics.toml")
//!     .env_prefix("STRATA")
//!     .with_cli_args(&args.metrics)
//!     .build()?;
//! ```
//!
//! ## Exposition Naming
//!
//! Names are sanitized to `[a-zA-Z0-9_:]`. Counters get a `_total` suffix,
//! timers are exported in seconds with a `_seconds` suffix, and other meters
//! with a unit get `_{unit}`. Every exported sample carries a `scope` label.

pub mod adapters;
pub mod annotations;
pub(crate) mod base;
pub mod builder;
pub mod config;
pub mod distribution;
pub mod error;
pub mod export;
pub mod gate;
pub mod handler;
pub mod id;
pub mod interceptors;
pub mod mapping;
pub mod metadata;
pub mod registry;
pub mod shared;
pub(crate) mod store;
pub mod tags;

pub use adapters::{Counter, Gauge, Histogram, Metric, Snapshot, Timer, TimerContext};
pub use annotations::{register_member, AnnotationKind, MetricAnnotation};
pub use builder::{MetricsArgs, MetricsBuilder};
pub use config::MetricsConfig;
pub use error::{MetricsError, Result};
pub use export::{Backend, BackendCapabilities, Exporter, Exposition, PrometheusExporter};
pub use handler::{MetricsRequest, MetricsRequestHandler, MetricsResponse};
pub use id::{MetricId, MetricType};
pub use interceptors::{CountedInterceptor, TimedInterceptor};
pub use mapping::{MemberInfo, MemberKind, MemberToMetricMappings};
pub use metadata::{units, Metadata};
pub use registry::{MetricRegistry, APPLICATION_SCOPE, BASE_SCOPE, VENDOR_SCOPE};
pub use shared::{RegistrySettings, SharedMetricRegistries};
pub use tags::{parse_global_tags, Tag, Tags};

pub use strata_macros::test;

use std::sync::{Arc, OnceLock};

static GLOBAL: OnceLock<SharedMetricRegistries> = OnceLock::new();

/// The process-wide registries.
///
/// Uses the registries passed to [`install`], or defaults if nothing was
/// installed before the first call.
pub fn global() -> &'static SharedMetricRegistries {
    GLOBAL.get_or_init(SharedMetricRegistries::new)
}

/// Install `registries` as the process-wide registries.
///
/// Returns them back if the global registries were already set.
///
/// # Example
///
/// ```ignore
/// let registries = strata_metrics::MetricsBuilder::new()
///     .env_prefix("STRATA")
///     .build()?;
/// if strata_metrics::install(registries).is_err() {
///     tracing::warn!("metric registries already installed");
/// }
/// ```
pub fn install(registries: SharedMetricRegistries) -> std::result::Result<(), SharedMetricRegistries> {
    GLOBAL.set(registries)
}

/// Get or create the registry for `scope` in the process-wide registries.
///
/// This is a convenience function for `strata_metrics::global().get_or_create(scope)`.
pub fn registry(scope: &str) -> Arc<MetricRegistry> {
    global().get_or_create(scope)
}
