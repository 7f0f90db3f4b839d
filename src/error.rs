//! Error types for strata-metrics.

use thiserror::Error;

use crate::id::MetricType;

/// Errors that can occur when configuring or using the metric registries.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// The global tags property could not be parsed.
    #[error("malformed global tags `{input}`: {reason}")]
    MalformedGlobalTags { input: String, reason: String },

    /// A tag key does not match `[a-zA-Z_][a-zA-Z0-9_]*`.
    #[error("invalid tag name `{0}`, expected [a-zA-Z_][a-zA-Z0-9_]*")]
    InvalidTagName(String),

    /// A `key=value` tag string could not be split.
    #[error("malformed tag `{0}`, expected key=value")]
    MalformedTag(String),

    /// A reserved tag key was used with a value the registry does not own.
    #[error("tag `{key}` is reserved: {reason}")]
    ReservedTag { key: String, reason: String },

    /// A per-metric distribution property could not be parsed.
    #[error("invalid `{property}` entry `{entry}`: {reason}")]
    InvalidDistributionConfig {
        property: String,
        entry: String,
        reason: String,
    },

    /// Percentile precision outside the range supported by the histogram.
    #[error("percentile precision {0} is out of range, expected 0..=5")]
    InvalidPrecision(u8),

    /// Error extracting configuration from figment.
    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// A metric was requested with an empty name.
    #[error("metric name must not be empty")]
    EmptyName,

    /// A metric name is already bound to a different metric type in this scope.
    #[error("metric `{name}` is already registered as a {existing}, cannot register it as a {requested}")]
    TypeConflict {
        name: String,
        existing: MetricType,
        requested: MetricType,
    },

    /// No registry exists for the scope.
    #[error("scope `{0}` not found")]
    ScopeNotFound(String),

    /// The registry was dropped from the directory.
    #[error("scope `{0}` was dropped")]
    ScopeDropped(String),

    /// The scope exists but holds no meters.
    #[error("scope `{0}` has no metrics")]
    ScopeEmpty(String),

    /// No metric with the given name exists in the scope.
    #[error("metric `{name}` not found in scope `{scope}`")]
    MetricNotFound { scope: String, name: String },

    /// An intercepted member has no metric ids mapped to it.
    #[error("no {kind} metric mapped for member `{member}`")]
    NoMetricMapped { kind: MetricType, member: String },

    /// A mapped metric id is no longer present in its registry.
    #[error("metric `{id}` mapped for member `{member}` is not registered")]
    MappedMetricMissing { id: String, member: String },

    /// The primary export backend is not available.
    #[error("export is not supported by the active `{0}` backend")]
    ExportUnsupported(String),

    /// A distribution summary could not be created with the requested bounds.
    #[error("cannot create distribution for `{name}`: {reason}")]
    Distribution { name: String, reason: String },

    /// Error encoding the exposition text.
    #[error("failed to encode metrics: {0}")]
    Encode(#[from] prometheus::Error),

    /// The encoder produced non UTF-8 output.
    #[error("exposition text is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Result type alias for metrics operations.
pub type Result<T> = std::result::Result<T, MetricsError>;
