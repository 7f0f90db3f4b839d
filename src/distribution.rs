//! Per-metric distribution settings for histograms and timers.
//!
//! Each property is a list of `name=values` entries separated by `;`. Values
//! are comma separated. A name ending in `*` matches every metric starting with
//! the text before it, and a lone `*` matches everything. When several entries
//! match a metric, the last one wins. An empty value list switches the feature
//! off for matching metrics.
//!
//! ```text
//! percentiles = "http.*=0.5,0.99;http.health="
//! timer_buckets = "http.*=10ms,100ms,1s"
//! ```

use std::time::Duration;

use crate::config::MetricsConfig;
use crate::error::{MetricsError, Result};

/// Percentiles published when none are configured for a metric.
pub const DEFAULT_PERCENTILES: [f64; 6] = [0.5, 0.75, 0.95, 0.98, 0.99, 0.999];

/// Default significant digits of the percentile histogram.
pub const DEFAULT_PRECISION: u8 = 3;

/// Buckets in seconds used for timers with histogram publishing enabled but no explicit buckets.
const DEFAULT_TIMER_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

const DEFAULT_HISTOGRAM_MAX: f64 = 10_000.0;

/// Resolved distribution settings for one metric name.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributionSpec {
    /// Quantiles in `[0, 1]` to publish.
    pub percentiles: Vec<f64>,
    /// Bucket upper bounds, ascending. Timer buckets are in seconds.
    pub buckets: Vec<f64>,
    /// Lowest expected value. Timer bounds are in seconds.
    pub min_value: Option<f64>,
    /// Highest expected value.
    pub max_value: Option<f64>,
    /// Significant decimal digits kept by the percentile histogram.
    pub precision: u8,
}

impl Default for DistributionSpec {
    fn default() -> Self {
        Self {
            percentiles: DEFAULT_PERCENTILES.to_vec(),
            buckets: Vec::new(),
            min_value: None,
            max_value: None,
            precision: DEFAULT_PRECISION,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum NamePattern {
    Exact(String),
    Prefix(String),
}

impl NamePattern {
    fn parse(raw: &str) -> Self {
        match raw.strip_suffix('*') {
            Some(prefix) => NamePattern::Prefix(prefix.to_string()),
            None => NamePattern::Exact(raw.to_string()),
        }
    }

    fn matches(&self, name: &str) -> bool {
        match self {
            NamePattern::Exact(exact) => exact == name,
            NamePattern::Prefix(prefix) => name.starts_with(prefix.as_str()),
        }
    }
}

/// A parsed `name=values;...` property.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PropertyList<T> {
    entries: Vec<(NamePattern, T)>,
}

impl<T> Default for PropertyList<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> PropertyList<T> {
    fn parse<F>(property: &str, raw: Option<&str>, parse_values: F) -> Result<Self>
    where
        F: Fn(&str) -> std::result::Result<T, String>,
    {
        let mut entries = Vec::new();
        let Some(raw) = raw else {
            return Ok(Self { entries });
        };

        for entry in raw.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let invalid = |reason: String| MetricsError::InvalidDistributionConfig {
                property: property.to_string(),
                entry: entry.to_string(),
                reason,
            };
            let (name, values) = entry
                .split_once('=')
                .ok_or_else(|| invalid("expected name=values".to_string()))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(invalid("metric name is empty".to_string()));
            }
            let value = parse_values(values.trim()).map_err(invalid)?;
            entries.push((NamePattern::parse(name), value));
        }
        Ok(Self { entries })
    }

    /// The value of the last entry matching `name`.
    pub(crate) fn find(&self, name: &str) -> Option<&T> {
        self.entries
            .iter()
            .rev()
            .find(|(pattern, _)| pattern.matches(name))
            .map(|(_, value)| value)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Distribution settings resolved once from [`MetricsConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct DistributionConfig {
    precision: u8,
    percentiles: PropertyList<Vec<f64>>,
    histogram_buckets: PropertyList<Vec<f64>>,
    timer_buckets: PropertyList<Vec<f64>>,
    percentiles_histogram: PropertyList<bool>,
    histogram_min: PropertyList<f64>,
    histogram_max: PropertyList<f64>,
    timer_min: PropertyList<f64>,
    timer_max: PropertyList<f64>,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            precision: DEFAULT_PRECISION,
            percentiles: PropertyList::default(),
            histogram_buckets: PropertyList::default(),
            timer_buckets: PropertyList::default(),
            percentiles_histogram: PropertyList::default(),
            histogram_min: PropertyList::default(),
            histogram_max: PropertyList::default(),
            timer_min: PropertyList::default(),
            timer_max: PropertyList::default(),
        }
    }
}

impl DistributionConfig {
    /// Parse every distribution property of `config`.
    pub fn from_config(config: &MetricsConfig) -> Result<Self> {
        if config.percentile_precision > 5 {
            return Err(MetricsError::InvalidPrecision(config.percentile_precision));
        }
        Ok(Self {
            precision: config.percentile_precision,
            percentiles: PropertyList::parse(
                "percentiles",
                config.percentiles.as_deref(),
                parse_percentiles,
            )?,
            histogram_buckets: PropertyList::parse(
                "histogram_buckets",
                config.histogram_buckets.as_deref(),
                parse_numbers,
            )?,
            timer_buckets: PropertyList::parse(
                "timer_buckets",
                config.timer_buckets.as_deref(),
                parse_durations,
            )?,
            percentiles_histogram: PropertyList::parse(
                "percentiles_histogram_enabled",
                config.percentiles_histogram_enabled.as_deref(),
                parse_bool,
            )?,
            histogram_min: PropertyList::parse(
                "histogram_min_value",
                config.histogram_min_value.as_deref(),
                parse_number,
            )?,
            histogram_max: PropertyList::parse(
                "histogram_max_value",
                config.histogram_max_value.as_deref(),
                parse_number,
            )?,
            timer_min: PropertyList::parse(
                "timer_min_value",
                config.timer_min_value.as_deref(),
                |raw| parse_duration(raw).map(|d| d.as_secs_f64()),
            )?,
            timer_max: PropertyList::parse(
                "timer_max_value",
                config.timer_max_value.as_deref(),
                |raw| parse_duration(raw).map(|d| d.as_secs_f64()),
            )?,
        })
    }

    pub fn precision(&self) -> u8 {
        self.precision
    }

    /// Settings for the histogram `name`.
    pub fn histogram(&self, name: &str) -> DistributionSpec {
        let max_value = self.histogram_max.find(name).copied();
        let buckets = match self.histogram_buckets.find(name) {
            Some(buckets) => buckets.clone(),
            None if self.histogram_enabled(name) => {
                default_histogram_buckets(max_value.unwrap_or(DEFAULT_HISTOGRAM_MAX))
            }
            None => Vec::new(),
        };
        DistributionSpec {
            percentiles: self.percentiles_for(name),
            buckets,
            min_value: self.histogram_min.find(name).copied(),
            max_value,
            precision: self.precision,
        }
    }

    /// Settings for the timer `name`, in seconds.
    pub fn timer(&self, name: &str) -> DistributionSpec {
        let buckets = match self.timer_buckets.find(name) {
            Some(buckets) => buckets.clone(),
            None if self.histogram_enabled(name) => DEFAULT_TIMER_BUCKETS.to_vec(),
            None => Vec::new(),
        };
        DistributionSpec {
            percentiles: self.percentiles_for(name),
            buckets,
            min_value: self.timer_min.find(name).copied(),
            max_value: self.timer_max.find(name).copied(),
            precision: self.precision,
        }
    }

    fn percentiles_for(&self, name: &str) -> Vec<f64> {
        self.percentiles
            .find(name)
            .cloned()
            .unwrap_or_else(|| DEFAULT_PERCENTILES.to_vec())
    }

    fn histogram_enabled(&self, name: &str) -> bool {
        self.percentiles_histogram.find(name).copied().unwrap_or(false)
    }

    /// Whether no per-metric property was configured.
    pub fn is_default(&self) -> bool {
        self.percentiles.is_empty()
            && self.histogram_buckets.is_empty()
            && self.timer_buckets.is_empty()
            && self.percentiles_histogram.is_empty()
            && self.histogram_min.is_empty()
            && self.histogram_max.is_empty()
            && self.timer_min.is_empty()
            && self.timer_max.is_empty()
    }
}

/// 1-2-5 series up to and including the first bound at or above `max`.
fn default_histogram_buckets(max: f64) -> Vec<f64> {
    let mut buckets = Vec::new();
    let mut magnitude = 1.0;
    'outer: loop {
        for step in [1.0, 2.0, 5.0] {
            let bound = step * magnitude;
            buckets.push(bound);
            if bound >= max {
                break 'outer;
            }
        }
        magnitude *= 10.0;
    }
    buckets
}

fn split_values(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|v| !v.is_empty())
}

fn parse_number(raw: &str) -> std::result::Result<f64, String> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("`{raw}` is not a number"))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("`{raw}` must be a non-negative number"));
    }
    Ok(value)
}

fn parse_numbers(raw: &str) -> std::result::Result<Vec<f64>, String> {
    let mut values = split_values(raw)
        .map(parse_number)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    sort_dedup(&mut values);
    Ok(values)
}

fn parse_percentiles(raw: &str) -> std::result::Result<Vec<f64>, String> {
    let values = parse_numbers(raw)?;
    if let Some(bad) = values.iter().find(|p| **p > 1.0) {
        return Err(format!("percentile {bad} is outside [0, 1]"));
    }
    Ok(values)
}

fn parse_bool(raw: &str) -> std::result::Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "" | "false" => Ok(false),
        other => Err(format!("`{other}` is not a boolean")),
    }
}

/// Parse a duration with an optional `ms`, `s`, `m` or `h` suffix. Bare numbers are milliseconds.
pub(crate) fn parse_duration(raw: &str) -> std::result::Result<Duration, String> {
    let raw = raw.trim();
    const MS: f64 = 1e6;
    let (number, nanos_per_unit) = if let Some(n) = raw.strip_suffix("ms") {
        (n, MS)
    } else if let Some(n) = raw.strip_suffix('s') {
        (n, 1e9)
    } else if let Some(n) = raw.strip_suffix('m') {
        (n, 60e9)
    } else if let Some(n) = raw.strip_suffix('h') {
        (n, 3600e9)
    } else {
        (raw, MS)
    };
    let value = parse_number(number).map_err(|_| format!("`{raw}` is not a duration"))?;
    Ok(Duration::from_nanos((value * nanos_per_unit).round() as u64))
}

fn parse_durations(raw: &str) -> std::result::Result<Vec<f64>, String> {
    let mut values = split_values(raw)
        .map(|v| parse_duration(v).map(|d| d.as_secs_f64()))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    sort_dedup(&mut values);
    Ok(values)
}

fn sort_dedup(values: &mut Vec<f64>) {
    values.sort_by(f64::total_cmp);
    values.dedup();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(f: impl FnOnce(&mut MetricsConfig)) -> DistributionConfig {
        let mut config = MetricsConfig::default();
        f(&mut config);
        DistributionConfig::from_config(&config).unwrap()
    }

    #[test]
    fn test_defaults() {
        let dist = DistributionConfig::default();
        assert!(dist.is_default());
        let spec = dist.histogram("anything");
        assert_eq!(spec.percentiles, DEFAULT_PERCENTILES.to_vec());
        assert!(spec.buckets.is_empty());
        assert_eq!(spec.precision, 3);
    }

    #[test]
    fn test_exact_and_prefix_patterns() {
        let dist = config(|c| {
            c.percentiles = Some("http.*=0.5,0.9;http.health=0.99".to_string());
        });
        assert_eq!(dist.histogram("http.requests").percentiles, vec![0.5, 0.9]);
        assert_eq!(dist.histogram("http.health").percentiles, vec![0.99]);
        assert_eq!(
            dist.histogram("db.queries").percentiles,
            DEFAULT_PERCENTILES.to_vec()
        );
    }

    #[test]
    fn test_last_matching_entry_wins() {
        let dist = config(|c| {
            c.percentiles = Some("http.health=0.99;http.*=0.5".to_string());
        });
        assert_eq!(dist.histogram("http.health").percentiles, vec![0.5]);
    }

    #[test]
    fn test_empty_value_disables() {
        let dist = config(|c| {
            c.percentiles = Some("*=0.5;quiet=".to_string());
        });
        assert!(dist.timer("quiet").percentiles.is_empty());
        assert_eq!(dist.timer("loud").percentiles, vec![0.5]);
    }

    #[test]
    fn test_timer_buckets_units() {
        let dist = config(|c| {
            c.timer_buckets = Some("latency=1s,250,10ms,2m".to_string());
        });
        assert_eq!(dist.timer("latency").buckets, vec![0.01, 0.25, 1.0, 120.0]);
    }

    #[test]
    fn test_histogram_enabled_uses_default_buckets() {
        let dist = config(|c| {
            c.percentiles_histogram_enabled = Some("sizes=true;latency=true".to_string());
            c.histogram_max_value = Some("sizes=100".to_string());
        });
        assert_eq!(
            dist.histogram("sizes").buckets,
            vec![1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0]
        );
        assert_eq!(dist.timer("latency").buckets, DEFAULT_TIMER_BUCKETS.to_vec());
        assert!(dist.timer("other").buckets.is_empty());
    }

    #[test]
    fn test_min_max_values() {
        let dist = config(|c| {
            c.histogram_min_value = Some("sizes=10".to_string());
            c.timer_max_value = Some("latency=5s".to_string());
        });
        assert_eq!(dist.histogram("sizes").min_value, Some(10.0));
        assert_eq!(dist.timer("latency").max_value, Some(5.0));
    }

    #[test]
    fn test_malformed_entries() {
        let mut bad = MetricsConfig::default();
        bad.percentiles = Some("noequals".to_string());
        assert!(matches!(
            DistributionConfig::from_config(&bad),
            Err(MetricsError::InvalidDistributionConfig { .. })
        ));

        let mut bad = MetricsConfig::default();
        bad.percentiles = Some("a=1.5".to_string());
        assert!(DistributionConfig::from_config(&bad).is_err());

        let mut bad = MetricsConfig::default();
        bad.timer_buckets = Some("a=fast".to_string());
        assert!(DistributionConfig::from_config(&bad).is_err());

        let mut bad = MetricsConfig::default();
        bad.percentiles_histogram_enabled = Some("a=maybe".to_string());
        assert!(DistributionConfig::from_config(&bad).is_err());
    }

    #[test]
    fn test_precision_out_of_range() {
        let mut bad = MetricsConfig::default();
        bad.percentile_precision = 6;
        assert!(matches!(
            DistributionConfig::from_config(&bad),
            Err(MetricsError::InvalidPrecision(6))
        ));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("15ms").unwrap(), Duration::from_millis(15));
        assert_eq!(parse_duration("15").unwrap(), Duration::from_millis(15));
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert!(parse_duration("-1s").is_err());
    }
}
