//! Exposition of the shared registries in the Prometheus text format.
//!
//! The active backend is decided once from configuration. With the Prometheus
//! backend disabled, meters keep working in memory but nothing can be
//! exported.

use std::collections::BTreeMap;
use std::fmt;

use prometheus::proto::MetricFamily;
use prometheus::{Encoder, TextEncoder};
use tracing::debug;

use crate::config::MetricsConfig;
use crate::error::{MetricsError, Result};
use crate::shared::SharedMetricRegistries;

/// A meter backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Prometheus scrape format.
    Prometheus,
    /// In-memory meters without exposition.
    Simple,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Prometheus => f.write_str("prometheus"),
            Backend::Simple => f.write_str("simple"),
        }
    }
}

/// Backends available to this process, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCapabilities {
    available: Vec<Backend>,
}

impl Default for BackendCapabilities {
    fn default() -> Self {
        Self::from_config(&MetricsConfig::default())
    }
}

impl BackendCapabilities {
    pub fn from_config(config: &MetricsConfig) -> Self {
        let mut available = Vec::with_capacity(2);
        if config.prometheus_enabled {
            available.push(Backend::Prometheus);
        }
        available.push(Backend::Simple);
        Self { available }
    }

    pub fn is_available(&self, backend: Backend) -> bool {
        self.available.contains(&backend)
    }

    /// The preferred available backend.
    pub fn primary(&self) -> Backend {
        self.available.first().copied().unwrap_or(Backend::Simple)
    }

    pub(crate) fn require_export(&self) -> Result<()> {
        match self.primary() {
            Backend::Prometheus => Ok(()),
            other => Err(MetricsError::ExportUnsupported(other.to_string())),
        }
    }
}

/// Encode families into exposition text.
pub(crate) fn encode(families: &[MetricFamily]) -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Exposition text and its media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exposition {
    pub body: String,
    pub content_type: &'static str,
}

/// Exports metrics of the shared registries.
pub trait Exporter {
    /// Every scope, with same-named families merged.
    fn export_all_scopes(&self) -> Result<Exposition>;

    /// One scope. Fails with `ScopeNotFound` or `ScopeEmpty`.
    fn export_one_scope(&self, scope: &str) -> Result<String>;

    /// Meters named `name` in one scope.
    fn export_metrics_by_name(&self, scope: &str, name: &str) -> Result<String>;

    /// Meters named `name` in every scope. Empty when there are none.
    fn export_one_metric_across_scopes(&self, name: &str) -> Result<String>;

    fn content_type(&self) -> &'static str;
}

/// [`Exporter`] producing the Prometheus text format.
#[derive(Clone)]
pub struct PrometheusExporter {
    registries: SharedMetricRegistries,
}

impl PrometheusExporter {
    pub(crate) fn new(registries: SharedMetricRegistries) -> Self {
        Self { registries }
    }

    fn gather_all(&self, name: Option<&str>) -> Vec<MetricFamily> {
        let mut merged: BTreeMap<String, MetricFamily> = BTreeMap::new();
        for scope in self.registries.scopes() {
            let Some(registry) = self.registries.registry(&scope) else {
                continue;
            };
            for family in registry.gather(name) {
                match merged.get_mut(family.get_name()) {
                    Some(existing) if existing.get_field_type() == family.get_field_type() => {
                        for metric in family.get_metric() {
                            existing.mut_metric().push(metric.clone());
                        }
                    }
                    Some(_) => {
                        debug!(family = family.get_name(), %scope, "skipping family with conflicting type");
                    }
                    None => {
                        merged.insert(family.get_name().to_string(), family);
                    }
                }
            }
        }
        merged.into_values().collect()
    }
}

impl Exporter for PrometheusExporter {
    fn export_all_scopes(&self) -> Result<Exposition> {
        Ok(Exposition {
            body: encode(&self.gather_all(None))?,
            content_type: self.content_type(),
        })
    }

    fn export_one_scope(&self, scope: &str) -> Result<String> {
        let registry = self
            .registries
            .registry(scope)
            .ok_or_else(|| MetricsError::ScopeNotFound(scope.to_string()))?;
        if registry.meter_count() == 0 {
            return Err(MetricsError::ScopeEmpty(scope.to_string()));
        }
        encode(&registry.gather(None))
    }

    fn export_metrics_by_name(&self, scope: &str, name: &str) -> Result<String> {
        let registry = self
            .registries
            .registry(scope)
            .ok_or_else(|| MetricsError::ScopeNotFound(scope.to_string()))?;
        let families = registry.gather(Some(name));
        if families.is_empty() {
            return Err(MetricsError::MetricNotFound {
                scope: scope.to_string(),
                name: name.to_string(),
            });
        }
        encode(&families)
    }

    fn export_one_metric_across_scopes(&self, name: &str) -> Result<String> {
        encode(&self.gather_all(Some(name)))
    }

    fn content_type(&self) -> &'static str {
        prometheus::TEXT_FORMAT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_from_config() {
        let caps = BackendCapabilities::default();
        assert!(caps.is_available(Backend::Prometheus));
        assert_eq!(caps.primary(), Backend::Prometheus);
        assert!(caps.require_export().is_ok());

        let mut config = MetricsConfig::default();
        config.prometheus_enabled = false;
        let caps = BackendCapabilities::from_config(&config);
        assert!(!caps.is_available(Backend::Prometheus));
        assert!(caps.is_available(Backend::Simple));
        assert_eq!(caps.primary(), Backend::Simple);
        assert!(matches!(
            caps.require_export(),
            Err(MetricsError::ExportUnsupported(_))
        ));
    }

    #[test]
    fn test_encode_empty() {
        assert_eq!(encode(&[]).unwrap(), "");
    }

    #[test]
    fn test_export_scopes() {
        let registries = SharedMetricRegistries::new();
        let exporter = registries.exporter().unwrap();

        assert!(matches!(
            exporter.export_one_scope("missing"),
            Err(MetricsError::ScopeNotFound(_))
        ));

        let app = registries.application();
        assert!(matches!(
            exporter.export_one_scope("application"),
            Err(MetricsError::ScopeEmpty(_))
        ));

        app.counter("hits").unwrap().inc_by(2);
        let text = exporter.export_one_scope("application").unwrap();
        assert!(text.contains("hits_total{scope=\"application\"} 2"), "{text}");

        assert!(matches!(
            exporter.export_metrics_by_name("application", "misses"),
            Err(MetricsError::MetricNotFound { .. })
        ));
        assert!(exporter
            .export_metrics_by_name("application", "hits")
            .unwrap()
            .contains("hits_total"));
    }

    #[test]
    fn test_export_merges_families_across_scopes() {
        let registries = SharedMetricRegistries::new();
        registries.application().counter("jobs").unwrap().inc();
        registries.vendor().counter("jobs").unwrap().inc_by(4);

        let exporter = registries.exporter().unwrap();
        let text = exporter.export_one_metric_across_scopes("jobs").unwrap();
        assert_eq!(text.matches("# TYPE jobs_total counter").count(), 1);
        assert!(text.contains("jobs_total{scope=\"application\"} 1"), "{text}");
        assert!(text.contains("jobs_total{scope=\"vendor\"} 4"), "{text}");

        assert_eq!(exporter.export_one_metric_across_scopes("nothing").unwrap(), "");

        let all = exporter.export_all_scopes().unwrap();
        assert_eq!(all.content_type, "text/plain; version=0.0.4");
        assert!(all.body.contains("jobs_total"));
    }
}
