//! A registry for one scope.
//!
//! [`MetricRegistry`] hands out metric adapters for its scope. Each
//! `(name, tags)` identity maps to exactly one adapter: registration is an
//! atomic get-or-create, and concurrent first registrations of the same
//! identity create a single meter in the shared store.
//!
//! # Example
//!
//! ```ignore
//! use strata_metrics::{SharedMetricRegistries, Tag};
//!
//! let registries = SharedMetricRegistries::new();
//! let app = registries.application();
//!
//! let requests = app.counter_with_tags("requests", &[Tag::new("method", "GET")?])?;
//! requests.inc();
//!
//! let latency = app.timer("reqLatency")?;
//! latency.time(|| handle_request());
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};

use parking_lot::RwLock;
use prometheus::proto::MetricFamily;
use tracing::{debug, warn};

use crate::adapters::{Counter, Gauge, Histogram, MeterHandle, Metric, Timer};
use crate::error::{MetricsError, Result};
use crate::export::encode;
use crate::gate::ScopeGate;
use crate::id::{MetricId, MetricType};
use crate::mapping::MemberToMetricMappings;
use crate::metadata::{Metadata, MetadataEntry};
use crate::shared::RegistrySettings;
use crate::store::{GaugeFn, MeterId, MeterSpec, MeterStore, ScopeStore};
use crate::tags::{Tag, Tags, APP_TAG, SCOPE_TAG};

/// Scope for metrics defined by the application.
pub const APPLICATION_SCOPE: &str = "application";

/// Scope for platform metrics every process exposes.
pub const BASE_SCOPE: &str = "base";

/// Scope for vendor specific metrics.
pub const VENDOR_SCOPE: &str = "vendor";

pub struct MetricRegistry {
    scope: String,
    settings: Arc<RegistrySettings>,
    store: Arc<MeterStore>,
    scope_store: Arc<ScopeStore>,
    metrics: RwLock<HashMap<MetricId, Metric>>,
    metadata: RwLock<HashMap<String, MetadataEntry>>,
    mappings: MemberToMetricMappings,
    platform: Once,
    dropped: AtomicBool,
}

impl MetricRegistry {
    /// Create the registry and attach its child store to the shared store.
    pub(crate) fn new(
        scope: &str,
        settings: Arc<RegistrySettings>,
        store: Arc<MeterStore>,
        gate: Arc<ScopeGate>,
    ) -> Self {
        let scope_store = Arc::new(ScopeStore::new(gate, settings.global_tags().clone()));
        store.add(Arc::clone(&scope_store));
        Self {
            scope: scope.to_string(),
            settings,
            store,
            scope_store,
            metrics: RwLock::new(HashMap::new()),
            metadata: RwLock::new(HashMap::new()),
            mappings: MemberToMetricMappings::new(),
            platform: Once::new(),
            dropped: AtomicBool::new(false),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Whether the directory dropped this registry. A dropped registry
    /// refuses new registrations.
    pub fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::Acquire)
    }

    // Counters

    pub fn counter(&self, name: &str) -> Result<Arc<Counter>> {
        self.counter_with_tags(name, &[])
    }

    pub fn counter_with_tags(&self, name: &str, tags: &[Tag]) -> Result<Arc<Counter>> {
        self.counter_with_metadata(Metadata::new(name), tags)
    }

    pub fn counter_with_metadata(&self, metadata: Metadata, tags: &[Tag]) -> Result<Arc<Counter>> {
        match self.get_or_create(metadata, tags, MeterSpec::Counter)? {
            Metric::Counter(counter) => Ok(counter),
            other => Err(self.conflict(other.id().name(), other.metric_type(), MetricType::Counter)),
        }
    }

    // Gauges

    /// Register a gauge sampling `f`. An existing gauge with the same identity is returned as is.
    pub fn gauge<F>(&self, name: &str, tags: &[Tag], f: F) -> Result<Arc<Gauge>>
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        self.gauge_with_metadata(Metadata::new(name), tags, f)
    }

    pub fn gauge_with_metadata<F>(&self, metadata: Metadata, tags: &[Tag], f: F) -> Result<Arc<Gauge>>
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        let sample: GaugeFn = Arc::new(f);
        match self.get_or_create(metadata, tags, MeterSpec::Gauge(sample))? {
            Metric::Gauge(gauge) => Ok(gauge),
            other => Err(self.conflict(other.id().name(), other.metric_type(), MetricType::Gauge)),
        }
    }

    /// Register a gauge reading `target` through `f`. The gauge keeps `target` alive.
    pub fn gauge_for<T>(
        &self,
        metadata: Metadata,
        tags: &[Tag],
        target: Arc<T>,
        f: fn(&T) -> f64,
    ) -> Result<Arc<Gauge>>
    where
        T: Send + Sync + 'static,
    {
        self.gauge_with_metadata(metadata, tags, move || f(&target))
    }

    // Histograms

    pub fn histogram(&self, name: &str) -> Result<Arc<Histogram>> {
        self.histogram_with_tags(name, &[])
    }

    pub fn histogram_with_tags(&self, name: &str, tags: &[Tag]) -> Result<Arc<Histogram>> {
        self.histogram_with_metadata(Metadata::new(name), tags)
    }

    pub fn histogram_with_metadata(&self, metadata: Metadata, tags: &[Tag]) -> Result<Arc<Histogram>> {
        let spec = MeterSpec::Histogram(self.settings.distribution().histogram(metadata.name()));
        match self.get_or_create(metadata, tags, spec)? {
            Metric::Histogram(histogram) => Ok(histogram),
            other => Err(self.conflict(other.id().name(), other.metric_type(), MetricType::Histogram)),
        }
    }

    // Timers

    pub fn timer(&self, name: &str) -> Result<Arc<Timer>> {
        self.timer_with_tags(name, &[])
    }

    pub fn timer_with_tags(&self, name: &str, tags: &[Tag]) -> Result<Arc<Timer>> {
        self.timer_with_metadata(Metadata::new(name), tags)
    }

    pub fn timer_with_metadata(&self, metadata: Metadata, tags: &[Tag]) -> Result<Arc<Timer>> {
        let spec = MeterSpec::Timer(self.settings.distribution().timer(metadata.name()));
        match self.get_or_create(metadata, tags, spec)? {
            Metric::Timer(timer) => Ok(timer),
            other => Err(self.conflict(other.id().name(), other.metric_type(), MetricType::Timer)),
        }
    }

    fn conflict(&self, name: &str, existing: MetricType, requested: MetricType) -> MetricsError {
        MetricsError::TypeConflict {
            name: name.to_string(),
            existing,
            requested,
        }
    }

    /// Return the metric for the identity, creating it from `spec` on first use.
    fn get_or_create(&self, metadata: Metadata, tags: &[Tag], spec: MeterSpec) -> Result<Metric> {
        if metadata.name().is_empty() {
            return Err(MetricsError::EmptyName);
        }
        let id = self.metric_id(metadata.name(), tags)?;
        let kind = spec.kind();

        // Fast path: read lock
        let existing = self.metrics.read().get(&id).cloned();
        if let Some(existing) = existing {
            return self.reuse(existing, &metadata, kind);
        }

        // Slow path: write lock, double-checked.
        // First registrations serialize here and again on the store's composite
        // mutex, which every scope shares.
        let mut metrics = self.metrics.write();
        if let Some(existing) = metrics.get(&id).cloned() {
            drop(metrics);
            return self.reuse(existing, &metadata, kind);
        }
        if self.is_dropped() {
            return Err(MetricsError::ScopeDropped(self.scope.clone()));
        }

        let effective = self.bind_metadata(&metadata, kind)?;
        let meter_id = self.meter_id(&id);
        let registered = {
            let grant = self.scope_store.gate().open();
            self.store
                .register(meter_id.clone(), &spec, &effective, &grant)
                .map(|global| MeterHandle::new(id.clone(), global, self.scope_store.find(&meter_id)))
        };
        let handle = match registered {
            Ok(handle) => handle,
            Err(e) => {
                if !metrics.keys().any(|other| other.name() == id.name()) {
                    self.metadata.write().remove(id.name());
                }
                return Err(e);
            }
        };
        if handle.local().is_none() {
            warn!(scope = %self.scope, metric = %id, "no scope-local meter captured, reads fall back to the shared store");
        }

        let metric = match spec {
            MeterSpec::Counter => Metric::Counter(Arc::new(Counter::new(handle))),
            MeterSpec::Gauge(sample) => Metric::Gauge(Arc::new(Gauge::new(handle, sample))),
            MeterSpec::Histogram(_) => Metric::Histogram(Arc::new(Histogram::new(handle))),
            MeterSpec::Timer(_) => Metric::Timer(Arc::new(Timer::new(handle))),
        };
        metrics.insert(id, metric.clone());
        Ok(metric)
    }

    fn reuse(&self, existing: Metric, metadata: &Metadata, kind: MetricType) -> Result<Metric> {
        if existing.metric_type() != kind {
            return Err(self.conflict(existing.id().name(), existing.metric_type(), kind));
        }
        self.bind_metadata(metadata, kind)?;
        Ok(existing)
    }

    /// Record metadata for the name, refreshing meters if it changed.
    ///
    /// Returns the effective metadata for the name.
    fn bind_metadata(&self, metadata: &Metadata, kind: MetricType) -> Result<Metadata> {
        let mut entries = self.metadata.write();
        match entries.get_mut(metadata.name()) {
            Some(entry) => {
                if entry.kind() != kind {
                    return Err(self.conflict(metadata.name(), entry.kind(), kind));
                }
                entry.update(metadata);
                if entry.clean_dirty() {
                    self.scope_store.refresh_metadata(entry.metadata());
                    debug!(scope = %self.scope, name = metadata.name(), "refreshed metric metadata");
                }
                Ok(entry.metadata().clone())
            }
            None => {
                entries.insert(
                    metadata.name().to_string(),
                    MetadataEntry::new(metadata.clone(), kind),
                );
                Ok(metadata.clone())
            }
        }
    }

    // Identity

    fn metric_id(&self, name: &str, tags: &[Tag]) -> Result<MetricId> {
        let mut tags: Tags = tags.into();
        if let Some(value) = tags.remove(SCOPE_TAG) {
            if value != self.scope {
                return Err(MetricsError::ReservedTag {
                    key: SCOPE_TAG.to_string(),
                    reason: format!("value `{value}` does not match registry scope `{}`", self.scope),
                });
            }
        }
        Ok(self.with_app_tags(MetricId::with_tags(name, tags)))
    }

    /// Add the application tag to `id` if an application name is configured.
    pub fn with_app_tags(&self, mut id: MetricId) -> MetricId {
        if let Some(app) = self.settings.app_name() {
            id.tags_mut().insert_raw(APP_TAG, app);
        }
        id
    }

    /// `tags` plus this registry's scope tag.
    pub fn resolve_scope_tag(&self, tags: &Tags) -> Tags {
        let mut resolved = tags.clone();
        resolved.insert_raw(SCOPE_TAG, &self.scope);
        resolved
    }

    fn meter_id(&self, id: &MetricId) -> MeterId {
        MeterId::with_tags(id.name(), self.resolve_scope_tag(id.tags()))
    }

    /// Bring a caller-supplied id to the form used as key in this registry.
    fn normalize(&self, id: &MetricId) -> MetricId {
        let mut id = id.clone();
        if id.tags().get(SCOPE_TAG) == Some(self.scope.as_str()) {
            id.tags_mut().remove(SCOPE_TAG);
        }
        self.with_app_tags(id)
    }

    // Lookups

    pub fn get_metric(&self, id: &MetricId) -> Option<Metric> {
        self.metrics.read().get(&self.normalize(id)).cloned()
    }

    pub fn get_counter(&self, id: &MetricId) -> Option<Arc<Counter>> {
        self.get_metric(id)?.as_counter().cloned()
    }

    pub fn get_gauge(&self, id: &MetricId) -> Option<Arc<Gauge>> {
        self.get_metric(id)?.as_gauge().cloned()
    }

    pub fn get_histogram(&self, id: &MetricId) -> Option<Arc<Histogram>> {
        self.get_metric(id)?.as_histogram().cloned()
    }

    pub fn get_timer(&self, id: &MetricId) -> Option<Arc<Timer>> {
        self.get_metric(id)?.as_timer().cloned()
    }

    /// All metrics, ordered by id.
    pub fn metrics(&self) -> BTreeMap<MetricId, Metric> {
        self.metrics
            .read()
            .iter()
            .map(|(id, metric)| (id.clone(), metric.clone()))
            .collect()
    }

    fn collect<T>(&self, select: impl Fn(&Metric) -> Option<&Arc<T>>) -> BTreeMap<MetricId, Arc<T>> {
        self.metrics
            .read()
            .iter()
            .filter_map(|(id, metric)| select(metric).map(|m| (id.clone(), Arc::clone(m))))
            .collect()
    }

    pub fn counters(&self) -> BTreeMap<MetricId, Arc<Counter>> {
        self.collect(Metric::as_counter)
    }

    pub fn gauges(&self) -> BTreeMap<MetricId, Arc<Gauge>> {
        self.collect(Metric::as_gauge)
    }

    pub fn histograms(&self) -> BTreeMap<MetricId, Arc<Histogram>> {
        self.collect(Metric::as_histogram)
    }

    pub fn timers(&self) -> BTreeMap<MetricId, Arc<Timer>> {
        self.collect(Metric::as_timer)
    }

    pub fn metric_ids(&self) -> BTreeSet<MetricId> {
        self.metrics.read().keys().cloned().collect()
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.metrics
            .read()
            .keys()
            .map(|id| id.name().to_string())
            .collect()
    }

    pub fn metadata(&self, name: &str) -> Option<Metadata> {
        self.metadata.read().get(name).map(|e| e.metadata().clone())
    }

    pub fn metric_type(&self, name: &str) -> Option<MetricType> {
        self.metadata.read().get(name).map(MetadataEntry::kind)
    }

    /// Number of metrics held by this registry.
    pub fn len(&self) -> usize {
        self.metrics.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.read().is_empty()
    }

    /// Number of meters in this scope's store.
    pub fn meter_count(&self) -> usize {
        self.scope_store.len()
    }

    // Removal

    /// Remove a metric and unregister its meter from the shared store.
    pub fn remove(&self, id: &MetricId) -> bool {
        let id = self.normalize(id);
        let mut metrics = self.metrics.write();
        let Some(metric) = metrics.remove(&id) else {
            return false;
        };
        if !metrics.keys().any(|other| other.name() == id.name()) {
            self.metadata.write().remove(id.name());
        }
        // Unregister before releasing the map so a concurrent get-or-create
        // cannot pick up the meter being removed.
        self.store.remove(metric.handle().global());
        drop(metrics);
        debug!(scope = %self.scope, metric = %id, "removed metric");
        true
    }

    /// Remove every metric named `name`.
    pub fn remove_by_name(&self, name: &str) -> bool {
        self.remove_matching(|id, _| id.name() == name) > 0
    }

    /// Remove every metric matching `filter`, returning how many were removed.
    pub fn remove_matching(&self, filter: impl Fn(&MetricId, &Metric) -> bool) -> usize {
        let matching: Vec<MetricId> = self
            .metrics
            .read()
            .iter()
            .filter(|(id, metric)| filter(*id, *metric))
            .map(|(id, _)| id.clone())
            .collect();
        matching.iter().filter(|id| self.remove(id)).count()
    }

    /// Remove every metric, metadata entry and mapping, and refuse new
    /// registrations.
    pub(crate) fn clear(&self) {
        let mut metrics = self.metrics.write();
        self.dropped.store(true, Ordering::Release);
        self.metadata.write().clear();
        self.mappings.clear();
        for (_, metric) in metrics.drain() {
            self.store.remove(metric.handle().global());
        }
        self.scope_store.clear();
    }

    // Export

    pub(crate) fn gather(&self, name: Option<&str>) -> Vec<MetricFamily> {
        self.scope_store.gather(name)
    }

    /// This scope in the Prometheus text format.
    pub fn export(&self) -> Result<String> {
        self.settings.capabilities().require_export()?;
        encode(&self.gather(None))
    }

    /// Meters named `name` in the Prometheus text format.
    pub fn export_by_name(&self, name: &str) -> Result<String> {
        self.settings.capabilities().require_export()?;
        encode(&self.gather(Some(name)))
    }

    // Members

    pub fn member_mappings(&self) -> &MemberToMetricMappings {
        &self.mappings
    }

    /// Bind platform metrics. Runs at most once per registry.
    pub(crate) fn bind_platform_metrics(&self) {
        self.platform.call_once(|| {
            if let Err(e) = crate::base::register_platform_metrics(self) {
                warn!(%e, scope = %self.scope, "failed to register platform metrics");
            }
        });
    }
}

impl std::fmt::Debug for MetricRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricRegistry")
            .field("scope", &self.scope)
            .field("metrics", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricsConfig;
    use crate::metadata::units;
    use crate::shared::SharedMetricRegistries;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registries() -> SharedMetricRegistries {
        SharedMetricRegistries::new()
    }

    #[test]
    fn test_counter_identity() {
        let registries = registries();
        let app = registries.application();
        let a = app.counter("hits").unwrap();
        let b = app.counter("hits").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let tagged = app
            .counter_with_tags("hits", &[Tag::new("code", "200").unwrap()])
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &tagged));
        assert_eq!(app.len(), 2);
    }

    #[test]
    fn test_counter_counts() {
        let registries = registries();
        let counter = registries.application().counter("c").unwrap();
        counter.inc();
        counter.inc_by(4);
        assert_eq!(counter.count(), 5);
    }

    #[test]
    fn test_empty_name_rejected() {
        let registries = registries();
        assert!(matches!(
            registries.application().counter(""),
            Err(MetricsError::EmptyName)
        ));
    }

    #[test]
    fn test_type_conflict() {
        let registries = registries();
        let app = registries.application();
        app.counter("thing").unwrap();
        let err = app.timer("thing").unwrap_err();
        assert!(matches!(
            err,
            MetricsError::TypeConflict {
                existing: MetricType::Counter,
                requested: MetricType::Timer,
                ..
            }
        ));
        // Different tags, same name, still conflicts.
        assert!(app
            .histogram_with_tags("thing", &[Tag::new("k", "v").unwrap()])
            .is_err());
        assert_eq!(app.len(), 1);
    }

    #[test]
    fn test_reserved_scope_tag() {
        let registries = registries();
        let app = registries.application();

        let err = app
            .counter_with_tags("c", &[Tag::new("scope", "base").unwrap()])
            .unwrap_err();
        assert!(matches!(err, MetricsError::ReservedTag { .. }));

        let own = app
            .counter_with_tags("c", &[Tag::new("scope", "application").unwrap()])
            .unwrap();
        let plain = app.counter("c").unwrap();
        assert!(Arc::ptr_eq(&own, &plain));
    }

    #[test]
    fn test_metadata_refresh_keeps_value() {
        let registries = registries();
        let app = registries.application();
        let first = app
            .counter_with_metadata(Metadata::new("jobs").with_description("old"), &[])
            .unwrap();
        first.inc_by(3);

        let second = app
            .counter_with_metadata(
                Metadata::new("jobs")
                    .with_description("new")
                    .with_unit(units::NONE),
                &[],
            )
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.count(), 3);
        assert_eq!(app.metadata("jobs").unwrap().description(), Some("new"));

        let text = app.export().unwrap();
        assert!(text.contains("# HELP jobs_total new"), "{text}");
    }

    #[test]
    fn test_app_tag_applied() {
        let mut config = MetricsConfig::default();
        config.app_name = Some("orders".to_string());
        let registries = SharedMetricRegistries::from_config(config).unwrap();
        let app = registries.application();
        let counter = app.counter("placed").unwrap();
        assert_eq!(counter.id().tags().get(APP_TAG), Some("orders"));

        // Lookups without the app tag resolve to the same metric.
        let found = app.get_counter(&MetricId::new("placed")).unwrap();
        assert!(Arc::ptr_eq(&counter, &found));
        assert!(app.export().unwrap().contains("_app=\"orders\""));
    }

    #[test]
    fn test_lookup_and_remove() {
        let registries = registries();
        let app = registries.application();
        app.counter("a").unwrap();
        app.timer("b").unwrap();
        app.histogram("c").unwrap();

        assert!(app.get_counter(&MetricId::new("a")).is_some());
        assert!(app.get_timer(&MetricId::new("a")).is_none());
        assert_eq!(app.counters().len(), 1);
        assert_eq!(app.timers().len(), 1);
        assert_eq!(app.histograms().len(), 1);
        assert_eq!(app.meter_count(), 3);

        assert!(app.remove(&MetricId::new("a")));
        assert!(!app.remove(&MetricId::new("a")));
        assert!(app.get_counter(&MetricId::new("a")).is_none());
        assert!(app.metadata("a").is_none());
        assert_eq!(app.meter_count(), 2);

        assert!(app.remove_by_name("b"));
        assert_eq!(app.len(), 1);
    }

    #[test]
    fn test_recreate_after_remove_starts_fresh() {
        let registries = registries();
        let app = registries.application();
        app.counter("c").unwrap().inc_by(10);
        app.remove(&MetricId::new("c"));
        assert_eq!(app.counter("c").unwrap().count(), 0);
    }

    #[test]
    fn test_gauge_samples_and_holds_target() {
        let registries = registries();
        let app = registries.application();
        let target = Arc::new(AtomicUsize::new(3));
        let gauge = app
            .gauge_for(Metadata::new("queue"), &[], Arc::clone(&target), |t| {
                t.load(Ordering::Relaxed) as f64
            })
            .unwrap();
        assert_eq!(gauge.value(), 3.0);
        target.store(8, Ordering::Relaxed);
        assert_eq!(gauge.value(), 8.0);

        // The gauge owns a strong reference.
        assert_eq!(Arc::strong_count(&target), 2);
    }

    #[test]
    fn test_histogram_ignores_negative() {
        let registries = registries();
        let histogram = registries.application().histogram("sizes").unwrap();
        histogram.update(10);
        histogram.update(-5);
        histogram.update(30);
        assert_eq!(histogram.count(), 2);
        assert_eq!(histogram.sum(), 40);
        assert_eq!(histogram.snapshot().max(), 30.0);
    }

    #[test]
    fn test_export_unsupported_without_prometheus() {
        let mut config = MetricsConfig::default();
        config.prometheus_enabled = false;
        let registries = SharedMetricRegistries::from_config(config).unwrap();
        let app = registries.application();
        app.counter("c").unwrap().inc();
        assert_eq!(app.counter("c").unwrap().count(), 1);
        assert!(matches!(
            app.export(),
            Err(MetricsError::ExportUnsupported(_))
        ));
    }

    #[test]
    fn test_export_keeps_first_series_on_name_clash() {
        let registries = registries();
        let app = registries.application();
        app.counter("a").unwrap().inc_by(3);
        app.gauge("a_total", &[], || 42.0).unwrap();

        let text = app.export().unwrap();
        assert_eq!(text.matches("a_total{scope=\"application\"}").count(), 1, "{text}");
        assert!(text.contains("a_total{scope=\"application\"} 3"), "{text}");
        assert!(!text.contains("} 0\n"), "{text}");
    }
}
