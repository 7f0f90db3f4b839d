//! Per-scope child registry of the meter store.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use prometheus::proto::{self, MetricFamily, MetricType as FamilyType};
use tracing::{debug, warn};

use crate::adapters::snapshot::Snapshot;
use crate::error::{MetricsError, Result};
use crate::gate::{ScopeGate, WriteGrant};
use crate::id::MetricType;
use crate::metadata::Metadata;
use crate::store::composite::ChildMeter;
use crate::store::meter::{LocalMeter, MeterSpec, MeterValue};
use crate::store::MeterId;
use crate::tags::Tags;

/// Meters of a single scope.
///
/// Registrations are denied unless they carry a grant issued by this scope's
/// gate. Global tags are applied at exposition time as common labels.
pub(crate) struct ScopeStore {
    gate: Arc<ScopeGate>,
    common_tags: Tags,
    meters: RwLock<HashMap<MeterId, Arc<LocalMeter>>>,
}

impl ScopeStore {
    pub(crate) fn new(gate: Arc<ScopeGate>, common_tags: Tags) -> Self {
        Self {
            gate,
            common_tags,
            meters: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn scope(&self) -> &str {
        self.gate.scope()
    }

    pub(crate) fn gate(&self) -> &Arc<ScopeGate> {
        &self.gate
    }

    /// Create or find the local meter for `id` if `grant` opens this scope.
    pub(crate) fn register(
        &self,
        id: &MeterId,
        spec: &MeterSpec,
        metadata: &Metadata,
        grant: &WriteGrant<'_>,
    ) -> Result<ChildMeter> {
        if !grant.is_for(&self.gate) {
            return Ok(ChildMeter::Noop);
        }

        if let Some(existing) = self.meters.read().get(id) {
            return check_kind(existing, spec).map(ChildMeter::Local);
        }

        let mut meters = self.meters.write();
        if let Some(existing) = meters.get(id) {
            return check_kind(existing, spec).map(ChildMeter::Local);
        }

        let meter = Arc::new(LocalMeter::new(id.clone(), spec, metadata.clone())?);
        meters.insert(id.clone(), Arc::clone(&meter));
        debug!(scope = %self.scope(), meter = %id, kind = %spec.kind(), "registered meter");
        Ok(ChildMeter::Local(meter))
    }

    pub(crate) fn find(&self, id: &MeterId) -> Option<Arc<LocalMeter>> {
        self.meters.read().get(id).cloned()
    }

    pub(crate) fn remove(&self, id: &MeterId) -> Option<Arc<LocalMeter>> {
        let removed = self.meters.write().remove(id);
        if removed.is_some() {
            debug!(scope = %self.scope(), meter = %id, "removed meter");
        }
        removed
    }

    pub(crate) fn clear(&self) {
        self.meters.write().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.meters.read().len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.meters.read().is_empty()
    }

    /// Replace the metadata of every meter named `metadata.name()`.
    pub(crate) fn refresh_metadata(&self, metadata: &Metadata) {
        for meter in self
            .meters
            .read()
            .values()
            .filter(|m| m.id().name() == metadata.name())
        {
            meter.set_metadata(metadata.clone());
        }
    }

    /// Collect metric families, optionally only for meters named `name`.
    ///
    /// Gauge functions are sampled after the meter map lock is released.
    pub(crate) fn gather(&self, name: Option<&str>) -> Vec<MetricFamily> {
        let mut meters: Vec<Arc<LocalMeter>> = self
            .meters
            .read()
            .values()
            .filter(|m| name.map_or(true, |n| m.id().name() == n))
            .cloned()
            .collect();
        meters.sort_by(|a, b| a.id().cmp(b.id()));

        let mut families = BTreeMap::new();
        for meter in &meters {
            let metadata = meter.metadata();
            let exposed = exposition_name(meter.id().name(), meter.kind(), metadata.unit());
            let labels = self.common_tags.merged(meter.id().tags());
            let help = metadata.help();

            match meter.value() {
                MeterValue::Counter(_) => {
                    let mut counter = proto::Counter::default();
                    counter.set_value(meter.counter_value() as f64);
                    let mut metric = labelled_metric(&labels);
                    metric.set_counter(counter);
                    push_metric(&mut families, &exposed, help, FamilyType::COUNTER, metric);
                }
                MeterValue::Gauge(_) => {
                    push_metric(
                        &mut families,
                        &exposed,
                        help,
                        FamilyType::GAUGE,
                        gauge_metric(&labels, meter.gauge_value()),
                    );
                }
                MeterValue::Distribution(dist) => {
                    let snapshot = dist.snapshot();
                    let pushed = if snapshot.buckets().is_empty() {
                        push_metric(
                            &mut families,
                            &exposed,
                            help,
                            FamilyType::SUMMARY,
                            summary_metric(&labels, &snapshot),
                        )
                    } else {
                        push_metric(
                            &mut families,
                            &exposed,
                            help,
                            FamilyType::HISTOGRAM,
                            histogram_metric(&labels, &snapshot),
                        )
                    };
                    if !pushed {
                        continue;
                    }
                    push_metric(
                        &mut families,
                        &format!("{exposed}_max"),
                        help,
                        FamilyType::GAUGE,
                        gauge_metric(&labels, snapshot.max()),
                    );
                }
            }
        }
        families.into_values().collect()
    }
}

fn check_kind(existing: &Arc<LocalMeter>, spec: &MeterSpec) -> Result<Arc<LocalMeter>> {
    if existing.kind() != spec.kind() {
        return Err(MetricsError::TypeConflict {
            name: existing.id().name().to_string(),
            existing: existing.kind(),
            requested: spec.kind(),
        });
    }
    Ok(Arc::clone(existing))
}

/// Replace characters that are not valid in a Prometheus metric name with underscores.
///
/// Valid chars: `[a-zA-Z_:]` for the first char, `[a-zA-Z0-9_:]` for the rest.
pub(crate) fn sanitize_name(name: &str) -> String {
    name.chars()
        .enumerate()
        .map(|(i, c)| {
            if i == 0 {
                if c.is_ascii_alphabetic() || c == '_' || c == ':' {
                    c
                } else {
                    '_'
                }
            } else if c.is_ascii_alphanumeric() || c == '_' || c == ':' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Exposed family name: sanitized, with the base unit and `_total` for counters.
pub(crate) fn exposition_name(name: &str, kind: MetricType, unit: Option<&str>) -> String {
    let mut exposed = sanitize_name(name);
    let unit = match kind {
        MetricType::Timer => Some("seconds".to_string()),
        _ => unit.map(sanitize_name),
    };
    if let Some(unit) = unit {
        if !exposed.ends_with(&format!("_{unit}")) {
            exposed.push('_');
            exposed.push_str(&unit);
        }
    }
    if kind == MetricType::Counter && !exposed.ends_with("_total") {
        exposed.push_str("_total");
    }
    exposed
}

/// Add `metric` to the family `name`, creating the family on first use.
///
/// Distinct meters can expose the same family name (counter `a` and gauge
/// `a_total`). The first meter in id order keeps the series; a later one of a
/// different type or with the same labels is skipped and `false` returned.
fn push_metric(
    families: &mut BTreeMap<String, MetricFamily>,
    name: &str,
    help: &str,
    kind: FamilyType,
    metric: proto::Metric,
) -> bool {
    let family = families.entry(name.to_string()).or_insert_with(|| {
        let mut family = MetricFamily::default();
        family.set_name(name.to_string());
        family.set_help(help.to_string());
        family.set_field_type(kind);
        family
    });
    if family.get_field_type() != kind {
        warn!(family = name, existing = ?family.get_field_type(), requested = ?kind, "skipping series with conflicting family type");
        return false;
    }
    if family
        .get_metric()
        .iter()
        .any(|existing| same_labels(existing, &metric))
    {
        warn!(family = name, "skipping duplicate series");
        return false;
    }
    family.mut_metric().push(metric);
    true
}

fn same_labels(a: &proto::Metric, b: &proto::Metric) -> bool {
    let pairs = |m: &proto::Metric| -> Vec<(String, String)> {
        m.get_label()
            .iter()
            .map(|l| (l.get_name().to_string(), l.get_value().to_string()))
            .collect()
    };
    pairs(a) == pairs(b)
}

fn labelled_metric(labels: &Tags) -> proto::Metric {
    let mut metric = proto::Metric::default();
    for (key, value) in labels.iter() {
        let mut pair = proto::LabelPair::default();
        pair.set_name(sanitize_name(key));
        pair.set_value(value.to_string());
        metric.mut_label().push(pair);
    }
    metric
}

fn gauge_metric(labels: &Tags, value: f64) -> proto::Metric {
    let mut gauge = proto::Gauge::default();
    gauge.set_value(value);
    let mut metric = labelled_metric(labels);
    metric.set_gauge(gauge);
    metric
}

fn summary_metric(labels: &Tags, snapshot: &Snapshot) -> proto::Metric {
    let mut summary = proto::Summary::default();
    summary.set_sample_count(snapshot.count());
    summary.set_sample_sum(snapshot.sum());
    for p in snapshot.percentiles() {
        let mut quantile = proto::Quantile::default();
        quantile.set_quantile(p.percentile);
        quantile.set_value(p.value);
        summary.mut_quantile().push(quantile);
    }
    let mut metric = labelled_metric(labels);
    metric.set_summary(summary);
    metric
}

fn histogram_metric(labels: &Tags, snapshot: &Snapshot) -> proto::Metric {
    let mut histogram = proto::Histogram::default();
    histogram.set_sample_count(snapshot.count());
    histogram.set_sample_sum(snapshot.sum());
    for b in snapshot.buckets() {
        let mut bucket = proto::Bucket::default();
        bucket.set_upper_bound(b.bound);
        bucket.set_cumulative_count(b.count);
        histogram.mut_bucket().push(bucket);
    }
    let mut metric = labelled_metric(labels);
    metric.set_histogram(histogram);
    metric
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::VisibilityGate;
    use crate::store::meter::GaugeFn;
    use crate::tags::{parse_global_tags, SCOPE_TAG};

    fn meter_id(name: &str, scope: &str) -> MeterId {
        let mut tags = Tags::new();
        tags.insert_raw(SCOPE_TAG, scope);
        MeterId::with_tags(name, tags)
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("my-app"), "my_app");
        assert_eq!(sanitize_name("http.server.requests"), "http_server_requests");
        assert_eq!(sanitize_name("9lives"), "_lives");
        assert_eq!(sanitize_name("ns:metric"), "ns:metric");
    }

    #[test]
    fn test_exposition_name() {
        assert_eq!(exposition_name("hits", MetricType::Counter, None), "hits_total");
        assert_eq!(exposition_name("hits_total", MetricType::Counter, None), "hits_total");
        assert_eq!(
            exposition_name("reqLatency", MetricType::Timer, Some("milliseconds")),
            "reqLatency_seconds"
        );
        assert_eq!(
            exposition_name("heap.used", MetricType::Gauge, Some("bytes")),
            "heap_used_bytes"
        );
        assert_eq!(
            exposition_name("payload", MetricType::Histogram, None),
            "payload"
        );
    }

    #[test]
    fn test_filter_denies_without_matching_grant() {
        let gates = VisibilityGate::new();
        let app = ScopeStore::new(gates.scope_gate("application"), Tags::new());
        let base_gate = gates.scope_gate("base");

        let grant = base_gate.open();
        let id = meter_id("c", "base");
        let slot = app
            .register(&id, &MeterSpec::Counter, &Metadata::new("c"), &grant)
            .unwrap();
        assert!(matches!(slot, ChildMeter::Noop));
        assert!(app.is_empty());
    }

    #[test]
    fn test_register_is_idempotent_and_type_checked() {
        let gates = VisibilityGate::new();
        let gate = gates.scope_gate("application");
        let store = ScopeStore::new(Arc::clone(&gate), Tags::new());
        let id = meter_id("c", "application");

        let grant = gate.open();
        let first = store
            .register(&id, &MeterSpec::Counter, &Metadata::new("c"), &grant)
            .unwrap();
        let second = store
            .register(&id, &MeterSpec::Counter, &Metadata::new("c"), &grant)
            .unwrap();
        match (first, second) {
            (ChildMeter::Local(a), ChildMeter::Local(b)) => assert!(Arc::ptr_eq(&a, &b)),
            _ => panic!("expected local meters"),
        }

        let clash = store.register(
            &id,
            &MeterSpec::Histogram(Default::default()),
            &Metadata::new("c"),
            &grant,
        );
        assert!(matches!(clash, Err(MetricsError::TypeConflict { .. })));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_gather_applies_common_tags() {
        let gates = VisibilityGate::new();
        let gate = gates.scope_gate("application");
        let store = ScopeStore::new(Arc::clone(&gate), parse_global_tags("env=prod").unwrap());
        let id = meter_id("hits", "application");
        {
            let grant = gate.open();
            store
                .register(&id, &MeterSpec::Counter, &Metadata::new("hits"), &grant)
                .unwrap();
        }
        store.find(&id).unwrap().increment(3);

        let families = store.gather(None);
        assert_eq!(families.len(), 1);
        let family = &families[0];
        assert_eq!(family.get_name(), "hits_total");
        assert_eq!(family.get_field_type(), FamilyType::COUNTER);
        let metric = &family.get_metric()[0];
        assert_eq!(metric.get_counter().get_value(), 3.0);
        let labels: Vec<(&str, &str)> = metric
            .get_label()
            .iter()
            .map(|l| (l.get_name(), l.get_value()))
            .collect();
        assert_eq!(labels, vec![("env", "prod"), ("scope", "application")]);
    }

    #[test]
    fn test_gather_distribution_families() {
        let gates = VisibilityGate::new();
        let gate = gates.scope_gate("application");
        let store = ScopeStore::new(Arc::clone(&gate), Tags::new());
        let id = meter_id("payload", "application");
        {
            let grant = gate.open();
            store
                .register(
                    &id,
                    &MeterSpec::Histogram(Default::default()),
                    &Metadata::new("payload").with_unit("bytes"),
                    &grant,
                )
                .unwrap();
        }
        store.find(&id).unwrap().distribution().unwrap().record(512);

        let families = store.gather(Some("payload"));
        let names: Vec<&str> = families.iter().map(|f| f.get_name()).collect();
        assert_eq!(names, vec!["payload_bytes", "payload_bytes_max"]);
        assert_eq!(families[0].get_field_type(), FamilyType::SUMMARY);
        assert_eq!(families[0].get_metric()[0].get_summary().get_sample_count(), 1);
        assert!(store.gather(Some("other")).is_empty());
    }

    #[test]
    fn test_gather_skips_family_name_clashes() {
        let gates = VisibilityGate::new();
        let gate = gates.scope_gate("application");
        let store = ScopeStore::new(Arc::clone(&gate), Tags::new());
        let counter_id = meter_id("a", "application");
        let gauge_id = meter_id("a_total", "application");
        let dist_id = meter_id("payload", "application");
        let max_id = meter_id("payload_max", "application");
        {
            let grant = gate.open();
            let gauge: GaugeFn = Arc::new(|| 42.0);
            store
                .register(&counter_id, &MeterSpec::Counter, &Metadata::new("a"), &grant)
                .unwrap();
            store
                .register(
                    &gauge_id,
                    &MeterSpec::Gauge(Arc::clone(&gauge)),
                    &Metadata::new("a_total"),
                    &grant,
                )
                .unwrap();
            store
                .register(
                    &dist_id,
                    &MeterSpec::Histogram(Default::default()),
                    &Metadata::new("payload"),
                    &grant,
                )
                .unwrap();
            store
                .register(
                    &max_id,
                    &MeterSpec::Gauge(gauge),
                    &Metadata::new("payload_max"),
                    &grant,
                )
                .unwrap();
        }
        store.find(&counter_id).unwrap().increment(3);
        store.find(&dist_id).unwrap().distribution().unwrap().record(7);

        let families = store.gather(None);
        let names: Vec<&str> = families.iter().map(|f| f.get_name()).collect();
        assert_eq!(names, vec!["a_total", "payload", "payload_max"]);

        let total = &families[0];
        assert_eq!(total.get_field_type(), FamilyType::COUNTER);
        assert_eq!(total.get_metric().len(), 1);
        assert_eq!(total.get_metric()[0].get_counter().get_value(), 3.0);

        let max = &families[2];
        assert_eq!(max.get_field_type(), FamilyType::GAUGE);
        assert_eq!(max.get_metric().len(), 1);
        assert_eq!(max.get_metric()[0].get_gauge().get_value(), 7.0);
    }
}
