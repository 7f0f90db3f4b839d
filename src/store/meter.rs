//! Physical meters owned by a scope store.

use std::sync::Arc;

use hdrhistogram::Histogram as HdrHistogram;
use parking_lot::{Mutex, RwLock};
use prometheus::core::{Atomic, AtomicU64};

use crate::adapters::snapshot::{BucketValue, PercentileValue, Snapshot};
use crate::distribution::DistributionSpec;
use crate::error::{MetricsError, Result};
use crate::id::MetricType;
use crate::metadata::Metadata;
use crate::store::MeterId;

/// Sampling function behind a gauge.
pub(crate) type GaugeFn = Arc<dyn Fn() -> f64 + Send + Sync>;

/// Timer values are recorded in nanoseconds and exposed in seconds.
pub(crate) const NANOS_PER_SECOND: f64 = 1e9;

/// What to create when a meter is registered for the first time.
#[derive(Clone)]
pub(crate) enum MeterSpec {
    Counter,
    Gauge(GaugeFn),
    Histogram(DistributionSpec),
    Timer(DistributionSpec),
}

impl MeterSpec {
    pub(crate) fn kind(&self) -> MetricType {
        match self {
            MeterSpec::Counter => MetricType::Counter,
            MeterSpec::Gauge(_) => MetricType::Gauge,
            MeterSpec::Histogram(_) => MetricType::Histogram,
            MeterSpec::Timer(_) => MetricType::Timer,
        }
    }
}

pub(crate) enum MeterValue {
    Counter(AtomicU64),
    Gauge(GaugeFn),
    Distribution(Distribution),
}

/// A meter living in exactly one scope store.
pub(crate) struct LocalMeter {
    id: MeterId,
    kind: MetricType,
    metadata: RwLock<Metadata>,
    value: MeterValue,
}

impl LocalMeter {
    pub(crate) fn new(id: MeterId, spec: &MeterSpec, metadata: Metadata) -> Result<Self> {
        let value = match spec {
            MeterSpec::Counter => MeterValue::Counter(AtomicU64::new(0)),
            MeterSpec::Gauge(f) => MeterValue::Gauge(Arc::clone(f)),
            MeterSpec::Histogram(dist) => {
                MeterValue::Distribution(Distribution::new(id.name(), dist.clone(), 1.0)?)
            }
            MeterSpec::Timer(dist) => MeterValue::Distribution(Distribution::new(
                id.name(),
                dist.clone(),
                NANOS_PER_SECOND,
            )?),
        };
        Ok(Self {
            id,
            kind: spec.kind(),
            metadata: RwLock::new(metadata),
            value,
        })
    }

    pub(crate) fn id(&self) -> &MeterId {
        &self.id
    }

    pub(crate) fn kind(&self) -> MetricType {
        self.kind
    }

    pub(crate) fn metadata(&self) -> Metadata {
        self.metadata.read().clone()
    }

    pub(crate) fn set_metadata(&self, metadata: Metadata) {
        *self.metadata.write() = metadata;
    }

    pub(crate) fn value(&self) -> &MeterValue {
        &self.value
    }

    pub(crate) fn increment(&self, n: u64) {
        if let MeterValue::Counter(count) = &self.value {
            count.inc_by(n);
        }
    }

    pub(crate) fn counter_value(&self) -> u64 {
        match &self.value {
            MeterValue::Counter(count) => count.get(),
            _ => 0,
        }
    }

    pub(crate) fn gauge_value(&self) -> f64 {
        match &self.value {
            MeterValue::Gauge(f) => f(),
            _ => f64::NAN,
        }
    }

    pub(crate) fn distribution(&self) -> Option<&Distribution> {
        match &self.value {
            MeterValue::Distribution(dist) => Some(dist),
            _ => None,
        }
    }
}

struct DistributionState {
    histogram: HdrHistogram<u64>,
    count: u64,
    total: u64,
    max: u64,
}

/// Count, total, max and a percentile histogram of recorded values.
///
/// Values are recorded as raw integers. `scale` converts them to the exposed
/// base unit (1 for plain histograms, nanoseconds per second for timers).
pub(crate) struct Distribution {
    spec: DistributionSpec,
    scale: f64,
    state: Mutex<DistributionState>,
}

impl Distribution {
    pub(crate) fn new(name: &str, spec: DistributionSpec, scale: f64) -> Result<Self> {
        let creation_failed = |e: hdrhistogram::CreationError| MetricsError::Distribution {
            name: name.to_string(),
            reason: format!("{e:?}"),
        };

        let low = spec
            .min_value
            .map(|v| (v * scale).floor() as u64)
            .unwrap_or(1)
            .max(1);
        let histogram = match spec.max_value {
            Some(max) => {
                let high = ((max * scale).ceil() as u64).max(low.saturating_mul(2));
                HdrHistogram::<u64>::new_with_bounds(low, high, spec.precision).map_err(creation_failed)?
            }
            None => {
                let mut histogram =
                    HdrHistogram::<u64>::new_with_bounds(low, low.saturating_mul(2), spec.precision)
                        .map_err(creation_failed)?;
                histogram.auto(true);
                histogram
            }
        };

        Ok(Self {
            spec,
            scale,
            state: Mutex::new(DistributionState {
                histogram,
                count: 0,
                total: 0,
                max: 0,
            }),
        })
    }

    pub(crate) fn record(&self, raw: u64) {
        let mut state = self.state.lock();
        // Values outside fixed bounds are clamped rather than dropped.
        state.histogram.saturating_record(raw);
        state.count += 1;
        state.total = state.total.saturating_add(raw);
        state.max = state.max.max(raw);
    }

    pub(crate) fn count(&self) -> u64 {
        self.state.lock().count
    }

    /// Sum of recorded raw values.
    pub(crate) fn total(&self) -> u64 {
        self.state.lock().total
    }

    /// Point-in-time view in the exposed base unit.
    pub(crate) fn snapshot(&self) -> Snapshot {
        let state = self.state.lock();
        let scale = self.scale;
        let percentiles = self
            .spec
            .percentiles
            .iter()
            .map(|&percentile| PercentileValue {
                percentile,
                value: if state.count == 0 {
                    0.0
                } else {
                    state.histogram.value_at_quantile(percentile) as f64 / scale
                },
            })
            .collect();

        let buckets = self
            .spec
            .buckets
            .iter()
            .map(|&bound| {
                let raw_bound = (bound * scale).round() as u64;
                let count = state
                    .histogram
                    .iter_recorded()
                    .filter(|v| v.value_iterated_to() <= raw_bound)
                    .map(|v| v.count_at_value())
                    .sum();
                BucketValue { bound, count }
            })
            .collect();

        Snapshot::new(
            state.count,
            state.total as f64 / scale,
            state.max as f64 / scale,
            percentiles,
            buckets,
        )
    }
}
