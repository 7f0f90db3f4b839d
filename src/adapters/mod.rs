//! Metric adapters handed out by a [`MetricRegistry`](crate::MetricRegistry).
//!
//! Every adapter holds two handles to its meter:
//!
//! - the composite handle from the shared store, used to unregister the meter
//!   and as a read fallback
//! - the scope-local meter, captured at registration, used for reads and writes
//!
//! Composite reads take the first child store's slot, which is a no-op for
//! every scope but the first one registered. Reading through the local meter
//! keeps values correct in every scope.

pub mod counter;
pub mod gauge;
pub mod histogram;
pub mod snapshot;
pub mod timer;

use std::sync::Arc;

use crate::id::{MetricId, MetricType};
use crate::store::{CompositeMeter, LocalMeter};

pub use counter::Counter;
pub use gauge::Gauge;
pub use histogram::Histogram;
pub use snapshot::{BucketValue, PercentileValue, Snapshot};
pub use timer::{Timer, TimerContext};

/// Composite plus scope-local handle of one meter.
pub(crate) struct MeterHandle {
    id: MetricId,
    global: Arc<CompositeMeter>,
    local: Option<Arc<LocalMeter>>,
}

impl MeterHandle {
    pub(crate) fn new(
        id: MetricId,
        global: Arc<CompositeMeter>,
        local: Option<Arc<LocalMeter>>,
    ) -> Self {
        Self { id, global, local }
    }

    pub(crate) fn id(&self) -> &MetricId {
        &self.id
    }

    pub(crate) fn global(&self) -> &Arc<CompositeMeter> {
        &self.global
    }

    pub(crate) fn local(&self) -> Option<&LocalMeter> {
        self.local.as_deref()
    }

    /// Read through the local meter, or the composite when none was captured.
    pub(crate) fn read<T>(
        &self,
        local: impl FnOnce(&LocalMeter) -> T,
        global: impl FnOnce(&CompositeMeter) -> T,
    ) -> T {
        match self.local() {
            Some(meter) => local(meter),
            None => global(&self.global),
        }
    }
}

/// Any registered metric.
#[derive(Clone)]
pub enum Metric {
    Counter(Arc<Counter>),
    Gauge(Arc<Gauge>),
    Histogram(Arc<Histogram>),
    Timer(Arc<Timer>),
}

impl Metric {
    pub fn metric_type(&self) -> MetricType {
        match self {
            Metric::Counter(_) => MetricType::Counter,
            Metric::Gauge(_) => MetricType::Gauge,
            Metric::Histogram(_) => MetricType::Histogram,
            Metric::Timer(_) => MetricType::Timer,
        }
    }

    pub fn id(&self) -> &MetricId {
        self.handle().id()
    }

    pub(crate) fn handle(&self) -> &MeterHandle {
        match self {
            Metric::Counter(m) => m.handle(),
            Metric::Gauge(m) => m.handle(),
            Metric::Histogram(m) => m.handle(),
            Metric::Timer(m) => m.handle(),
        }
    }

    pub fn as_counter(&self) -> Option<&Arc<Counter>> {
        match self {
            Metric::Counter(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_gauge(&self) -> Option<&Arc<Gauge>> {
        match self {
            Metric::Gauge(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_histogram(&self) -> Option<&Arc<Histogram>> {
        match self {
            Metric::Histogram(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_timer(&self) -> Option<&Arc<Timer>> {
        match self {
            Metric::Timer(m) => Some(m),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metric")
            .field("type", &self.metric_type())
            .field("id", self.id())
            .finish()
    }
}
