//! Sampled gauge.

use std::fmt;

use crate::adapters::MeterHandle;
use crate::id::MetricId;
use crate::store::GaugeFn;

/// A value sampled from a function each time it is read.
///
/// The function, and anything it captures, is held strongly for as long as
/// the gauge is registered.
pub struct Gauge {
    handle: MeterHandle,
    sample: GaugeFn,
}

impl Gauge {
    pub(crate) fn new(handle: MeterHandle, sample: GaugeFn) -> Self {
        Self { handle, sample }
    }

    pub(crate) fn handle(&self) -> &MeterHandle {
        &self.handle
    }

    pub fn id(&self) -> &MetricId {
        self.handle.id()
    }

    /// Sample the current value.
    pub fn value(&self) -> f64 {
        match self.handle.local() {
            Some(meter) => meter.gauge_value(),
            // The composite gauge may be a no-op, sample directly instead.
            None => (self.sample)(),
        }
    }
}

impl fmt::Debug for Gauge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gauge").field("id", self.id()).finish()
    }
}
