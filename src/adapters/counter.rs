//! Monotonic counter.

use std::fmt;

use crate::adapters::MeterHandle;
use crate::id::MetricId;
use crate::store::{CompositeMeter, LocalMeter};

/// A monotonically increasing count.
///
/// Increments are unsigned, so a counter can never decrease.
pub struct Counter {
    handle: MeterHandle,
}

impl Counter {
    pub(crate) fn new(handle: MeterHandle) -> Self {
        Self { handle }
    }

    pub(crate) fn handle(&self) -> &MeterHandle {
        &self.handle
    }

    pub fn id(&self) -> &MetricId {
        self.handle.id()
    }

    pub fn inc(&self) {
        self.inc_by(1);
    }

    pub fn inc_by(&self, n: u64) {
        match self.handle.local() {
            Some(meter) => meter.increment(n),
            None => self.handle.global().increment(n),
        }
    }

    pub fn count(&self) -> u64 {
        self.handle
            .read(LocalMeter::counter_value, CompositeMeter::counter_value)
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Counter")
            .field("id", self.id())
            .field("count", &self.count())
            .finish()
    }
}
