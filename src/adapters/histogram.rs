//! Distribution of recorded values.

use std::fmt;

use crate::adapters::{MeterHandle, Snapshot};
use crate::id::MetricId;
use crate::store::{CompositeMeter, LocalMeter};

/// Records the distribution of non-negative integer values.
pub struct Histogram {
    handle: MeterHandle,
}

impl Histogram {
    pub(crate) fn new(handle: MeterHandle) -> Self {
        Self { handle }
    }

    pub(crate) fn handle(&self) -> &MeterHandle {
        &self.handle
    }

    pub fn id(&self) -> &MetricId {
        self.handle.id()
    }

    /// Record a value. Negative values are ignored.
    pub fn update(&self, value: i64) {
        let Ok(raw) = u64::try_from(value) else {
            return;
        };
        match self.handle.local().and_then(LocalMeter::distribution) {
            Some(dist) => dist.record(raw),
            None => self.handle.global().record(raw),
        }
    }

    pub fn count(&self) -> u64 {
        self.handle.read(
            |m| m.distribution().map_or(0, |d| d.count()),
            CompositeMeter::distribution_count,
        )
    }

    /// Sum of all recorded values.
    pub fn sum(&self) -> u64 {
        self.handle.read(
            |m| m.distribution().map_or(0, |d| d.total()),
            CompositeMeter::distribution_total,
        )
    }

    pub fn snapshot(&self) -> Snapshot {
        self.handle.read(
            |m| m.distribution().map_or_else(Snapshot::empty, |d| d.snapshot()),
            CompositeMeter::snapshot,
        )
    }
}

impl fmt::Debug for Histogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Histogram")
            .field("id", self.id())
            .field("count", &self.count())
            .finish()
    }
}
