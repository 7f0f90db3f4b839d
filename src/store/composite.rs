//! Composite meters spanning every scope store.

use std::sync::Arc;

use crate::adapters::snapshot::Snapshot;
use crate::id::MetricType;
use crate::store::meter::LocalMeter;
use crate::store::MeterId;

/// One slot per child store, in child registration order.
pub(crate) enum ChildMeter {
    /// The child accepted the registration.
    Local(Arc<LocalMeter>),
    /// The child's filter denied the registration.
    Noop,
}

/// The global view of a meter across all scope stores.
///
/// Reads come from the first slot, which is a no-op for every meter that does
/// not belong to the first registered scope. Writes fan out to every live slot.
pub(crate) struct CompositeMeter {
    id: MeterId,
    kind: MetricType,
    slots: Vec<ChildMeter>,
}

impl CompositeMeter {
    pub(crate) fn new(id: MeterId, kind: MetricType, slots: Vec<ChildMeter>) -> Self {
        Self { id, kind, slots }
    }

    pub(crate) fn id(&self) -> &MeterId {
        &self.id
    }

    pub(crate) fn kind(&self) -> MetricType {
        self.kind
    }

    fn first(&self) -> Option<&LocalMeter> {
        match self.slots.first() {
            Some(ChildMeter::Local(meter)) => Some(meter.as_ref()),
            _ => None,
        }
    }

    pub(crate) fn live(&self) -> impl Iterator<Item = &Arc<LocalMeter>> {
        self.slots.iter().filter_map(|slot| match slot {
            ChildMeter::Local(meter) => Some(meter),
            ChildMeter::Noop => None,
        })
    }

    pub(crate) fn increment(&self, n: u64) {
        self.live().for_each(|meter| meter.increment(n));
    }

    pub(crate) fn record(&self, raw: u64) {
        for meter in self.live() {
            if let Some(dist) = meter.distribution() {
                dist.record(raw);
            }
        }
    }

    pub(crate) fn counter_value(&self) -> u64 {
        self.first().map_or(0, LocalMeter::counter_value)
    }

    pub(crate) fn distribution_count(&self) -> u64 {
        self.first()
            .and_then(LocalMeter::distribution)
            .map_or(0, |dist| dist.count())
    }

    pub(crate) fn distribution_total(&self) -> u64 {
        self.first()
            .and_then(LocalMeter::distribution)
            .map_or(0, |dist| dist.total())
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        self.first()
            .and_then(LocalMeter::distribution)
            .map_or_else(Snapshot::empty, |dist| dist.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Metadata;
    use crate::store::meter::MeterSpec;

    fn local(name: &str) -> Arc<LocalMeter> {
        Arc::new(LocalMeter::new(MeterId::new(name), &MeterSpec::Counter, Metadata::new(name)).unwrap())
    }

    #[test]
    fn test_reads_follow_first_slot() {
        let meter = local("c");
        let composite = CompositeMeter::new(
            MeterId::new("c"),
            MetricType::Counter,
            vec![ChildMeter::Noop, ChildMeter::Local(Arc::clone(&meter))],
        );
        composite.increment(4);

        // The live meter saw the write, the composite read is stale.
        assert_eq!(meter.counter_value(), 4);
        assert_eq!(composite.counter_value(), 0);
    }

    #[test]
    fn test_reads_when_first_slot_is_live() {
        let meter = local("c");
        let composite = CompositeMeter::new(
            MeterId::new("c"),
            MetricType::Counter,
            vec![ChildMeter::Local(Arc::clone(&meter)), ChildMeter::Noop],
        );
        composite.increment(2);
        assert_eq!(composite.counter_value(), 2);
        assert_eq!(composite.live().count(), 1);
    }

    #[test]
    fn test_noop_distribution_reads() {
        let composite = CompositeMeter::new(MeterId::new("t"), MetricType::Timer, vec![ChildMeter::Noop]);
        composite.record(10);
        assert_eq!(composite.distribution_count(), 0);
        assert_eq!(composite.snapshot().count(), 0);
    }
}
