//! Counting and timing around member invocations.
//!
//! Both interceptors resolve the metric ids mapped for a member in its scope
//! and fail loudly when nothing is mapped, rather than silently skipping the
//! measurement.

use std::collections::HashSet;
use std::sync::Arc;

use crate::adapters::{Counter, Timer};
use crate::error::{MetricsError, Result};
use crate::id::{MetricId, MetricType};
use crate::mapping::MemberInfo;
use crate::registry::MetricRegistry;
use crate::shared::SharedMetricRegistries;

fn mapped_ids(
    ids: Option<HashSet<MetricId>>,
    kind: MetricType,
    member: &MemberInfo,
) -> Result<HashSet<MetricId>> {
    match ids {
        Some(ids) if !ids.is_empty() => Ok(ids),
        _ => Err(MetricsError::NoMetricMapped {
            kind,
            member: member.to_string(),
        }),
    }
}

fn missing(id: &MetricId, member: &MemberInfo) -> MetricsError {
    MetricsError::MappedMetricMissing {
        id: id.to_string(),
        member: member.to_string(),
    }
}

/// Increments every counter mapped to a member before invoking it.
#[derive(Debug, Clone)]
pub struct CountedInterceptor {
    registries: SharedMetricRegistries,
}

impl CountedInterceptor {
    pub fn new(registries: SharedMetricRegistries) -> Self {
        Self { registries }
    }

    fn counters(&self, registry: &MetricRegistry, member: &MemberInfo) -> Result<Vec<Arc<Counter>>> {
        mapped_ids(
            registry.member_mappings().get_counters(member),
            MetricType::Counter,
            member,
        )?
        .iter()
        .map(|id| registry.get_counter(id).ok_or_else(|| missing(id, member)))
        .collect()
    }

    /// Count one invocation of `member` in `scope`, then run `f`.
    ///
    /// Nothing is counted and `f` is not run when the member has no mapped counters.
    pub fn invoke<R>(&self, scope: &str, member: &MemberInfo, f: impl FnOnce() -> R) -> Result<R> {
        let registry = self.registries.get_or_create(scope);
        for counter in self.counters(&registry, member)? {
            counter.inc();
        }
        Ok(f())
    }
}

/// Times a member invocation with every timer mapped to it.
#[derive(Debug, Clone)]
pub struct TimedInterceptor {
    registries: SharedMetricRegistries,
}

impl TimedInterceptor {
    pub fn new(registries: SharedMetricRegistries) -> Self {
        Self { registries }
    }

    fn timers(&self, registry: &MetricRegistry, member: &MemberInfo) -> Result<Vec<Arc<Timer>>> {
        mapped_ids(
            registry.member_mappings().get_timers(member),
            MetricType::Timer,
            member,
        )?
        .iter()
        .map(|id| registry.get_timer(id).ok_or_else(|| missing(id, member)))
        .collect()
    }

    /// Run `f`, recording its duration in every timer mapped to `member`.
    ///
    /// Durations are recorded on return and on unwind.
    pub fn invoke<R>(&self, scope: &str, member: &MemberInfo, f: impl FnOnce() -> R) -> Result<R> {
        let registry = self.registries.get_or_create(scope);
        let timers = self.timers(&registry, member)?;
        let contexts: Vec<_> = timers.iter().map(|timer| timer.start()).collect();
        let result = f();
        for context in contexts {
            context.stop();
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::{register_member, MetricAnnotation};
    use std::time::Duration;

    #[test]
    fn test_counted_invoke() {
        let registries = SharedMetricRegistries::new();
        let member = MemberInfo::method("Orders", "place");
        let ids = register_member(&registries, &member, &[MetricAnnotation::counted()]).unwrap();

        let interceptor = CountedInterceptor::new(registries.clone());
        assert_eq!(interceptor.invoke("application", &member, || 7).unwrap(), 7);
        interceptor.invoke("application", &member, || ()).unwrap();

        let counter = registries.application().get_counter(&ids[0]).unwrap();
        assert_eq!(counter.count(), 2);
    }

    #[test]
    fn test_unmapped_member_fails() {
        let registries = SharedMetricRegistries::new();
        let member = MemberInfo::method("Orders", "cancel");
        let mut ran = false;

        let err = CountedInterceptor::new(registries.clone())
            .invoke("application", &member, || ran = true)
            .unwrap_err();
        assert!(matches!(
            err,
            MetricsError::NoMetricMapped {
                kind: MetricType::Counter,
                ..
            }
        ));
        assert!(!ran);

        let err = TimedInterceptor::new(registries)
            .invoke("application", &member, || ())
            .unwrap_err();
        assert!(matches!(
            err,
            MetricsError::NoMetricMapped {
                kind: MetricType::Timer,
                ..
            }
        ));
    }

    #[test]
    fn test_removed_metric_fails() {
        let registries = SharedMetricRegistries::new();
        let member = MemberInfo::method("Orders", "place");
        let ids = register_member(&registries, &member, &[MetricAnnotation::counted()]).unwrap();
        registries.application().remove(&ids[0]);

        let err = CountedInterceptor::new(registries)
            .invoke("application", &member, || ())
            .unwrap_err();
        assert!(matches!(err, MetricsError::MappedMetricMissing { .. }));
    }

    #[test]
    fn test_timed_invoke() {
        let registries = SharedMetricRegistries::new();
        let member = MemberInfo::constructor("Orders");
        let ids = register_member(&registries, &member, &[MetricAnnotation::timed()]).unwrap();

        TimedInterceptor::new(registries.clone())
            .invoke("application", &member, || std::thread::sleep(Duration::from_millis(5)))
            .unwrap();

        let timer = registries.application().get_timer(&ids[0]).unwrap();
        assert_eq!(timer.count(), 1);
        assert!(timer.elapsed_time() >= Duration::from_millis(5));
    }

    #[test]
    fn test_timed_records_on_panic() {
        let registries = SharedMetricRegistries::new();
        let member = MemberInfo::method("Orders", "explode");
        let ids = register_member(&registries, &member, &[MetricAnnotation::timed()]).unwrap();
        let interceptor = TimedInterceptor::new(registries.clone());

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            interceptor.invoke("application", &member, || panic!("boom"))
        }));
        assert!(outcome.is_err());
        assert_eq!(registries.application().get_timer(&ids[0]).unwrap().count(), 1);
    }
}
