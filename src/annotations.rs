//! Declarative counted/timed metrics for instrumented members.
//!
//! A [`MetricAnnotation`] describes a counter or timer attached to a member.
//! [`register_member`] registers the metrics up front and records the
//! member-to-metric mapping that the interceptors later resolve.

use crate::error::Result;
use crate::id::MetricId;
use crate::mapping::{simple_name, MemberInfo, MemberKind};
use crate::metadata::Metadata;
use crate::registry::APPLICATION_SCOPE;
use crate::shared::SharedMetricRegistries;
use crate::tags::Tag;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnnotationKind {
    Counted,
    Timed,
}

/// A counted or timed metric declared on a member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricAnnotation {
    kind: AnnotationKind,
    name: Option<String>,
    absolute: bool,
    scope: String,
    tags: Vec<String>,
    unit: Option<String>,
    description: Option<String>,
}

impl MetricAnnotation {
    fn new(kind: AnnotationKind) -> Self {
        Self {
            kind,
            name: None,
            absolute: false,
            scope: APPLICATION_SCOPE.to_string(),
            tags: Vec::new(),
            unit: None,
            description: None,
        }
    }

    pub fn counted() -> Self {
        Self::new(AnnotationKind::Counted)
    }

    pub fn timed() -> Self {
        Self::new(AnnotationKind::Timed)
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Use the name as given instead of prefixing the declaring type.
    pub fn absolute(mut self, absolute: bool) -> Self {
        self.absolute = absolute;
        self
    }

    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Add a `key=value` tag. Parsed at registration.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn kind(&self) -> AnnotationKind {
        self.kind
    }

    pub fn scope_name(&self) -> &str {
        &self.scope
    }

    /// The metric name for `member`.
    pub fn resolve_name(&self, member: &MemberInfo) -> String {
        let member_name = match member.kind() {
            MemberKind::Constructor => simple_name(member.declaring_type()),
            MemberKind::Method => member.name(),
        };
        match (self.name.as_deref().filter(|n| !n.is_empty()), self.absolute) {
            (Some(name), true) => name.to_string(),
            (Some(name), false) => format!("{}.{name}", member.declaring_type()),
            (None, true) => member_name.to_string(),
            (None, false) => format!("{}.{member_name}", member.declaring_type()),
        }
    }

    fn metadata(&self, name: String) -> Metadata {
        let mut metadata = Metadata::new(name);
        if let Some(unit) = &self.unit {
            metadata = metadata.with_unit(unit.clone());
        }
        if let Some(description) = &self.description {
            metadata = metadata.with_description(description.clone());
        }
        metadata
    }

    fn parse_tags(&self) -> Result<Vec<Tag>> {
        self.tags.iter().map(|raw| Tag::parse(raw)).collect()
    }
}

/// Register the metrics declared on `member` and map them to it.
///
/// Returns the registered ids, in annotation order.
pub fn register_member(
    registries: &SharedMetricRegistries,
    member: &MemberInfo,
    annotations: &[MetricAnnotation],
) -> Result<Vec<MetricId>> {
    let mut ids = Vec::with_capacity(annotations.len());
    for annotation in annotations {
        let registry = registries.get_or_create(annotation.scope_name());
        let metadata = annotation.metadata(annotation.resolve_name(member));
        let tags = annotation.parse_tags()?;
        match annotation.kind() {
            AnnotationKind::Counted => {
                let counter = registry.counter_with_metadata(metadata, &tags)?;
                let id = counter.id().clone();
                registry.member_mappings().add_counter(member, id.clone());
                ids.push(id);
            }
            AnnotationKind::Timed => {
                let timer = registry.timer_with_metadata(metadata, &tags)?;
                let id = timer.id().clone();
                registry.member_mappings().add_timer(member, id.clone());
                ids.push(id);
            }
        }
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MetricsError;

    #[test]
    fn test_resolve_name() {
        let method = MemberInfo::method("shop.Orders", "place");
        assert_eq!(MetricAnnotation::counted().resolve_name(&method), "shop.Orders.place");
        assert_eq!(
            MetricAnnotation::counted().name("placed").resolve_name(&method),
            "shop.Orders.placed"
        );
        assert_eq!(
            MetricAnnotation::counted()
                .name("placed")
                .absolute(true)
                .resolve_name(&method),
            "placed"
        );
        assert_eq!(
            MetricAnnotation::counted().absolute(true).resolve_name(&method),
            "place"
        );

        let ctor = MemberInfo::constructor("shop.Orders");
        assert_eq!(MetricAnnotation::timed().resolve_name(&ctor), "shop.Orders.Orders");
        assert_eq!(
            MetricAnnotation::timed().absolute(true).resolve_name(&ctor),
            "Orders"
        );
    }

    #[test]
    fn test_register_member() {
        let registries = SharedMetricRegistries::new();
        let member = MemberInfo::method("Orders", "place");
        let ids = register_member(
            &registries,
            &member,
            &[
                MetricAnnotation::counted().tag("tier=gold"),
                MetricAnnotation::timed().name("latency").scope("vendor"),
            ],
        )
        .unwrap();

        assert_eq!(ids[0].name(), "Orders.place");
        assert_eq!(ids[0].tags().get("tier"), Some("gold"));
        assert_eq!(ids[1].name(), "Orders.latency");

        let app = registries.application();
        assert!(app.member_mappings().get_counters(&member).unwrap().contains(&ids[0]));
        assert!(app.member_mappings().get_timers(&member).is_none());
        assert!(registries
            .vendor()
            .member_mappings()
            .get_timers(&member)
            .unwrap()
            .contains(&ids[1]));
    }

    #[test]
    fn test_register_member_bad_tag() {
        let registries = SharedMetricRegistries::new();
        let member = MemberInfo::method("Orders", "place");
        let err = register_member(
            &registries,
            &member,
            &[MetricAnnotation::counted().tag("no-equals")],
        )
        .unwrap_err();
        assert!(matches!(err, MetricsError::MalformedTag(_)));
    }
}
