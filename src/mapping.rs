//! Member-to-metric mappings used by the counted and timed interceptors.

use std::collections::{HashMap, HashSet};
use std::fmt;

use parking_lot::RwLock;

use crate::id::MetricId;

/// Whether a member is a method or a constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Method,
    Constructor,
}

/// An instrumented member, identified by its declaring type and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberInfo {
    declaring_type: String,
    name: String,
    kind: MemberKind,
}

impl MemberInfo {
    pub fn method(declaring_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            declaring_type: declaring_type.into(),
            name: name.into(),
            kind: MemberKind::Method,
        }
    }

    /// A constructor. Its name is the simple name of the declaring type.
    pub fn constructor(declaring_type: impl Into<String>) -> Self {
        let declaring_type = declaring_type.into();
        let name = simple_name(&declaring_type).to_string();
        Self {
            declaring_type,
            name,
            kind: MemberKind::Constructor,
        }
    }

    pub fn declaring_type(&self) -> &str {
        &self.declaring_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MemberKind {
        self.kind
    }
}

impl fmt::Display for MemberInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.declaring_type, self.name)
    }
}

/// Last path segment of a type name, split on `::` or `.`.
pub(crate) fn simple_name(type_name: &str) -> &str {
    let after_path = type_name.rsplit("::").next().unwrap_or(type_name);
    after_path.rsplit('.').next().unwrap_or(after_path)
}

/// Metric ids registered for each instrumented member of one scope.
#[derive(Debug, Default)]
pub struct MemberToMetricMappings {
    counters: RwLock<HashMap<MemberInfo, HashSet<MetricId>>>,
    timers: RwLock<HashMap<MemberInfo, HashSet<MetricId>>>,
}

impl MemberToMetricMappings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_counter(&self, member: &MemberInfo, id: MetricId) {
        self.counters
            .write()
            .entry(member.clone())
            .or_default()
            .insert(id);
    }

    pub fn add_timer(&self, member: &MemberInfo, id: MetricId) {
        self.timers
            .write()
            .entry(member.clone())
            .or_default()
            .insert(id);
    }

    /// Counter ids mapped for `member`, or `None` if it was never mapped.
    pub fn get_counters(&self, member: &MemberInfo) -> Option<HashSet<MetricId>> {
        self.counters.read().get(member).cloned()
    }

    /// Timer ids mapped for `member`, or `None` if it was never mapped.
    pub fn get_timers(&self, member: &MemberInfo) -> Option<HashSet<MetricId>> {
        self.timers.read().get(member).cloned()
    }

    /// Drop every mapping.
    pub fn clear(&self) {
        self.counters.write().clear();
        self.timers.write().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.counters.read().is_empty() && self.timers.read().is_empty()
    }
}
