//! Descriptive metric metadata.

use crate::id::MetricType;

/// Well-known unit names.
pub mod units {
    pub const NONE: &str = "none";
    pub const BYTES: &str = "bytes";
    pub const PERCENT: &str = "percent";
    pub const NANOSECONDS: &str = "nanoseconds";
    pub const MILLISECONDS: &str = "milliseconds";
    pub const SECONDS: &str = "seconds";
}

/// Name, unit and description of a metric.
///
/// Metadata is keyed by name within a scope. Unset fields never override
/// fields set by an earlier registration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    name: String,
    unit: Option<String>,
    description: Option<String>,
}

impl Metadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The unit, if one other than [`units::NONE`] is set.
    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref().filter(|u| !u.is_empty() && *u != units::NONE)
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Help text used for exposition. Falls back to the name.
    pub(crate) fn help(&self) -> &str {
        self.description
            .as_deref()
            .filter(|d| !d.is_empty())
            .unwrap_or(&self.name)
    }
}

/// Metadata as tracked by a registry, with the bound type and a dirty flag.
#[derive(Debug, Clone)]
pub(crate) struct MetadataEntry {
    metadata: Metadata,
    kind: MetricType,
    dirty: bool,
}

impl MetadataEntry {
    pub(crate) fn new(metadata: Metadata, kind: MetricType) -> Self {
        Self {
            metadata,
            kind,
            dirty: false,
        }
    }

    pub(crate) fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub(crate) fn kind(&self) -> MetricType {
        self.kind
    }

    /// Apply the set fields of `other`, marking the entry dirty if anything changed.
    pub(crate) fn update(&mut self, other: &Metadata) {
        if let Some(unit) = &other.unit {
            if self.metadata.unit.as_ref() != Some(unit) {
                self.metadata.unit = Some(unit.clone());
                self.dirty = true;
            }
        }
        if let Some(description) = &other.description {
            if self.metadata.description.as_ref() != Some(description) {
                self.metadata.description = Some(description.clone());
                self.dirty = true;
            }
        }
    }

    /// Clear the dirty flag, returning whether it was set.
    pub(crate) fn clean_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }
}
