//! The process-wide meter store shared by every scoped registry.
//!
//! The store is a composite over one child [`ScopeStore`] per scope. Each
//! child carries a deny-by-default filter bound to its scope's gate, so a
//! registration made with a grant for scope A creates a meter in A's child
//! only. The composite keeps one [`CompositeMeter`] per meter id with a slot
//! for every child, in child registration order.
//!
//! ```text
//!             MeterStore (composite)
//!        ┌───────────┼────────────┐
//!   ScopeStore   ScopeStore   ScopeStore
//!  application      base        vendor
//! ```

pub(crate) mod composite;
pub(crate) mod meter;
pub(crate) mod scope;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::error::{MetricsError, Result};
use crate::gate::WriteGrant;
use crate::id::MetricId;
use crate::metadata::Metadata;
use crate::tags::SCOPE_TAG;

pub(crate) use composite::{ChildMeter, CompositeMeter};
pub(crate) use meter::{GaugeFn, LocalMeter, MeterSpec};
pub(crate) use scope::ScopeStore;

/// A metric id whose tags include the reserved `scope` tag.
pub(crate) type MeterId = MetricId;

#[derive(Default)]
pub(crate) struct MeterStore {
    children: RwLock<Vec<Arc<ScopeStore>>>,
    composites: Mutex<HashMap<MeterId, Arc<CompositeMeter>>>,
}

impl MeterStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&self, child: Arc<ScopeStore>) {
        self.children.write().push(child);
    }

    #[cfg(test)]
    pub(crate) fn child(&self, scope: &str) -> Option<Arc<ScopeStore>> {
        self.children
            .read()
            .iter()
            .find(|c| c.scope() == scope)
            .cloned()
    }

    /// Detach the child of `scope`, discarding its meters and their composites.
    pub(crate) fn detach(&self, scope: &str) -> Option<Arc<ScopeStore>> {
        let removed = {
            let mut children = self.children.write();
            let position = children.iter().position(|c| c.scope() == scope)?;
            children.remove(position)
        };
        self.composites
            .lock()
            .retain(|id, _| id.tags().get(SCOPE_TAG) != Some(scope));
        removed.clear();
        debug!(scope, "detached scope store");
        Some(removed)
    }

    /// Register `id` in every child that accepts `grant`.
    ///
    /// Registering an id twice returns the existing composite.
    pub(crate) fn register(
        &self,
        id: MeterId,
        spec: &MeterSpec,
        metadata: &Metadata,
        grant: &WriteGrant<'_>,
    ) -> Result<Arc<CompositeMeter>> {
        let mut composites = self.composites.lock();
        if let Some(existing) = composites.get(&id) {
            if existing.kind() != spec.kind() {
                return Err(MetricsError::TypeConflict {
                    name: id.name().to_string(),
                    existing: existing.kind(),
                    requested: spec.kind(),
                });
            }
            return Ok(Arc::clone(existing));
        }

        let slots = self
            .children
            .read()
            .iter()
            .map(|child| child.register(&id, spec, metadata, grant))
            .collect::<Result<Vec<_>>>()?;
        let composite = Arc::new(CompositeMeter::new(id.clone(), spec.kind(), slots));
        composites.insert(id, Arc::clone(&composite));
        Ok(composite)
    }

    /// Unregister a composite and its meter from every child.
    pub(crate) fn remove(&self, composite: &CompositeMeter) -> bool {
        let removed = self.composites.lock().remove(composite.id()).is_some();
        for child in self.children.read().iter() {
            child.remove(composite.id());
        }
        removed
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: &MeterId) -> bool {
        self.composites.lock().contains_key(id)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.composites.lock().len()
    }
}
