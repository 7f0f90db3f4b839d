//! Write visibility for scoped registrations.
//!
//! Every child registry of the shared meter store rejects registrations by
//! default. A registration reaches a child only while the caller holds a
//! [`WriteGrant`] issued by that child's own [`ScopeGate`], and the grant is
//! passed explicitly to the store. Nothing is stored in thread-locals, so a
//! grant cannot leak to unrelated work on the same thread or be observed on
//! another one.
//!
//! Grants are released on drop, so an early `?` return or a panic while
//! registering closes the gate again. `WriteGrant` is `!Send`, which keeps it
//! from being held across an `.await` in a `Send` future.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// Per-scope gates, created lazily once per scope.
#[derive(Debug, Default)]
pub struct VisibilityGate {
    scopes: RwLock<HashMap<String, Arc<ScopeGate>>>,
}

impl VisibilityGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the gate for `scope`, creating it on first use.
    pub fn scope_gate(&self, scope: &str) -> Arc<ScopeGate> {
        if let Some(gate) = self.scopes.read().get(scope) {
            return Arc::clone(gate);
        }
        let mut scopes = self.scopes.write();
        Arc::clone(
            scopes
                .entry(scope.to_string())
                .or_insert_with(|| Arc::new(ScopeGate::new(scope))),
        )
    }

    /// Whether a gate was ever created for `scope`.
    pub fn contains(&self, scope: &str) -> bool {
        self.scopes.read().contains_key(scope)
    }
}

/// The write gate of a single scope.
#[derive(Debug)]
pub struct ScopeGate {
    scope: Arc<str>,
    outstanding: AtomicUsize,
}

impl ScopeGate {
    fn new(scope: &str) -> Self {
        Self {
            scope: scope.into(),
            outstanding: AtomicUsize::new(0),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Open the gate for the lifetime of the returned grant.
    pub fn open(&self) -> WriteGrant<'_> {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        WriteGrant {
            gate: self,
            _not_send: PhantomData,
        }
    }

    /// Whether any grant for this scope is alive.
    pub fn is_open(&self) -> bool {
        self.outstanding() > 0
    }

    /// Number of live grants.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }
}

/// Proof that the holder may register meters in one scope.
#[derive(Debug)]
pub struct WriteGrant<'a> {
    gate: &'a ScopeGate,
    _not_send: PhantomData<*const ()>,
}

impl WriteGrant<'_> {
    pub fn scope(&self) -> &str {
        self.gate.scope()
    }

    /// Whether this grant was issued by `gate`.
    pub fn is_for(&self, gate: &ScopeGate) -> bool {
        std::ptr::eq(self.gate, gate)
    }
}

impl Drop for WriteGrant<'_> {
    fn drop(&mut self) {
        self.gate.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}
