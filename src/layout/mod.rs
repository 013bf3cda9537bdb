//! Layered registry: artifact stores and the per-task layout over them.
//!
//! An [`ArtifactStore`] holds the registrations of one component, one session
//! or one isolated scope. A [`Layout`] is an ordered list of stores consulted
//! innermost first; the process-wide global store is always the outermost
//! layer.
//!
//! Stores carry a protection state. A store is protected while it is sealed
//! by at least one nested scope ([`isolate_layout`]) or after it has been
//! frozen ([`Registrar::finalize`], [`freeze_global`]). Writes into a
//! protected store fail with [`KernelError::ProtectedStore`].

pub mod instances;
pub mod registrar;
pub mod scope;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::capability::{ArtifactRecord, CapabilityId};
use crate::error::{KernelError, KernelResult};
use crate::overload::AxisDecl;

pub use instances::{instance, isolate_instances, InstanceLayer, InstanceScope};
pub use registrar::Registrar;
pub use scope::{enter, isolate_layout, scope, LayoutScope};

// ---------------------------------------------------------------------------
// ArtifactStore
// ---------------------------------------------------------------------------

/// One layer of registrations.
pub struct ArtifactStore {
    label: String,
    records: RwLock<HashMap<CapabilityId, ArtifactRecord>>,
    seals: AtomicUsize,
    frozen: AtomicBool,
}

impl ArtifactStore {
    /// Empty, writable store.
    pub fn new(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            records: RwLock::new(HashMap::new()),
            seals: AtomicUsize::new(0),
            frozen: AtomicBool::new(false),
        })
    }

    /// Label used in logs and errors.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether writes are currently rejected.
    pub fn is_protected(&self) -> bool {
        self.is_frozen() || self.seals.load(Ordering::Acquire) > 0
    }

    /// Whether the store was frozen for good.
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// Permanently reject further writes.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    pub(crate) fn seal(&self) {
        self.seals.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn unseal(&self) {
        let _ = self
            .seals
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Number of capabilities with at least one registration here.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether no capability has a record here.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Whether `capability` has a record here.
    pub fn contains(&self, capability: &CapabilityId) -> bool {
        self.records.read().contains_key(capability)
    }

    /// Run `f` against the record of `capability`, if this store has one.
    pub fn read_record<R>(
        &self,
        capability: &CapabilityId,
        f: impl FnOnce(&ArtifactRecord) -> R,
    ) -> Option<R> {
        self.records.read().get(capability).map(f)
    }

    pub(crate) fn write_record<R>(
        &self,
        capability: &CapabilityId,
        axes: &[AxisDecl],
        f: impl FnOnce(&mut ArtifactRecord) -> KernelResult<R>,
    ) -> KernelResult<R> {
        if self.is_protected() {
            return Err(KernelError::ProtectedStore {
                store: self.label.clone(),
            });
        }
        let mut records = self.records.write();
        let record = records
            .entry(capability.clone())
            .or_insert_with(|| ArtifactRecord::new(axes.to_vec()));
        f(record)
    }
}

impl fmt::Debug for ArtifactStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactStore")
            .field("label", &self.label)
            .field("capabilities", &self.len())
            .field("protected", &self.is_protected())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Global store
// ---------------------------------------------------------------------------

static GLOBAL_STORE: Lazy<Arc<ArtifactStore>> = Lazy::new(|| ArtifactStore::new("global"));

/// The shared outermost store, written during startup collection only.
pub fn global_store() -> Arc<ArtifactStore> {
    Arc::clone(&GLOBAL_STORE)
}

/// A registrar writing into the global store.
pub fn global_registrar(component: impl Into<Arc<str>>) -> Registrar {
    Registrar::for_store(global_store(), component)
}

/// End the startup collection phase: the global store rejects writes from now on.
pub fn freeze_global() {
    GLOBAL_STORE.freeze();
    log::debug!(
        "global artifact store frozen with {} capabilities",
        GLOBAL_STORE.len()
    );
}

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

/// Ordered stores, innermost first.
#[derive(Clone, Default)]
pub struct Layout {
    stores: Vec<Arc<ArtifactStore>>,
}

impl Layout {
    /// Layout over `stores`, innermost first.
    pub fn new(stores: Vec<Arc<ArtifactStore>>) -> Self {
        Self { stores }
    }

    /// The calling task's scoped stores followed by the global store.
    pub fn current() -> Self {
        let mut stores = scope::current_stores();
        let global = global_store();
        if !stores.iter().any(|store| Arc::ptr_eq(store, &global)) {
            stores.push(global);
        }
        Self { stores }
    }

    /// Stores, innermost first.
    pub fn stores(&self) -> &[Arc<ArtifactStore>] {
        &self.stores
    }

    /// The innermost store.
    pub fn innermost(&self) -> Option<&Arc<ArtifactStore>> {
        self.stores.first()
    }

    /// Number of layers.
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    /// Whether no capability has a record here.
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

impl fmt::Debug for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.stores.iter().map(|store| store.label()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seals_nest() {
        let store = ArtifactStore::new("s");
        assert!(!store.is_protected());
        store.seal();
        store.seal();
        store.unseal();
        assert!(store.is_protected());
        store.unseal();
        assert!(!store.is_protected());
        store.unseal();
        assert!(!store.is_protected());

        store.freeze();
        assert!(store.is_protected());
    }

    #[test]
    fn test_current_layout_ends_with_global() {
        let layout = Layout::current();
        let global = global_store();
        assert!(Arc::ptr_eq(layout.stores().last().unwrap(), &global));

        let store = ArtifactStore::new("session");
        let _scope = enter(Arc::clone(&store));
        let layout = Layout::current();
        assert_eq!(layout.len(), 2);
        assert!(Arc::ptr_eq(layout.innermost().unwrap(), &store));
        assert_eq!(format!("{:?}", layout), r#"["session", "global"]"#);
    }
}
