//! Registrar: the write path into an artifact store.
//!
//! A component builds a registrar at load time, registers its capability
//! implementations through it and finally calls [`Registrar::finalize`],
//! which checks the capability sets the component promised and freezes the
//! store. Finalizing consumes the registrar, so nothing can be registered
//! through it afterwards.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::capability::{AxisValues, CapabilityId, CapabilitySet, ErasedHandler};
use crate::config::{self, DuplicatePolicy};
use crate::error::{KernelError, KernelResult};
use crate::overload::{AxisDecl, ImplId};
use crate::selector::{compile, CompiledPattern, PredicateTable};

use super::ArtifactStore;

pub struct Registrar {
    component: Arc<str>,
    store: Arc<ArtifactStore>,
    base: Option<CompiledPattern>,
    predicates: PredicateTable,
    policy: DuplicatePolicy,
    registered: HashSet<CapabilityId>,
}

impl Registrar {
    /// A registrar owning a fresh store labelled after `component`.
    pub fn new(component: impl Into<Arc<str>>) -> Self {
        let component = component.into();
        let store = ArtifactStore::new(component.to_string());
        Self::for_store(store, component)
    }

    /// A registrar writing into an existing store.
    pub fn for_store(store: Arc<ArtifactStore>, component: impl Into<Arc<str>>) -> Self {
        Self {
            component: component.into(),
            store,
            base: None,
            predicates: PredicateTable::new(),
            policy: config::current().duplicates,
            registered: HashSet::new(),
        }
    }

    /// Predicates available to `#name` references in registered patterns.
    pub fn with_predicates(mut self, predicates: PredicateTable) -> Self {
        self.predicates = predicates;
        self
    }

    /// Override the configured duplicate policy.
    pub fn with_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Base address substituted for a leading `~` in registered patterns.
    pub fn with_base(mut self, pattern: &str) -> KernelResult<Self> {
        self.base = Some(compile(pattern, &self.predicates)?);
        Ok(self)
    }

    /// Component recorded on every entity.
    pub fn component(&self) -> &str {
        &self.component
    }

    /// The store written to.
    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    /// Predicates patterns are compiled against.
    pub fn predicates(&self) -> &PredicateTable {
        &self.predicates
    }

    /// Base address that `~` patterns inherit.
    pub fn base(&self) -> Option<&CompiledPattern> {
        self.base.as_ref()
    }

    /// Active duplicate policy.
    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// Capabilities this registrar has registered at least once.
    pub fn registered(&self) -> &HashSet<CapabilityId> {
        &self.registered
    }

    pub(crate) fn record(
        &mut self,
        capability: &CapabilityId,
        axes: &[AxisDecl],
        values: AxisValues,
        handler: ErasedHandler,
    ) -> KernelResult<ImplId> {
        let component = Arc::clone(&self.component);
        let store = &self.store;
        let policy = self.policy;
        let id = store.write_record(capability, axes, |record| {
            record.insert(capability, store.label(), policy, component, values, handler)
        })?;
        self.registered.insert(capability.clone());
        log::debug!(
            "`{}` registered {} as {} in store `{}`",
            self.component,
            capability,
            id,
            self.store.label()
        );
        Ok(id)
    }

    /// Fail unless every member of `set` has been registered through this registrar.
    pub fn ensure_implements(&self, set: &CapabilitySet) -> KernelResult<()> {
        let missing = set.missing_from(&self.registered);
        if missing.is_empty() {
            return Ok(());
        }
        Err(KernelError::Incomplete {
            component: self.component.to_string(),
            set: set.name().to_string(),
            missing,
        })
    }

    /// Check `sets`, freeze the store and hand it out for layering.
    pub fn finalize(self, sets: &[&CapabilitySet]) -> KernelResult<Arc<ArtifactStore>> {
        for set in sets {
            self.ensure_implements(set)?;
        }
        self.store.freeze();
        log::debug!(
            "finalized `{}`: {} capabilities in store `{}`",
            self.component,
            self.registered.len(),
            self.store.label()
        );
        Ok(self.store)
    }
}

impl fmt::Debug for Registrar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registrar")
            .field("component", &self.component)
            .field("store", &self.store.label())
            .field("base", &self.base.as_ref().map(|b| b.to_string()))
            .field("policy", &self.policy)
            .field("registered", &self.registered.len())
            .finish()
    }
}
