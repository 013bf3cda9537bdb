//! Active component instances, layered the same way as the layout.
//!
//! A session typically provides "the current protocol" and "the current
//! account"; implementations registered with
//! [`Capability::register_bound`](crate::capability::Capability::register_bound)
//! pick them up at call time.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use super::scope::{context_for_push, remove_layer, with_context, SharedContext};

/// One layer of `type -> instance`.
#[derive(Default)]
pub struct InstanceLayer {
    instances: RwLock<HashMap<TypeId, (&'static str, Arc<dyn Any + Send + Sync>)>>,
}

impl InstanceLayer {
    fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let instances = self.instances.read();
        let (_, instance) = instances.get(&TypeId::of::<T>())?;
        Arc::clone(instance).downcast::<T>().ok()
    }

    fn insert<T: Any + Send + Sync>(&self, instance: Arc<T>) {
        self.instances
            .write()
            .insert(TypeId::of::<T>(), (type_name::<T>(), instance));
    }
}

impl fmt::Debug for InstanceLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(self.instances.read().values().map(|(name, _)| *name))
            .finish()
    }
}

/// Guard of one pushed instance layer.
#[must_use = "the layer is popped when the guard is dropped"]
pub struct InstanceScope {
    layer: Arc<InstanceLayer>,
    context: SharedContext,
}

impl InstanceScope {
    /// Make `instance` the active `T` while this scope is innermost.
    pub fn provide<T: Any + Send + Sync>(&self, instance: T) -> &Self {
        self.provide_arc(Arc::new(instance))
    }

    /// Like [`InstanceScope::provide`] for an instance that is already shared.
    pub fn provide_arc<T: Any + Send + Sync>(&self, instance: Arc<T>) -> &Self {
        log::trace!("providing instance of `{}`", type_name::<T>());
        self.layer.insert(instance);
        self
    }

    /// The layer this scope pushed.
    pub fn layer(&self) -> &Arc<InstanceLayer> {
        &self.layer
    }
}

impl Drop for InstanceScope {
    fn drop(&mut self) {
        if remove_layer(&mut self.context.lock().instances, &self.layer).is_none() {
            log::warn!("instance scope was already gone from its context");
        }
    }
}

/// Push an empty instance layer.
pub fn isolate_instances() -> InstanceScope {
    let layer = Arc::new(InstanceLayer::default());
    let context = context_for_push("instance scope");
    context.lock().instances.insert(0, Arc::clone(&layer));
    InstanceScope { layer, context }
}

/// The innermost active instance of `T`, if any.
pub fn instance<T: Any + Send + Sync>() -> Option<Arc<T>> {
    with_context(|cx| {
        cx.instances
            .iter()
            .find_map(|layer| layer.get::<T>())
    })
}
