//! Task-scoped layout and instance stacks.
//!
//! Each tokio task running under [`scope`] carries its own context. Outside of
//! such a task the context falls back to a per-thread stack, which is what
//! synchronous callers and plain tests see. Tasks spawned without [`scope`]
//! share that per-thread stack with every other unscoped task on the same
//! worker, so wrap spawned futures in [`scope`] before pushing layers in them.
//!
//! [`enter`] and [`isolate_layout`] push a store onto the front of the
//! current layout and return a guard. Dropping the guard removes exactly that
//! layer, whatever the order guards are released in, and releases the seals
//! it placed on the stores below. The guard runs on every exit path,
//! including cancellation of the owning task.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;

use super::instances::InstanceLayer;
use super::registrar::Registrar;
use super::ArtifactStore;

#[derive(Clone, Default)]
pub(crate) struct Context {
    pub(crate) layout: Vec<Arc<ArtifactStore>>,
    pub(crate) instances: Vec<Arc<InstanceLayer>>,
}

/// A context cell. Guards keep a handle to the cell they pushed into so that
/// they release from it even when dropped on another thread.
pub(crate) type SharedContext = Arc<Mutex<Context>>;

tokio::task_local! {
    static CONTEXT: SharedContext;
}

thread_local! {
    static FALLBACK: SharedContext = SharedContext::default();
}

fn current_context() -> SharedContext {
    CONTEXT
        .try_with(Arc::clone)
        .unwrap_or_else(|_| FALLBACK.with(Arc::clone))
}

/// The cell a new layer is pushed into.
pub(crate) fn context_for_push(what: &str) -> SharedContext {
    match CONTEXT.try_with(Arc::clone) {
        Ok(context) => context,
        Err(_) => {
            if tokio::runtime::Handle::try_current().is_ok() {
                log::warn!(
                    "{} pushed inside a tokio runtime without `layout::scope`; \
                     it is visible to every unscoped task on this thread",
                    what
                );
            }
            FALLBACK.with(Arc::clone)
        }
    }
}

pub(crate) fn with_context<R>(f: impl FnOnce(&mut Context) -> R) -> R {
    let context = current_context();
    let mut guard = context.lock();
    f(&mut *guard)
}

pub(crate) fn current_stores() -> Vec<Arc<ArtifactStore>> {
    with_context(|cx| cx.layout.clone())
}

/// Remove the innermost occurrence of `item` from `stack`.
///
/// Returns the index it was found at.
pub(crate) fn remove_layer<T>(stack: &mut Vec<Arc<T>>, item: &Arc<T>) -> Option<usize> {
    let index = stack.iter().position(|layer| Arc::ptr_eq(layer, item))?;
    stack.remove(index);
    Some(index)
}

/// Run `future` with its own layout and instance stacks, starting from a
/// snapshot of the caller's.
///
/// Required for futures handed to `tokio::spawn` that push scopes: without
/// it their layers are shared with other unscoped tasks on the same thread.
pub fn scope<F: Future>(future: F) -> impl Future<Output = F::Output> {
    let snapshot = with_context(|cx| cx.clone());
    CONTEXT.scope(Arc::new(Mutex::new(snapshot)), future)
}

/// Guard of one pushed layout layer.
#[must_use = "the layer is popped when the guard is dropped"]
pub struct LayoutScope {
    store: Arc<ArtifactStore>,
    context: SharedContext,
    sealed: Vec<Arc<ArtifactStore>>,
}

impl LayoutScope {
    /// The store this scope pushed.
    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    /// A registrar writing into this scope's store.
    pub fn registrar(&self, component: impl Into<Arc<str>>) -> Registrar {
        Registrar::for_store(Arc::clone(&self.store), component)
    }
}

impl Drop for LayoutScope {
    fn drop(&mut self) {
        let removed = remove_layer(&mut self.context.lock().layout, &self.store);
        match removed {
            Some(0) => {}
            Some(depth) => log::debug!(
                "layout scope `{}` released out of order ({} layer(s) above it)",
                self.store.label(),
                depth
            ),
            None => log::warn!(
                "layout scope `{}` was already gone from its context",
                self.store.label()
            ),
        }
        for store in self.sealed.drain(..) {
            store.unseal();
        }
        log::trace!("left layout scope `{}`", self.store.label());
    }
}

/// Push `store` as the innermost layer for the rest of the guard's life.
///
/// Every store already in the layout is sealed until the guard drops.
pub fn enter(store: Arc<ArtifactStore>) -> LayoutScope {
    let context = context_for_push("layout scope");
    let sealed: Vec<Arc<ArtifactStore>> = {
        let mut cx = context.lock();
        let sealed = cx
            .layout
            .iter()
            .filter(|outer| !Arc::ptr_eq(outer, &store))
            .cloned()
            .collect();
        cx.layout.insert(0, Arc::clone(&store));
        sealed
    };
    for outer in &sealed {
        outer.seal();
    }
    log::trace!(
        "entered layout scope `{}` above {} sealed layer(s)",
        store.label(),
        sealed.len()
    );
    LayoutScope {
        store,
        context,
        sealed,
    }
}

/// Push a fresh, empty store.
pub fn isolate_layout() -> LayoutScope {
    enter(ArtifactStore::new("isolated"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{Capability, SymmetricCompose};
    use crate::error::KernelError;
    use crate::layout::Layout;
    use tokio::sync::oneshot;

    fn greet() -> Capability<SymmetricCompose<(), String>> {
        Capability::new("greet", SymmetricCompose::new())
    }

    #[test]
    fn test_isolated_registration_is_reverted() {
        let greet = greet();
        {
            let scope = isolate_layout();
            let mut registrar = scope.registrar("scoped");
            greet
                .register(&mut registrar, (), |_| "scoped".to_string())
                .unwrap();
            assert_eq!(greet.invoke(()).unwrap(), "scoped");
        }
        assert!(greet.invoke(()).unwrap_err().is_unresolved());
    }

    #[test]
    fn test_inner_layer_shadows_outer() {
        let greet = greet();
        let outer = isolate_layout();
        greet
            .register(&mut outer.registrar("outer"), (), |_| "outer".to_string())
            .unwrap();

        let inner = isolate_layout();
        assert_eq!(greet.invoke(()).unwrap(), "outer");
        greet
            .register(&mut inner.registrar("inner"), (), |_| "inner".to_string())
            .unwrap();
        assert_eq!(greet.invoke(()).unwrap(), "inner");

        drop(inner);
        assert_eq!(greet.invoke(()).unwrap(), "outer");
    }

    #[test]
    fn test_ancestors_are_sealed_while_nested() {
        let greet = greet();
        let outer = isolate_layout();
        let mut outer_registrar = outer.registrar("outer");

        let inner = isolate_layout();
        assert!(outer.store().is_protected());
        let err = greet
            .register(&mut outer_registrar, (), |_| "late".to_string())
            .unwrap_err();
        assert!(matches!(err, KernelError::ProtectedStore { .. }));

        drop(inner);
        assert!(!outer.store().is_protected());
        greet
            .register(&mut outer_registrar, (), |_| "late".to_string())
            .unwrap();
    }

    #[test]
    fn test_guard_restores_exact_layout() {
        let before = Layout::current().len();
        let a = isolate_layout();
        let b = isolate_layout();
        assert_eq!(Layout::current().len(), before + 2);
        drop(b);
        assert_eq!(Layout::current().len(), before + 1);
        assert!(Arc::ptr_eq(Layout::current().innermost().unwrap(), a.store()));
        drop(a);
        assert_eq!(Layout::current().len(), before);
    }

    #[test]
    fn test_out_of_order_release_leaves_no_stale_layer() {
        let before = Layout::current().len();
        let a = isolate_layout();
        let b = isolate_layout();
        let a_store = Arc::clone(a.store());

        drop(a);
        assert_eq!(Layout::current().len(), before + 1);
        assert!(Arc::ptr_eq(Layout::current().innermost().unwrap(), b.store()));

        drop(b);
        assert_eq!(Layout::current().len(), before);
        assert!(!a_store.is_protected());
        assert!(!Layout::current()
            .stores()
            .iter()
            .any(|store| Arc::ptr_eq(store, &a_store)));
    }

    #[tokio::test]
    async fn test_interleaved_tasks_keep_their_own_layers() {
        let greet = Arc::new(greet());
        let before = Layout::current().len();
        let (first_tx, first_rx) = oneshot::channel::<()>();
        let (second_tx, second_rx) = oneshot::channel::<()>();

        let g = Arc::clone(&greet);
        let first = tokio::spawn(scope(async move {
            let layer = isolate_layout();
            g.register(&mut layer.registrar("first"), (), |_| "first".to_string())
                .unwrap();
            let _ = first_tx.send(());
            second_rx.await.unwrap();
            (g.invoke(()).unwrap(), Layout::current().len())
        }));

        let g = Arc::clone(&greet);
        let second = tokio::spawn(scope(async move {
            first_rx.await.unwrap();
            let layer = isolate_layout();
            g.register(&mut layer.registrar("second"), (), |_| "second".to_string())
                .unwrap();
            let _ = second_tx.send(());
            tokio::task::yield_now().await;
            g.invoke(()).unwrap()
        }));

        assert_eq!(first.await.unwrap(), ("first".to_string(), before + 1));
        assert_eq!(second.await.unwrap(), "second");
        assert_eq!(Layout::current().len(), before);
    }

    #[tokio::test]
    async fn test_unscoped_tasks_release_only_their_own_layers() {
        let before = Layout::current().len();
        let (tx, rx) = oneshot::channel::<()>();

        let first = tokio::spawn(async move {
            let layer = isolate_layout();
            rx.await.unwrap();
            drop(layer);
        });
        let second = tokio::spawn(async move {
            let layer = isolate_layout();
            let _ = tx.send(());
            tokio::task::yield_now().await;
            drop(layer);
        });

        first.await.unwrap();
        second.await.unwrap();
        assert_eq!(Layout::current().len(), before);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_tasks_see_their_own_layers() {
        let greet = Arc::new(greet());

        let run = |label: &'static str| {
            let greet = Arc::clone(&greet);
            tokio::spawn(scope(async move {
                let layer = isolate_layout();
                greet
                    .register(&mut layer.registrar(label), (), move |_| label.to_string())
                    .unwrap();
                for _ in 0..10 {
                    tokio::task::yield_now().await;
                    assert_eq!(greet.invoke(()).unwrap(), label);
                }
                drop(layer);
                greet.invoke(()).is_err()
            }))
        };

        let (first, second) = tokio::join!(run("first"), run("second"));
        assert!(first.unwrap());
        assert!(second.unwrap());
        assert!(greet.invoke(()).is_err());
    }

    #[tokio::test]
    async fn test_cancelled_task_releases_seals() {
        let outer = ArtifactStore::new("outer");
        let _entered = enter(Arc::clone(&outer));

        let (entered_tx, entered_rx) = oneshot::channel();
        let handle = tokio::spawn(scope(async move {
            let _inner = isolate_layout();
            let _ = entered_tx.send(());
            futures::future::pending::<()>().await;
        }));
        entered_rx.await.unwrap();
        assert!(outer.is_protected());

        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
        assert!(!outer.is_protected());
    }
}
