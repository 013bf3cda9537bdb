//! Capabilities: named operations dispatched over one or more overload axes.
//!
//! A [`Capability`] pairs a [`CapabilityId`] with a [`Compose`]. Backends
//! register implementations through a [`Registrar`]; callers invoke the
//! capability against a [`Layout`]:
//!
//! 1. the compose yields `(axis, value)` pairs for the call,
//! 2. each store of the layout is tried innermost first,
//! 3. a store is skipped as soon as one axis harvests nothing there,
//! 4. otherwise the harvested sets are intersected, and a non-empty
//!    intersection ends the search,
//! 5. the compose selects one member and its handler runs with the
//!    original arguments.
//!
//! ```ignore
//! static SEND: Lazy<Capability<TargetTypeCompose<String>>> =
//!     Lazy::new(|| Capability::new("message.send", TargetTypeCompose::new()));
//!
//! SEND.register(&mut registrar, TargetPayload::of::<Text>("land.group"), |(target, msg)| ...)?;
//! let receipt = SEND.invoke((target, payload(text)))?;
//! ```

pub mod compose;
pub mod record;

use std::any::{type_name, Any};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config;
use crate::error::{KernelError, KernelResult};
use crate::layout::{instances, ArtifactStore, Layout, Registrar};
use crate::overload::{AxisDecl, CandidateSet, ImplId};

pub use compose::{
    payload, AsyncOutput, Compose, Payload, Recorder, SymmetricCompose, TargetCompose, TargetPayload,
    TargetRoute, TargetRouteCompose, TargetTypeCompose,
};
pub use record::{axis_value, ArtifactRecord, AxisValues, Combination, Entity, ErasedHandler};

// ---------------------------------------------------------------------------
// CapabilityId
// ---------------------------------------------------------------------------

static CAPABILITY_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Identity of a capability. Two capabilities with the same name stay distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CapabilityId {
    name: Arc<str>,
    serial: u64,
}

impl CapabilityId {
    /// Allocate a fresh id named `name`.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            serial: CAPABILITY_SERIAL.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Name shown in diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// ---------------------------------------------------------------------------
// CapabilitySet
// ---------------------------------------------------------------------------

/// A named group of capabilities a component may promise to implement in full.
#[derive(Debug, Clone)]
pub struct CapabilitySet {
    name: String,
    members: Vec<CapabilityId>,
}

impl CapabilitySet {
    /// Empty set named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
        }
    }

    /// Add `capability` (builder style).
    pub fn with<C: Compose>(mut self, capability: &Capability<C>) -> Self {
        self.insert(capability.id().clone());
        self
    }

    /// Add a capability id.
    pub fn insert(&mut self, id: CapabilityId) {
        if !self.members.contains(&id) {
            self.members.push(id);
        }
    }

    /// Name shown in diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Member ids in insertion order.
    pub fn members(&self) -> &[CapabilityId] {
        &self.members
    }

    /// Names of members absent from `registered`, in declaration order.
    pub fn missing_from(&self, registered: &HashSet<CapabilityId>) -> Vec<String> {
        self.members
            .iter()
            .filter(|id| !registered.contains(id))
            .map(|id| id.to_string())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// Handler as stored for capability `C`.
pub type Handler<C> =
    Arc<dyn Fn(<C as Compose>::Args) -> KernelResult<<C as Compose>::Output> + Send + Sync>;

/// The layer that served a call and the candidates it offered.
#[derive(Debug, Clone)]
pub struct Harvest {
    pub store: Arc<ArtifactStore>,
    pub candidates: CandidateSet,
}

/// A declared capability.
pub struct Capability<C: Compose> {
    id: CapabilityId,
    compose: C,
    axes: Vec<AxisDecl>,
}

impl<C: Compose> Capability<C> {
    /// Declare a capability dispatched through `compose`.
    pub fn new(name: impl Into<Arc<str>>, compose: C) -> Self {
        let axes = compose.axes();
        Self {
            id: CapabilityId::new(name),
            compose,
            axes,
        }
    }

    /// Identity used as the key in artifact stores.
    pub fn id(&self) -> &CapabilityId {
        &self.id
    }

    /// Name shown in diagnostics.
    pub fn name(&self) -> &str {
        self.id.name()
    }

    /// Axes declared by the compose.
    pub fn axes(&self) -> &[AxisDecl] {
        &self.axes
    }

    /// The compose.
    pub fn compose(&self) -> &C {
        &self.compose
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Register an implementation into `registrar`'s store.
    pub fn register<F>(
        &self,
        registrar: &mut Registrar,
        value: impl Into<C::Collect>,
        handler: F,
    ) -> KernelResult<ImplId>
    where
        F: Fn(C::Args) -> C::Output + Send + Sync + 'static,
    {
        self.register_fallible(registrar, value, move |args| Ok(handler(args)))
    }

    /// Register an implementation whose failures surface as kernel errors.
    pub fn register_fallible<F>(
        &self,
        registrar: &mut Registrar,
        value: impl Into<C::Collect>,
        handler: F,
    ) -> KernelResult<ImplId>
    where
        F: Fn(C::Args) -> KernelResult<C::Output> + Send + Sync + 'static,
    {
        let values = {
            let mut recorder = Recorder::new(registrar.predicates(), registrar.base());
            self.compose.collect(&mut recorder, value.into())?;
            recorder.into_values()
        };
        let handler: Handler<C> = Arc::new(handler);
        let erased: ErasedHandler = Arc::new(handler);
        registrar.record(&self.id, &self.axes, values, erased)
    }

    /// Register an implementation that runs against the active instance of `T`.
    ///
    /// The instance is looked up in the caller's instance scope at call time;
    /// without one the call fails with [`KernelError::MissingInstance`].
    pub fn register_bound<T, F>(
        &self,
        registrar: &mut Registrar,
        value: impl Into<C::Collect>,
        handler: F,
    ) -> KernelResult<ImplId>
    where
        T: Any + Send + Sync,
        F: Fn(Arc<T>, C::Args) -> C::Output + Send + Sync + 'static,
    {
        self.register_fallible(registrar, value, move |args| {
            let instance = instances::instance::<T>().ok_or(KernelError::MissingInstance {
                type_name: type_name::<T>(),
            })?;
            Ok(handler(instance, args))
        })
    }

    // -----------------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------------

    /// The first layer of `layout` able to serve `args`, with its candidates.
    pub fn candidates_in(&self, layout: &Layout, args: &C::Args) -> KernelResult<Option<Harvest>> {
        let values = self.compose.call(args);
        for store in layout.stores() {
            let found = store
                .read_record(&self.id, |record| record.candidates(&self.id, &values))
                .transpose()?
                .flatten();
            if let Some(candidates) = found {
                if config::current().trace_resolution {
                    log::debug!(
                        "{} for {} served by store `{}` ({} candidate(s))",
                        self.id,
                        self.compose.describe(args),
                        store.label(),
                        candidates.len()
                    );
                }
                return Ok(Some(Harvest {
                    store: Arc::clone(store),
                    candidates,
                }));
            }
        }
        Ok(None)
    }

    fn unresolved(&self, args: &C::Args) -> KernelError {
        KernelError::Unresolved {
            capability: self.id.to_string(),
            detail: self.compose.describe(args),
        }
    }

    fn handler(&self, store: &ArtifactStore, id: ImplId) -> KernelResult<Handler<C>> {
        store
            .read_record(&self.id, |record| {
                record.entity(id).map(|entity| Arc::clone(&entity.handler))
            })
            .flatten()
            .and_then(|erased| erased.downcast_ref::<Handler<C>>().cloned())
            .ok_or_else(|| KernelError::HandlerTypeMismatch {
                capability: self.id.to_string(),
            })
    }

    /// Resolve the implementation that would serve `args`, without calling it.
    pub fn resolve_in(&self, layout: &Layout, args: &C::Args) -> KernelResult<(ImplId, Handler<C>)> {
        let harvest = self
            .candidates_in(layout, args)?
            .ok_or_else(|| self.unresolved(args))?;
        let id = self
            .compose
            .select(&harvest.candidates)
            .ok_or_else(|| self.unresolved(args))?;
        let handler = self.handler(&harvest.store, id)?;
        Ok((id, handler))
    }

    /// Call the capability against an explicit layout.
    pub fn invoke_in(&self, layout: &Layout, args: C::Args) -> KernelResult<C::Output> {
        let (_, handler) = self.resolve_in(layout, &args)?;
        handler(args)
    }

    /// Call the capability against the current task's layout.
    pub fn invoke(&self, args: C::Args) -> KernelResult<C::Output> {
        self.invoke_in(&Layout::current(), args)
    }

    /// Call every implementation offered by the first matching layer, in
    /// selection order.
    pub fn invoke_all(&self, args: C::Args) -> KernelResult<Vec<C::Output>>
    where
        C::Args: Clone,
    {
        let layout = Layout::current();
        let harvest = self
            .candidates_in(&layout, &args)?
            .ok_or_else(|| self.unresolved(&args))?;
        let handlers = harvest
            .candidates
            .iter()
            .map(|id| self.handler(&harvest.store, id))
            .collect::<KernelResult<Vec<_>>>()?;
        handlers
            .into_iter()
            .map(|handler| handler(args.clone()))
            .collect()
    }
}

impl<C: Compose + fmt::Debug> fmt::Debug for Capability<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("id", &self.id)
            .field("compose", &self.compose)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::isolate_instances;
    use crate::selector::Selector;

    struct Text(String);

    fn send() -> Capability<TargetTypeCompose<String>> {
        Capability::new("message.send", TargetTypeCompose::new())
    }

    fn qq() -> Selector {
        Selector::new().land("qq")
    }

    fn text(body: &str) -> Payload {
        payload(Text(body.to_string()))
    }

    #[test]
    fn test_send_dispatches_by_target() {
        let send = send();
        let store = ArtifactStore::new("qq");
        let mut registrar = Registrar::for_store(Arc::clone(&store), "qq-protocol");
        send.register(&mut registrar, TargetPayload::of::<Text>("land.group"), |(target, _)| {
            format!("A:{}", target.get("group").unwrap_or_default())
        })
        .unwrap();
        send.register(&mut registrar, TargetPayload::of::<Text>("land.friend"), |(target, _)| {
            format!("B:{}", target.get("friend").unwrap_or_default())
        })
        .unwrap();
        let layout = Layout::new(vec![store]);

        let group = send
            .invoke_in(&layout, (qq().with("group", "123"), text("hi")))
            .unwrap();
        assert_eq!(group, "A:123");

        let friend = send
            .invoke_in(&layout, (qq().with("friend", "456"), text("hi")))
            .unwrap();
        assert_eq!(friend, "B:456");

        let err = send
            .invoke_in(&layout, (qq().with("guild", "1"), text("hi")))
            .unwrap_err();
        assert!(err.is_unresolved());
        assert!(err.to_string().contains("message.send"));
    }

    #[test]
    fn test_payload_type_must_match() {
        let send = send();
        let store = ArtifactStore::new("qq");
        let mut registrar = Registrar::for_store(Arc::clone(&store), "qq-protocol");
        send.register(&mut registrar, TargetPayload::of::<Text>("land.group"), |_| "text".to_string())
            .unwrap();
        let layout = Layout::new(vec![store]);

        let err = send
            .invoke_in(&layout, (qq().with("group", "1"), payload(42_u32)))
            .unwrap_err();
        assert!(err.is_unresolved());
    }

    #[test]
    fn test_route_compose_intersects_axes() {
        let pull: Capability<TargetRouteCompose<&'static str, String>> =
            Capability::new("metadata.pull", TargetRouteCompose::new());
        let store = ArtifactStore::new("qq");
        let mut registrar = Registrar::for_store(Arc::clone(&store), "qq-protocol");
        pull.register(&mut registrar, ("land.group", "nickname"), |_| "group nick".to_string())
            .unwrap();
        pull.register(&mut registrar, ("land.group.member", "nickname"), |_| "member nick".to_string())
            .unwrap();
        pull.register(&mut registrar, ("land.group", "avatar"), |_| "group avatar".to_string())
            .unwrap();
        let layout = Layout::new(vec![store]);

        let group = qq().with("group", "1");
        assert_eq!(pull.invoke_in(&layout, (group.clone(), "nickname")).unwrap(), "group nick");
        assert_eq!(pull.invoke_in(&layout, (group.clone(), "avatar")).unwrap(), "group avatar");
        let member = group.with("member", "2");
        assert_eq!(pull.invoke_in(&layout, (member.clone(), "nickname")).unwrap(), "member nick");
        assert!(pull
            .invoke_in(&layout, (member, "avatar"))
            .unwrap_err()
            .is_unresolved());
    }

    #[test]
    fn test_first_matching_layer_stops_search() {
        let greet: Capability<SymmetricCompose<(), &'static str>> =
            Capability::new("greet", SymmetricCompose::new());
        let outer = ArtifactStore::new("outer");
        let inner = ArtifactStore::new("inner");
        greet
            .register(&mut Registrar::for_store(Arc::clone(&outer), "outer"), (), |_| "outer")
            .unwrap();
        let layout = Layout::new(vec![Arc::clone(&inner), Arc::clone(&outer)]);
        assert_eq!(greet.invoke_in(&layout, ()).unwrap(), "outer");

        greet
            .register(&mut Registrar::for_store(Arc::clone(&inner), "inner"), (), |_| "inner")
            .unwrap();
        assert_eq!(greet.invoke_in(&layout, ()).unwrap(), "inner");
        let harvest = greet.candidates_in(&layout, &()).unwrap().unwrap();
        assert_eq!(harvest.store.label(), "inner");
        assert_eq!(harvest.candidates.len(), 1);
    }

    #[test]
    fn test_invoke_all_is_newest_first() {
        let hook: Capability<SymmetricCompose<u32, u32>> =
            Capability::new("lifecycle.hook", SymmetricCompose::new());
        let store = ArtifactStore::new("hooks");
        let mut registrar = Registrar::for_store(Arc::clone(&store), "hooks");
        hook.register(&mut registrar, (), |n| n + 1).unwrap();
        hook.register(&mut registrar, (), |n| n * 10).unwrap();

        let _scope = crate::layout::enter(store);
        assert_eq!(hook.invoke_all(3).unwrap(), vec![30, 4]);
        assert_eq!(hook.invoke(3).unwrap(), 30);
    }

    #[test]
    fn test_register_bound_reads_active_instance() {
        struct Account {
            id: String,
        }

        let whoami: Capability<TargetCompose<(), String>> =
            Capability::new("account.whoami", TargetCompose::new());
        let store = ArtifactStore::new("qq");
        let mut registrar = Registrar::for_store(Arc::clone(&store), "qq-protocol");
        whoami
            .register_bound::<Account, _>(&mut registrar, "land", |account, _| account.id.clone())
            .unwrap();
        let layout = Layout::new(vec![store]);

        let err = whoami.invoke_in(&layout, (qq(), ())).unwrap_err();
        assert!(matches!(err, KernelError::MissingInstance { .. }));

        let scope = isolate_instances();
        scope.provide(Account {
            id: "10001".to_string(),
        });
        assert_eq!(whoami.invoke_in(&layout, (qq(), ())).unwrap(), "10001");
        drop(scope);
        assert!(whoami.invoke_in(&layout, (qq(), ())).is_err());
    }

    #[test]
    fn test_async_implementation() {
        use futures::FutureExt;

        let fetch: Capability<TargetCompose<(), AsyncOutput<anyhow::Result<String>>>> =
            Capability::new("profile.fetch", TargetCompose::new());
        let store = ArtifactStore::new("qq");
        let mut registrar = Registrar::for_store(Arc::clone(&store), "qq-protocol");
        fetch
            .register(&mut registrar, "land.friend", |(target, ())| {
                let id = target.get("friend").unwrap_or_default().to_string();
                async move {
                    anyhow::ensure!(!id.is_empty(), "friend id is empty");
                    Ok(format!("profile:{id}"))
                }
                .boxed()
            })
            .unwrap();
        let layout = Layout::new(vec![store]);

        let pending = fetch
            .invoke_in(&layout, (qq().with("friend", "42"), ()))
            .unwrap();
        assert_eq!(tokio_test::block_on(pending).unwrap(), "profile:42");
        let pending = fetch
            .invoke_in(&layout, (qq().with("friend", ""), ()))
            .unwrap();
        assert!(tokio_test::block_on(pending).is_err());
    }

    #[test]
    fn test_fallible_implementation_error_propagates() {
        let parse: Capability<SymmetricCompose<&'static str, u32>> =
            Capability::new("codec.parse", SymmetricCompose::new());
        let store = ArtifactStore::new("codec");
        let mut registrar = Registrar::for_store(Arc::clone(&store), "codec");
        parse
            .register_fallible(&mut registrar, (), |raw| {
                Ok(raw.parse::<u32>().map_err(anyhow::Error::from)?)
            })
            .unwrap();
        let layout = Layout::new(vec![store]);

        assert_eq!(parse.invoke_in(&layout, "17").unwrap(), 17);
        assert!(matches!(
            parse.invoke_in(&layout, "seventeen"),
            Err(KernelError::Implementation(_))
        ));
    }

    #[test]
    fn test_capability_set_reports_missing() {
        let a = send();
        let b: Capability<SymmetricCompose<(), ()>> = Capability::new("account.logout", SymmetricCompose::new());
        let set = CapabilitySet::new("Messaging").with(&a).with(&b).with(&a);
        assert_eq!(set.members().len(), 2);

        let mut registered = HashSet::new();
        registered.insert(a.id().clone());
        assert_eq!(set.missing_from(&registered), vec!["account.logout".to_string()]);
    }
}
