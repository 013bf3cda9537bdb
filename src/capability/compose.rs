//! Compose: how a capability turns arguments into axis values.
//!
//! A compose is plain data flow. At registration it pushes `(axis, value)`
//! pairs into a [`Recorder`]; at call time it returns the `(axis, value)` pairs
//! to harvest with. Harvesting and selection happen afterwards in
//! [`Capability`](super::Capability).

use std::any::Any;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::KernelResult;
use crate::overload::{
    AxisDecl, CandidateSet, ImplId, SimpleOverload, TargetOverload, TypeKey, TypeOverload,
    SINGLETON,
};
use crate::selector::{compile, CompiledPattern, PredicateTable, Selector};

use super::record::{axis_value, AxisValues};

/// Shared call-time payload for composes that dispatch on payload type.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Output of implementations that suspend, e.g. on network calls.
pub type AsyncOutput<T> = futures::future::BoxFuture<'static, T>;

/// Wrap a value as a [`Payload`].
pub fn payload<T: Any + Send + Sync>(value: T) -> Payload {
    Arc::new(value)
}

// ---------------------------------------------------------------------------
// Recorder
// ---------------------------------------------------------------------------

/// Collects the axis values of one registration.
///
/// Patterns are compiled against the registrar's predicate table, and a
/// leading `~` is replaced by the registrar's base address.
#[derive(Debug)]
pub struct Recorder<'r> {
    predicates: &'r PredicateTable,
    base: Option<&'r CompiledPattern>,
    values: AxisValues,
}

impl<'r> Recorder<'r> {
    pub(crate) fn new(predicates: &'r PredicateTable, base: Option<&'r CompiledPattern>) -> Self {
        Self {
            predicates,
            base,
            values: Vec::new(),
        }
    }

    /// Compile a target pattern the way this registration sees it.
    pub fn pattern(&self, pattern: &str) -> KernelResult<CompiledPattern> {
        let compiled = compile(pattern, self.predicates)?;
        match self.base {
            Some(base) => Ok(compiled.inherit(base)?),
            None => Ok(compiled),
        }
    }

    /// Record a target pattern for `axis`.
    pub fn target(&mut self, axis: &'static str, pattern: &str) -> KernelResult<&mut Self> {
        let compiled = self.pattern(pattern)?;
        self.values.push(axis_value(axis, compiled));
        Ok(self)
    }

    /// Record a raw collect value for `axis`.
    pub fn value<T: Any + Send>(&mut self, axis: &'static str, value: T) -> &mut Self {
        self.values.push(axis_value(axis, value));
        self
    }

    pub(crate) fn into_values(self) -> AxisValues {
        self.values
    }
}

// ---------------------------------------------------------------------------
// Compose trait
// ---------------------------------------------------------------------------

/// Registration and call behaviour of a capability.
pub trait Compose: Send + Sync + 'static {
    /// What a backend supplies when registering an implementation.
    type Collect;
    /// Arguments passed to the capability, and on to the implementation.
    type Args: Send + 'static;
    /// What an implementation returns.
    type Output: 'static;

    /// The axes this capability dispatches on.
    fn axes(&self) -> Vec<AxisDecl>;

    fn collect(&self, recorder: &mut Recorder<'_>, value: Self::Collect) -> KernelResult<()>;

    fn call(&self, args: &Self::Args) -> AxisValues;

    /// Choose among the intersection of one layer. Defaults to the newest registration.
    fn select(&self, candidates: &CandidateSet) -> Option<ImplId> {
        candidates.first()
    }

    /// Human-readable account of the call, used in unresolved errors.
    fn describe(&self, _args: &Self::Args) -> String {
        String::from("the given arguments")
    }
}

// ---------------------------------------------------------------------------
// SymmetricCompose
// ---------------------------------------------------------------------------

/// A capability with no real axis: every implementation shares one set.
pub struct SymmetricCompose<A, O> {
    _marker: PhantomData<fn(A) -> O>,
}

impl<A, O> SymmetricCompose<A, O> {
    /// Create the compose.
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<A, O> Default for SymmetricCompose<A, O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A, O> fmt::Debug for SymmetricCompose<A, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricCompose")
    }
}

impl<A, O> Compose for SymmetricCompose<A, O>
where
    A: Send + 'static,
    O: 'static,
{
    type Collect = ();
    type Args = A;
    type Output = O;

    fn axes(&self) -> Vec<AxisDecl> {
        vec![AxisDecl::new("singleton", SINGLETON)]
    }

    fn collect(&self, recorder: &mut Recorder<'_>, _value: ()) -> KernelResult<()> {
        recorder.value("singleton", ());
        Ok(())
    }

    fn call(&self, _args: &A) -> AxisValues {
        vec![axis_value("singleton", ())]
    }
}

// ---------------------------------------------------------------------------
// TargetCompose
// ---------------------------------------------------------------------------

/// Dispatch on the target address only. Called with `(target, args)`.
pub struct TargetCompose<A, O> {
    _marker: PhantomData<fn(A) -> O>,
}

impl<A, O> TargetCompose<A, O> {
    /// Create the compose.
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<A, O> Default for TargetCompose<A, O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A, O> fmt::Debug for TargetCompose<A, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TargetCompose")
    }
}

impl<A, O> Compose for TargetCompose<A, O>
where
    A: Send + 'static,
    O: 'static,
{
    type Collect = String;
    type Args = (Selector, A);
    type Output = O;

    fn axes(&self) -> Vec<AxisDecl> {
        vec![AxisDecl::new("target", TargetOverload)]
    }

    fn collect(&self, recorder: &mut Recorder<'_>, pattern: String) -> KernelResult<()> {
        recorder.target("target", &pattern)?;
        Ok(())
    }

    fn call(&self, args: &(Selector, A)) -> AxisValues {
        vec![axis_value("target", args.0.clone())]
    }

    fn describe(&self, args: &(Selector, A)) -> String {
        args.0.to_string()
    }
}

// ---------------------------------------------------------------------------
// TargetRouteCompose
// ---------------------------------------------------------------------------

/// Registration value of [`TargetRouteCompose`].
#[derive(Debug, Clone)]
pub struct TargetRoute<R> {
    pub pattern: String,
    pub route: R,
}

impl<R> From<(&str, R)> for TargetRoute<R> {
    fn from((pattern, route): (&str, R)) -> Self {
        Self {
            pattern: pattern.to_string(),
            route,
        }
    }
}

/// Dispatch on target and a route value, e.g. which metadata to pull.
/// Called with `(target, route)`.
pub struct TargetRouteCompose<R, O> {
    _marker: PhantomData<fn(R) -> O>,
}

impl<R, O> TargetRouteCompose<R, O> {
    /// Create the compose.
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<R, O> Default for TargetRouteCompose<R, O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R, O> fmt::Debug for TargetRouteCompose<R, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TargetRouteCompose")
    }
}

impl<R, O> Compose for TargetRouteCompose<R, O>
where
    R: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
    O: 'static,
{
    type Collect = TargetRoute<R>;
    type Args = (Selector, R);
    type Output = O;

    fn axes(&self) -> Vec<AxisDecl> {
        vec![
            AxisDecl::new("target", TargetOverload),
            AxisDecl::new("route", SimpleOverload::<R>::new()),
        ]
    }

    fn collect(&self, recorder: &mut Recorder<'_>, value: TargetRoute<R>) -> KernelResult<()> {
        recorder
            .target("target", &value.pattern)?
            .value("route", value.route);
        Ok(())
    }

    fn call(&self, (target, route): &(Selector, R)) -> AxisValues {
        vec![
            axis_value("target", target.clone()),
            axis_value("route", route.clone()),
        ]
    }

    fn describe(&self, (target, route): &(Selector, R)) -> String {
        format!("{} via route {:?}", target, route)
    }
}

// ---------------------------------------------------------------------------
// TargetTypeCompose
// ---------------------------------------------------------------------------

/// Registration value of [`TargetTypeCompose`].
#[derive(Debug, Clone)]
pub struct TargetPayload {
    pub pattern: String,
    pub payload: TypeKey,
}

impl TargetPayload {
    /// Target `pattern` with payload type `T`.
    pub fn of<T: Any>(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            payload: TypeKey::of::<T>(),
        }
    }
}

impl From<(&str, TypeKey)> for TargetPayload {
    fn from((pattern, payload): (&str, TypeKey)) -> Self {
        Self {
            pattern: pattern.to_string(),
            payload,
        }
    }
}

/// Dispatch on target and on the runtime type of the payload, the shape of
/// `send(target, message)`. Called with `(target, payload)`.
pub struct TargetTypeCompose<O> {
    _marker: PhantomData<fn() -> O>,
}

impl<O> TargetTypeCompose<O> {
    /// Create the compose.
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<O> Default for TargetTypeCompose<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O> fmt::Debug for TargetTypeCompose<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TargetTypeCompose")
    }
}

impl<O: 'static> Compose for TargetTypeCompose<O> {
    type Collect = TargetPayload;
    type Args = (Selector, Payload);
    type Output = O;

    fn axes(&self) -> Vec<AxisDecl> {
        vec![
            AxisDecl::new("target", TargetOverload),
            AxisDecl::new("payload", TypeOverload),
        ]
    }

    fn collect(&self, recorder: &mut Recorder<'_>, value: TargetPayload) -> KernelResult<()> {
        recorder
            .target("target", &value.pattern)?
            .value("payload", value.payload);
        Ok(())
    }

    fn call(&self, (target, payload): &(Selector, Payload)) -> AxisValues {
        let payload: &dyn Any = &**payload;
        vec![
            axis_value("target", target.clone()),
            axis_value("payload", TypeKey::of_val(payload)),
        ]
    }

    fn describe(&self, (target, _): &(Selector, Payload)) -> String {
        target.to_string()
    }
}
