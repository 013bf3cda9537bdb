//! Overload axes: the independent dimensions a capability dispatches on.
//!
//! Every axis implements [`Overload`]:
//!
//! - `digest` turns a registration value into a hashable signature,
//! - `collect` finds (or creates) the candidate set for a signature,
//! - `harvest` looks up the candidates for a concrete call value,
//! - `access` is an exact, read-only signature lookup for introspection.
//!
//! Capabilities hold their axes type-erased ([`ErasedOverload`]) because one
//! capability may mix a target axis with a type axis and a route axis.

pub mod builtins;
pub mod target;

use std::any::{type_name, Any};
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub use builtins::{SimpleOverload, SingletonOverload, TypeKey, TypeOverload, SINGLETON};
pub use target::{LookupBranch, LookupCollection, TargetOverload};

// ---------------------------------------------------------------------------
// Implementation handles and candidate sets
// ---------------------------------------------------------------------------

static IMPL_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Handle of one registered implementation.
///
/// Ids increase monotonically across the process, so a larger id always
/// means a later registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImplId(u64);

impl ImplId {
    pub(crate) fn next() -> Self {
        Self(IMPL_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw registration counter value.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ImplId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "impl#{}", self.0)
    }
}

/// Set of implementation handles.
///
/// Iteration order is newest registration first, which makes "first member"
/// the last-registered implementation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateSet {
    ids: BTreeSet<ImplId>,
}

static EMPTY_CANDIDATES: CandidateSet = CandidateSet::new();

impl CandidateSet {
    pub const fn new() -> Self {
        Self {
            ids: BTreeSet::new(),
        }
    }

    /// Shared empty set, returned by harvests that find nothing.
    pub fn empty() -> &'static CandidateSet {
        &EMPTY_CANDIDATES
    }

    /// Add an id; returns `false` if it was already present.
    pub fn insert(&mut self, id: ImplId) -> bool {
        self.ids.insert(id)
    }

    /// Remove an id; returns `false` if it was absent.
    pub fn remove(&mut self, id: ImplId) -> bool {
        self.ids.remove(&id)
    }

    /// Whether the set holds `id`.
    pub fn contains(&self, id: ImplId) -> bool {
        self.ids.contains(&id)
    }

    /// Number of candidates.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the set has no candidates.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Newest-first iteration.
    pub fn iter(&self) -> impl Iterator<Item = ImplId> + '_ {
        self.ids.iter().rev().copied()
    }

    /// The first member in iteration order (the newest registration).
    pub fn first(&self) -> Option<ImplId> {
        self.ids.iter().next_back().copied()
    }

    /// Keep only members also present in `other`.
    pub fn intersect_with(&mut self, other: &CandidateSet) {
        self.ids.retain(|id| other.ids.contains(id));
    }
}

impl FromIterator<ImplId> for CandidateSet {
    fn from_iter<I: IntoIterator<Item = ImplId>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Typed axis interface
// ---------------------------------------------------------------------------

/// One dispatch dimension.
pub trait Overload: Send + Sync + 'static {
    /// Hashable registration key.
    type Signature: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static;
    /// Value supplied at registration time.
    type CollectValue: 'static;
    /// Value supplied at call time.
    type CallValue: 'static;
    /// Per-capability storage for this axis.
    type Scope: Default + fmt::Debug + Send + Sync + 'static;

    fn digest(&self, value: Self::CollectValue) -> Self::Signature;

    /// Find or create the candidate set for `signature`.
    fn collect<'s>(&self, scope: &'s mut Self::Scope, signature: &Self::Signature)
        -> &'s mut CandidateSet;

    /// Read-only candidate lookup. An empty set means "nothing here".
    fn harvest<'s>(&self, scope: &'s Self::Scope, value: &Self::CallValue) -> &'s CandidateSet;

    /// Exact lookup of the set registered under `signature`.
    fn access<'s>(&self, scope: &'s Self::Scope, signature: &Self::Signature)
        -> Option<&'s CandidateSet>;
}

// ---------------------------------------------------------------------------
// Type-erased signatures
// ---------------------------------------------------------------------------

/// Object-safe view of an axis signature, usable as a map key.
pub trait DynSignature: fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn dyn_eq(&self, other: &dyn DynSignature) -> bool;
    fn dyn_hash(&self, state: &mut dyn Hasher);
}

impl<T> DynSignature for T
where
    T: Eq + Hash + fmt::Debug + Send + Sync + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn DynSignature) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .map_or(false, |other| self == other)
    }

    fn dyn_hash(&self, mut state: &mut dyn Hasher) {
        self.hash(&mut state);
    }
}

/// A digested signature tagged with the axis it belongs to.
#[derive(Debug, Clone)]
pub struct AxisSignature {
    pub axis: &'static str,
    pub signature: Arc<dyn DynSignature>,
}

impl PartialEq for AxisSignature {
    fn eq(&self, other: &Self) -> bool {
        self.axis == other.axis && self.signature.dyn_eq(other.signature.as_ref())
    }
}

impl Eq for AxisSignature {}

impl Hash for AxisSignature {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.axis.hash(state);
        self.signature.dyn_hash(state);
    }
}

impl fmt::Display for AxisSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={:?}", self.axis, self.signature)
    }
}

// ---------------------------------------------------------------------------
// Type-erased axis
// ---------------------------------------------------------------------------

/// Raised when an erased axis receives a value of the wrong type.
#[derive(Debug, Clone, Copy)]
pub struct ValueMismatch {
    pub expected: &'static str,
}

/// Object-safe adaptor over [`Overload`], used by capability records.
pub trait ErasedOverload: Send + Sync {
    fn new_scope(&self) -> Box<dyn Any + Send + Sync>;

    fn digest_erased(
        &self,
        value: Box<dyn Any + Send>,
    ) -> Result<Arc<dyn DynSignature>, ValueMismatch>;

    fn collect_erased<'s>(
        &self,
        scope: &'s mut (dyn Any + Send + Sync),
        signature: &dyn DynSignature,
    ) -> Result<&'s mut CandidateSet, ValueMismatch>;

    fn harvest_erased<'s>(
        &self,
        scope: &'s (dyn Any + Send + Sync),
        value: &dyn Any,
    ) -> Result<&'s CandidateSet, ValueMismatch>;

    fn access_erased<'s>(
        &self,
        scope: &'s (dyn Any + Send + Sync),
        signature: &dyn DynSignature,
    ) -> Result<Option<&'s CandidateSet>, ValueMismatch>;
}

fn mismatch<T>() -> ValueMismatch {
    ValueMismatch {
        expected: type_name::<T>(),
    }
}

impl<O: Overload> ErasedOverload for O {
    fn new_scope(&self) -> Box<dyn Any + Send + Sync> {
        Box::new(O::Scope::default())
    }

    fn digest_erased(
        &self,
        value: Box<dyn Any + Send>,
    ) -> Result<Arc<dyn DynSignature>, ValueMismatch> {
        let value = value
            .downcast::<O::CollectValue>()
            .map_err(|_| mismatch::<O::CollectValue>())?;
        Ok(Arc::new(self.digest(*value)))
    }

    fn collect_erased<'s>(
        &self,
        scope: &'s mut (dyn Any + Send + Sync),
        signature: &dyn DynSignature,
    ) -> Result<&'s mut CandidateSet, ValueMismatch> {
        let signature = signature
            .as_any()
            .downcast_ref::<O::Signature>()
            .ok_or_else(mismatch::<O::Signature>)?;
        let scope = scope
            .downcast_mut::<O::Scope>()
            .ok_or_else(mismatch::<O::Scope>)?;
        Ok(self.collect(scope, signature))
    }

    fn harvest_erased<'s>(
        &self,
        scope: &'s (dyn Any + Send + Sync),
        value: &dyn Any,
    ) -> Result<&'s CandidateSet, ValueMismatch> {
        let value = value
            .downcast_ref::<O::CallValue>()
            .ok_or_else(mismatch::<O::CallValue>)?;
        let scope = scope
            .downcast_ref::<O::Scope>()
            .ok_or_else(mismatch::<O::Scope>)?;
        Ok(self.harvest(scope, value))
    }

    fn access_erased<'s>(
        &self,
        scope: &'s (dyn Any + Send + Sync),
        signature: &dyn DynSignature,
    ) -> Result<Option<&'s CandidateSet>, ValueMismatch> {
        let signature = signature
            .as_any()
            .downcast_ref::<O::Signature>()
            .ok_or_else(mismatch::<O::Signature>)?;
        let scope = scope
            .downcast_ref::<O::Scope>()
            .ok_or_else(mismatch::<O::Scope>)?;
        Ok(self.access(scope, signature))
    }
}

/// A named axis as declared by a capability.
#[derive(Clone)]
pub struct AxisDecl {
    pub name: &'static str,
    pub overload: Arc<dyn ErasedOverload>,
}

impl AxisDecl {
    /// Declare axis `name` served by `overload`.
    pub fn new(name: &'static str, overload: impl Overload) -> Self {
        Self {
            name,
            overload: Arc::new(overload),
        }
    }
}

impl fmt::Debug for AxisDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AxisDecl").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_set_is_newest_first() {
        let a = ImplId::next();
        let b = ImplId::next();
        let c = ImplId::next();
        let set: CandidateSet = [a, c, b].into_iter().collect();
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![c, b, a]);
        assert_eq!(set.first(), Some(c));
    }

    #[test]
    fn test_candidate_set_intersection() {
        let a = ImplId::next();
        let b = ImplId::next();
        let mut left: CandidateSet = [a, b].into_iter().collect();
        let right: CandidateSet = [b].into_iter().collect();
        left.intersect_with(&right);
        assert_eq!(left.first(), Some(b));
        assert_eq!(left.len(), 1);
        left.intersect_with(CandidateSet::empty());
        assert!(left.is_empty());
    }

    #[test]
    fn test_axis_signature_equality_crosses_erasure() {
        let left = AxisSignature {
            axis: "route",
            signature: Arc::new("profile".to_string()),
        };
        let right = AxisSignature {
            axis: "route",
            signature: Arc::new("profile".to_string()),
        };
        let other_axis = AxisSignature {
            axis: "target",
            signature: Arc::new("profile".to_string()),
        };
        assert_eq!(left, right);
        assert_ne!(left, other_axis);

        let mut set = std::collections::HashSet::new();
        set.insert(left);
        assert!(set.contains(&right));
    }

    #[test]
    fn test_erased_overload_rejects_wrong_value_type() {
        let axis: Arc<dyn ErasedOverload> = Arc::new(SimpleOverload::<String>::new());
        assert!(axis.digest_erased(Box::new(42_u32)).is_err());
        let signature = axis
            .digest_erased(Box::new("profile".to_string()))
            .unwrap();
        let mut scope = axis.new_scope();
        axis.collect_erased(scope.as_mut(), signature.as_ref())
            .unwrap()
            .insert(ImplId::next());
        assert_eq!(
            axis.harvest_erased(scope.as_ref(), &"profile".to_string())
                .unwrap()
                .len(),
            1
        );
        assert!(axis.harvest_erased(scope.as_ref(), &7_i64).is_err());
    }
}
