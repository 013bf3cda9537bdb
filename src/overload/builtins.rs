//! Simple axes: by runtime type, by value, and the singleton axis.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use super::{CandidateSet, Overload};

// ---------------------------------------------------------------------------
// TypeOverload
// ---------------------------------------------------------------------------

/// A runtime type identity with a readable name for diagnostics.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    /// Key of type `T`.
    pub fn of<T: Any + ?Sized>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    /// Type of the concrete value behind a `dyn Any`.
    pub fn of_val(value: &dyn Any) -> Self {
        Self {
            id: value.type_id(),
            name: "<dyn Any>",
        }
    }

    /// The underlying `TypeId`.
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Type name, for diagnostics only.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeKey({})", self.name)
    }
}

/// Dispatch on the runtime type of a value.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeOverload;

impl Overload for TypeOverload {
    type Signature = TypeKey;
    type CollectValue = TypeKey;
    type CallValue = TypeKey;
    type Scope = HashMap<TypeKey, CandidateSet>;

    fn digest(&self, value: TypeKey) -> TypeKey {
        value
    }

    fn collect<'s>(&self, scope: &'s mut Self::Scope, signature: &TypeKey) -> &'s mut CandidateSet {
        scope.entry(*signature).or_default()
    }

    fn harvest<'s>(&self, scope: &'s Self::Scope, value: &TypeKey) -> &'s CandidateSet {
        scope.get(value).unwrap_or_else(|| CandidateSet::empty())
    }

    fn access<'s>(&self, scope: &'s Self::Scope, signature: &TypeKey) -> Option<&'s CandidateSet> {
        scope.get(signature)
    }
}

// ---------------------------------------------------------------------------
// SimpleOverload
// ---------------------------------------------------------------------------

/// Dispatch on value equality, e.g. a metadata route name.
pub struct SimpleOverload<V> {
    _value: PhantomData<fn() -> V>,
}

impl<V> SimpleOverload<V> {
    /// Create the axis.
    pub fn new() -> Self {
        Self {
            _value: PhantomData,
        }
    }
}

impl<V> Default for SimpleOverload<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> fmt::Debug for SimpleOverload<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SimpleOverload<{}>", type_name::<V>())
    }
}

impl<V> Overload for SimpleOverload<V>
where
    V: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
{
    type Signature = V;
    type CollectValue = V;
    type CallValue = V;
    type Scope = HashMap<V, CandidateSet>;

    fn digest(&self, value: V) -> V {
        value
    }

    fn collect<'s>(&self, scope: &'s mut Self::Scope, signature: &V) -> &'s mut CandidateSet {
        scope.entry(signature.clone()).or_default()
    }

    fn harvest<'s>(&self, scope: &'s Self::Scope, value: &V) -> &'s CandidateSet {
        scope.get(value).unwrap_or_else(|| CandidateSet::empty())
    }

    fn access<'s>(&self, scope: &'s Self::Scope, signature: &V) -> Option<&'s CandidateSet> {
        scope.get(signature)
    }
}

// ---------------------------------------------------------------------------
// SingletonOverload
// ---------------------------------------------------------------------------

/// Sentinel signature shared by every singleton registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SingletonSignature;

#[derive(Debug, Default)]
pub struct SingletonScope {
    candidates: CandidateSet,
}

/// An axis with a single key: every implementation lands in one set.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingletonOverload;

/// Shared instance for composes that only need the singleton axis.
pub const SINGLETON: SingletonOverload = SingletonOverload;

impl Overload for SingletonOverload {
    type Signature = SingletonSignature;
    type CollectValue = ();
    type CallValue = ();
    type Scope = SingletonScope;

    fn digest(&self, _value: ()) -> SingletonSignature {
        SingletonSignature
    }

    fn collect<'s>(&self, scope: &'s mut SingletonScope, _signature: &SingletonSignature) -> &'s mut CandidateSet {
        &mut scope.candidates
    }

    fn harvest<'s>(&self, scope: &'s SingletonScope, _value: &()) -> &'s CandidateSet {
        &scope.candidates
    }

    fn access<'s>(&self, scope: &'s SingletonScope, _signature: &SingletonSignature) -> Option<&'s CandidateSet> {
        Some(&scope.candidates).filter(|set| !set.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overload::ImplId;

    #[test]
    fn test_type_overload_harvests_by_concrete_type() {
        let axis = TypeOverload;
        let mut scope = HashMap::new();
        let id = ImplId::next();
        axis.collect(&mut scope, &axis.digest(TypeKey::of::<String>()))
            .insert(id);

        let payload: Box<dyn Any> = Box::new(String::from("hi"));
        assert!(axis.harvest(&scope, &TypeKey::of_val(payload.as_ref())).contains(id));
        assert!(axis.harvest(&scope, &TypeKey::of::<u8>()).is_empty());
        assert!(axis.access(&scope, &TypeKey::of::<String>()).is_some());
        assert!(axis.access(&scope, &TypeKey::of::<u8>()).is_none());
    }

    #[test]
    fn test_simple_overload_by_value() {
        let axis = SimpleOverload::<&'static str>::new();
        let mut scope = HashMap::new();
        let id = ImplId::next();
        axis.collect(&mut scope, &"nickname").insert(id);
        assert_eq!(axis.harvest(&scope, &"nickname").first(), Some(id));
        assert!(axis.harvest(&scope, &"avatar").is_empty());
    }

    #[test]
    fn test_singleton_shares_one_set() {
        let mut scope = SingletonScope::default();
        assert!(SINGLETON.access(&scope, &SingletonSignature).is_none());
        let first = ImplId::next();
        let second = ImplId::next();
        SINGLETON.collect(&mut scope, &SINGLETON.digest(())).insert(first);
        SINGLETON.collect(&mut scope, &SINGLETON.digest(())).insert(second);
        let harvested = SINGLETON.harvest(&scope, &());
        assert_eq!(harvested.len(), 2);
        assert_eq!(harvested.first(), Some(second));
    }
}
