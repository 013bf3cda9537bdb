//! Per-capability storage inside one artifact store.
//!
//! An [`ArtifactRecord`] holds one scope per declared axis, the registered
//! implementations, and the set of axis combinations already recorded.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::config::DuplicatePolicy;
use crate::error::{KernelError, KernelResult};
use crate::overload::{AxisDecl, AxisSignature, CandidateSet, DynSignature, ImplId};

use super::CapabilityId;

/// Type-erased handler as stored in a record. Downcast by the owning capability.
pub type ErasedHandler = Arc<dyn Any + Send + Sync>;

/// Axis values produced by a compose, in yield order.
pub type AxisValues = Vec<(&'static str, Box<dyn Any + Send>)>;

/// Pair an axis name with a raw value for [`AxisValues`].
pub fn axis_value<T: Any + Send>(axis: &'static str, value: T) -> (&'static str, Box<dyn Any + Send>) {
    (axis, Box::new(value))
}

/// The digested axis signatures of one registration, sorted by axis name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Combination(Vec<AxisSignature>);

impl Combination {
    fn new(mut signatures: Vec<AxisSignature>) -> Self {
        signatures.sort_by(|a, b| a.axis.cmp(b.axis));
        Self(signatures)
    }

    /// Signatures ordered by axis name.
    pub fn signatures(&self) -> &[AxisSignature] {
        &self.0
    }
}

impl fmt::Display for Combination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, signature) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", signature)?;
        }
        Ok(())
    }
}

/// One registered implementation.
#[derive(Clone)]
pub struct Entity {
    pub component: Arc<str>,
    pub handler: ErasedHandler,
    pub combination: Combination,
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("component", &self.component)
            .field("combination", &self.combination)
            .finish()
    }
}

/// Registration-time state of one capability within one store.
pub struct ArtifactRecord {
    axes: Vec<AxisDecl>,
    scopes: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
    entities: BTreeMap<ImplId, Entity>,
    combinations: HashMap<Combination, Vec<ImplId>>,
}

impl ArtifactRecord {
    /// Empty record over `axes`.
    pub fn new(axes: Vec<AxisDecl>) -> Self {
        let scopes = axes
            .iter()
            .map(|axis| (axis.name, axis.overload.new_scope()))
            .collect();
        Self {
            axes,
            scopes,
            entities: BTreeMap::new(),
            combinations: HashMap::new(),
        }
    }

    fn axis(&self, capability: &CapabilityId, name: &str) -> KernelResult<&AxisDecl> {
        self.axes
            .iter()
            .find(|axis| axis.name == name)
            .ok_or_else(|| KernelError::UnknownAxis {
                capability: capability.to_string(),
                axis: name.to_string(),
            })
    }

    /// Record one implementation under the given axis values.
    ///
    /// All values are digested before anything is written, so a failed
    /// registration leaves the record untouched.
    pub fn insert(
        &mut self,
        capability: &CapabilityId,
        store: &str,
        policy: DuplicatePolicy,
        component: Arc<str>,
        values: AxisValues,
        handler: ErasedHandler,
    ) -> KernelResult<ImplId> {
        let mut signatures = Vec::with_capacity(values.len());
        for (name, value) in values {
            let axis = self.axis(capability, name)?;
            let signature = axis.overload.digest_erased(value).map_err(|mismatch| {
                KernelError::AxisValueMismatch {
                    capability: capability.to_string(),
                    axis: name.to_string(),
                    expected: mismatch.expected,
                }
            })?;
            signatures.push(AxisSignature {
                axis: axis.name,
                signature,
            });
        }
        let combination = Combination::new(signatures);

        if let Some(existing) = self.combinations.get(&combination) {
            match policy {
                DuplicatePolicy::Reject => {
                    return Err(KernelError::DuplicateRegistration {
                        capability: capability.to_string(),
                        combination: combination.to_string(),
                        store: store.to_string(),
                    });
                }
                DuplicatePolicy::LastWins => {
                    log::debug!(
                        "{} [{}] registered again by `{}`, shadowing {} earlier implementation(s)",
                        capability,
                        combination,
                        component,
                        existing.len()
                    );
                }
            }
        }

        let id = ImplId::next();
        for signature in combination.signatures() {
            let axis = self.axis(capability, signature.axis)?.clone();
            let scope = self
                .scopes
                .get_mut(signature.axis)
                .ok_or_else(|| KernelError::UnknownAxis {
                    capability: capability.to_string(),
                    axis: signature.axis.to_string(),
                })?;
            axis.overload
                .collect_erased(&mut **scope, signature.signature.as_ref())
                .map_err(|mismatch| KernelError::AxisValueMismatch {
                    capability: capability.to_string(),
                    axis: signature.axis.to_string(),
                    expected: mismatch.expected,
                })?
                .insert(id);
        }

        self.combinations
            .entry(combination.clone())
            .or_default()
            .push(id);
        self.entities.insert(
            id,
            Entity {
                component,
                handler,
                combination,
            },
        );
        Ok(id)
    }

    /// Intersect the harvested sets of every yielded axis.
    ///
    /// `Ok(None)` means this record cannot serve the call: some axis came up
    /// empty or nothing was yielded at all.
    pub fn candidates(
        &self,
        capability: &CapabilityId,
        values: &[(&'static str, Box<dyn Any + Send>)],
    ) -> KernelResult<Option<CandidateSet>> {
        let mut result: Option<CandidateSet> = None;
        for (name, value) in values {
            let axis = self.axis(capability, name)?;
            let scope = match self.scopes.get(name) {
                Some(scope) => scope,
                None => return Ok(None),
            };
            let value: &dyn Any = &**value;
            let harvested = axis
                .overload
                .harvest_erased(&**scope, value)
                .map_err(|mismatch| KernelError::AxisValueMismatch {
                    capability: capability.to_string(),
                    axis: name.to_string(),
                    expected: mismatch.expected,
                })?;
            if harvested.is_empty() {
                return Ok(None);
            }
            match result.as_mut() {
                Some(set) => set.intersect_with(harvested),
                None => result = Some(harvested.clone()),
            }
        }
        Ok(result.filter(|set| !set.is_empty()))
    }

    /// Exact lookup of one axis scope, for introspection.
    pub fn access(
        &self,
        axis: &str,
        signature: &dyn DynSignature,
    ) -> Option<&CandidateSet> {
        let decl = self.axes.iter().find(|decl| decl.name == axis)?;
        let scope = self.scopes.get(axis)?;
        decl.overload
            .access_erased(&**scope, signature)
            .ok()
            .flatten()
    }

    /// The implementation registered as `id`.
    pub fn entity(&self, id: ImplId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Implementations in registration order.
    pub fn entities(&self) -> impl Iterator<Item = (ImplId, &Entity)> {
        self.entities.iter().map(|(id, entity)| (*id, entity))
    }

    /// Number of implementations.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether no implementation is recorded.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl fmt::Debug for ArtifactRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactRecord")
            .field("axes", &self.axes)
            .field("entities", &self.entities.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overload::{SimpleOverload, TypeKey, TypeOverload};

    fn record() -> ArtifactRecord {
        ArtifactRecord::new(vec![
            AxisDecl::new("route", SimpleOverload::<String>::new()),
            AxisDecl::new("payload", TypeOverload),
        ])
    }

    fn values(route: &str, key: TypeKey) -> AxisValues {
        vec![
            axis_value("route", route.to_string()),
            axis_value("payload", key),
        ]
    }

    fn handler() -> ErasedHandler {
        Arc::new(())
    }

    fn id() -> CapabilityId {
        CapabilityId::new("test.record")
    }

    #[test]
    fn test_candidates_intersect_across_axes() {
        let mut record = record();
        let cap = id();
        let text = record
            .insert(&cap, "s", DuplicatePolicy::LastWins, "a".into(), values("send", TypeKey::of::<String>()), handler())
            .unwrap();
        let number = record
            .insert(&cap, "s", DuplicatePolicy::LastWins, "a".into(), values("send", TypeKey::of::<u32>()), handler())
            .unwrap();

        let hit = record
            .candidates(&cap, &values("send", TypeKey::of::<u32>()))
            .unwrap()
            .unwrap();
        assert_eq!(hit.first(), Some(number));
        assert!(!hit.contains(text));

        let miss = record
            .candidates(&cap, &values("recall", TypeKey::of::<u32>()))
            .unwrap();
        assert!(miss.is_none());
        assert!(record.candidates(&cap, &[]).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_policy() {
        let mut record = record();
        let cap = id();
        let first = record
            .insert(&cap, "s", DuplicatePolicy::LastWins, "a".into(), values("send", TypeKey::of::<String>()), handler())
            .unwrap();
        let second = record
            .insert(&cap, "s", DuplicatePolicy::LastWins, "b".into(), values("send", TypeKey::of::<String>()), handler())
            .unwrap();
        let hit = record
            .candidates(&cap, &values("send", TypeKey::of::<String>()))
            .unwrap()
            .unwrap();
        assert_eq!(hit.len(), 2);
        assert_eq!(hit.first(), Some(second));
        assert!(hit.contains(first));

        let err = record
            .insert(&cap, "s", DuplicatePolicy::Reject, "c".into(), values("send", TypeKey::of::<String>()), handler())
            .unwrap_err();
        assert!(matches!(err, KernelError::DuplicateRegistration { .. }));
        assert_eq!(record.len(), 2);
    }

    #[test]
    fn test_bad_axis_leaves_record_untouched() {
        let mut record = record();
        let cap = id();
        let unknown: AxisValues = vec![axis_value("colour", "red".to_string())];
        assert!(matches!(
            record.insert(&cap, "s", DuplicatePolicy::LastWins, "a".into(), unknown, handler()),
            Err(KernelError::UnknownAxis { .. })
        ));

        let wrong_type: AxisValues = vec![
            axis_value("route", 1_u8),
            axis_value("payload", TypeKey::of::<String>()),
        ];
        assert!(matches!(
            record.insert(&cap, "s", DuplicatePolicy::LastWins, "a".into(), wrong_type, handler()),
            Err(KernelError::AxisValueMismatch { .. })
        ));
        assert!(record.is_empty());
    }

    #[test]
    fn test_access_by_signature() {
        let mut record = record();
        let cap = id();
        let id = record
            .insert(&cap, "s", DuplicatePolicy::LastWins, "a".into(), values("send", TypeKey::of::<String>()), handler())
            .unwrap();
        assert!(record
            .access("route", &"send".to_string())
            .unwrap()
            .contains(id));
        assert!(record.access("route", &"recall".to_string()).is_none());
        assert_eq!(record.entity(id).unwrap().component.as_ref(), "a");
    }
}
