//! The target axis: a trie over compiled selector patterns.
//!
//! Each level maps a segment name to its branches. A branch is keyed by a
//! literal value, by a predicate, or is the default (unconstrained) branch.
//! `*` segments store their candidates on the level itself.
//!
//! Lookup order at one level: exact literal, then the first predicate in
//! registration order that accepts the value, then the default branch, then
//! the level's wildcard (which ends the walk). When a non-default branch is
//! taken and a default sibling exists, the default's sub-levels stay visible
//! beneath the chosen branch's sub-levels for the rest of the walk, and the
//! default's own candidates back the chosen branch if it has none.

use std::collections::HashMap;

use crate::selector::{CompiledPattern, Constraint, PatternSegment, Predicate, SegmentKind, Selector};

use super::{CandidateSet, Overload};

/// One trie level: `segment name -> branches`, plus the `*` candidates.
#[derive(Debug, Default)]
pub struct LookupCollection {
    levels: HashMap<String, LookupBranches>,
    wildcard: Option<CandidateSet>,
}

impl LookupCollection {
    /// Whether nothing is registered at this level.
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty() && self.wildcard.is_none()
    }

    /// Segment names registered at this level.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.levels.keys().map(String::as_str)
    }
}

/// Branches under one segment name.
#[derive(Debug, Default)]
pub struct LookupBranches {
    literal: HashMap<String, LookupBranch>,
    predicates: Vec<(Predicate, LookupBranch)>,
    default: Option<LookupBranch>,
}

impl LookupBranches {
    fn branch_mut(&mut self, constraint: Constraint<'_>) -> &mut LookupBranch {
        match constraint {
            Constraint::Literal(literal) => self.literal.entry(literal.to_string()).or_default(),
            Constraint::Predicate(predicate) => {
                let index = match self.predicates.iter().position(|(p, _)| p == predicate) {
                    Some(index) => index,
                    None => {
                        self.predicates
                            .push((predicate.clone(), LookupBranch::default()));
                        self.predicates.len() - 1
                    }
                };
                &mut self.predicates[index].1
            }
            Constraint::Unconstrained => self.default.get_or_insert_with(LookupBranch::default),
        }
    }

    fn branch(&self, constraint: Constraint<'_>) -> Option<&LookupBranch> {
        match constraint {
            Constraint::Literal(literal) => self.literal.get(literal),
            Constraint::Predicate(predicate) => self
                .predicates
                .iter()
                .find(|(p, _)| p == predicate)
                .map(|(_, branch)| branch),
            Constraint::Unconstrained => self.default.as_ref(),
        }
    }

    /// Pick the branch for a concrete value. The flag is true for the default branch.
    fn select(&self, value: &str) -> Option<(&LookupBranch, bool)> {
        if let Some(branch) = self.literal.get(value) {
            return Some((branch, false));
        }
        if let Some((_, branch)) = self.predicates.iter().find(|(p, _)| p.test(value)) {
            return Some((branch, false));
        }
        self.default.as_ref().map(|branch| (branch, true))
    }
}

/// A trie node: deeper levels and the implementations registered exactly here.
#[derive(Debug, Default)]
pub struct LookupBranch {
    levels: LookupCollection,
    candidates: CandidateSet,
}

impl LookupBranch {
    /// Sublevels below this branch.
    pub fn levels(&self) -> &LookupCollection {
        &self.levels
    }

    /// Implementations registered exactly at this branch.
    pub fn candidates(&self) -> &CandidateSet {
        &self.candidates
    }
}

/// Dispatch on the target address of a call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TargetOverload;

fn first_wildcard<'s>(layers: &[&'s LookupCollection]) -> &'s CandidateSet {
    layers
        .iter()
        .find_map(|layer| layer.wildcard.as_ref())
        .unwrap_or_else(|| CandidateSet::empty())
}

fn concrete_segments(pattern: &CompiledPattern) -> impl Iterator<Item = &PatternSegment> {
    pattern
        .segments()
        .iter()
        .filter(|segment| segment.kind() != SegmentKind::Inherit)
}

impl Overload for TargetOverload {
    type Signature = CompiledPattern;
    type CollectValue = CompiledPattern;
    type CallValue = Selector;
    type Scope = LookupCollection;

    fn digest(&self, value: CompiledPattern) -> CompiledPattern {
        value
    }

    /// Walk the trie along `signature`, creating levels as needed.
    ///
    /// A pattern made only of an unresolved `~` inherits an empty base and
    /// lands on the root wildcard.
    fn collect<'s>(&self, scope: &'s mut LookupCollection, signature: &CompiledPattern) -> &'s mut CandidateSet {
        let mut collection = scope;
        let mut segments = concrete_segments(signature).peekable();

        while let Some(segment) = segments.next() {
            if segment.kind() == SegmentKind::Wildcard {
                break;
            }
            let branch = collection
                .levels
                .entry(segment.name().to_string())
                .or_default()
                .branch_mut(segment.constraint());
            if segments.peek().is_none() {
                return &mut branch.candidates;
            }
            collection = &mut branch.levels;
        }

        collection.wildcard.get_or_insert_with(CandidateSet::default)
    }

    fn harvest<'s>(&self, scope: &'s LookupCollection, value: &Selector) -> &'s CandidateSet {
        let mut layers: Vec<&'s LookupCollection> = vec![scope];
        let mut found: Option<&'s CandidateSet> = None;

        for (key, entry) in value.iter() {
            let Some(branches) = layers.iter().find_map(|layer| layer.levels.get(key)) else {
                return first_wildcard(&layers);
            };
            let Some((chosen, is_default)) = branches.select(entry) else {
                return first_wildcard(&layers);
            };

            let mut next = vec![&chosen.levels];
            let mut candidates = &chosen.candidates;
            if !is_default {
                if let Some(default) = &branches.default {
                    next.push(&default.levels);
                    if candidates.is_empty() {
                        candidates = &default.candidates;
                    }
                }
            }
            found = Some(candidates);
            layers = next;
        }

        found.unwrap_or_else(|| CandidateSet::empty())
    }

    fn access<'s>(&self, scope: &'s LookupCollection, signature: &CompiledPattern) -> Option<&'s CandidateSet> {
        let mut collection = scope;
        let mut segments = concrete_segments(signature).peekable();

        while let Some(segment) = segments.next() {
            if segment.kind() == SegmentKind::Wildcard {
                break;
            }
            let branch = collection
                .levels
                .get(segment.name())?
                .branch(segment.constraint())?;
            if segments.peek().is_none() {
                return Some(&branch.candidates);
            }
            collection = &branch.levels;
        }

        collection.wildcard.as_ref()
    }
}
