//! Named predicates referenced from patterns via `name#predicate`.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use regex::Regex;

/// Predicate function signature: receives the selector value of one segment.
pub type PredicateFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// A named predicate.
///
/// Identity (equality and hashing) is the name only, so that two registrations
/// referencing `#is_premium` land in the same trie branch even when they were
/// compiled against different tables.
#[derive(Clone)]
pub struct Predicate {
    name: Arc<str>,
    func: PredicateFn,
}

impl Predicate {
    /// Create a predicate from a closure.
    pub fn new(name: impl Into<Arc<str>>, func: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// The name the pattern refers to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Evaluate the predicate against a segment value.
    pub fn test(&self, value: &str) -> bool {
        (self.func)(value)
    }
}

impl PartialEq for Predicate {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Predicate {}

impl Hash for Predicate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Predicate(#{})", self.name)
    }
}

/// Name → predicate table supplied alongside a pattern at compile time.
#[derive(Clone, Default)]
pub struct PredicateTable {
    entries: HashMap<String, Predicate>,
}

impl PredicateTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a closure predicate (builder style).
    pub fn with(mut self, name: &str, func: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.insert(name, func);
        self
    }

    /// Add a predicate that accepts values matching `regex`.
    pub fn with_regex(mut self, name: &str, regex: Regex) -> Self {
        self.insert(name, move |value: &str| regex.is_match(value));
        self
    }

    /// Add a closure predicate.
    pub fn insert(&mut self, name: &str, func: impl Fn(&str) -> bool + Send + Sync + 'static) {
        self.entries
            .insert(name.to_string(), Predicate::new(name, func));
    }

    /// Look up a predicate by name.
    pub fn get(&self, name: &str) -> Option<&Predicate> {
        self.entries.get(name)
    }

    /// Number of predicates in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for PredicateTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.entries.keys().collect();
        names.sort();
        f.debug_struct("PredicateTable").field("names", &names).finish()
    }
}
