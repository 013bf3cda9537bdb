//! Hierarchical addresses and the pattern language that matches them.
//!
//! A [`Selector`] is an immutable, ordered `key → value` address such as
//! `land=qq, group=123, member=456`. Insertion order is hierarchy order.
//! Backends describe which addresses they serve with target patterns
//! (`"land.group"`, `"land.group.member#is_premium"`, `"land.*"`), compiled by
//! [`compile`] into a [`CompiledPattern`].

pub mod pattern;
pub mod predicate;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::PatternError;

pub use pattern::{compile, CompiledPattern, Constraint, PatternSegment, SegmentKind};
pub use predicate::{Predicate, PredicateFn, PredicateTable};

/// How [`Selector::matches`] compares two selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchRule {
    /// Always matches.
    Any,
    /// Same keys, same order, same values.
    Exact,
    /// Every entry of `self` is present in the other selector.
    Exist,
    /// The entries of `self` appear as one contiguous run in the other selector.
    Fragment,
    /// The entries of `self` are a prefix of the other selector.
    StartsWith,
}

/// An immutable ordered address.
///
/// Cloning is cheap; every "derive" operation returns a new selector.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Selector {
    entries: Arc<[(String, String)]>,
}

impl Default for Selector {
    fn default() -> Self {
        Self {
            entries: Vec::new().into(),
        }
    }
}

impl Selector {
    /// Create an empty selector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from ordered pairs. Later duplicates replace earlier ones in place.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut entries: Vec<(String, String)> = Vec::new();
        for (key, value) in pairs {
            let key = key.into();
            let value = value.into();
            match entries.iter_mut().find(|(k, _)| *k == key) {
                Some(slot) => slot.1 = value,
                None => entries.push((key, value)),
            }
        }
        Self {
            entries: entries.into(),
        }
    }

    /// Return a new selector with `key` set to `value`.
    ///
    /// An existing key keeps its position; a new key is appended.
    pub fn with(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::from_pairs(
            self.entries
                .iter()
                .cloned()
                .chain(std::iter::once((key.into(), value.into()))),
        )
    }

    /// Alias of [`Selector::with`].
    pub fn appendix(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.with(key, value)
    }

    /// Return a new selector whose first entry is `land=value`.
    pub fn land(&self, value: impl Into<String>) -> Self {
        let rest = self.entries.iter().filter(|(k, _)| k != "land").cloned();
        Self::from_pairs(std::iter::once(("land".to_string(), value.into())).chain(rest))
    }

    /// Value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the selector has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in hierarchy order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Keys joined by `.`, e.g. `land.group.member`.
    pub fn path(&self) -> String {
        self.keys_joined(|_| true)
    }

    /// Like [`Selector::path`] but without the `land` key.
    pub fn path_without_land(&self) -> String {
        self.keys_joined(|k| k != "land")
    }

    fn keys_joined(&self, keep: impl Fn(&str) -> bool) -> String {
        self.entries
            .iter()
            .map(|(k, _)| k.as_str())
            .filter(|k| keep(k))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Key of the deepest entry.
    pub fn last_key(&self) -> Option<&str> {
        self.entries.last().map(|(k, _)| k.as_str())
    }

    /// Value of the deepest entry.
    pub fn last_value(&self) -> Option<&str> {
        self.entries.last().map(|(_, v)| v.as_str())
    }

    /// Compare with another selector under `rule`.
    pub fn matches(&self, other: &Selector, rule: MatchRule) -> bool {
        let own = &self.entries[..];
        let full = &other.entries[..];
        match rule {
            MatchRule::Any => true,
            MatchRule::Exact => own == full,
            MatchRule::Exist => own.iter().all(|entry| full.contains(entry)),
            MatchRule::Fragment => {
                let Some(first) = own.first() else {
                    return true;
                };
                match full.iter().position(|entry| entry == first) {
                    Some(start) => full[start..].starts_with(own),
                    None => false,
                }
            }
            MatchRule::StartsWith => full.starts_with(own),
        }
    }

    /// Whether this selector follows `pattern`.
    ///
    /// Segments are walked pairwise against entries. A `*` segment accepts all
    /// remaining entries; a name mismatch, a failing predicate or a differing
    /// literal rejects. Otherwise both sides must be consumed together. An
    /// unresolved `~` inherits nothing and is skipped.
    pub fn follows(&self, pattern: &CompiledPattern) -> bool {
        let mut entries = self.entries.iter();
        for segment in pattern.segments() {
            match segment.kind() {
                SegmentKind::Wildcard => return true,
                SegmentKind::Inherit => continue,
                SegmentKind::Normal => {}
            }
            match entries.next() {
                Some((key, value)) if segment.accepts(key, value) => {}
                _ => return false,
            }
        }
        entries.next().is_none()
    }

    /// Compile `pattern` without predicates and test [`Selector::follows`].
    pub fn follows_str(&self, pattern: &str) -> Result<bool, PatternError> {
        let compiled = compile(pattern, &PredicateTable::new())?;
        Ok(self.follows(&compiled))
    }

    /// Return `self` if it follows `pattern`, otherwise an error describing the mismatch.
    pub fn expects(&self, pattern: &CompiledPattern) -> Result<&Self, PatternError> {
        if self.follows(pattern) {
            Ok(self)
        } else {
            Err(PatternError::MalformedSelector {
                input: self.to_string(),
                reason: format!("does not follow `{}`", pattern),
            })
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Selector()")?;
        for (key, value) in self.entries.iter() {
            write!(f, ".{}(", key)?;
            pattern::write_escaped(f, value)?;
            f.write_str(")")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Selector {
    type Err = PatternError;

    /// Parse `key(value).key(value)`, optionally prefixed by `Selector()`.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let malformed = |reason: &str| PatternError::MalformedSelector {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let body = input
            .strip_prefix("Selector()")
            .map(|rest| rest.strip_prefix('.').unwrap_or(rest))
            .unwrap_or(input);
        let mut pairs = Vec::new();
        let mut chars = body.chars().peekable();
        while chars.peek().is_some() {
            let mut key = String::new();
            loop {
                match chars.next() {
                    Some('(') => break,
                    Some(ch) => key.push(ch),
                    None => return Err(malformed("missing `(`")),
                }
            }
            if key.is_empty() {
                return Err(malformed("empty key"));
            }
            let mut value = String::new();
            loop {
                match chars.next() {
                    Some(')') => break,
                    Some('\\') => match chars.next() {
                        Some(escaped) => value.push(escaped),
                        None => return Err(malformed("dangling `\\`")),
                    },
                    Some(ch) if pattern::needs_escape(ch) => {
                        return Err(malformed("unescaped special character in value"))
                    }
                    Some(ch) => value.push(ch),
                    None => return Err(malformed("missing `)`")),
                }
            }
            pairs.push((key, value));
            match chars.next() {
                None => {}
                Some('.') if chars.peek().is_none() => return Err(malformed("trailing `.`")),
                Some('.') => {}
                Some(_) => return Err(malformed("expected `.` between entries")),
            }
        }
        Ok(Selector::from_pairs(pairs))
    }
}

impl Serialize for Selector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries.iter())
    }
}

impl<'de> Deserialize<'de> for Selector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pairs: Vec<(String, String)> = Vec::deserialize(deserializer)?;
        Ok(Selector::from_pairs(pairs))
    }
}
