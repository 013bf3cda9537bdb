//! Target pattern compiler.
//!
//! Grammar:
//!
//! ```text
//! pattern  := segment ("." segment)*
//! segment  := "~"                         inherit, first segment only
//!           | name "#" predicateName      predicate-constrained
//!           | name "(" literalText ")"    literal-constrained
//!           | name                        unconstrained, wildcard if name == "*"
//! ```
//!
//! Inside literal text a backslash escapes the next character, which is how
//! `( ) [ ] { } #` and `\` are written literally. All errors are reported at
//! compile time; a compiled pattern never fails at lookup.

use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;
use std::sync::Arc;

use crate::error::PatternError;

use super::predicate::{Predicate, PredicateTable};

/// Kind of a pattern segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    /// A named level, optionally constrained.
    Normal,
    /// `*`: matches every remaining level.
    Wildcard,
    /// `~`: stands for the base address of the registering component.
    Inherit,
}

/// Constraint view of a segment, used as the trie branch key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint<'a> {
    Literal(&'a str),
    Predicate(&'a Predicate),
    Unconstrained,
}

/// One compiled segment. At most one of literal/predicate is set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PatternSegment {
    name: String,
    literal: Option<String>,
    predicate: Option<Predicate>,
    kind: SegmentKind,
}

impl PatternSegment {
    fn normal(name: String) -> Self {
        Self {
            name,
            literal: None,
            predicate: None,
            kind: SegmentKind::Normal,
        }
    }

    fn special(kind: SegmentKind) -> Self {
        let name = match kind {
            SegmentKind::Wildcard => "*",
            _ => "~",
        };
        Self {
            name: name.to_string(),
            literal: None,
            predicate: None,
            kind,
        }
    }

    /// Segment name (`*` and `~` for the special kinds).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Required literal value, if any.
    pub fn literal(&self) -> Option<&str> {
        self.literal.as_deref()
    }

    /// Predicate the value must pass, if any.
    pub fn predicate(&self) -> Option<&Predicate> {
        self.predicate.as_ref()
    }

    /// Normal, wildcard or inherit.
    pub fn kind(&self) -> SegmentKind {
        self.kind
    }

    /// `literal ?? predicate ?? unconstrained`.
    pub fn constraint(&self) -> Constraint<'_> {
        match (&self.literal, &self.predicate) {
            (Some(literal), _) => Constraint::Literal(literal),
            (None, Some(predicate)) => Constraint::Predicate(predicate),
            (None, None) => Constraint::Unconstrained,
        }
    }

    /// Whether a concrete `(key, value)` entry satisfies this segment.
    pub fn accepts(&self, key: &str, value: &str) -> bool {
        if self.name != key {
            return false;
        }
        match self.constraint() {
            Constraint::Literal(literal) => literal == value,
            Constraint::Predicate(predicate) => predicate.test(value),
            Constraint::Unconstrained => true,
        }
    }
}

impl fmt::Display for PatternSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            SegmentKind::Wildcard => return f.write_str("*"),
            SegmentKind::Inherit => return f.write_str("~"),
            SegmentKind::Normal => {}
        }
        f.write_str(&self.name)?;
        if let Some(literal) = &self.literal {
            f.write_str("(")?;
            write_escaped(f, literal)?;
            f.write_str(")")?;
        }
        if let Some(predicate) = &self.predicate {
            write!(f, "#{}", predicate.name())?;
        }
        Ok(())
    }
}

/// Characters that need a backslash inside literal text.
pub(crate) fn needs_escape(ch: char) -> bool {
    matches!(ch, '(' | ')' | '[' | ']' | '{' | '}' | '#' | '\\')
}

/// Write `text` with the literal escapes applied.
pub(crate) fn write_escaped(f: &mut fmt::Formatter<'_>, text: &str) -> fmt::Result {
    for ch in text.chars() {
        if needs_escape(ch) {
            f.write_str("\\")?;
        }
        write!(f, "{}", ch)?;
    }
    Ok(())
}

/// An immutable, compiled target pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompiledPattern {
    segments: Arc<[PatternSegment]>,
}

impl CompiledPattern {
    /// Segments in order.
    pub fn segments(&self) -> &[PatternSegment] {
        &self.segments
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Always `false` for a compiled pattern.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Whether the pattern ends in `*`.
    pub fn is_wildcard(&self) -> bool {
        self.segments
            .last()
            .map_or(false, |s| s.kind == SegmentKind::Wildcard)
    }

    /// Whether the pattern starts with `~`.
    pub fn inherits(&self) -> bool {
        self.segments
            .first()
            .map_or(false, |s| s.kind == SegmentKind::Inherit)
    }

    /// Replace a leading `~` with the segments of `base`.
    ///
    /// Patterns without `~` are returned unchanged. A base that ends in a
    /// wildcard cannot be extended.
    pub fn inherit(&self, base: &CompiledPattern) -> Result<CompiledPattern, PatternError> {
        if !self.inherits() {
            return Ok(self.clone());
        }
        let rest = &self.segments[1..];
        if base.is_wildcard() && !rest.is_empty() {
            return Err(PatternError::SegmentAfterWildcard {
                pattern: format!("{}.{}", base, self),
                segment: rest[0].to_string(),
            });
        }
        let segments: Vec<PatternSegment> = base
            .segments
            .iter()
            .filter(|s| s.kind != SegmentKind::Inherit)
            .chain(rest.iter())
            .cloned()
            .collect();
        if segments.is_empty() {
            return Err(PatternError::Empty);
        }
        Ok(CompiledPattern {
            segments: segments.into(),
        })
    }
}

impl fmt::Display for CompiledPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}

/// Compile `pattern`, resolving `#name` references against `predicates`.
pub fn compile(pattern: &str, predicates: &PredicateTable) -> Result<CompiledPattern, PatternError> {
    if pattern.is_empty() {
        return Err(PatternError::Empty);
    }

    let mut parser = Parser {
        source: pattern,
        chars: pattern.char_indices().peekable(),
        predicates,
    };
    let mut segments: Vec<PatternSegment> = Vec::new();

    loop {
        let start = parser.position();
        let segment = parser.segment()?;

        match segment.kind {
            SegmentKind::Inherit if !segments.is_empty() => {
                return Err(PatternError::MisplacedInherit {
                    pattern: pattern.to_string(),
                });
            }
            _ => {}
        }
        if segments
            .last()
            .map_or(false, |s: &PatternSegment| s.kind == SegmentKind::Wildcard)
        {
            return Err(PatternError::SegmentAfterWildcard {
                pattern: pattern.to_string(),
                segment: pattern[start..parser.position()].to_string(),
            });
        }
        segments.push(segment);

        match parser.chars.next() {
            None => break,
            Some((_, '.')) => continue,
            Some((position, ')')) => {
                return Err(PatternError::UnmatchedParenthesis {
                    pattern: pattern.to_string(),
                    position,
                });
            }
            Some((position, found)) => {
                return Err(PatternError::TrailingText {
                    pattern: pattern.to_string(),
                    position,
                    found,
                });
            }
        }
    }

    Ok(CompiledPattern {
        segments: segments.into(),
    })
}

struct Parser<'a> {
    source: &'a str,
    chars: Peekable<CharIndices<'a>>,
    predicates: &'a PredicateTable,
}

impl<'a> Parser<'a> {
    fn position(&mut self) -> usize {
        self.chars
            .peek()
            .map_or(self.source.len(), |(position, _)| *position)
    }

    fn identifier(&mut self) -> String {
        let mut out = String::new();
        while let Some(&(_, ch)) = self.chars.peek() {
            if matches!(ch, '.' | '#' | '(' | ')') {
                break;
            }
            out.push(ch);
            self.chars.next();
        }
        out
    }

    /// Parse one segment, stopping before the `.` separator.
    fn segment(&mut self) -> Result<PatternSegment, PatternError> {
        let position = self.position();
        let name = self.identifier();
        if name.is_empty() {
            return match self.chars.peek() {
                Some(&(position, ')')) => Err(PatternError::UnmatchedParenthesis {
                    pattern: self.source.to_string(),
                    position,
                }),
                _ => Err(PatternError::EmptySegment {
                    pattern: self.source.to_string(),
                    position,
                }),
            };
        }

        let mut literal: Option<String> = None;
        let mut predicate_name: Option<String> = None;
        let mut literal_mentions_predicate = false;

        loop {
            match self.chars.peek() {
                Some(&(_, '#')) if predicate_name.is_none() => {
                    self.chars.next();
                    predicate_name = Some(self.identifier());
                }
                Some(&(open, '(')) if literal.is_none() => {
                    self.chars.next();
                    let (text, mentions) = self.literal_text(open)?;
                    literal_mentions_predicate |= mentions;
                    literal = Some(text);
                }
                Some(&(position, found)) if found != '.' && found != ')' => {
                    return Err(PatternError::TrailingText {
                        pattern: self.source.to_string(),
                        position,
                        found,
                    });
                }
                _ => break,
            }
        }

        let rendered = || self.source[position..self.position_snapshot()].to_string();

        if literal.is_some() && (predicate_name.is_some() || literal_mentions_predicate) {
            return Err(PatternError::LiteralAndPredicate { segment: rendered() });
        }

        match name.as_str() {
            "*" | "~" if literal.is_some() || predicate_name.is_some() => {
                return Err(PatternError::TrailingText {
                    pattern: self.source.to_string(),
                    position: position + 1,
                    found: self.source[position + 1..].chars().next().unwrap_or('#'),
                });
            }
            "*" => return Ok(PatternSegment::special(SegmentKind::Wildcard)),
            "~" => return Ok(PatternSegment::special(SegmentKind::Inherit)),
            _ => {}
        }

        let mut segment = PatternSegment::normal(name);
        segment.literal = literal;
        if let Some(predicate_name) = predicate_name {
            let predicate = self.predicates.get(&predicate_name).ok_or_else(|| {
                PatternError::UnknownPredicate {
                    name: predicate_name.clone(),
                    segment: rendered(),
                }
            })?;
            segment.predicate = Some(predicate.clone());
        }
        Ok(segment)
    }

    /// Byte offset of the next unread character without needing `&mut self`.
    fn position_snapshot(&self) -> usize {
        let mut probe = self.chars.clone();
        probe.peek().map_or(self.source.len(), |(position, _)| *position)
    }

    /// Read literal text after `(` up to the matching unescaped `)`.
    ///
    /// Returns the unescaped text and whether an unescaped `#` occurred.
    fn literal_text(&mut self, open: usize) -> Result<(String, bool), PatternError> {
        let mut text = String::new();
        let mut mentions_predicate = false;
        loop {
            match self.chars.next() {
                None => {
                    return Err(PatternError::UnclosedParenthesis {
                        pattern: self.source.to_string(),
                        position: open,
                    });
                }
                Some((_, '\\')) => match self.chars.next() {
                    Some((_, escaped)) => text.push(escaped),
                    None => {
                        return Err(PatternError::DanglingEscape {
                            pattern: self.source.to_string(),
                        });
                    }
                },
                Some((_, ')')) => return Ok((text, mentions_predicate)),
                Some((position, '(')) => {
                    return Err(PatternError::NestedParenthesis {
                        pattern: self.source.to_string(),
                        position,
                    });
                }
                Some((_, '#')) => {
                    mentions_predicate = true;
                    text.push('#');
                }
                Some((_, ch)) => text.push(ch),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PredicateTable {
        PredicateTable::new().with("is_premium", |v: &str| v.starts_with("vip"))
    }

    #[test]
    fn test_compile_plain_path() {
        let pattern = compile("land.group.member", &table()).unwrap();
        let names: Vec<&str> = pattern.segments().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["land", "group", "member"]);
        assert!(pattern
            .segments()
            .iter()
            .all(|s| s.constraint() == Constraint::Unconstrained));
    }

    #[test]
    fn test_compile_literal_and_predicate_segments() {
        let pattern = compile("land(qq).group.member#is_premium", &table()).unwrap();
        assert_eq!(pattern.segments()[0].literal(), Some("qq"));
        assert_eq!(
            pattern.segments()[2].predicate().map(|p| p.name()),
            Some("is_premium")
        );
        assert_eq!(pattern.to_string(), "land(qq).group.member#is_premium");
    }

    #[test]
    fn test_compile_escaped_literal() {
        let pattern = compile(r"land.file(a\(1\)\#b)", &table()).unwrap();
        assert_eq!(pattern.segments()[1].literal(), Some("a(1)#b"));
        // rendering escapes again and recompiles to the same value
        let again = compile(&pattern.to_string(), &table()).unwrap();
        assert_eq!(again, pattern);
    }

    #[test]
    fn test_compile_wildcard_and_inherit() {
        let pattern = compile("land.*", &table()).unwrap();
        assert!(pattern.is_wildcard());
        let inherit = compile("~.member", &table()).unwrap();
        assert!(inherit.inherits());
    }

    #[test]
    fn test_unclosed_parenthesis_fails() {
        assert!(matches!(
            compile("a.b(#x", &table()),
            Err(PatternError::UnclosedParenthesis { position: 3, .. })
        ));
    }

    #[test]
    fn test_segment_after_wildcard_fails() {
        assert!(matches!(
            compile("a.*.b", &table()),
            Err(PatternError::SegmentAfterWildcard { .. })
        ));
    }

    #[test]
    fn test_literal_with_predicate_fails() {
        assert!(matches!(
            compile("a(#x)", &table()),
            Err(PatternError::LiteralAndPredicate { .. })
        ));
        assert!(matches!(
            compile("a#is_premium(1)", &table()),
            Err(PatternError::LiteralAndPredicate { .. })
        ));
        assert!(matches!(
            compile("a(1)#is_premium", &table()),
            Err(PatternError::LiteralAndPredicate { .. })
        ));
    }

    #[test]
    fn test_other_syntax_errors() {
        assert_eq!(compile("", &table()), Err(PatternError::Empty));
        assert!(matches!(
            compile("land..group", &table()),
            Err(PatternError::EmptySegment { .. })
        ));
        assert!(matches!(
            compile("land.group)", &table()),
            Err(PatternError::UnmatchedParenthesis { .. })
        ));
        assert!(matches!(
            compile("land.group(a(b))", &table()),
            Err(PatternError::NestedParenthesis { .. })
        ));
        assert!(matches!(
            compile("land.group(1)x", &table()),
            Err(PatternError::TrailingText { found: 'x', .. })
        ));
        assert!(matches!(
            compile("land.~", &table()),
            Err(PatternError::MisplacedInherit { .. })
        ));
        assert!(matches!(
            compile("land.member#nope", &table()),
            Err(PatternError::UnknownPredicate { .. })
        ));
    }

    #[test]
    fn test_inherit_splices_base() {
        let base = compile("land(qq).group", &table()).unwrap();
        let relative = compile("~.member", &table()).unwrap();
        let full = relative.inherit(&base).unwrap();
        assert_eq!(full.to_string(), "land(qq).group.member");

        let absolute = compile("land.friend", &table()).unwrap();
        assert_eq!(absolute.inherit(&base).unwrap(), absolute);

        let wildcard_base = compile("land.*", &table()).unwrap();
        assert!(relative.inherit(&wildcard_base).is_err());
    }
}
