//! Error types for the dispatch kernel.
//!
//! Two families exist. [`PatternError`] is raised while compiling an address
//! pattern and therefore surfaces at registration/startup time only.
//! [`KernelError`] covers everything that can go wrong when registering,
//! finalizing or invoking a capability.

use thiserror::Error;

/// Syntax errors in the target pattern DSL.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    /// The pattern string was empty.
    #[error("empty target pattern")]
    Empty,

    /// A segment had no name, e.g. `land..group` or `(x)`.
    #[error("empty segment name at position {position} in `{pattern}`")]
    EmptySegment { pattern: String, position: usize },

    /// A `(` was opened but never closed.
    #[error("unclosed parenthesis opened at position {position} in `{pattern}`")]
    UnclosedParenthesis { pattern: String, position: usize },

    /// A `)` appeared without a matching `(`.
    #[error("unmatched closing parenthesis at position {position} in `{pattern}`")]
    UnmatchedParenthesis { pattern: String, position: usize },

    /// A `(` appeared inside literal text without being escaped.
    #[error("nested parenthesis at position {position} in `{pattern}`; escape it with `\\(`")]
    NestedParenthesis { pattern: String, position: usize },

    /// Text followed the closing `)` of a literal inside one segment.
    #[error("unexpected `{found}` after literal at position {position} in `{pattern}`")]
    TrailingText {
        pattern: String,
        position: usize,
        found: char,
    },

    /// A backslash was the last character of the pattern.
    #[error("dangling escape at the end of `{pattern}`")]
    DanglingEscape { pattern: String },

    /// A segment carried both a literal and a predicate reference.
    #[error("segment `{segment}` has both a literal and a predicate")]
    LiteralAndPredicate { segment: String },

    /// A segment followed a `*` wildcard segment.
    #[error("segment `{segment}` follows a wildcard in `{pattern}`")]
    SegmentAfterWildcard { pattern: String, segment: String },

    /// `~` appeared anywhere but as the first segment.
    #[error("inherit marker `~` must be the first segment of `{pattern}`")]
    MisplacedInherit { pattern: String },

    /// A `#name` referenced a predicate that is not in the supplied table.
    #[error("unknown predicate `{name}` referenced by segment `{segment}`")]
    UnknownPredicate { name: String, segment: String },

    /// The selector text passed to `Selector::from_str` was malformed.
    #[error("malformed selector `{input}`: {reason}")]
    MalformedSelector { input: String, reason: String },
}

/// Errors raised by the registrar, the layered registry and the call path.
#[derive(Debug, Error)]
pub enum KernelError {
    /// Pattern compilation failed during registration.
    #[error(transparent)]
    Pattern(#[from] PatternError),

    /// No layer produced a non-empty intersection for the call.
    #[error("no implementation of `{capability}` for {detail}")]
    Unresolved { capability: String, detail: String },

    /// A component advertised a capability set but is missing members.
    #[error("component `{component}` does not implement {set}: missing {}", missing.join(", "))]
    Incomplete {
        component: String,
        set: String,
        missing: Vec<String>,
    },

    /// A write was attempted into a sealed store.
    #[error("artifact store `{store}` is protected against registration")]
    ProtectedStore { store: String },

    /// An identical axis combination was registered twice under `DuplicatePolicy::Reject`.
    #[error("duplicate registration of `{capability}` for [{combination}] in store `{store}`")]
    DuplicateRegistration {
        capability: String,
        combination: String,
        store: String,
    },

    /// A compose yielded a value for an axis the capability never declared.
    #[error("capability `{capability}` has no axis named `{axis}`")]
    UnknownAxis { capability: String, axis: String },

    /// A compose yielded a value of the wrong type for an axis.
    #[error("axis `{axis}` of `{capability}` expects a value of type `{expected}`")]
    AxisValueMismatch {
        capability: String,
        axis: String,
        expected: &'static str,
    },

    /// A bound implementation needed a component instance that is not active.
    #[error("no active instance of `{type_name}` in the current instance scope")]
    MissingInstance { type_name: &'static str },

    /// The stored implementation did not have the handler type the capability expects.
    #[error("implementation stored for `{capability}` has an incompatible handler type")]
    HandlerTypeMismatch { capability: String },

    /// The selected implementation itself failed.
    #[error(transparent)]
    Implementation(#[from] anyhow::Error),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration file I/O failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML configuration could not be parsed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl KernelError {
    /// Whether this error means "the backend does not support this operation here".
    pub fn is_unresolved(&self) -> bool {
        matches!(self, KernelError::Unresolved { .. })
    }
}

/// Convenience alias used across the kernel.
pub type KernelResult<T> = Result<T, KernelError>;
