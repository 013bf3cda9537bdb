//! # Avilla - capability dispatch kernel
//!
//! The core of a multi-protocol bot framework: protocol backends register
//! implementations of shared capabilities (send a message, mute a member,
//! pull a profile) against hierarchical address patterns, and application
//! code calls those capabilities without knowing which backend serves them.
//!
//! - [`selector`]: address values and the target pattern DSL
//!   (`"land.group.member#is_premium"`, `"land.*"`).
//! - [`overload`]: the axes a capability dispatches on (target trie, payload
//!   type, route value, singleton).
//! - [`capability`]: capability declarations and the resolution protocol.
//! - [`layout`]: artifact stores, registrars, and task-scoped layering with
//!   guaranteed restoration.

pub mod capability;
pub mod config;
pub mod error;
pub mod layout;
pub mod overload;
pub mod selector;
pub mod telemetry;

pub use capability::{
    payload, Capability, CapabilityId, CapabilitySet, Compose, Payload, SymmetricCompose,
    TargetCompose, TargetPayload, TargetRoute, TargetRouteCompose, TargetTypeCompose,
};
pub use config::{DuplicatePolicy, KernelConfig};
pub use error::{KernelError, KernelResult, PatternError};
pub use layout::{
    enter, freeze_global, global_registrar, global_store, instance, isolate_instances,
    isolate_layout, ArtifactStore, Layout, Registrar,
};
pub use overload::{CandidateSet, ImplId, Overload};
pub use selector::{compile, CompiledPattern, MatchRule, PredicateTable, Selector};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
