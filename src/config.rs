//! Kernel configuration.
//!
//! Loaded from YAML, optionally overlaid with environment variables, and
//! installed once at startup:
//!
//! ```yaml
//! duplicates: reject        # or last_wins (default)
//! trace_resolution: true    # log which layer served each call
//! ```
//!
//! | Variable                  | Field              |
//! |---------------------------|--------------------|
//! | `AVILLA_DUPLICATES`       | `duplicates`       |
//! | `AVILLA_TRACE_RESOLUTION` | `trace_resolution` |

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};

/// What to do when a store receives a second registration with an identical
/// axis combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Keep both; resolution picks the most recent registration.
    #[default]
    LastWins,
    /// Fail the second registration.
    Reject,
}

impl FromStr for DuplicatePolicy {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "last_wins" | "last" => Ok(Self::LastWins),
            "reject" => Ok(Self::Reject),
            other => Err(KernelError::Config(format!(
                "unknown duplicate policy `{other}`, expected `last_wins` or `reject`"
            ))),
        }
    }
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LastWins => f.write_str("last_wins"),
            Self::Reject => f.write_str("reject"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Duplicate registration policy applied by new registrars.
    #[serde(default)]
    pub duplicates: DuplicatePolicy,
    /// Log the serving layer of every resolved call at debug level.
    #[serde(default)]
    pub trace_resolution: bool,
}

impl KernelConfig {
    /// Parse a YAML document.
    pub fn from_yaml_str(yaml: &str) -> KernelResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read and parse a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> KernelResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)
    }

    /// Apply `AVILLA_*` environment variables on top of this config.
    pub fn with_env_overrides(self) -> KernelResult<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary `variable -> value` lookup.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> KernelResult<Self> {
        if let Some(value) = lookup("AVILLA_DUPLICATES") {
            self.duplicates = value.parse()?;
        }
        if let Some(value) = lookup("AVILLA_TRACE_RESOLUTION") {
            self.trace_resolution = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                other => {
                    return Err(KernelError::Config(format!(
                        "AVILLA_TRACE_RESOLUTION must be a boolean, got `{other}`"
                    )))
                }
            };
        }
        Ok(self)
    }
}

static CONFIG: Lazy<RwLock<KernelConfig>> = Lazy::new(|| RwLock::new(KernelConfig::default()));

/// Install `config` process-wide. Affects registrars created afterwards.
pub fn install(config: KernelConfig) {
    log::debug!(
        "kernel config installed: duplicates={}, trace_resolution={}",
        config.duplicates,
        config.trace_resolution
    );
    *CONFIG.write() = config;
}

/// The installed configuration.
pub fn current() -> KernelConfig {
    CONFIG.read().clone()
}
