//! Logging setup for binaries and integration harnesses embedding the kernel.
//!
//! The kernel itself only emits `log` records (registrations and scope changes
//! at debug/trace level). [`init_tracing`] installs a `tracing-subscriber`
//! formatter that also captures those records.

use tracing_subscriber::EnvFilter;

/// Default directive used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info,avilla=debug";

/// Install a global fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter`.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_refused() {
        let _ = init_tracing(DEFAULT_FILTER);
        assert!(!init_tracing("trace"));
        log::debug!("log records reach the subscriber");
        tracing::debug!("so do tracing events");
    }
}
