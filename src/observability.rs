//! Logging setup
//!
//! recordbase logs through `tracing`. Embedders that do not install their
//! own subscriber can call [`init_tracing`].

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a global fmt subscriber.
///
/// `RUST_LOG` wins over `default_filter`. Returns `false` when a global
/// subscriber was already installed, in which case nothing changes.
pub fn init_tracing(default_filter: &str) -> bool {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_tracing("recordbase=debug");
        assert!(!init_tracing("recordbase=debug"));
    }
}
