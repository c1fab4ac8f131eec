//! Tracing subscriber setup.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Filter built from `RUST_LOG`, falling back to `config.level` for this crate
#[must_use]
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("scriptvox_core={},ort=warn", config.level)))
}

/// Install a global fmt subscriber.
///
/// Returns `false` if a global subscriber was already installed, which is
/// harmless when embedding the crate in a larger application.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    tracing_subscriber::registry()
        .with(env_filter(config))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .is_ok()
}
