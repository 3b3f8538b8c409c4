//! Logging setup.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::GeneralConfig;

/// Filter used when `RUST_LOG` is unset.
pub fn default_filter(config: &GeneralConfig) -> String {
    let level = &config.log_level;
    format!("quest_engine={level},chain_ledger={level},learn_agent={level},info")
}

/// Install the global subscriber.
///
/// Fails if a subscriber is already installed.
pub fn init(config: &GeneralConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(config)));

    let json = config.json_logs;
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .try_init()
}
