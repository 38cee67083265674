use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LogConfig;

/// Initializes tracing/logging from `RUST_LOG`, defaulting to `info`.
pub fn init_tracing(config: &LogConfig) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(false);

    if config.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
