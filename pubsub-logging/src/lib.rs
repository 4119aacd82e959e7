//! Structured logging setup for pub/sub wrapper binaries

use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize JSON logging (for deployed services)
///
/// `RUST_LOG` takes precedence over `default_level` when set.
/// Calling this twice in one process is a no-op for the second call.
pub fn init_logging(service_name: &str, default_level: &str) {
    let installed = tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_current_span(false)
                .with_span_list(false),
        )
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(service = service_name, "Logging initialized");
    }
}

/// Initialize human-readable console logging (for operators and development)
pub fn init_console_logging(service_name: &str, default_level: &str) {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(service = service_name, "Console logging initialized");
    }
}
