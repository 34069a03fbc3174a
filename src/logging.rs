use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging to stderr; stdout belongs to the console client.
/// Returns the filter string actually applied.
pub fn init_logging(default_level: &str) -> String {
    // RUST_LOG wins over the provided default
    let level = std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.to_string());
    let (filter, applied) = match EnvFilter::try_new(&level) {
        Ok(filter) => (filter, level),
        Err(_) => (EnvFilter::new("info"), "info".to_string()),
    };

    // a second call (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();

    applied
}
