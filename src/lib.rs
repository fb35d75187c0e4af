pub mod config;
pub mod harness;
pub mod records;
pub mod store;
pub mod telemetry;

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `filter`, falling back to
/// [`config::default_log_filter`].
pub fn init_tracing(filter: Option<&str>) {
    let fallback = filter
        .map(str::to_string)
        .unwrap_or_else(config::default_log_filter);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .init();
}
