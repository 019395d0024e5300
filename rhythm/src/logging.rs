//! Tracing setup for the `rhythm` binary.
//!
//! Save notices (overwrites, skips, staleness) are emitted as `warn!`/`info!`
//! events gated by the caller's [`Verbosity`](crate::core::types::Verbosity);
//! developer diagnostics are `debug!` events. Both go to stderr through the
//! subscriber installed here.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`; falls back to `default_filter` (e.g. `"warn"`) when unset.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=rhythm=debug rhythm rois --config project/configs/config.yaml --masks-from ROIs.frd
/// ```
pub fn init(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    // A second init (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
