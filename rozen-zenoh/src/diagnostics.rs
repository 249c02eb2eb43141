//! Tracing-based diagnostics.
//!
//! The adapter logs exclusively through `tracing`. This helper wires a
//! formatted stderr subscriber with an environment filter and forwards
//! `log`-crate records, for hosts that have not installed their own
//! subscriber.
//!
//! # Example
//!
//! ```ignore
//! rozen_zenoh::diagnostics::init();
//! tracing::info!("adapter ready");
//! ```

use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INITIALIZED: OnceLock<()> = OnceLock::new();

/// Install the default subscriber. Idempotent; a subscriber already
/// installed by the host wins silently.
pub fn init() {
    INITIALIZED.get_or_init(|| {
        tracing_log::LogTracer::init().ok();

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr);

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .ok();
    });
}
