//! Structured logging initialization.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global JSON subscriber.
///
/// Level defaults to info for the gateway; override with RUST_LOG.
pub fn init() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "apigw=info,access=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}
