//! Structured logging setup.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt};

/// Initializes the global tracing subscriber. `MUXD_LOG` (falling back to
/// `RUST_LOG`) controls filtering; default level is info.
pub fn init() {
    let filter = EnvFilter::try_from_env("MUXD_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::default().add_directive(LevelFilter::INFO.into()));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_span_events(FmtSpan::CLOSE)
                .with_target(false),
        )
        .with(filter)
        .init();
}
