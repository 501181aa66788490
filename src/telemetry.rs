//! Tracing bootstrap.
//!
//! The engine itself only emits `tracing` events; embedding binaries and
//! integration tests call `init_tracing` once to get formatted output
//! filtered by `RUST_LOG`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a formatting subscriber with an env-controlled filter.
///
/// Safe to call more than once; only the first call wins.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}
