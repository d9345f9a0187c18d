//! Data model and tools for RMV public transport information.

pub mod rmv;
pub mod tools;

use tracing_subscriber::EnvFilter;

/// Install a global `tracing` subscriber.
///
/// Logs are filtered by `RUST_LOG` (defaulting to `info`) and written to stderr, so that stdout
/// can carry protocol messages. Calling this more than once is harmless.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
