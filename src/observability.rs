//! Structured logging initialization (ambient stack, §5 "Concurrency &
//! Resource Model" assumes a running `tracing` subscriber throughout).

use tracing_subscriber::EnvFilter;

/// Initializes the global `tracing` subscriber: JSON-formatted events,
/// filterable via `RUST_LOG`, defaulting to `info` for this crate when
/// unset.
///
/// # Errors
///
/// Returns an error if a global subscriber has already been installed, or
/// if `RUST_LOG` contains a directive `tracing_subscriber` cannot parse.
pub fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("netwatcher_controller=info,tower_http=info"))?;

    tracing_subscriber::fmt().with_env_filter(filter).json().try_init()?;
    Ok(())
}
