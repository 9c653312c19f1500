#![deny(missing_docs)]

//! `tracing-subscriber` wiring shared by `vtest-daemon` and the crate's own
//! integration tests. The daemon has no interactive CLI output to preserve,
//! so this crate goes straight to an `EnvFilter`-driven subscriber rather
//! than a bespoke verbosity-flag system.

use tracing_subscriber::filter::ParseError;
use tracing_subscriber::EnvFilter;

/// Name of the environment variable consulted for the log filter directive,
/// following `tracing_subscriber::EnvFilter`'s own convention.
pub const FILTER_ENV: &str = "VTEST_LOG";

/// Filter applied when `VTEST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

/// Installs a process-wide `tracing` subscriber reading its filter directive
/// from `VTEST_LOG` (falling back to [`DEFAULT_FILTER`]), writing formatted
/// events to stderr.
///
/// Returns `Ok(())` if installation succeeded or a subscriber was already
/// installed (idempotent, so tests and the daemon binary can both call it
/// without coordinating).
pub fn init() -> Result<(), ParseError> {
    let filter = EnvFilter::try_from_env(FILTER_ENV).or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))?;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        assert!(init().is_ok());
        assert!(init().is_ok());
    }
}
