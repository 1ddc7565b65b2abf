//! Logging setup for the command-line tools.
//!
//! The library only emits `tracing` events. Binaries call [`init`] once to
//! install a formatting subscriber. `RUST_LOG` always takes precedence over
//! the verbosity flag.

use tracing_subscriber::EnvFilter;

/// Default filter directive.
pub const DEFAULT_FILTER: &str = "info";

/// Filter directive used with `--verbose`.
pub const VERBOSE_FILTER: &str = "info,hwkit=debug";

/// Filter directive for the given verbosity.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        VERBOSE_FILTER
    } else {
        DEFAULT_FILTER
    }
}

/// Install the global subscriber.
///
/// Calling this more than once is harmless; later calls are ignored.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
