//! Diagnostic tracing for the `verdict` binary.
//!
//! Suites emit `tracing` events for runs, deferred structural errors, and
//! ignored callbacks. The library never installs a subscriber; only the
//! binary does, and its output goes to stderr so reports on stdout stay
//! machine-readable.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose { "verdict=debug,warn" } else { "warn" }
}

/// Install the stderr subscriber. `RUST_LOG` wins over `verbose`.
///
/// ```bash
/// RUST_LOG=verdict=trace verdict check --rules rules.toml --input form.json
/// ```
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .init();
}
