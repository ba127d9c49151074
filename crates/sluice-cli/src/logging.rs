//! Log subscriber setup.

use std::io::IsTerminal;
use tracing_subscriber::EnvFilter;

/// Log level implied by the verbosity flags and config.
pub fn level(verbose: bool, quiet: bool, configured: Option<&str>) -> &str {
    if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        configured.unwrap_or("info")
    }
}

/// Install the global subscriber. `RUST_LOG` overrides `level`.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .init();
}
