//! Diagnostic logging setup
//!
//! Engines report through `tracing`; the binary installs a formatting
//! subscriber writing to stderr so command output on stdout stays clean.
//! The filter comes from `TENANT_VAULT_LOG`, then `RUST_LOG`, then `info`.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter directive
pub const LOG_ENV: &str = "TENANT_VAULT_LOG";

fn filter_directive(verbose: bool) -> String {
    std::env::var(LOG_ENV)
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| if verbose { "debug" } else { "info" }.into())
}

/// Install the global subscriber. Calling it twice is harmless.
pub fn init(verbose: bool) {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new(filter_directive(verbose)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
