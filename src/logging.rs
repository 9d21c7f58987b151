//! Diagnostic tracing
//!
//! Protocol output shares stdout and stderr with the user, so no subscriber
//! is installed unless `EDCLIENT_LOG` asks for one.

use tracing_subscriber::EnvFilter;

/// Variable holding the filter directives, e.g. `EDCLIENT_LOG=edclient=debug`
pub const LOG_ENV: &str = "EDCLIENT_LOG";

/// Install a stderr subscriber filtered by `EDCLIENT_LOG`, if it is set
pub fn init() {
    let Ok(directives) = std::env::var(LOG_ENV) else {
        return;
    };
    let filter = EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("debug"));

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
