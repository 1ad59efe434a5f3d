//! Tracing subscriber setup.
//!
//! Diagnostics go to stderr through `tracing`; command results stay on
//! stdout so they can be piped.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `--quiet` selects `warn`,
/// `--verbose` selects `debug`, and the default is `info`.
pub fn init_logging(verbose: bool, quiet: bool) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if quiet {
        EnvFilter::new("warn")
    } else if verbose {
        EnvFilter::new("debug,sqlx=warn,hyper=info,reqwest=info")
    } else {
        EnvFilter::new("info,sqlx=warn")
    };

    // A subscriber may already be installed (tests).
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
