//! Diagnostic logging through `tracing`, written to stderr.
//!
//! Levels: `warn` for data-quality issues and deprecated config keys, `info`
//! for per-tier row counts and skipped tiers, `debug` for file loading.
//! Console reports go to stdout and do not depend on the log level.

use std::io::{self, IsTerminal};

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` applies unless `-v`/`-q` was
/// given explicitly.
pub fn init(level: LevelFilter, explicit: bool) {
    let filter = if explicit {
        env_filter(level)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| env_filter(level))
    };
    let layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_target(false)
        .without_time();
    // Already installed is fine.
    let _ = tracing_subscriber::registry().with(filter).with(layer).try_init();
}

/// Our crate at `level`, dependencies no louder than `warn`.
fn env_filter(level: LevelFilter) -> EnvFilter {
    let ours = level.to_string().to_lowercase();
    let deps = if level > LevelFilter::WARN {
        "warn".to_string()
    } else {
        ours.clone()
    };
    EnvFilter::new(format!("{deps},spendcat={ours}"))
}
