//! Diagnostics channel for changepath binaries.
//!
//! A step writes to two places. The build log (discovered paths, masked
//! override lines, `no change files found`) goes through the host's
//! `OutputSink`, which the CLI prints on stdout next to body output.
//! Operational events such as dispatch ids, abandoned callbacks and step
//! summaries go through `tracing` to stderr, so a consumer reading the
//! build log never sees them.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the stderr subscriber for the diagnostics channel.
///
/// Filtering comes from `RUST_LOG` when set, otherwise from `level`.
/// `json` switches stderr to one JSON object per event for log shippers;
/// the build log on the `OutputSink` stays plain text either way. Only the
/// first call installs anything.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .try_init()
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing(false, Level::DEBUG);
        init_tracing(true, Level::INFO);
        tracing::info!("still logging");
    }
}
