//! Tracing subscriber setup.

use std::sync::Once;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Maps a `-v` count to a level: 1=ERROR, 2=WARN, 3=INFO, 4=DEBUG, 5+=TRACE.
/// Zero turns logging off.
pub fn verbosity_to_level_filter(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::OFF,
        1 => LevelFilter::ERROR,
        2 => LevelFilter::WARN,
        3 => LevelFilter::INFO,
        4 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Installs the global fmt subscriber. `RUST_LOG` overrides `verbosity`.
///
/// Should only be called once per process.
pub fn init_tracing(verbosity: u8) -> eyre::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(verbosity_to_level_filter(verbosity).into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| eyre::eyre!("failed to install tracing subscriber: {e}"))
}

/// Installs a subscriber that writes through the test harness. Safe to call
/// from every test.
pub fn init_test_tracing() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let filter = EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy();

        let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
    });
}
