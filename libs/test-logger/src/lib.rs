//! Logger for tests.
//!
//! Provides a convenience tracing initializer for tests. Call [`setup`] at the start of a test
//! and control verbosity through `RUST_LOG`.

use once_cell::sync::Lazy;

static LOGGER_INIT: Lazy<()> = Lazy::new(|| {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
});

/// Initializes the tracing subscriber once per process.
pub fn setup() {
    Lazy::force(&LOGGER_INIT);
}
