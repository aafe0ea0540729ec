//! Log output for tests.

use tracing_subscriber::EnvFilter;

/// Installs a `fmt` subscriber writing to the test output.
///
/// The filter comes from `RUST_LOG`, defaulting to `warn`. Safe to call from
/// every test; only the first call installs the subscriber.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
