//! Shared setup for the integration tests.

use tracing_subscriber::EnvFilter;

/// Route engine and crawler logs to the test writer. `RUST_LOG` selects the
/// level; repeated calls are no-ops.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
