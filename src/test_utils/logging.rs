//! Tracing setup for tests.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Install a test subscriber once per process; later calls are no-ops.
///
/// `RUST_LOG` filters as usual; without it, this crate logs at debug. Output
/// goes through the test writer so it only shows for failing tests.
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("outpost=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
