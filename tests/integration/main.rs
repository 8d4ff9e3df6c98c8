//! Integration Tests
//!
//! Cross-crate tests exercising the public `palisade` API end to end:
//! - lifecycle: snapshot isolation and conflict detection through the manager
//! - recovery: durable state across restarts and simulated crashes
//! - cleanup: published state consumed by store-side cleanup out of process

mod cleanup;
mod lifecycle;
mod recovery;

use std::sync::Once;

static INIT_LOGGING: Once = Once::new();

/// Install a test-writer subscriber once per process so failing tests show
/// the manager's structured logs.
pub fn init_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}
