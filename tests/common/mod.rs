//! Shared test setup: tracing init, guarded against the multiple test
//! binaries in `tests/` each running their own `main`.

use std::sync::Once;

static TRACING: Once = Once::new();

/// Install a `tracing_subscriber::fmt` layer with an `EnvFilter` once per
/// process, so `RUST_LOG=proseql=debug cargo test -- --nocapture` gives
/// readable traces across every scenario.
pub fn init_tracing() {
    TRACING.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
}
