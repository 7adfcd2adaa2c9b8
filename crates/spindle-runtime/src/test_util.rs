//! Helpers shared by tests

use std::sync::Once;

static INIT: Once = Once::new();

/// Route `log` output through `env_logger`, once per process.
///
/// Defaults to `info`; override with `RUST_LOG`.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .is_test(true)
            .try_init();
    });
}
