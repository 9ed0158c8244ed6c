//! Process-level initialization helpers.
//!
//! The library itself never installs a tracing subscriber; binaries and
//! integration tests that want log output call [`init_tracing`] once.

use tracing_subscriber::EnvFilter;

/// Install a fmt tracing subscriber honoring `RUST_LOG`. Safe to call more
/// than once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
    }
}
