//! Tracing setup for embedders and tests

use tracing_subscriber::{fmt, EnvFilter};

/// Install a global fmt subscriber filtered by `RUST_LOG`
/// (default `orgmesh_core=info`). Safe to call more than once; later calls
/// are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("orgmesh_core=info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
