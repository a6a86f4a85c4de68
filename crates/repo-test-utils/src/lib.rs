//! Shared test utilities for the repository reconciler workspace.
//!
//! A dev-dependency only, never published.
//!
//! # Modules
//!
//! - [`platform`]: [`MemoryPlatform`], an in-memory platform with fault injection
//! - [`fixtures`]: desired-state documents modelled on real repositories

pub mod fixtures;
pub mod platform;

pub use platform::{Call, MemoryPlatform, Method, REDACTED};

/// Route `tracing` output through the test harness.
///
/// Honours `RUST_LOG`; safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
