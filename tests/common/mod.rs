//! Common test utilities: shared tracing setup.
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//!
//! #[test]
//! fn my_test() {
//!     common::init_tracing();
//!     // ... test body with tracing::debug!, etc.
//! }
//! ```
//!
//! Filtering comes from `RUST_LOG` (e.g. `kinalloc=trace` to watch every
//! allocation and teardown step when the crate is built with the
//! `tracing` feature).

#![allow(dead_code)]

use std::sync::Once;

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Ensures the subscriber is only installed once across all tests.
static INIT: Once = Once::new();

/// Install a console subscriber honoring `RUST_LOG`.
///
/// Safe to call from every test; only the first call takes effect.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("{}", Level::INFO)));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_line_number(true)
            .compact()
            .try_init();
    });
}
