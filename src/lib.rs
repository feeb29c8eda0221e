//! # Kinalloc
//!
//! A multi-reference hierarchical allocator.
//!
//! Every allocation is a node in a directed graph of parent/child
//! references. An object stays alive as long as at least one parent
//! references it; dropping the last reference finalizes the object (its
//! destructor runs) and releases its own references, cascading disposal
//! to any child that loses its final parent. Objects may be roots, may
//! be shared by several parents, and may sit on reference cycles —
//! cycles are broken structurally during teardown, not detected at
//! runtime.
//!
//! ## Design
//!
//! Each block carries a bookkeeping header in front of the payload; the
//! public handle is the payload address. References are standalone heap
//! nodes threaded onto two intrusive lists (the parent's children, the
//! child's parents), so reallocating either endpoint never moves an
//! edge. All heap traffic goes through process-wide, swappable allocator
//! hooks for fault-injection testing.
//!
//! ## Contract
//!
//! - Single-threaded: concurrent mutation of the same graph is undefined
//!   behavior. Serialize externally if you must share.
//! - Handles from this allocator must never be mixed with foreign
//!   pointers.
//! - Destructors may allocate and may dispose of other objects, but not
//!   the object currently being destroyed.
//!
//! ## Example
//!
//! ```ignore
//! use core::ptr;
//!
//! unsafe {
//!     let config = kinalloc::alloc(ptr::null(), 64);
//!     let entry = kinalloc::alloc(config, 16);     // child of config
//!     kinalloc::set_destructor(entry, |_| 0);
//!
//!     kinalloc::free(config);                      // finalizes entry too
//! }
//! ```

pub mod hooks;
pub mod object;

pub(crate) mod context;
pub(crate) mod list;
pub(crate) mod reference;
pub(crate) mod tracing_helpers;

pub use context::Destructor;
pub use hooks::AllocHooks;
pub use object::{
    Scoped, add_ref, alloc, clear_destructor, discard, free, has_parent, new_value, realloc,
    set_destructor, unref, usable_size,
};

/// Install a default tracing subscriber reading `RUST_LOG`.
///
/// No-op without the `tracing` feature, so benches and examples can call
/// it unconditionally. Safe to call more than once.
#[cfg(feature = "tracing")]
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// Install a default tracing subscriber reading `RUST_LOG`.
///
/// No-op without the `tracing` feature, so benches and examples can call
/// it unconditionally.
#[cfg(not(feature = "tracing"))]
pub fn init_tracing() {}
