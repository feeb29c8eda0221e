//! Filepath: src/context.rs
//!
//! Per-object bookkeeping header and the teardown sequence.
//!
//! Every allocation is one contiguous heap block: a [`Context`] header
//! followed immediately by the caller's payload. The public handle is the
//! payload address; the header sits at a fixed negative offset from it.
//!
//! # Memory Layout
//!
//! ```text
//! Block (one malloc-hook call):
//! ┌────────────────────────────────────────────┬──────────────────┐
//! │ Context (48 bytes, align 16)               │ payload (size)   │
//! │ ┌─────────┬──────────┬───────────────────┐ │                  │
//! │ │ parents │ children │ destructor        │ │ ← handle points  │
//! │ │ListHead │ ListHead │ Option<Destructor>│ │   here           │
//! │ └─────────┴──────────┴───────────────────┘ │                  │
//! └────────────────────────────────────────────┴──────────────────┘
//! ```
//!
//! The header size is a multiple of 16, so the payload keeps malloc's
//! maximum fundamental alignment.

use crate::hooks;
use crate::list::{self, ListHead};
use crate::reference::{self, Reference};
use crate::tracing_helpers::trace_log;

// ============================================================================
//  Destructor
// ============================================================================

/// Caller-supplied finalizer: receives the payload handle, returns an
/// integer status. Invoked at most once, during teardown, after all
/// parent references are gone and while the children list is intact.
pub type Destructor = Box<dyn FnMut(*mut u8) -> i32>;

// ============================================================================
//  Context
// ============================================================================

/// Bookkeeping header preceding every allocation's payload.
///
/// `parents` holds the [`Reference`] nodes in which this context is the
/// child side; `children` those in which it is the parent side. Both
/// lists are insertion-ordered, which fixes the (observable) destructor
/// order of a cascading teardown.
#[repr(C, align(16))]
pub(crate) struct Context {
    /// Inbound references (this object is the child).
    pub(crate) parents: ListHead,

    /// Outbound references (this object is the parent).
    pub(crate) children: ListHead,

    /// Optional finalizer, run once during teardown.
    pub(crate) destructor: Option<Destructor>,
}

/// Byte offset from a context to its payload (and back).
pub(crate) const HEADER_SIZE: usize = size_of::<Context>();

/// Alignment guaranteed for every payload.
pub(crate) const PAYLOAD_ALIGN: usize = align_of::<Context>();

// The payload must keep malloc's maximum fundamental alignment, so the
// header size has to be a multiple of it.
const _: () = assert!(align_of::<Context>() == 16);
const _: () = assert!(size_of::<Context>() % 16 == 0);

// ============================================================================
//  Handle Conversion
// ============================================================================

/// Context header of a payload handle.
///
/// # Safety
///
/// `handle` must be a payload pointer previously returned by this
/// allocator and still live.
#[inline(always)]
#[must_use]
pub(crate) unsafe fn ctx_of(handle: *const u8) -> *mut Context {
    // SAFETY: handles are created at exactly HEADER_SIZE past their
    // context, which is 16-aligned; caller guarantees provenance.
    unsafe { handle.cast_mut().cast::<Context>().sub(1) }
}

/// Payload handle of a context header.
///
/// # Safety
///
/// `ctx` must point to a live context allocated by this crate.
#[inline(always)]
#[must_use]
pub(crate) unsafe fn payload_of(ctx: *mut Context) -> *mut u8 {
    // SAFETY: the payload begins immediately after the header within the
    // same block.
    unsafe { ctx.add(1).cast::<u8>() }
}

// ============================================================================
//  Teardown
// ============================================================================

/// Dispose of a context: the shared path behind `free`, `discard` and the
/// last-parent case of `unref`.
///
/// Sequence (order is observable and load-bearing):
///
/// 1. Sever all parent references *without* recursion. The destructor
///    always sees an unrooted object, and any reference cycle through
///    this context is broken here.
/// 2. Take and run the destructor, capturing its status.
/// 3. Sever all child references *with* recursion: a child left with an
///    empty parents list is torn down in turn, depth-first, in
///    children-list insertion order. The removal-safe cursor makes this
///    sound even when a child's destructor detaches its own references:
///    each sibling is still held by this context's own edge until the
///    loop reaches it.
/// 4. Release the block.
///
/// Returns the destructor status, or 0 when none was set.
///
/// # Safety
///
/// `ctx` must be a live context. It must not be the context whose
/// destructor is currently executing.
pub(crate) unsafe fn teardown(ctx: *mut Context) -> i32 {
    trace_log!(ctx = ?ctx, "teardown begin");

    // SAFETY: ctx is live per caller contract; list heads are initialized
    // at allocation and every node yielded is a live Reference entry.
    unsafe {
        let mut parents = list::Cursor::new(&raw mut (*ctx).parents);
        while let Some(node) = parents.next() {
            let r: *mut Reference = Reference::from_parents_entry(node);
            reference::sever(r, false);
        }
    }

    // Taking the destructor out both enforces at-most-once invocation and
    // drops the callable before the block is released.
    // SAFETY: parents are severed; ctx itself is still fully live.
    let taken = unsafe { (*ctx).destructor.take() };
    let mut status = 0;
    if let Some(mut destructor) = taken {
        // SAFETY: payload is live until step 4.
        status = destructor(unsafe { payload_of(ctx) });
        trace_log!(ctx = ?ctx, status, "destructor returned");
    }

    // SAFETY: as above; recursion only ever descends into children that
    // just lost their final parent, which cannot include ctx (its parents
    // list is already empty and no new edge to it can appear mid-loop
    // without a live handle, which the contract forbids inside its own
    // destructor).
    unsafe {
        let mut children = list::Cursor::new(&raw mut (*ctx).children);
        while let Some(node) = children.next() {
            let r: *mut Reference = Reference::from_children_entry(node);
            reference::sever(r, true);
        }
    }

    // SAFETY: every reference touching ctx is gone; nothing can reach the
    // block after this point.
    unsafe { hooks::release(ctx.cast::<u8>()) };

    trace_log!(ctx = ?ctx, status, "teardown complete");
    status
}

// ============================================================================
//  Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        assert_eq!(HEADER_SIZE % PAYLOAD_ALIGN, 0);
        assert_eq!(PAYLOAD_ALIGN, 16);
        // Two list heads plus the boxed-destructor slot.
        assert!(HEADER_SIZE >= 2 * size_of::<ListHead>() + size_of::<Option<Destructor>>());
    }

    #[test]
    fn test_handle_conversion_roundtrip() {
        let handle = unsafe { crate::alloc(core::ptr::null(), 24) };
        assert!(!handle.is_null());
        unsafe {
            let ctx = ctx_of(handle);
            assert_eq!(payload_of(ctx), handle);
            assert_eq!(ctx.cast::<u8>().add(HEADER_SIZE), handle);
            assert_eq!(handle as usize % PAYLOAD_ALIGN, 0);
            crate::free(handle);
        }
    }
}
