//! Filepath: src/object.rs
//!
//! Public operation surface.
//!
//! Handles are payload addresses (`*mut u8`); the bookkeeping header
//! lives at a fixed negative offset (see [`crate::context`]). Operations
//! are synchronous and single-threaded by contract: nothing here locks
//! the graph, and concurrent mutation of the same graph from several
//! threads is undefined behavior.
//!
//! # Lifetime model
//!
//! An object stays alive while it has at least one parent reference.
//! [`free`] disposes unconditionally; [`discard`] only when unreferenced;
//! [`unref`] drops a single edge and disposes on last-parent loss.
//! Disposal runs the destructor (if any) and then cascades down the
//! children, finalizing every descendant that loses its final parent,
//! depth-first in insertion order.

use core::ptr;

use crate::context::{self, Context, HEADER_SIZE, PAYLOAD_ALIGN, ctx_of, payload_of};
use crate::hooks;
use crate::list;
use crate::reference::{self, Reference};
use crate::tracing_helpers::trace_log;

// ============================================================================
//  Allocation
// ============================================================================

/// Allocate an object of `size` payload bytes.
///
/// With a non-null `parent`, the new object starts life holding one
/// reference from that parent and dies when its last parent reference is
/// dropped. With a null `parent` the object is a root and lives until
/// [`free`] or [`discard`].
///
/// Size zero is legal: the object has a zero-byte payload but is a
/// normal graph node. Returns null when the malloc hook fails (or the
/// total block size overflows); no edge is created and no partial state
/// remains.
///
/// # Safety
///
/// `parent` must be null or a live handle from this allocator.
pub unsafe fn alloc(parent: *const u8, size: usize) -> *mut u8 {
    let Some(total) = HEADER_SIZE.checked_add(size) else {
        return ptr::null_mut();
    };

    let block = hooks::allocate(total);
    if block.is_null() {
        return ptr::null_mut();
    }

    let ctx = block.cast::<Context>();

    // SAFETY: block is a fresh allocation of at least HEADER_SIZE bytes
    // with malloc alignment; fields are initialized in place before any
    // other code can observe them.
    unsafe {
        list::init(&raw mut (*ctx).parents);
        list::init(&raw mut (*ctx).children);
        (&raw mut (*ctx).destructor).write(None);

        if !parent.is_null() {
            reference::create(ctx_of(parent), ctx);
        }

        let handle = payload_of(ctx);
        trace_log!(handle = ?handle, size, parented = !parent.is_null(), "allocated");
        handle
    }
}

/// Resize an object to `size` payload bytes, preserving its references,
/// destructor, and contents up to the smaller of the two sizes.
///
/// A null `handle` behaves as [`alloc`]`(parent, size)`; otherwise
/// `parent` is ignored. Returns null when the realloc hook fails, in
/// which case the object is untouched: contents, references and
/// destructor all remain valid at the old address.
///
/// On success the handle may move. Every reference node connected to the
/// object keeps its position in both lists; only its back-pointer to the
/// moved header is rewritten.
///
/// # Safety
///
/// `handle` must be null or a live handle; `parent` must be null or a
/// live handle. Old handles to a moved object are dangling after success.
pub unsafe fn realloc(handle: *mut u8, parent: *const u8, size: usize) -> *mut u8 {
    if handle.is_null() {
        // SAFETY: forwarded caller contract.
        return unsafe { alloc(parent, size) };
    }

    let Some(total) = HEADER_SIZE.checked_add(size) else {
        return ptr::null_mut();
    };

    // SAFETY: handle is live per caller contract.
    let old_ctx = unsafe { ctx_of(handle) };

    // The block carries two list heads whose neighbors point back into
    // it; moving it would invalidate those back-pointers. Snapshot the
    // first entry of each ring (the heads' own pointers survive the move
    // as valid copies), then re-splice the moved head before its
    // snapshot, which patches the ring writing only through valid
    // pointers. Empty rings are simply re-initialized.
    //
    // SAFETY: old_ctx is live; its list heads are initialized.
    let (first_parent, first_child) = unsafe {
        (
            list::first(&raw mut (*old_ctx).parents),
            list::first(&raw mut (*old_ctx).children),
        )
    };

    // SAFETY: the block came from the hooks; on failure it is untouched
    // and still live, so returning null leaves every byte of observable
    // state intact.
    let block = unsafe { hooks::reallocate(old_ctx.cast::<u8>(), total) };
    if block.is_null() {
        return ptr::null_mut();
    }

    let ctx = block.cast::<Context>();

    // SAFETY: ctx is the (possibly moved) live block. When the address
    // is unchanged the re-splice is a harmless self-repair; list::add
    // never reads the stale back-pointers either way.
    unsafe {
        match first_parent {
            Some(snapshot) => list::add(&raw mut (*ctx).parents, snapshot),
            None => list::init(&raw mut (*ctx).parents),
        }
        match first_child {
            Some(snapshot) => list::add(&raw mut (*ctx).children, snapshot),
            None => list::init(&raw mut (*ctx).children),
        }

        // Rings are whole again; now point every edge at the new header.
        let mut parents = list::Cursor::new(&raw mut (*ctx).parents);
        while let Some(node) = parents.next() {
            (*Reference::from_parents_entry(node)).child = ctx;
        }
        let mut children = list::Cursor::new(&raw mut (*ctx).children);
        while let Some(node) = children.next() {
            (*Reference::from_children_entry(node)).parent = ctx;
        }

        let new_handle = payload_of(ctx);
        trace_log!(old = ?handle, new = ?new_handle, size, "reallocated");
        new_handle
    }
}

// ============================================================================
//  Disposal
// ============================================================================

/// Unconditionally dispose of an object, regardless of parent references.
///
/// All parent references are severed first (without freeing the parents),
/// then the destructor runs, then children are unreferenced — cascading
/// disposal to any child that loses its last parent. Callers holding
/// pointers to the object elsewhere must reset them; when unsure whether
/// references exist, use [`discard`] or [`unref`] instead.
///
/// Returns the destructor's status, or 0.
///
/// # Safety
///
/// `handle` must be a live handle from this allocator; it is dangling
/// after the call. Must not be called on the object whose destructor is
/// currently running.
pub unsafe fn free(handle: *mut u8) -> i32 {
    assert!(!handle.is_null(), "free: null handle");

    // SAFETY: handle is live per caller contract.
    unsafe { context::teardown(ctx_of(handle)) }
}

/// Dispose of an object only if nothing references it.
///
/// The counterpart of [`free`] for locally-allocated roots that may have
/// been adopted by a callee: if the object acquired a parent reference,
/// this is a no-op returning 0; otherwise it disposes exactly like
/// [`free`].
///
/// # Safety
///
/// `handle` must be a live handle. It is dangling after the call iff the
/// object had no parents.
pub unsafe fn discard(handle: *mut u8) -> i32 {
    assert!(!handle.is_null(), "discard: null handle");

    // SAFETY: handle is live per caller contract.
    unsafe {
        let ctx = ctx_of(handle);
        if list::is_empty(&raw const (*ctx).parents) {
            context::teardown(ctx)
        } else {
            0
        }
    }
}

/// Drop one reference from `parent` to the object; if it was the last,
/// the object is disposed (its destructor status is discarded — there is
/// no channel for it on this path).
///
/// With duplicate edges, exactly one is removed per call, oldest first.
/// A reference that does not exist is a fatal programmer error.
///
/// # Safety
///
/// Both handles must be live. `handle` is dangling after the call iff
/// the removed edge was the object's last parent.
pub unsafe fn unref(handle: *mut u8, parent: *const u8) {
    assert!(!handle.is_null(), "unref: null handle");
    assert!(!parent.is_null(), "unref: null parent");

    // SAFETY: both handles are live per caller contract.
    unsafe {
        let Some(r) = reference::lookup(ctx_of(parent), ctx_of(handle)) else {
            panic!("unref: no reference from {parent:p} to {handle:p}");
        };

        reference::sever(r, true);
    }
}

// ============================================================================
//  References
// ============================================================================

/// Add a reference from `parent` to the object, keeping it alive until
/// every reference is dropped.
///
/// References accumulate: calling this twice with the same parent creates
/// two edges, each needing its own [`unref`]. Taking a reference is the
/// cheap alternative to copying an object a callee wants to keep.
///
/// # Safety
///
/// Both handles must be live.
pub unsafe fn add_ref(handle: *mut u8, parent: *const u8) {
    assert!(!handle.is_null(), "add_ref: null handle");
    assert!(!parent.is_null(), "add_ref: null parent");

    // SAFETY: both handles are live per caller contract.
    unsafe {
        reference::create(ctx_of(parent), ctx_of(handle));
    }
}

/// Query parenthood. A null `parent` asks whether the object has *any*
/// parent; a non-null `parent` asks whether an edge from that specific
/// parent exists.
///
/// # Safety
///
/// `handle` must be live; `parent` must be null or live.
#[must_use]
pub unsafe fn has_parent(handle: *const u8, parent: *const u8) -> bool {
    assert!(!handle.is_null(), "has_parent: null handle");

    // SAFETY: handles are live per caller contract.
    unsafe {
        let ctx = ctx_of(handle);
        if parent.is_null() {
            !list::is_empty(&raw const (*ctx).parents)
        } else {
            reference::lookup(ctx_of(parent), ctx).is_some()
        }
    }
}

// ============================================================================
//  Destructor Installation
// ============================================================================

/// Install (or replace) the object's destructor.
///
/// The destructor runs at most once, immediately before the object's
/// memory is released — whether through [`free`], [`discard`], or a
/// last-parent [`unref`]. It receives the payload handle with all parent
/// references already severed and the children list intact; children are
/// unreferenced automatically afterwards, so a destructor never needs to
/// free them. Its status is returned by `free`/`discard` and dropped on
/// the `unref` path, so treat non-zero as informational.
///
/// Replacing an existing destructor drops the previous callable.
///
/// # Safety
///
/// `handle` must be live.
pub unsafe fn set_destructor<F>(handle: *mut u8, destructor: F)
where
    F: FnMut(*mut u8) -> i32 + 'static,
{
    assert!(!handle.is_null(), "set_destructor: null handle");

    // SAFETY: handle is live per caller contract.
    unsafe {
        (*ctx_of(handle)).destructor = Some(Box::new(destructor));
    }
}

/// Remove the object's destructor, dropping the callable.
///
/// # Safety
///
/// `handle` must be live.
pub unsafe fn clear_destructor(handle: *mut u8) {
    assert!(!handle.is_null(), "clear_destructor: null handle");

    // SAFETY: handle is live per caller contract.
    unsafe {
        (*ctx_of(handle)).destructor = None;
    }
}

// ============================================================================
//  Size Query
// ============================================================================

/// Usable payload capacity of an object, which may exceed the size
/// originally requested (the allocator reports the block's real usable
/// size, minus the header).
///
/// # Safety
///
/// `handle` must be live.
#[must_use]
pub unsafe fn usable_size(handle: *const u8) -> usize {
    assert!(!handle.is_null(), "usable_size: null handle");

    // SAFETY: handle is live, so its block is a live hook allocation.
    unsafe { hooks::block_usable_size(ctx_of(handle).cast_const().cast::<u8>()) - HEADER_SIZE }
}

// ============================================================================
//  Typed Allocation
// ============================================================================

/// Allocate an object holding a `T`, moving `value` into the payload.
///
/// When `T` needs drop, a destructor dropping the payload in place is
/// installed (status 0); replacing it with [`set_destructor`] transfers
/// that responsibility to the new destructor. Returns null on allocation
/// failure, in which case `value` is dropped normally.
///
/// # Safety
///
/// `parent` must be null or a live handle.
pub unsafe fn new_value<T: 'static>(parent: *const u8, value: T) -> *mut T {
    const {
        assert!(
            align_of::<T>() <= PAYLOAD_ALIGN,
            "payload type over-aligned for the allocation header"
        );
    }

    // SAFETY: forwarded caller contract.
    let handle = unsafe { alloc(parent, size_of::<T>()) };
    if handle.is_null() {
        return ptr::null_mut();
    }

    let typed = handle.cast::<T>();

    // SAFETY: the payload is at least size_of::<T>() bytes, suitably
    // aligned per the const assertion, and uninitialized.
    unsafe { typed.write(value) };

    if core::mem::needs_drop::<T>() {
        // SAFETY: handle is live; the destructor runs exactly once, while
        // the payload is still initialized.
        unsafe {
            set_destructor(handle, |payload: *mut u8| {
                // SAFETY: installed only by new_value, so the payload
                // holds a valid T until this (single) invocation.
                unsafe { payload.cast::<T>().drop_in_place() };
                0
            });
        }
    }

    typed
}

// ============================================================================
//  Scoped Guard
// ============================================================================

/// Dispose-on-scope-exit guard for locally-allocated roots.
///
/// Wraps a handle and performs a [`discard`] when dropped: the local is
/// auto-released on scope exit *unless* some callee took a parent
/// reference to it during the scope, in which case the discard is a
/// no-op and ownership rests with the referencing parents.
///
/// ```ignore
/// let local = unsafe { Scoped::new(alloc(ptr::null(), 64)) };
/// fill(local.get());
/// maybe_adopt(local.get());   // may add_ref; then the object outlives us
/// // dropped here: discarded iff still unreferenced
/// ```
#[derive(Debug)]
#[must_use = "dropping immediately discards the object"]
pub struct Scoped {
    handle: *mut u8,
}

impl Scoped {
    /// Guard `handle`. A null handle is legal and makes the guard inert
    /// (mirroring a never-assigned local).
    ///
    /// # Safety
    ///
    /// `handle` must be null or a live handle this guard may discard, and
    /// nothing else may dispose of it while the guard lives.
    #[inline(always)]
    pub unsafe fn new(handle: *mut u8) -> Self {
        Self { handle }
    }

    /// The guarded handle.
    #[inline(always)]
    #[must_use]
    pub fn get(&self) -> *mut u8 {
        self.handle
    }

    /// Defuse the guard and hand the handle back to the caller.
    #[inline]
    #[must_use]
    pub fn release(mut self) -> *mut u8 {
        core::mem::replace(&mut self.handle, ptr::null_mut())
    }
}

impl Drop for Scoped {
    fn drop(&mut self) {
        if !self.handle.is_null() {
            // SAFETY: Scoped::new's contract makes the handle live and
            // exclusively ours to discard.
            unsafe { discard(self.handle) };
        }
    }
}

// ============================================================================
//  Tests
// ============================================================================
