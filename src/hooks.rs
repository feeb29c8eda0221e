//! Filepath: src/hooks.rs
//!
//! Process-wide allocator hooks.
//!
//! Every heap interaction of this crate — object blocks and reference
//! nodes alike — goes through three indirect function pointers resolving
//! to `libc::malloc` / `libc::realloc` / `libc::free` by default. Tests
//! swap them for fault-injecting versions with [`set`] and restore the
//! defaults with [`reset`].
//!
//! The table is guarded by a `parking_lot::Mutex`, but the pointers are
//! copied out before any hook is invoked: a destructor that allocates
//! during teardown re-enters this module without ever re-entering the
//! lock.

use parking_lot::Mutex;

use crate::tracing_helpers::trace_log;

// ============================================================================
//  AllocHooks
// ============================================================================

/// The three allocation entry points the crate calls into.
///
/// All three must behave like their libc namesakes: `malloc` returns null
/// or a block valid for `size` bytes with at least 16-byte alignment;
/// `realloc` preserves contents up to the smaller size and leaves the old
/// block untouched when it fails; `free` accepts any block previously
/// returned by the other two.
#[derive(Clone, Copy, Debug)]
pub struct AllocHooks {
    /// `malloc` equivalent.
    pub malloc: unsafe fn(usize) -> *mut u8,

    /// `realloc` equivalent.
    pub realloc: unsafe fn(*mut u8, usize) -> *mut u8,

    /// `free` equivalent.
    pub free: unsafe fn(*mut u8),
}

impl AllocHooks {
    /// The default table: libc malloc/realloc/free.
    pub const SYSTEM: Self = Self {
        malloc: sys_malloc,
        realloc: sys_realloc,
        free: sys_free,
    };
}

unsafe fn sys_malloc(size: usize) -> *mut u8 {
    // SAFETY: malloc is safe to call with any size; null is handled by
    // every caller in this crate.
    unsafe { libc::malloc(size).cast::<u8>() }
}

unsafe fn sys_realloc(ptr: *mut u8, size: usize) -> *mut u8 {
    // SAFETY: caller guarantees ptr came from this table's malloc/realloc.
    unsafe { libc::realloc(ptr.cast::<libc::c_void>(), size).cast::<u8>() }
}

unsafe fn sys_free(ptr: *mut u8) {
    // SAFETY: caller guarantees ptr came from this table's malloc/realloc.
    unsafe { libc::free(ptr.cast::<libc::c_void>()) }
}

// ============================================================================
//  Process-Wide Table
// ============================================================================

static HOOKS: Mutex<AllocHooks> = Mutex::new(AllocHooks::SYSTEM);

/// Install a replacement hook table.
///
/// # Safety
///
/// No allocation made through the previous table may still be live: every
/// block is eventually released through whatever `free` hook is installed
/// at that moment, and mismatched malloc/free pairs are undefined
/// behavior. In practice only tests call this, before their first
/// allocation, serialized against other hook-swapping tests.
pub unsafe fn set(hooks: AllocHooks) {
    trace_log!("allocator hooks replaced");
    *HOOKS.lock() = hooks;
}

/// Restore the libc table.
///
/// # Safety
///
/// Same contract as [`set`].
pub unsafe fn reset() {
    // SAFETY: forwarded caller contract.
    unsafe { set(AllocHooks::SYSTEM) };
}

/// The currently installed table.
#[must_use]
pub fn current() -> AllocHooks {
    *HOOKS.lock()
}

// ============================================================================
//  Crate-Internal Entry Points
// ============================================================================

/// Allocate `size` bytes through the malloc hook. Null on exhaustion.
#[inline]
#[must_use]
pub(crate) fn allocate(size: usize) -> *mut u8 {
    let malloc = HOOKS.lock().malloc;

    // SAFETY: a conforming malloc hook accepts any size. The lock is
    // released before the call, so hooks may allocate reentrantly.
    unsafe { malloc(size) }
}

/// Resize `block` through the realloc hook. Null on exhaustion, in which
/// case `block` is untouched and still owned by the caller.
///
/// # Safety
///
/// `block` must have come from [`allocate`] or a previous [`reallocate`]
/// under the same hook table.
#[inline]
#[must_use]
pub(crate) unsafe fn reallocate(block: *mut u8, size: usize) -> *mut u8 {
    let realloc = HOOKS.lock().realloc;

    // SAFETY: caller guarantees block provenance; hook contract covers
    // the rest.
    unsafe { realloc(block, size) }
}

/// Release `block` through the free hook.
///
/// # Safety
///
/// `block` must have come from [`allocate`]/[`reallocate`] under the same
/// hook table and must not be used afterwards.
#[inline]
pub(crate) unsafe fn release(block: *mut u8) {
    let free = HOOKS.lock().free;

    // SAFETY: caller guarantees block provenance.
    unsafe { free(block) };
}

/// Usable size of `block` as reported by the system allocator.
///
/// This intentionally queries libc rather than the hook table: the hooks
/// default to libc, and fault-injecting hooks delegate to libc for the
/// blocks they do hand out.
///
/// # Safety
///
/// `block` must be a live block obtained from [`allocate`]/[`reallocate`].
#[inline]
#[must_use]
pub(crate) unsafe fn block_usable_size(block: *const u8) -> usize {
    // SAFETY: caller guarantees block is a live libc-backed allocation.
    unsafe { libc::malloc_usable_size(block.cast_mut().cast::<libc::c_void>()) }
}

// ============================================================================
//  Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_system_roundtrip() {
        let block = allocate(64);
        assert!(!block.is_null());
        unsafe {
            block.write_bytes(0xAB, 64);
            assert!(block_usable_size(block) >= 64);
            release(block);
        }
    }

    static COUNTING_CALLS: AtomicUsize = AtomicUsize::new(0);

    // Hooks installed by these tests stay well-behaved for ordinary
    // sizes: other tests in the process allocate concurrently and must
    // not observe injected faults. Only requests past this threshold
    // (which nothing but these tests issues) misbehave.
    const FAULT_THRESHOLD: usize = 1 << 20;

    unsafe fn counting_malloc(size: usize) -> *mut u8 {
        if size > FAULT_THRESHOLD {
            COUNTING_CALLS.fetch_add(1, Ordering::Relaxed);
        }
        // SAFETY: delegating to libc with the caller's size.
        unsafe { libc::malloc(size).cast::<u8>() }
    }

    #[test]
    #[serial(hooks)]
    fn test_swapped_hooks_are_used_and_restored() {
        COUNTING_CALLS.store(0, Ordering::Relaxed);

        unsafe {
            set(AllocHooks {
                malloc: counting_malloc,
                ..AllocHooks::SYSTEM
            });
        }

        let block = allocate(FAULT_THRESHOLD + 1);
        assert!(!block.is_null());
        assert_eq!(COUNTING_CALLS.load(Ordering::Relaxed), 1);
        unsafe {
            release(block);
            reset();
        }

        let block = allocate(FAULT_THRESHOLD + 1);
        assert!(!block.is_null());
        // Back on libc: the counter does not move.
        assert_eq!(COUNTING_CALLS.load(Ordering::Relaxed), 1);
        unsafe { release(block) };
    }

    unsafe fn capped_malloc(size: usize) -> *mut u8 {
        if size > FAULT_THRESHOLD {
            return core::ptr::null_mut();
        }
        // SAFETY: delegating to libc with the caller's size.
        unsafe { libc::malloc(size).cast::<u8>() }
    }

    #[test]
    #[serial(hooks)]
    fn test_failing_malloc_propagates_null() {
        unsafe {
            set(AllocHooks {
                malloc: capped_malloc,
                ..AllocHooks::SYSTEM
            });
        }
        assert!(allocate(FAULT_THRESHOLD + 1).is_null());

        let small = allocate(16);
        assert!(!small.is_null(), "sizes under the threshold still succeed");
        unsafe {
            release(small);
            reset();
        }
    }
}
