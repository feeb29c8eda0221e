//! Filepath: src/reference.rs
//!
//! Parent→child edge nodes.
//!
//! A [`Reference`] is a standalone heap node shared by exactly one parent
//! context and one child context: it sits in the parent's `children` list
//! through `children_entry` and in the child's `parents` list through
//! `parents_entry`. Being its own block (not part of either endpoint),
//! a reference survives reallocation of both endpoints; only its
//! back-pointers need rewriting when an endpoint moves.
//!
//! Duplicate edges between the same (parent, child) pair are legal and
//! accumulate; each `unref` removes one.

use core::mem::offset_of;

use crate::context::{self, Context};
use crate::hooks;
use crate::list::{self, ListHead};
use crate::tracing_helpers::{error_log, trace_log};

// ============================================================================
//  Reference
// ============================================================================

/// One directed edge of the allocation graph.
#[repr(C)]
pub(crate) struct Reference {
    /// Membership in the parent's children list.
    pub(crate) children_entry: ListHead,

    /// Membership in the child's parents list.
    pub(crate) parents_entry: ListHead,

    /// Parent endpoint. Rewritten only by realloc fixup.
    pub(crate) parent: *mut Context,

    /// Child endpoint. Rewritten only by realloc fixup.
    pub(crate) child: *mut Context,
}

impl Reference {
    /// Recover a reference from its `parents_entry` node.
    ///
    /// # Safety
    ///
    /// `node` must be the `parents_entry` of a live reference.
    #[inline(always)]
    #[must_use]
    pub(crate) unsafe fn from_parents_entry(node: *mut ListHead) -> *mut Self {
        // SAFETY: forwarded caller contract.
        unsafe { list::container_of(node, offset_of!(Reference, parents_entry)) }
    }

    /// Recover a reference from its `children_entry` node.
    ///
    /// # Safety
    ///
    /// `node` must be the `children_entry` of a live reference.
    #[inline(always)]
    #[must_use]
    pub(crate) unsafe fn from_children_entry(node: *mut ListHead) -> *mut Self {
        // SAFETY: forwarded caller contract.
        unsafe { list::container_of(node, offset_of!(Reference, children_entry)) }
    }
}

// ============================================================================
//  Create / Sever / Lookup
// ============================================================================

/// Create a new edge from `parent` to `child`, appended to both endpoint
/// lists in insertion order.
///
/// The public surface has no way to report failure here (`add_ref`
/// returns nothing, and a parented `alloc` has already committed its own
/// block), so exhaustion of the malloc hook is unrecoverable: the process
/// aborts.
///
/// # Safety
///
/// Both contexts must be live.
pub(crate) unsafe fn create(parent: *mut Context, child: *mut Context) -> *mut Reference {
    debug_assert!(!parent.is_null(), "reference with null parent");
    debug_assert!(!child.is_null(), "reference with null child");

    let block = hooks::allocate(size_of::<Reference>());
    if block.is_null() {
        error_log!("reference node allocation failed, aborting");
        std::process::abort();
    }

    let r = block.cast::<Reference>();

    // SAFETY: block is a fresh allocation large enough for a Reference;
    // caller guarantees both contexts are live.
    unsafe {
        list::init(&raw mut (*r).children_entry);
        list::init(&raw mut (*r).parents_entry);
        (*r).parent = parent;
        (*r).child = child;

        list::add(&raw mut (*r).children_entry, &raw mut (*parent).children);
        list::add(&raw mut (*r).parents_entry, &raw mut (*child).parents);
    }

    trace_log!(parent = ?parent, child = ?child, "reference created");
    r
}

/// Remove an edge: unlink from both endpoint lists and release the node.
///
/// With `recurse` set, a child left without parents is torn down — this is
/// the path by which disposal cascades down the graph. Parent severance
/// during teardown passes `recurse = false`: parents are not owned by the
/// dying object.
///
/// # Safety
///
/// `r` must be a live reference. Its endpoints must be live contexts.
pub(crate) unsafe fn sever(r: *mut Reference, recurse: bool) {
    // SAFETY: r and its endpoints are live per caller contract.
    unsafe {
        trace_log!(parent = ?(*r).parent, child = ?(*r).child, recurse, "reference severed");

        list::remove(&raw mut (*r).children_entry);
        list::remove(&raw mut (*r).parents_entry);

        if recurse && list::is_empty(&raw const (*(*r).child).parents) {
            context::teardown((*r).child);
        }

        hooks::release(r.cast::<u8>());
    }
}

/// Find one edge from `parent` to `child`, scanning the child's parents
/// list in insertion order. `None` when no such edge exists.
///
/// # Safety
///
/// Both contexts must be live.
#[must_use]
pub(crate) unsafe fn lookup(parent: *mut Context, child: *mut Context) -> Option<*mut Reference> {
    // SAFETY: child is live, so its parents ring is a valid list of live
    // reference entries.
    unsafe {
        let mut cur = list::Cursor::new(&raw mut (*child).parents);
        while let Some(node) = cur.next() {
            let r = Reference::from_parents_entry(node);
            if (*r).parent == parent {
                return Some(r);
            }
        }
    }

    None
}

// ============================================================================
//  Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ctx_of;
    use core::ptr;

    #[test]
    fn test_create_links_both_ends() {
        unsafe {
            let parent = crate::alloc(ptr::null(), 8);
            let child = crate::alloc(ptr::null(), 8);
            let (pc, cc) = (ctx_of(parent), ctx_of(child));

            let r = create(pc, cc);
            assert_eq!((*r).parent, pc);
            assert_eq!((*r).child, cc);
            assert!(!list::is_empty(&raw const (*pc).children));
            assert!(!list::is_empty(&raw const (*cc).parents));
            assert_eq!(lookup(pc, cc), Some(r));
            assert_eq!(lookup(cc, pc), None);

            crate::free(child);
            crate::free(parent);
        }
    }

    #[test]
    fn test_duplicate_edges_are_distinct_nodes() {
        unsafe {
            let parent = crate::alloc(ptr::null(), 8);
            let child = crate::alloc(ptr::null(), 8);
            let (pc, cc) = (ctx_of(parent), ctx_of(child));

            let r1 = create(pc, cc);
            let r2 = create(pc, cc);
            assert_ne!(r1, r2);

            // Lookup returns the first (oldest) edge.
            assert_eq!(lookup(pc, cc), Some(r1));

            // Severing one leaves the other, so the child stays parented.
            sever(r1, true);
            assert!(!list::is_empty(&raw const (*cc).parents));
            assert_eq!(lookup(pc, cc), Some(r2));

            crate::free(child);
            crate::free(parent);
        }
    }

    #[test]
    fn test_nonrecursive_sever_leaves_child_alive() {
        unsafe {
            let parent = crate::alloc(ptr::null(), 8);
            let child = crate::alloc(ptr::null(), 8);
            let (pc, cc) = (ctx_of(parent), ctx_of(child));

            let r = create(pc, cc);
            sever(r, false);

            // Child is now a root, still live.
            assert!(list::is_empty(&raw const (*cc).parents));
            assert!(list::is_empty(&raw const (*pc).children));

            crate::free(child);
            crate::free(parent);
        }
    }
}
