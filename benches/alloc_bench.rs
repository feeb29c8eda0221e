//! Allocation-graph benchmarks.
//!
//! # Usage
//!
//! ```bash
//! # Run everything
//! cargo bench --bench alloc_bench
//!
//! # Only the teardown shapes
//! cargo bench --bench alloc_bench -- teardown
//! ```

use std::hint::black_box;
use std::ptr;

use divan::Bencher;
use kinalloc::{add_ref, alloc, free, realloc, set_destructor, unref};

fn main() {
    kinalloc::init_tracing();

    divan::main();
}

// =============================================================================
// Configuration
// =============================================================================

/// Payload size for individual objects.
const PAYLOAD: usize = 64;

/// Depth of the parent-chain teardown shape.
const CHAIN_DEPTH: usize = 1_000;

/// Fan-out of the wide teardown shape.
const FAN_OUT: usize = 1_000;

// =============================================================================
// Allocation
// =============================================================================

#[divan::bench]
fn alloc_free_pair(bencher: Bencher) {
    bencher.bench(|| unsafe {
        let o = alloc(ptr::null(), black_box(PAYLOAD));
        free(o)
    });
}

#[divan::bench]
fn alloc_free_pair_with_destructor(bencher: Bencher) {
    bencher.bench(|| unsafe {
        let o = alloc(ptr::null(), black_box(PAYLOAD));
        set_destructor(o, |_| 0);
        free(o)
    });
}

#[divan::bench]
fn ref_unref_churn(bencher: Bencher) {
    let parent = unsafe { alloc(ptr::null(), PAYLOAD) };
    let other = unsafe { alloc(ptr::null(), PAYLOAD) };
    let child = unsafe { alloc(parent, PAYLOAD) };

    bencher.bench(|| unsafe {
        add_ref(black_box(child), other);
        unref(child, other);
    });

    unsafe {
        free(parent);
        free(other);
    }
}

// =============================================================================
// Teardown
// =============================================================================

#[divan::bench]
fn teardown_deep_chain(bencher: Bencher) {
    bencher.bench(|| unsafe {
        let root = alloc(ptr::null(), PAYLOAD);
        let mut cur = root;
        for _ in 0..CHAIN_DEPTH {
            cur = alloc(cur, PAYLOAD);
        }
        free(black_box(root))
    });
}

#[divan::bench]
fn teardown_wide_fanout(bencher: Bencher) {
    bencher.bench(|| unsafe {
        let root = alloc(ptr::null(), PAYLOAD);
        for _ in 0..FAN_OUT {
            let _ = alloc(root, PAYLOAD);
        }
        free(black_box(root))
    });
}

// =============================================================================
// Reallocation
// =============================================================================

#[divan::bench(args = [0, 4, 64])]
fn realloc_growth_with_edges(bencher: Bencher, children: usize) {
    bencher.bench(|| unsafe {
        let mut o = alloc(ptr::null(), 16);
        for _ in 0..children {
            let _ = alloc(o, 8);
        }

        for size in [64, 512, 4096, 65_536] {
            o = realloc(o, ptr::null(), black_box(size));
        }

        free(o)
    });
}
