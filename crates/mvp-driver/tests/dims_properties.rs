//! Property-based tests for the dimension algebra and the accumulation
//! factorizer.
//!
//! Uses proptest to verify invariants that must hold for all inputs:
//! - flatten/split round-trip restores the original axis description
//! - hardware dimension assignment respects every resource bound
//! - factorization is correct when it succeeds and only fails when no
//!   small-prime factorization fits

use proptest::prelude::*;

use mvp_driver::dims::IterationSpace;
use mvp_driver::factorize;
use mvp_chip::limits::{MAX_DIM_COUNT, MAX_DIM_STRIDE, NUM_ARRAY_DIMS};

// ═══════════════════════════════════════════════════════════════════════
// 1. Flatten/split round-trip
// ═══════════════════════════════════════════════════════════════════════

proptest! {
    /// For nesting strides with a nonnegative remainder, splitting by
    /// the original outer size after flattening restores every field.
    #[test]
    fn prop_flatten_split_roundtrip(
        inner_stride in 1usize..64,
        inner_size in 1u32..24,
        extra in 0u32..12,
        outer_size in 1u32..24,
    ) {
        let outer_stride = inner_stride * (inner_size + extra) as usize;

        let mut s = IterationSpace::<2>::new();
        s.set(0usize, 0, outer_size, outer_stride);
        s.set(1usize, 0, inner_size, inner_stride);

        s.flatten_into(0usize, 1usize).unwrap();
        prop_assert_eq!(s.extra(0usize), extra);
        prop_assert_eq!(s.axis(1usize).size, (inner_size + extra) * outer_size);

        s.split_from(1usize, 0usize, outer_size).unwrap();
        prop_assert_eq!(s.axis(0usize).size, outer_size);
        prop_assert_eq!(s.axis(0usize).stride, outer_stride);
        prop_assert_eq!(s.axis(1usize).size, inner_size);
        prop_assert_eq!(s.axis(1usize).stride, inner_stride);
        prop_assert_eq!(s.extra(0usize), 0);
    }

    /// Strides that do not nest exactly are rejected.
    #[test]
    fn prop_flatten_rejects_non_multiples(
        inner_stride in 2usize..64,
        inner_size in 1u32..24,
        misalign in 1usize..8,
    ) {
        let outer_stride = inner_stride * (inner_size as usize + 2) + (misalign % inner_stride);
        prop_assume!(outer_stride % inner_stride != 0);

        let mut s = IterationSpace::<2>::new();
        s.set(0usize, 0, 4, outer_stride);
        s.set(1usize, 0, inner_size, inner_stride);
        prop_assert!(s.flatten_into(0usize, 1usize).is_err());
    }
}

// ═══════════════════════════════════════════════════════════════════════
// 2. Hardware dimension budget
// ═══════════════════════════════════════════════════════════════════════

proptest! {
    /// Whenever assignment succeeds, every active axis got a distinct
    /// dimension within bounds; whenever more than three axes are
    /// active, assignment fails.
    #[test]
    fn prop_assignment_respects_budget(
        sizes in prop::collection::vec(1u32..2000, 6),
        strides in prop::collection::vec(0usize..4000, 6),
    ) {
        let mut s = IterationSpace::<6>::new();
        for i in 0..6 {
            s.set(i, 0, sizes[i], strides[i]);
        }
        let active = s.num_active();
        match s.assign_hw_dims() {
            Ok(()) => {
                prop_assert!(active <= NUM_ARRAY_DIMS);
                let mut seen = [false; NUM_ARRAY_DIMS];
                for i in 0..6usize {
                    if s.is_active(i) {
                        let dim = s.hw_dim(i).expect("active axis must be assigned");
                        prop_assert!(!seen[dim.index()], "dimension assigned twice");
                        seen[dim.index()] = true;
                        prop_assert!(s.axis(i).size <= MAX_DIM_COUNT);
                        prop_assert!(s.axis(i).stride <= MAX_DIM_STRIDE as usize);
                    } else {
                        prop_assert!(s.hw_dim(i).is_none());
                    }
                }
            }
            Err(_) => {
                let oversize = (0..6usize).any(|i| {
                    s.is_active(i)
                        && (s.axis(i).size > MAX_DIM_COUNT
                            || s.axis(i).stride > MAX_DIM_STRIDE as usize)
                });
                prop_assert!(
                    active > NUM_ARRAY_DIMS || oversize,
                    "assignment failed without a violated bound"
                );
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// 3. Factorization
// ═══════════════════════════════════════════════════════════════════════

/// Exhaustively search for a divisor of `number` composed only of the
/// kernel's small primes, with both cofactors within `max_factor`.
fn small_prime_factorization_exists(number: u32, max_factor: u32) -> bool {
    const PRIMES: [u32; 11] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31];
    fn search(number: u32, d: u32, max_factor: u32, from: usize) -> bool {
        if d <= max_factor && number / d <= max_factor {
            return true;
        }
        if d > max_factor {
            return false;
        }
        for (i, &p) in PRIMES.iter().enumerate().skip(from) {
            if (number / d) % p == 0 && search(number, d * p, max_factor, i) {
                return true;
            }
        }
        false
    }
    search(number, 1, max_factor, 0)
}

proptest! {
    /// On success the factors multiply back and respect the bound; on
    /// failure no small-prime factorization within the bound exists.
    #[test]
    fn prop_factorize_correct(number in 1u32..1_000_000) {
        match factorize(number, 1024) {
            Some((n, m)) => {
                prop_assert_eq!(n * m, number);
                prop_assert!(n <= 1024 && m <= 1024);
            }
            None => {
                prop_assert!(
                    !small_prime_factorization_exists(number, 1024),
                    "factorize failed but a factorization exists for {}",
                    number
                );
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// 4. Directed cases from the kernel paths
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn factorize_paired_large_input_case() {
    // accum_depth 3000 with paired lanes reduces 1500 pair units.
    let (n, m) = factorize(1500, 1024).expect("1500 must factorize");
    assert_eq!(n * m, 1500);
    assert!(n <= 1024 && m <= 1024);
}

#[test]
fn flat_offset_tracks_host_axes() {
    let mut s = IterationSpace::<3>::new();
    s.set(0usize, 0, 1, 640); // batch, host
    s.set(1usize, 0, 1, 8); // row origin, host
    s.set(2usize, 0, 5, 1);
    s.set_offset(0usize, 2);
    s.set_offset(1usize, 7);
    assert_eq!(s.flat_offset(), 2 * 640 + 7 * 8);
}
