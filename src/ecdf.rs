//! Empirical CDF construction and simplification
//!
//! Shared numeric plumbing for every distribution the model exports:
//!
//! - **Kahan compensated summation**: both the CDF accumulation here and the
//!   stochastic-matrix sampling in [`crate::sampling`] run over long,
//!   ill-conditioned float sequences; a naive sum loses enough precision to
//!   break the endpoint and row-total guarantees.
//! - **ECDF assembly**: rank-based (counts sorted descending, uniform x
//!   spacing) for argument frequencies, value-based (x = value / max) for
//!   scalar and snapshot-delta distributions.
//! - **Visvalingam-Whyatt simplification**: reduces an ECDF polyline to a
//!   bounded number of points while preserving both endpoints. Removing
//!   points from a monotone polyline keeps the remainder monotone.
//!
//! Exported ECDFs start at exactly `(0,0)` and end at exactly `(1,1)`.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A point on an empirical CDF; serialises as `[x, y]`.
pub type EcdfPoint = (f64, f64);

/// Errors surfaced by the ECDF pipeline.
#[derive(Debug, thiserror::Error)]
pub enum EcdfError {
    #[error("NaN encountered in ECDF input at point {0}")]
    NaN(usize),
    #[error("ECDF input is not monotone non-decreasing at point {0}")]
    NotMonotone(usize),
}

// ---------------------------------------------------------------------------
// Kahan summation
// ---------------------------------------------------------------------------

/// Compensated (Kahan) accumulator.
#[derive(Debug, Clone, Copy, Default)]
pub struct KahanSum {
    sum: f64,
    compensation: f64,
}

impl KahanSum {
    /// Fresh accumulator at zero.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `x`, carrying the low-order bits lost by the previous additions.
    #[inline]
    pub fn add(&mut self, x: f64) {
        let y = x - self.compensation;
        let t = self.sum + y;
        self.compensation = (t - self.sum) - y;
        self.sum = t;
    }

    /// Current compensated total.
    #[inline]
    pub fn value(&self) -> f64 {
        self.sum
    }
}

/// Compensated total of a float slice.
pub fn kahan_total(xs: &[f64]) -> f64 {
    let mut acc = KahanSum::new();
    for &x in xs {
        acc.add(x);
    }
    acc.value()
}

// ---------------------------------------------------------------------------
// ECDF assembly
// ---------------------------------------------------------------------------

/// Build the rank-based ECDF of a set of occurrence counts.
///
/// Counts are sorted descending, spaced uniformly on the x-axis, and
/// accumulated into a CDF with compensated summation. The result starts at
/// `(0,0)` and ends at exactly `(1,1)`; an empty input yields the degenerate
/// two-point ECDF.
pub fn rank_ecdf(counts: &[u64]) -> Vec<EcdfPoint> {
    let mut sorted: Vec<u64> = counts.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    let total: u64 = sorted.iter().sum();
    let n = sorted.len();
    if n == 0 || total == 0 {
        return vec![(0.0, 0.0), (1.0, 1.0)];
    }

    let mut points = Vec::with_capacity(n + 1);
    points.push((0.0, 0.0));
    let mut acc = KahanSum::new();
    for (i, &c) in sorted.iter().enumerate() {
        acc.add(c as f64 / total as f64);
        let x = (i + 1) as f64 / n as f64;
        points.push((x, acc.value()));
    }
    // The accumulated total lands within an ulp of 1; the endpoint is pinned.
    if let Some(p) = points.last_mut() {
        *p = (1.0, 1.0);
    }
    points
}

/// Build the value-based ECDF of `(value, count)` pairs, with the x-axis
/// normalised by `max` (the largest observed value).
///
/// Pairs need not be sorted. Endpoints are pinned to `(0,0)` and `(1,1)`.
pub fn value_ecdf(pairs: &[(u64, u64)], max: u64) -> Vec<EcdfPoint> {
    let total: u64 = pairs.iter().map(|&(_, c)| c).sum();
    if pairs.is_empty() || total == 0 {
        return vec![(0.0, 0.0), (1.0, 1.0)];
    }
    let mut sorted: Vec<(u64, u64)> = pairs.to_vec();
    sorted.sort_unstable_by_key(|&(v, _)| v);
    let denom = max.max(1) as f64;

    let mut points = Vec::with_capacity(sorted.len() + 2);
    points.push((0.0, 0.0));
    let mut acc = KahanSum::new();
    for &(v, c) in &sorted {
        acc.add(c as f64 / total as f64);
        points.push((v as f64 / denom, acc.value()));
    }
    if points.last().map(|&(x, _)| x < 1.0).unwrap_or(false) {
        points.push((1.0, 1.0));
    } else if let Some(p) = points.last_mut() {
        *p = (1.0, 1.0);
    }
    points
}

// ---------------------------------------------------------------------------
// Visvalingam-Whyatt polyline simplification
// ---------------------------------------------------------------------------

/// Heap entry for the lazy-deletion area queue. Ordered by *smallest* area
/// first (reverse ordering inside a max-heap).
#[derive(Debug, Clone, Copy, PartialEq)]
struct AreaEntry {
    area: f64,
    idx: usize,
    version: u64,
}

impl Eq for AreaEntry {}

impl Ord for AreaEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Smallest area pops first; ties broken by index for determinism.
        other
            .area
            .partial_cmp(&self.area)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.idx.cmp(&self.idx))
    }
}

impl PartialOrd for AreaEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Twice the area of the triangle spanned by three points.
#[inline]
fn triangle_area2(a: EcdfPoint, b: EcdfPoint, c: EcdfPoint) -> f64 {
    ((b.0 - a.0) * (c.1 - a.1) - (c.0 - a.0) * (b.1 - a.1)).abs()
}

/// Reduce `points` to at most `max_points` interior points (endpoints are
/// always kept) by iteratively dropping the point whose removal distorts the
/// polyline least.
///
/// Rejects NaN coordinates; the caller treats that as data corruption rather
/// than silently producing a broken distribution.
pub fn simplify(points: &[EcdfPoint], max_points: usize) -> Result<Vec<EcdfPoint>, EcdfError> {
    for (i, &(x, y)) in points.iter().enumerate() {
        if x.is_nan() || y.is_nan() {
            return Err(EcdfError::NaN(i));
        }
    }
    let n = points.len();
    let target = max_points + 2; // interior budget plus the two endpoints
    if n <= target || n <= 2 {
        return Ok(points.to_vec());
    }

    // Doubly linked list over indices; `alive` flags removed points.
    let mut prev: Vec<usize> = (0..n).map(|i| i.wrapping_sub(1)).collect();
    let mut next: Vec<usize> = (1..=n).collect();
    let mut alive = vec![true; n];
    let mut version = vec![0u64; n];

    let mut heap = BinaryHeap::with_capacity(n);
    for i in 1..n - 1 {
        heap.push(AreaEntry {
            area: triangle_area2(points[i - 1], points[i], points[i + 1]),
            idx: i,
            version: 0,
        });
    }

    let mut remaining = n;
    while remaining > target {
        let entry = match heap.pop() {
            Some(e) => e,
            None => break,
        };
        let i = entry.idx;
        if !alive[i] || entry.version != version[i] {
            continue; // stale entry, superseded by a neighbour removal
        }
        let (p, q) = (prev[i], next[i]);
        alive[i] = false;
        next[p] = q;
        prev[q] = p;
        remaining -= 1;

        // Recompute the areas of the two neighbours (if interior).
        for &j in &[p, q] {
            if j == 0 || j >= n - 1 || !alive[j] {
                continue;
            }
            version[j] += 1;
            heap.push(AreaEntry {
                area: triangle_area2(points[prev[j]], points[j], points[next[j]]),
                idx: j,
                version: version[j],
            });
        }
    }

    let mut out = Vec::with_capacity(remaining);
    let mut i = 0;
    loop {
        out.push(points[i]);
        if i == n - 1 {
            break;
        }
        i = next[i];
    }
    Ok(out)
}

/// Convenience: rank ECDF compressed to the crate default point budget.
pub fn compressed_rank_ecdf(counts: &[u64], max_points: usize) -> Vec<EcdfPoint> {
    let full = rank_ecdf(counts);
    // NaN is impossible for integer-count input.
    simplify(&full, max_points).expect("integer-count ECDF cannot contain NaN")
}

/// Convenience: value ECDF compressed to the crate default point budget.
pub fn compressed_value_ecdf(
    pairs: &[(u64, u64)],
    max: u64,
    max_points: usize,
) -> Vec<EcdfPoint> {
    let full = value_ecdf(pairs, max);
    simplify(&full, max_points).expect("integer-count ECDF cannot contain NaN")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kahan_recovers_lost_bits() {
        // Each 1e-16 increment is below half an ulp of 1.0, so the naive sum
        // never moves; the compensated sum recovers the full 1e-10.
        let mut naive = 1.0f64;
        let mut kahan = KahanSum::new();
        kahan.add(1.0);
        for _ in 0..1_000_000u32 {
            naive += 1e-16;
            kahan.add(1e-16);
        }
        let expect = 1.0 + 1e-10;
        assert_eq!(naive, 1.0);
        assert!((kahan.value() - expect).abs() < 1e-13);
    }

    #[test]
    fn rank_ecdf_endpoints_are_exact() {
        let points = rank_ecdf(&[5, 1, 3, 1]);
        assert_eq!(points.first(), Some(&(0.0, 0.0)));
        assert_eq!(points.last(), Some(&(1.0, 1.0)));
        // Monotone non-decreasing in both coordinates.
        for w in points.windows(2) {
            assert!(w[1].0 >= w[0].0);
            assert!(w[1].1 >= w[0].1);
        }
        // Largest count first: the first step covers 5/10 of the mass.
        assert!((points[1].1 - 0.5).abs() < 1e-12);
    }

    #[test]
    fn empty_distribution_is_degenerate() {
        assert_eq!(rank_ecdf(&[]), vec![(0.0, 0.0), (1.0, 1.0)]);
        assert_eq!(value_ecdf(&[], 0), vec![(0.0, 0.0), (1.0, 1.0)]);
    }

    #[test]
    fn value_ecdf_scales_by_max() {
        let points = value_ecdf(&[(2, 1), (4, 3)], 4);
        assert_eq!(points.first(), Some(&(0.0, 0.0)));
        assert_eq!(points.last(), Some(&(1.0, 1.0)));
        assert!((points[1].0 - 0.5).abs() < 1e-12);
        assert!((points[1].1 - 0.25).abs() < 1e-12);
    }

    #[test]
    fn simplify_preserves_endpoints_and_bounds_count() {
        let full = rank_ecdf(&(1..=1000u64).collect::<Vec<_>>());
        let reduced = simplify(&full, 30).unwrap();
        assert!(reduced.len() <= 32);
        assert_eq!(reduced.first(), Some(&(0.0, 0.0)));
        assert_eq!(reduced.last(), Some(&(1.0, 1.0)));
        for w in reduced.windows(2) {
            assert!(w[1].0 >= w[0].0, "x must stay monotone");
            assert!(w[1].1 >= w[0].1, "y must stay monotone");
        }
    }

    #[test]
    fn simplify_is_identity_below_budget() {
        let full = rank_ecdf(&[3, 2, 1]);
        let same = simplify(&full, 300).unwrap();
        assert_eq!(full, same);
    }

    #[test]
    fn simplify_rejects_nan() {
        let bad = vec![(0.0, 0.0), (0.5, f64::NAN), (1.0, 1.0)];
        assert!(matches!(simplify(&bad, 1), Err(EcdfError::NaN(1))));
    }
}
