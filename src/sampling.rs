//! Randomised sampling primitives for the replayer
//!
//! Two draws dominate replay: picking the successor state from a transition
//! row and picking long-tail argument indices. Both are specified with
//! numerical-stability guarantees:
//!
//! - row sampling uses Kahan compensated prefix sums, accepts unnormalised
//!   rows, falls back to the last non-zero weight if the compensated prefix
//!   underflows, and reports NaN input as an error instead of corrupting the
//!   walk;
//! - the "random" argument tail is a truncated exponential on `[0, 1)`.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use rand::Rng;

use crate::ecdf::{EcdfPoint, KahanSum};

/// Errors raised while sampling.
#[derive(Debug, thiserror::Error)]
pub enum SamplingError {
    #[error("non-finite weight at index {0}")]
    NonFinite(usize),
    #[error("negative weight at index {0}")]
    Negative(usize),
}

/// Sample a column index from a row of non-negative weights.
///
/// `r` must lie in `[0, 1)`; it is scaled by the compensated row total, so
/// rows need not be normalised. Returns `Ok(None)` for an all-zero row.
pub fn sample_row(weights: &[f64], r: f64) -> Result<Option<usize>, SamplingError> {
    let mut total = KahanSum::new();
    for (i, &w) in weights.iter().enumerate() {
        if !w.is_finite() {
            return Err(SamplingError::NonFinite(i));
        }
        if w < 0.0 {
            return Err(SamplingError::Negative(i));
        }
        total.add(w);
    }
    if total.value() <= 0.0 {
        return Ok(None);
    }

    let target = r * total.value();
    let mut prefix = KahanSum::new();
    let mut last_nonzero = None;
    for (i, &w) in weights.iter().enumerate() {
        if w > 0.0 {
            last_nonzero = Some(i);
        }
        prefix.add(w);
        if prefix.value() > target {
            return Ok(Some(i));
        }
    }
    // Underflow in a severely ill-conditioned row: fall back to the last
    // weight that contributed anything.
    Ok(last_nonzero)
}

/// Sample a successor index using the supplied RNG.
pub fn sample_successor<R: Rng>(
    rng: &mut R,
    weights: &[f64],
) -> Result<Option<usize>, SamplingError> {
    sample_row(weights, rng.gen::<f64>())
}

/// Draw from the exponential distribution with rate `lambda`, truncated and
/// renormalised to `[0, 1)`.
pub fn truncated_exponential<R: Rng>(rng: &mut R, lambda: f64) -> f64 {
    debug_assert!(lambda > 0.0 && lambda.is_finite());
    let u: f64 = rng.gen();
    let x = -(1.0 - u * (1.0 - (-lambda).exp())).ln() / lambda;
    // ln rounding can graze 1.0 for extreme lambda; keep the draw half-open.
    x.clamp(0.0, 1.0 - f64::EPSILON)
}

/// Inverse-CDF draw from a piecewise-linear ECDF over `[0, 1]`.
///
/// Used when the model declares fitted scalar distributions; the result is
/// the normalised value (multiply by the distribution's `max`).
pub fn sample_ecdf<R: Rng>(rng: &mut R, points: &[EcdfPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let u: f64 = rng.gen();
    let mut prev = points[0];
    for &(x, y) in &points[1..] {
        if u <= y {
            let (x0, y0) = prev;
            if y > y0 {
                return x0 + (x - x0) * (u - y0) / (y - y0);
            }
            return x;
        }
        prev = (x, y);
    }
    points[points.len() - 1].0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn sample_row_walks_the_prefix() {
        let row = [1.0, 2.0, 1.0];
        assert_eq!(sample_row(&row, 0.0).unwrap(), Some(0));
        assert_eq!(sample_row(&row, 0.26).unwrap(), Some(1));
        assert_eq!(sample_row(&row, 0.74).unwrap(), Some(1));
        assert_eq!(sample_row(&row, 0.8).unwrap(), Some(2));
        assert_eq!(sample_row(&row, 0.999_999).unwrap(), Some(2));
    }

    #[test]
    fn unnormalised_rows_are_scaled() {
        let row = [10.0, 30.0];
        assert_eq!(sample_row(&row, 0.2).unwrap(), Some(0));
        assert_eq!(sample_row(&row, 0.3).unwrap(), Some(1));
    }

    #[test]
    fn all_zero_row_yields_none() {
        assert_eq!(sample_row(&[0.0, 0.0, 0.0], 0.5).unwrap(), None);
        assert_eq!(sample_row(&[], 0.5).unwrap(), None);
    }

    #[test]
    fn nan_and_negative_weights_are_reported() {
        assert!(matches!(
            sample_row(&[0.1, f64::NAN], 0.5),
            Err(SamplingError::NonFinite(1))
        ));
        assert!(matches!(
            sample_row(&[-0.1, 1.0], 0.5),
            Err(SamplingError::Negative(0))
        ));
    }

    #[test]
    fn ill_conditioned_row_falls_back_to_last_nonzero() {
        // The tiny tail weight vanishes in the prefix; the draw lands past
        // the accumulated total and must fall back.
        let row = [1.0, 1e-300, 0.0];
        let got = sample_row(&row, 0.999_999_999_999_999_9).unwrap();
        assert!(got == Some(0) || got == Some(1));
    }

    #[test]
    fn truncated_exponential_stays_in_unit_interval() {
        let mut rng = StdRng::seed_from_u64(7);
        for &lambda in &[0.1, 1.0, 10.0, 500.0] {
            for _ in 0..200 {
                let x = truncated_exponential(&mut rng, lambda);
                assert!((0.0..1.0).contains(&x), "x={x} lambda={lambda}");
            }
        }
    }

    #[test]
    fn truncated_exponential_prefers_small_values_for_large_lambda() {
        let mut rng = StdRng::seed_from_u64(7);
        let mean: f64 =
            (0..2000).map(|_| truncated_exponential(&mut rng, 20.0)).sum::<f64>() / 2000.0;
        assert!(mean < 0.1, "mean={mean}");
    }

    #[test]
    fn ecdf_inverse_draw_is_bounded() {
        let mut rng = StdRng::seed_from_u64(3);
        let points = vec![(0.0, 0.0), (0.25, 0.8), (1.0, 1.0)];
        for _ in 0..500 {
            let x = sample_ecdf(&mut rng, &points);
            assert!((0.0..=1.0).contains(&x));
        }
    }
}
