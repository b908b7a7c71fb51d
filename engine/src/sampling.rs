//! Seedable draw helpers shared by trial generation and adaptation.
//!
//! Every function takes `&mut impl Rng` so a session can run off a single
//! `StdRng::seed_from_u64` stream and replay deterministically in tests.

use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::{Beta, Distribution, Exp};

use crate::error::{EngineError, Result};

/// Number of catch-credit bins over omega in [0, 1] (5% steps, inclusive).
pub const CATCH_BIN_COUNT: usize = 21;

/// Shuffled boolean vector with an exact ones count of `round(n * p)`.
///
/// Unlike a Bernoulli stream, the ratio holds per batch, not just in
/// expectation, which is what guarantees exact left/right trial balance
/// across a generated window.
pub fn controlled_random<R: Rng + ?Sized>(rng: &mut R, probability: f64, n: usize) -> Vec<bool> {
    let positives = ((n as f64) * probability.clamp(0.0, 1.0)).round() as usize;
    let positives = positives.min(n);
    let mut draws = vec![true; positives];
    draws.resize(n, false);
    draws.shuffle(rng);
    draws
}

/// Discretize omega in [0, 1] into one of the 21 catch-credit bins.
pub fn catch_bin(omega: f64) -> usize {
    let bin = (omega.clamp(0.0, 1.0) * 20.0).round() as usize;
    bin.min(CATCH_BIN_COUNT - 1)
}

/// Exponential draw with support exactly `[min, max]`.
///
/// Rejection-samples `Exp(1/tau)` until the draw fits in `max - min`, then
/// offsets by `min`. Keeps the exponential decay shape over the window,
/// which hazard-rate-matched feedback timing depends on.
pub fn truncated_exponential<R: Rng + ?Sized>(
    rng: &mut R,
    min: f64,
    max: f64,
    tau: f64,
) -> Result<f64> {
    if min == 0.0 && max == 0.0 {
        return Err(EngineError::DegenerateExponentialRange);
    }
    let span = max - min;
    let exp = Exp::new(1.0 / tau).map_err(|_| EngineError::NonPositiveParameter {
        name: "tau",
        value: tau,
    })?;
    let mut draw = span + 1.0;
    while draw > span {
        draw = exp.sample(rng);
    }
    Ok(draw + min)
}

/// Symmetric beta draw used by the beta-distribution stimulus policy,
/// clamped away from the degenerate near-0/near-1 tails.
pub fn beta_omega<R: Rng + ?Sized>(rng: &mut R, alpha: f64) -> Result<f64> {
    let beta = Beta::new(alpha, alpha).map_err(|_| EngineError::NonPositiveParameter {
        name: "alpha",
        value: alpha,
    })?;
    Ok(beta.sample(rng).clamp(0.1, 0.9))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn controlled_random_hits_exact_ratio() {
        let mut rng = StdRng::seed_from_u64(7);
        for &(p, n, expected) in &[(0.5, 10, 5), (0.3, 10, 3), (0.7, 5, 4), (0.0, 8, 0), (1.0, 8, 8)]
        {
            let draws = controlled_random(&mut rng, p, n);
            assert_eq!(draws.len(), n);
            assert_eq!(draws.iter().filter(|&&d| d).count(), expected);
        }
    }

    #[test]
    fn catch_bin_is_monotonic_and_bounded() {
        let mut last = 0;
        for step in 0..=100 {
            let omega = step as f64 / 100.0;
            let bin = catch_bin(omega);
            assert!(bin <= 20);
            assert!(bin >= last);
            last = bin;
        }
        assert_eq!(catch_bin(0.0), 0);
        assert_eq!(catch_bin(0.5), 10);
        assert_eq!(catch_bin(1.0), 20);
    }

    #[test]
    fn catch_bin_reflects_about_center() {
        for step in 0..=100 {
            let omega = step as f64 / 100.0;
            if (omega - 0.5).abs() < f64::EPSILON {
                continue;
            }
            assert_eq!(catch_bin(omega) + catch_bin(1.0 - omega), 20, "omega={omega}");
        }
    }

    #[test]
    fn truncated_exponential_stays_in_range() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..500 {
            let draw = truncated_exponential(&mut rng, 0.5, 1.5, 0.1).unwrap();
            assert!((0.5..=1.5).contains(&draw), "draw {draw} out of range");
        }
    }

    #[test]
    fn truncated_exponential_rejects_zero_range() {
        let mut rng = StdRng::seed_from_u64(3);
        assert!(matches!(
            truncated_exponential(&mut rng, 0.0, 0.0, 0.1),
            Err(EngineError::DegenerateExponentialRange)
        ));
    }

    #[test]
    fn beta_omega_is_clamped() {
        let mut rng = StdRng::seed_from_u64(19);
        for _ in 0..500 {
            let omega = beta_omega(&mut rng, 0.3 / 4.0).unwrap();
            assert!((0.1..=0.9).contains(&omega));
        }
    }
}
