//! # Birth-Death Transition Kernel
//!
//! Closed-form transition probabilities of the linear birth-death process
//! for one branch. For rates (lambda, mu) and branch length t, with
//!
//! ```text
//! alpha = mu * (e^((l-m)t) - 1) / (l*e^((l-m)t) - m)
//! beta  = l  * (e^((l-m)t) - 1) / (l*e^((l-m)t) - m)      (l != m)
//! alpha = beta = l*t / (1 + l*t)                           (l == m)
//! ```
//!
//! the probability of going from i to j copies is
//!
//! ```text
//! P(i->j) = sum_{k=0}^{min(i,j)} C(i,k) C(i+j-k-1, i-1)
//!           alpha^(i-k) beta^(j-k) (1 - alpha - beta)^k
//! ```
//!
//! Each term is evaluated with a single `exp` over the log-binomial and
//! log-rate parts; the (1 - alpha - beta)^k factor can be negative and is
//! applied outside the exponential.

use crate::model::chooseln::LogChooseCache;
use crate::model::matrix::TransitionMatrix;

/// Branch lengths below this clamp to the identity matrix, suppressing
/// catastrophic cancellation in alpha/beta.
const MIN_BRANCH: f64 = 1e-9;

/// Two rates are treated as equal below this difference.
const RATE_EPSILON: f64 = 1e-12;

/// Death rate specification. The historical convention of passing a
/// negative mu to mean "same as lambda" maps onto `SameAsBirth`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeathRate {
    /// Death rate equals the birth rate
    SameAsBirth,
    /// Explicit death rate
    Value(f64),
}

impl DeathRate {
    /// Resolve to a concrete rate given the birth rate
    #[inline]
    pub fn resolve(&self, lambda: f64) -> f64 {
        match self {
            DeathRate::SameAsBirth => lambda,
            DeathRate::Value(mu) => *mu,
        }
    }

    /// Interpret a raw value, mapping negatives to `SameAsBirth`
    pub fn from_raw(mu: f64) -> Self {
        if mu < 0.0 {
            DeathRate::SameAsBirth
        } else {
            DeathRate::Value(mu)
        }
    }
}

/// Compute the full transition matrix of side `max_size + 1` for one branch.
///
/// Row 0 is the absorbing extinction row: P(0->0) = 1 and every other entry
/// of row 0 is zero. Entries are clamped to [0, 1]; rows sum to 1 up to the
/// tail mass truncated above `max_size`.
pub fn transition_matrix(
    t: f64,
    lambda: f64,
    death: DeathRate,
    max_size: usize,
    chooseln: &LogChooseCache,
) -> TransitionMatrix {
    let size = max_size + 1;
    let mu = death.resolve(lambda);
    if t < MIN_BRANCH || (lambda <= 0.0 && mu <= 0.0) {
        return TransitionMatrix::identity(size);
    }

    let (alpha, beta) = if (lambda - mu).abs() < RATE_EPSILON {
        let a = lambda * t / (1.0 + lambda * t);
        (a, a)
    } else {
        let grow = ((lambda - mu) * t).exp();
        if grow.is_infinite() {
            // growth-dominated limit
            (mu / lambda, 1.0)
        } else if grow == 0.0 {
            // death-dominated limit: extinction is certain
            (1.0, lambda / mu)
        } else {
            let denom = lambda * grow - mu;
            (mu * (grow - 1.0) / denom, lambda * (grow - 1.0) / denom)
        }
    };
    let coeff = 1.0 - alpha - beta;
    let ln_alpha = alpha.ln();
    let ln_beta = beta.ln();

    let mut m = TransitionMatrix::new(size);
    m.set(0, 0, 1.0);
    for i in 1..size {
        for j in 0..size {
            let mut p = 0.0;
            let mut coeff_pow = 1.0;
            for k in 0..=i.min(j) {
                let mut ln_term = chooseln.get(i, k) + chooseln.get(i + j - k - 1, i - 1);
                if i > k {
                    ln_term += (i - k) as f64 * ln_alpha;
                }
                if j > k {
                    ln_term += (j - k) as f64 * ln_beta;
                }
                p += ln_term.exp() * coeff_pow;
                coeff_pow *= coeff;
            }
            m.set(i, j, p.clamp(0.0, 1.0));
        }
    }
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_for(max_size: usize) -> LogChooseCache {
        LogChooseCache::new(2 * max_size + 2)
    }

    #[test]
    fn test_equal_rates_small_branch() {
        let cache = cache_for(20);
        let m = transition_matrix(1.0, 0.01, DeathRate::SameAsBirth, 20, &cache);
        assert_eq!(m.size(), 21);
        assert!((m.get(1, 0) - 0.009901).abs() < 1e-6);
        assert!((m.get(1, 1) - 0.980296).abs() < 1e-6);
        assert!((m.get(1, 2) - 0.0097059).abs() < 1e-6);
        assert!((m.get(2, 0) - 9.80296e-5).abs() < 1e-7);
        assert!((m.get(2, 1) - 0.0194118).abs() < 1e-6);
        assert!((m.get(2, 2) - 0.961173).abs() < 1e-6);
    }

    #[test]
    fn test_equal_rates_long_branch() {
        let cache = cache_for(140);
        let m = transition_matrix(68.7105, 0.006335, DeathRate::SameAsBirth, 140, &cache);
        assert_eq!(m.size(), 141);
        assert!((m.get(5, 5) - 0.19466).abs() < 1e-4);
    }

    #[test]
    fn test_distinct_rates() {
        let cache = cache_for(3);
        let m = transition_matrix(10.0, 0.02, DeathRate::Value(0.01), 3, &cache);
        assert_eq!(m.size(), 4);
        assert!((m.get(0, 0) - 1.0).abs() < 1e-12);
        assert!(m.get(0, 1).abs() < 1e-12);
        assert!(m.get(0, 2).abs() < 1e-12);
        assert!((m.get(1, 0) - 0.086).abs() < 0.001);
        assert!((m.get(1, 1) - 0.754).abs() < 0.001);
        assert!((m.get(1, 2) - 0.131).abs() < 0.001);
        assert!((m.get(2, 0) - 0.007).abs() < 0.001);
        assert!((m.get(2, 1) - 0.131).abs() < 0.001);
        assert!((m.get(2, 2) - 0.591).abs() < 0.001);
    }

    #[test]
    fn test_zero_branch_is_identity() {
        let cache = cache_for(5);
        let m = transition_matrix(0.0, 0.01, DeathRate::SameAsBirth, 5, &cache);
        assert_eq!(m, TransitionMatrix::identity(6));

        let tiny = transition_matrix(1e-12, 0.01, DeathRate::SameAsBirth, 5, &cache);
        assert_eq!(tiny, TransitionMatrix::identity(6));
    }

    #[test]
    fn test_extinction_is_absorbing() {
        let cache = cache_for(10);
        let m = transition_matrix(5.0, 0.03, DeathRate::Value(0.02), 10, &cache);
        assert_eq!(m.get(0, 0), 1.0);
        for j in 1..=10 {
            assert_eq!(m.get(0, j), 0.0);
        }
    }

    #[test]
    fn test_rows_sum_to_one() {
        // max_size large enough that the truncated tail is negligible
        let cache = cache_for(60);
        for &(t, lambda, death) in &[
            (1.0, 0.01, DeathRate::SameAsBirth),
            (2.0, 0.005, DeathRate::Value(0.02)),
            (10.0, 0.002, DeathRate::Value(0.001)),
        ] {
            let m = transition_matrix(t, lambda, death, 60, &cache);
            for i in 0..=5 {
                let sum = m.row_sum(i);
                assert!(
                    (sum - 1.0).abs() < 1e-9,
                    "row {} sums to {} for t={} lambda={}",
                    i,
                    sum,
                    t,
                    lambda
                );
            }
        }
    }

    #[test]
    fn test_entries_nonnegative() {
        let cache = cache_for(30);
        let m = transition_matrix(50.0, 0.05, DeathRate::Value(0.01), 30, &cache);
        for i in 0..=30 {
            for j in 0..=30 {
                let p = m.get(i, j);
                assert!((0.0..=1.0).contains(&p));
            }
        }
    }

    #[test]
    fn test_extreme_branches_stay_finite() {
        let cache = cache_for(10);
        let grown = transition_matrix(1e6, 0.05, DeathRate::Value(0.01), 10, &cache);
        let dead = transition_matrix(1e6, 0.01, DeathRate::Value(0.05), 10, &cache);
        for i in 0..=10 {
            for j in 0..=10 {
                assert!(grown.get(i, j).is_finite());
                assert!(dead.get(i, j).is_finite());
            }
        }
        // with death dominating over an essentially infinite branch,
        // extinction is certain
        assert!((dead.get(4, 0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_pure_death_is_binomial() {
        // lambda = 0: only losses, P(i->j) = C(i,j) a^(i-j) (1-a)^j
        let cache = cache_for(10);
        let t = 2.0;
        let mu = 0.1;
        let m = transition_matrix(t, 0.0, DeathRate::Value(mu), 10, &cache);
        let survive = (-mu * t).exp();
        for i in 1..=5usize {
            for j in 0..=i {
                let expected = crate::model::chooseln::choose_ln(i, j).exp()
                    * (1.0 - survive).powi((i - j) as i32)
                    * survive.powi(j as i32);
                assert!(
                    (m.get(i, j) - expected).abs() < 1e-9,
                    "P({}->{}) = {} expected {}",
                    i,
                    j,
                    m.get(i, j),
                    expected
                );
            }
            for j in (i + 1)..=10 {
                assert!(m.get(i, j).abs() < 1e-12);
            }
        }
    }
}
