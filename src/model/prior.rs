//! # Root-Size Prior
//!
//! Distribution over root family sizes, built once per search epoch. Either
//! a Poisson with a user-supplied rate, or an empirical fit to the observed
//! counts. The empirical variant is a shifted-Poisson maximum-likelihood
//! fit (root families have at least one member, so the prior at size zero
//! is exactly zero).

use statrs::function::gamma::ln_gamma;

use crate::data::family::FamilyStore;
use crate::error::{RafeError, Result};

/// Prior vectors must sum to 1 within this tolerance.
pub const PRIOR_SUM_TOLERANCE: f64 = 1e-9;

/// Normalized distribution over sizes `0..=max`.
#[derive(Debug, Clone)]
pub struct RootPrior {
    probs: Vec<f64>,
}

impl RootPrior {
    /// Poisson pmf with rate `rate`, truncated to `0..=max` and
    /// renormalized.
    pub fn poisson(rate: f64, max: usize) -> Result<Self> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(RafeError::config(format!(
                "Poisson prior rate must be positive, got {}",
                rate
            )));
        }
        let probs = (0..=max).map(|k| poisson_pmf(k, rate)).collect();
        Self::normalized(probs)
    }

    /// Shifted-Poisson fit to the observed counts: the rate is the mean of
    /// (count - 1) over all positive observations, size r >= 1 gets
    /// pmf(r - 1), and size 0 gets probability zero.
    pub fn empirical(store: &FamilyStore, max: usize) -> Result<Self> {
        let mut sum = 0.0;
        let mut n = 0usize;
        for count in store.observed_counts() {
            if count >= 1 {
                sum += (count - 1) as f64;
                n += 1;
            }
        }
        if n == 0 {
            return Err(RafeError::inconsistent(
                "cannot fit an empirical prior: no positive counts observed",
            ));
        }
        let rate = sum / n as f64;
        if rate <= 0.0 {
            // every observed family has exactly one member
            let mut probs = vec![0.0; max + 1];
            probs[1] = 1.0;
            return Self::normalized(probs);
        }
        let mut probs = vec![0.0; max + 1];
        for (r, slot) in probs.iter_mut().enumerate().skip(1) {
            *slot = poisson_pmf(r - 1, rate);
        }
        Self::normalized(probs)
    }

    /// Wrap an explicit weight vector, normalizing it to sum 1.
    pub fn from_probs(probs: Vec<f64>) -> Result<Self> {
        Self::normalized(probs)
    }

    fn normalized(mut probs: Vec<f64>) -> Result<Self> {
        let total: f64 = probs.iter().sum();
        if !total.is_finite() || total <= 0.0 {
            return Err(RafeError::numeric(format!(
                "prior normalization failed: total mass {}",
                total
            )));
        }
        for p in &mut probs {
            *p /= total;
        }
        Ok(Self { probs })
    }

    /// The full probability vector
    pub fn probs(&self) -> &[f64] {
        &self.probs
    }

    /// Probability of one root size (zero beyond the covered range)
    #[inline]
    pub fn get(&self, size: usize) -> f64 {
        self.probs.get(size).copied().unwrap_or(0.0)
    }
}

fn poisson_pmf(k: usize, rate: f64) -> f64 {
    (-rate + k as f64 * rate.ln() - ln_gamma(k as f64 + 1.0)).exp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::family::GeneFamily;

    #[test]
    fn test_poisson_prior_reference_values() {
        let prior = RootPrior::poisson(5.75, 999).unwrap();
        assert!((prior.get(0) - 0.00318278).abs() < 1e-5);
        assert!((prior.get(1) - 0.018301).abs() < 1e-5);
        assert!((prior.get(2) - 0.052615).abs() < 1e-5);
        assert!((prior.get(5) - 0.166711).abs() < 1e-5);
        assert!(prior.get(999) < 1e-9);
    }

    #[test]
    fn test_poisson_prior_normalized() {
        for max in [10usize, 100, 999] {
            let prior = RootPrior::poisson(5.75, max).unwrap();
            let sum: f64 = prior.probs().iter().sum();
            assert!((sum - 1.0).abs() < PRIOR_SUM_TOLERANCE);
        }
    }

    #[test]
    fn test_poisson_prior_rejects_bad_rate() {
        assert!(RootPrior::poisson(0.0, 10).is_err());
        assert!(RootPrior::poisson(-2.0, 10).is_err());
    }

    #[test]
    fn test_empirical_prior_fit() {
        let mut store = FamilyStore::new(
            ["A", "B", "C", "D"].map(String::from).to_vec(),
        );
        for id in ["ENS01", "ENS02", "ENS03", "ENS04"] {
            store
                .add(GeneFamily::new(id, "description", vec![6, 11, 3, 7]))
                .unwrap();
        }
        let prior = RootPrior::empirical(&store, 60).unwrap();

        // no mass at root size zero
        assert!(prior.get(0).abs() < 1e-12);
        let sum: f64 = prior.probs().iter().sum();
        assert!((sum - 1.0).abs() < PRIOR_SUM_TOLERANCE);

        // fitted rate is mean(count - 1) = 5.75, so size 2 carries pmf(1)
        assert!((prior.get(2) - 0.018301).abs() < 1e-4);
        assert!((prior.get(6) - 0.166711).abs() < 1e-4);
    }

    #[test]
    fn test_empirical_prior_needs_positive_counts() {
        let mut store = FamilyStore::new(vec!["A".into()]);
        store.add(GeneFamily::new("F", "", vec![0])).unwrap();
        assert!(RootPrior::empirical(&store, 10).is_err());
    }
}
