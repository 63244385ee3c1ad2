//! # Error Model Estimation
//!
//! Fits a misclassification distribution from paired count measurements:
//! either two replicate measurements of the same families, or a measured
//! file against known true counts. The distribution over observed-minus-
//! true offsets is parameterized symmetrically (max_diff + 1 parameters)
//! or asymmetrically (2 * max_diff + 1), with a flat residual epsilon over
//! the remaining offsets, and maximized by the restarted simplex.

use rand::rngs::StdRng;
use rand::Rng;
use tracing::info;

use crate::data::errormodel::ErrorModel;
use crate::data::family::FamilyStore;
use crate::error::{RafeError, Result};
use crate::optimize::driver::{minimize_with_restarts, SearchOptions};
use crate::optimize::fminsearch::SimplexOptions;

/// Estimation settings.
#[derive(Debug, Clone, Copy)]
pub struct ErrorEstimateOptions {
    /// One parameter per |offset| instead of per signed offset
    pub symmetric: bool,
    /// Largest modeled offset
    pub max_diff: usize,
    /// Require the offset distribution to fall away from its peak
    pub peak_zero: bool,
    pub seed: u64,
    pub max_runs: usize,
}

impl Default for ErrorEstimateOptions {
    fn default() -> Self {
        Self {
            symmetric: true,
            max_diff: 2,
            peak_zero: true,
            seed: 42,
            max_runs: 100,
        }
    }
}

/// Add-one-smoothed size distribution over `0..=max_size`.
pub fn size_distribution(counts: impl Iterator<Item = u32>, max_size: usize) -> Vec<f64> {
    let mut freq = vec![0u64; max_size + 1];
    for c in counts {
        if (c as usize) <= max_size {
            freq[c as usize] += 1;
        }
    }
    let total: u64 = freq.iter().map(|&f| f + 1).sum();
    freq.iter().map(|&f| (f + 1) as f64 / total as f64).collect()
}

/// Pair counts from two replicate measurements, folded onto the upper
/// triangle: pairs seen as (i, j) with j < i accumulate into \[j\]\[i\] and
/// the lower cell is zeroed.
pub fn pair_counts_replicates(
    a: &FamilyStore,
    b: &FamilyStore,
    max_size: usize,
) -> Result<Vec<Vec<u32>>> {
    if a.species().len() != b.species().len() {
        return Err(RafeError::inconsistent(
            "the number of columns does not match between the two measurement files",
        ));
    }
    if a.len() != b.len() {
        return Err(RafeError::inconsistent(
            "the number of families does not match between the two measurement files",
        ));
    }
    let mut pairs = vec![vec![0u32; max_size + 1]; max_size + 1];
    for (fa, fb) in a.families().iter().zip(b.families()) {
        if fa.id != fb.id {
            return Err(RafeError::inconsistent(format!(
                "family ids do not match between the two measurement files: {} vs {}",
                fa.id, fb.id
            )));
        }
        for (&ca, &cb) in fa.counts.iter().zip(&fb.counts) {
            pairs[ca as usize][cb as usize] += 1;
        }
    }
    for i in 0..=max_size {
        for j in 0..i {
            pairs[j][i] += pairs[i][j];
            pairs[i][j] = 0;
        }
    }
    Ok(pairs)
}

/// Pair counts of measured against true values; no triangle folding, the
/// direction of the error is meaningful.
pub fn pair_counts_true_measure(
    measured: &FamilyStore,
    truth: &FamilyStore,
    max_size: usize,
) -> Result<Vec<Vec<u32>>> {
    if measured.species().len() != truth.species().len() || measured.len() != truth.len() {
        return Err(RafeError::inconsistent(
            "measured and true files do not cover the same families and species",
        ));
    }
    let mut pairs = vec![vec![0u32; max_size + 1]; max_size + 1];
    for (fm, ft) in measured.families().iter().zip(truth.families()) {
        if fm.id != ft.id {
            return Err(RafeError::inconsistent(format!(
                "family ids do not match between measured and true files: {} vs {}",
                fm.id, ft.id
            )));
        }
        for (&cm, &ct) in fm.counts.iter().zip(&ft.counts) {
            pairs[cm as usize][ct as usize] += 1;
        }
    }
    Ok(pairs)
}

/// Which likelihood the pair matrix follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PairKind {
    Replicates,
    TrueMeasure,
}

/// Observed pair data plus the model shape being fitted.
#[derive(Debug, Clone)]
pub struct ErrorMeasure {
    size_dist: Vec<f64>,
    pairs: Vec<Vec<u32>>,
    max_size: usize,
    symmetric: bool,
    peak_zero: bool,
    max_diff: usize,
    kind: PairKind,
}

impl ErrorMeasure {
    /// Build from two replicate measurements of the same families.
    pub fn from_replicates(
        a: &FamilyStore,
        b: &FamilyStore,
        opts: &ErrorEstimateOptions,
        min_max_size: usize,
    ) -> Result<Self> {
        let observed = a.max_observed().max(b.max_observed()) as usize;
        let max_size = observed.max(min_max_size);
        let size_dist =
            size_distribution(a.observed_counts().chain(b.observed_counts()), max_size);
        let pairs = pair_counts_replicates(a, b, max_size)?;
        Ok(Self {
            size_dist,
            pairs,
            max_size,
            symmetric: opts.symmetric,
            peak_zero: opts.peak_zero,
            max_diff: opts.max_diff,
            kind: PairKind::Replicates,
        })
    }

    /// Build from a measured file and a file of known true counts.
    pub fn from_true_measure(
        measured: &FamilyStore,
        truth: &FamilyStore,
        opts: &ErrorEstimateOptions,
        min_max_size: usize,
    ) -> Result<Self> {
        let observed = measured.max_observed().max(truth.max_observed()) as usize;
        let max_size = observed.max(min_max_size);
        let size_dist = size_distribution(
            measured.observed_counts().chain(truth.observed_counts()),
            max_size,
        );
        let pairs = pair_counts_true_measure(measured, truth, max_size)?;
        Ok(Self {
            size_dist,
            pairs,
            max_size,
            symmetric: opts.symmetric,
            peak_zero: opts.peak_zero,
            max_diff: opts.max_diff,
            kind: PairKind::TrueMeasure,
        })
    }

    /// Number of free parameters
    pub fn n_params(&self) -> usize {
        if self.symmetric {
            self.max_diff + 1
        } else {
            2 * self.max_diff + 1
        }
    }

    /// Residual probability of each unmodeled offset
    fn epsilon(&self, params: &[f64]) -> f64 {
        let used: f64 = if self.symmetric {
            params[0] + 2.0 * params[1..].iter().sum::<f64>()
        } else {
            params.iter().sum()
        };
        (1.0 - used) / ((self.max_size + 1) as f64 - (2 * self.max_diff + 1) as f64)
    }

    fn violates_peak(&self, params: &[f64]) -> bool {
        if self.symmetric {
            params.windows(2).any(|w| w[0] < w[1])
        } else {
            let center = self.max_diff;
            (1..=self.max_diff).any(|i| {
                params[center - i + 1] < params[center - i]
                    || params[center + i - 1] < params[center + i]
            })
        }
    }

    /// Negative log-likelihood of the pair matrix; +infinity outside the
    /// constraint region.
    pub fn score(&self, params: &[f64]) -> f64 {
        let eps = self.epsilon(params);
        if eps < 0.0 || params.iter().any(|&p| p < 0.0 || eps > p) {
            return f64::INFINITY;
        }
        if self.peak_zero && self.violates_peak(params) {
            return f64::INFINITY;
        }

        let model = ErrorModel::from_estimate(
            params,
            eps,
            self.max_diff as i32,
            self.symmetric,
            self.max_size,
        );

        let mut score = 0.0;
        match self.kind {
            PairKind::Replicates => {
                for i in 0..=self.max_size {
                    for j in i..=self.max_size {
                        let n = self.pairs[i][j];
                        if n == 0 {
                            continue;
                        }
                        let mut discord = 0.0;
                        for (k, &w) in self.size_dist.iter().enumerate() {
                            discord += w
                                * model.p_observed_given_true(i, k)
                                * model.p_observed_given_true(j, k);
                        }
                        if i != j {
                            discord *= 2.0;
                        }
                        score += n as f64 * discord.ln();
                    }
                }
                // condition on the pair not being doubly extinct
                let mut prob00 = 0.0;
                for (k, &w) in self.size_dist.iter().enumerate() {
                    let p = model.p_observed_given_true(0, k);
                    prob00 += w * p * p;
                }
                score -= (1.0 - prob00).ln();
            }
            PairKind::TrueMeasure => {
                for i in 0..=self.max_size {
                    for j in 0..=self.max_size {
                        let n = self.pairs[i][j];
                        if n == 0 {
                            continue;
                        }
                        score += n as f64 * model.p_observed_given_true(i, j).ln();
                    }
                }
            }
        }

        if score.is_finite() {
            -score
        } else {
            f64::INFINITY
        }
    }

    /// Fit the parameters by restarted simplex with tight tolerances,
    /// returning the parameters, the final score and the convergence flag.
    pub fn estimate(&self, seed: u64, max_runs: usize) -> Result<(Vec<f64>, f64, bool)> {
        let n = self.n_params();
        let symmetric = self.symmetric;
        let max_diff = self.max_diff;
        let mut randomize = move |rng: &mut StdRng| -> Vec<f64> {
            let mut draws: Vec<f64> = (0..n).map(|_| rng.gen::<f64>() / n as f64).collect();
            draws.sort_by(|a, b| b.total_cmp(a));
            if symmetric {
                draws
            } else {
                // largest at the center, then alternate outward
                let mut params = vec![0.0; n];
                let mut next = draws.into_iter();
                params[max_diff] = next.next().expect("at least one parameter");
                for i in 1..=max_diff {
                    params[max_diff - i] = next.next().expect("parameter");
                    params[max_diff + i] = next.next().expect("parameter");
                }
                params
            }
        };

        let opts = SearchOptions {
            simplex: SimplexOptions {
                tol_x: 1e-9,
                tol_f: 1e-9,
                max_iters: 10_000,
            },
            max_runs,
            seed,
        };
        let mut f = |params: &[f64]| self.score(params);
        let outcome = minimize_with_restarts(&mut f, None, &mut randomize, &opts);
        info!(
            score = outcome.best.fx,
            runs = outcome.runs,
            converged = outcome.converged,
            "misclassification estimation finished (likelihood conditioned on non-extinct pairs)"
        );
        if !outcome.best.fx.is_finite() {
            return Err(RafeError::convergence(
                "misclassification estimation never found a feasible parameter vector",
            ));
        }
        Ok((outcome.best.x, outcome.best.fx, outcome.converged))
    }

    /// Materialize the fitted parameters as an error model.
    pub fn to_error_model(&self, params: &[f64]) -> ErrorModel {
        let mut model = ErrorModel::from_estimate(
            params,
            self.epsilon(params).max(0.0),
            self.max_diff as i32,
            self.symmetric,
            self.max_size,
        );
        model.set_source("estimated");
        model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::family::GeneFamily;

    fn store_with(counts: &[(u32, u32)]) -> (FamilyStore, FamilyStore) {
        let mut a = FamilyStore::new(vec!["s1".into()]);
        let mut b = FamilyStore::new(vec!["s1".into()]);
        for (idx, &(ca, cb)) in counts.iter().enumerate() {
            let id = format!("F{}", idx);
            a.add(GeneFamily::new(id.clone(), "", vec![ca])).unwrap();
            b.add(GeneFamily::new(id, "", vec![cb])).unwrap();
        }
        (a, b)
    }

    #[test]
    fn test_size_distribution_add_one() {
        let counts = [3u32, 3, 3, 3, 6, 6, 6, 6, 7, 7, 7, 7];
        let dist = size_distribution(counts.iter().copied(), 7);
        // total = 12 observations + 8 pseudo-counts
        assert!((dist[0] - 1.0 / 20.0).abs() < 1e-12);
        assert!((dist[3] - 5.0 / 20.0).abs() < 1e-12);
        let sum: f64 = dist.iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_pair_counts_fold_to_upper_triangle() {
        let (a, b) = store_with(&[(2, 1)]);
        let pairs = pair_counts_replicates(&a, &b, 4).unwrap();
        assert_eq!(pairs[1][2], 1);
        assert_eq!(pairs[2][1], 0);
    }

    #[test]
    fn test_pair_counts_reject_mismatched_ids() {
        let mut a = FamilyStore::new(vec!["s1".into()]);
        let mut b = FamilyStore::new(vec!["s1".into()]);
        a.add(GeneFamily::new("F1", "", vec![1])).unwrap();
        b.add(GeneFamily::new("OTHER", "", vec![1])).unwrap();
        assert!(pair_counts_replicates(&a, &b, 4).is_err());
    }

    #[test]
    fn test_score_rejects_constraint_violations() {
        let (a, b) = store_with(&[(2, 2), (3, 3), (2, 3)]);
        let opts = ErrorEstimateOptions {
            symmetric: true,
            max_diff: 1,
            peak_zero: true,
            ..Default::default()
        };
        let measure = ErrorMeasure::from_replicates(&a, &b, &opts, 10).unwrap();

        assert!(measure.score(&[-0.1, 0.05]).is_infinite());
        // rising away from the peak violates peak_zero
        assert!(measure.score(&[0.1, 0.4]).is_infinite());
        // feasible point
        assert!(measure.score(&[0.8, 0.05]).is_finite());
    }

    #[test]
    fn test_epsilon_residual() {
        let (a, b) = store_with(&[(2, 2)]);
        let opts = ErrorEstimateOptions {
            symmetric: true,
            max_diff: 1,
            peak_zero: false,
            ..Default::default()
        };
        let measure = ErrorMeasure::from_replicates(&a, &b, &opts, 10).unwrap();
        // used mass 0.8 + 2*0.05 = 0.9; 8 unmodeled offsets share 0.1
        let eps = measure.epsilon(&[0.8, 0.05]);
        assert!((eps - 0.1 / 8.0).abs() < 1e-12);
    }

    #[test]
    fn test_estimate_produces_valid_model() {
        // concordant-heavy replicate pairs around sizes 2-4
        let (a, b) = store_with(&[
            (2, 2),
            (3, 3),
            (4, 4),
            (3, 3),
            (2, 3),
            (4, 3),
            (3, 3),
            (2, 2),
        ]);
        let opts = ErrorEstimateOptions {
            symmetric: true,
            max_diff: 1,
            peak_zero: true,
            seed: 5,
            max_runs: 12,
        };
        let measure = ErrorMeasure::from_replicates(&a, &b, &opts, 8).unwrap();
        let (params, score, _converged) = measure.estimate(5, 12).unwrap();
        assert!(score.is_finite());
        // concordance dominates, so the central parameter does too
        assert!(params[0] >= params[1]);

        let model = measure.to_error_model(&params);
        model.validate_column_sums().unwrap();
    }
}
