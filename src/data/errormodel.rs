//! # Observation Error Model
//!
//! A per-species misclassification matrix: `matrix[obs][true]` is the
//! probability of observing `obs` gene copies when the true count is `true`.
//! Columns are conditional distributions and must each sum to 1.

use crate::error::{RafeError, Result};

/// Column sums are accepted when within this tolerance of 1.
pub const COLUMN_SUM_TOLERANCE: f64 = 1e-6;

/// Misclassification matrix over family sizes `0..=max_size`.
#[derive(Debug, Clone)]
pub struct ErrorModel {
    max_size: usize,
    from_diff: i32,
    to_diff: i32,
    /// matrix[obs][true]
    matrix: Vec<Vec<f64>>,
    /// Originating file name, used to share one model across species
    source: Option<String>,
}

impl ErrorModel {
    /// Create a zero-filled model covering sizes `0..=max_size` with error
    /// offsets spanning `from_diff..=to_diff`.
    pub fn new(max_size: usize, from_diff: i32, to_diff: i32) -> Self {
        Self {
            max_size,
            from_diff,
            to_diff,
            matrix: vec![vec![0.0; max_size + 1]; max_size + 1],
            source: None,
        }
    }

    /// Largest family size covered
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Most negative observed-minus-true offset
    pub fn from_diff(&self) -> i32 {
        self.from_diff
    }

    /// Most positive observed-minus-true offset
    pub fn to_diff(&self) -> i32 {
        self.to_diff
    }

    /// Originating file name, if the model was read from disk
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Record the originating file name
    pub fn set_source(&mut self, source: impl Into<String>) {
        self.source = Some(source.into());
    }

    /// Set one matrix entry
    pub fn set(&mut self, observed: usize, truth: usize, p: f64) {
        self.matrix[observed][truth] = p;
    }

    /// P(observe `observed` | true count `truth`); counts beyond the covered
    /// range have probability zero.
    pub fn p_observed_given_true(&self, observed: usize, truth: usize) -> f64 {
        if observed > self.max_size || truth > self.max_size {
            0.0
        } else {
            self.matrix[observed][truth]
        }
    }

    /// The conditional distribution over observations for one true count
    pub fn column(&self, truth: usize) -> Vec<f64> {
        (0..=self.max_size)
            .map(|obs| self.matrix[obs][truth])
            .collect()
    }

    /// Copy the distribution of column `from` into column `to`, shifting the
    /// offsets so each diff keeps its meaning. Offsets pushed outside
    /// `0..=max_size` by the shift fold into the boundary row, keeping the
    /// column a distribution. Used for missing-row inheritance when reading
    /// model files.
    pub fn inherit_column(&mut self, from: usize, to: usize) {
        let in_range = |v: i64| (0..=self.max_size as i64).contains(&v);
        for diff in self.from_diff..=self.to_diff {
            let src = from as i64 + diff as i64;
            let dst = to as i64 + diff as i64;
            if in_range(src) && in_range(dst) {
                self.matrix[dst as usize][to] = self.matrix[src as usize][from];
            }
        }
        for diff in self.from_diff..=self.to_diff {
            let src = from as i64 + diff as i64;
            let dst = to as i64 + diff as i64;
            if !in_range(src) || in_range(dst) {
                continue;
            }
            let value = self.matrix[src as usize][from];
            if dst < 0 {
                self.matrix[0][to] += value;
            } else {
                self.matrix[self.max_size][to] += value;
            }
        }
    }

    /// Reject the model unless every column sums to 1 within tolerance.
    pub fn validate_column_sums(&self) -> Result<()> {
        for truth in 0..=self.max_size {
            let sum: f64 = (0..=self.max_size).map(|obs| self.matrix[obs][truth]).sum();
            if (sum - 1.0).abs() > COLUMN_SUM_TOLERANCE {
                return Err(RafeError::inconsistent(format!(
                    "error model column {} sums to {} instead of 1",
                    truth, sum
                )));
            }
        }
        Ok(())
    }

    /// Build a model from estimated misclassification parameters.
    ///
    /// `params` holds P(observed - true = d): indexed by |d| for the
    /// symmetric model, by `d + max_diff` for the asymmetric one. Offsets
    /// falling outside `0..=max_size` are folded into the nearest boundary
    /// row, every remaining cell receives the residual `epsilon`, and each
    /// column is renormalized.
    pub fn from_estimate(
        params: &[f64],
        epsilon: f64,
        max_diff: i32,
        symmetric: bool,
        max_size: usize,
    ) -> Self {
        let mut model = Self::new(max_size, -max_diff, max_diff);
        let param_for = |d: i32| -> f64 {
            if symmetric {
                params[d.unsigned_abs() as usize]
            } else {
                params[(d + max_diff) as usize]
            }
        };

        for truth in 0..=max_size {
            let mut column = vec![epsilon; max_size + 1];
            for d in -max_diff..=max_diff {
                let target = truth as i64 + d as i64;
                if (0..=max_size as i64).contains(&target) {
                    column[target as usize] = param_for(d);
                }
            }
            // out-of-range offsets fold into the boundary rows after the
            // in-range cells are placed, so folded mass is never overwritten
            for d in -max_diff..=max_diff {
                let target = truth as i64 + d as i64;
                if target < 0 {
                    column[0] += param_for(d);
                } else if target > max_size as i64 {
                    column[max_size] += param_for(d);
                }
            }
            let total: f64 = column.iter().sum();
            for (obs, p) in column.into_iter().enumerate() {
                model.matrix[obs][truth] = p / total;
            }
        }
        model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform_model(max_size: usize) -> ErrorModel {
        let mut model = ErrorModel::new(max_size, -1, 1);
        for truth in 0..=max_size {
            for diff in -1i64..=1 {
                let obs = truth as i64 + diff;
                if (0..=max_size as i64).contains(&obs) {
                    model.set(obs as usize, truth, 0.0);
                }
            }
        }
        // columns: interior 0.2/0.6/0.2, boundary mass folded inward
        for truth in 0..=max_size {
            let lo = truth == 0;
            let hi = truth == max_size;
            if !lo {
                model.set(truth - 1, truth, 0.2);
            }
            if !hi {
                model.set(truth + 1, truth, 0.2);
            }
            model.set(truth, truth, 0.6 + if lo { 0.2 } else { 0.0 } + if hi { 0.2 } else { 0.0 });
        }
        model
    }

    #[test]
    fn test_column_sums_accept() {
        let model = uniform_model(4);
        assert!(model.validate_column_sums().is_ok());
    }

    #[test]
    fn test_column_sums_reject() {
        let mut model = uniform_model(4);
        model.set(2, 2, 0.5);
        let err = model.validate_column_sums().unwrap_err();
        assert!(matches!(err, RafeError::Inconsistent { .. }));
    }

    #[test]
    fn test_column_sums_tolerance_boundary() {
        let mut model = uniform_model(4);
        model.set(2, 2, 0.6 + 0.5 * COLUMN_SUM_TOLERANCE);
        assert!(model.validate_column_sums().is_ok());
        model.set(2, 2, 0.6 + 10.0 * COLUMN_SUM_TOLERANCE);
        assert!(model.validate_column_sums().is_err());
    }

    #[test]
    fn test_inherit_column() {
        let mut model = ErrorModel::new(5, -1, 1);
        model.set(1, 2, 0.2);
        model.set(2, 2, 0.6);
        model.set(3, 2, 0.2);
        model.inherit_column(2, 3);
        assert_eq!(model.p_observed_given_true(2, 3), 0.2);
        assert_eq!(model.p_observed_given_true(3, 3), 0.6);
        assert_eq!(model.p_observed_given_true(4, 3), 0.2);
    }

    #[test]
    fn test_from_estimate_columns_normalized() {
        // symmetric, max_diff 1: P(0)=0.6, P(±1)=0.15, epsilon covers the rest
        let params = [0.6, 0.15];
        let epsilon = (1.0 - 0.9) / (11.0 - 3.0);
        let model = ErrorModel::from_estimate(&params, epsilon, 1, true, 10);
        model.validate_column_sums().unwrap();
        // interior column keeps the peak shape
        assert!((model.p_observed_given_true(5, 5) - 0.6).abs() < 1e-9);
        assert!((model.p_observed_given_true(4, 5) - 0.15).abs() < 1e-9);
        // the -1 offset from true count 0 folds into the zero row
        assert!(model.p_observed_given_true(0, 0) > model.p_observed_given_true(1, 1));
    }
}
