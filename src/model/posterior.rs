//! # Root Posterior
//!
//! Combines a pruning root vector with the root-size prior: the joint
//! P(data, root = r), its normalized posterior, and the scalar family
//! likelihood used by the search objective.

use crate::error::{RafeError, Result};
use crate::model::prior::RootPrior;

/// Posterior over root sizes for one family.
#[derive(Debug, Clone)]
pub struct Posterior {
    /// First root size covered by the vectors
    pub root_min: usize,
    /// joint[i] = L[root_min + i] * prior[root_min + i]
    pub joint: Vec<f64>,
    /// joint normalized to sum 1
    pub posterior: Vec<f64>,
    /// Largest joint value
    pub max_joint: f64,
    /// Largest raw likelihood value
    pub max_likelihood: f64,
    /// Root size with the largest joint value
    pub map_root: usize,
}

/// ln P(family) = ln sum_r L[r] * prior[r]; -inf when the family has no
/// support anywhere in the root range.
pub fn family_log_likelihood(root_like: &[f64], prior: &RootPrior, root_min: usize) -> f64 {
    root_like
        .iter()
        .enumerate()
        .map(|(i, &l)| l * prior.get(root_min + i))
        .sum::<f64>()
        .ln()
}

/// Posterior over root sizes.
pub fn compute_posterior(
    root_like: &[f64],
    prior: &RootPrior,
    root_min: usize,
) -> Result<Posterior> {
    let joint: Vec<f64> = root_like
        .iter()
        .enumerate()
        .map(|(i, &l)| l * prior.get(root_min + i))
        .collect();
    let total: f64 = joint.iter().sum();
    if !total.is_finite() || total <= 0.0 {
        return Err(RafeError::numeric(format!(
            "family has zero or non-finite posterior mass ({})",
            total
        )));
    }

    let mut max_joint = 0.0;
    let mut map_root = root_min;
    for (i, &j) in joint.iter().enumerate() {
        if j > max_joint {
            max_joint = j;
            map_root = root_min + i;
        }
    }
    let max_likelihood = root_like.iter().copied().fold(0.0, f64::max);
    let posterior = joint.iter().map(|&j| j / total).collect();

    Ok(Posterior {
        root_min,
        joint,
        posterior,
        max_joint,
        max_likelihood,
        map_root,
    })
}
