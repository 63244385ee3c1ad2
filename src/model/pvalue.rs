//! # P-Values
//!
//! Empirical p-values against sorted conditional distributions: per-family
//! p-values over the root-size range, and per-branch "cut" p-values that
//! split the tree at an internal branch and compare the two sides'
//! observed likelihoods against independently simulated pairs.

use std::collections::HashMap;

use crate::data::tree::Phylogeny;
use crate::data::FamilySizeRange;
use crate::error::Result;
use crate::model::cache::MatrixCache;
use crate::model::conditional::{conditional_distribution, ConditionalDistribution};
use crate::model::likelihood::{prune_family, PruneWorkspace};
use crate::model::rates::{NodeRates, RateAssignment};

/// Fraction of the sorted null distribution at or below the observed value.
pub fn pvalue(observed: f64, sorted: &[f64]) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let below = sorted.partition_point(|&x| x <= observed);
    below as f64 / sorted.len() as f64
}

/// Per-root-size p-values for one family plus their maximum.
#[derive(Debug, Clone)]
pub struct FamilyPvalue {
    /// p-value at each root size, aligned with the root range
    pub per_root: Vec<f64>,
    /// Overall family p-value: the maximum across root sizes
    pub max: f64,
}

/// Family p-values: the observed likelihood at each root size against that
/// root size's conditional distribution.
pub fn family_pvalues(root_like: &[f64], cd: &ConditionalDistribution) -> FamilyPvalue {
    let per_root: Vec<f64> = root_like
        .iter()
        .enumerate()
        .map(|(i, &obs)| match cd.dist(cd.root_min() + i) {
            Some(dist) => pvalue(obs, dist),
            None => 0.0,
        })
        .collect();
    let max = per_root.iter().copied().fold(0.0, f64::max);
    FamilyPvalue { per_root, max }
}

/// Joint p-value of a two-sided observation: the fraction of trial pairs
/// whose likelihood product is at most the observed product. Trials are
/// paired index-wise; the sides are simulated independently.
pub fn cut_pvalue_joint(obs1: f64, obs2: f64, cd1: &[f64], cd2: &[f64]) -> f64 {
    let n = cd1.len().min(cd2.len());
    if n == 0 {
        return 0.0;
    }
    let observed = obs1 * obs2;
    let below = cd1
        .iter()
        .zip(cd2)
        .take(n)
        .filter(|(&a, &b)| a * b <= observed)
        .count();
    below as f64 / n as f64
}

/// Per-branch cut p-values for one family under a uniform rate model.
///
/// For every internal non-root node the tree is split into the subtree
/// below its branch and the remainder tree; each side gets its own
/// conditional distribution, and the observed pair is scored with
/// [`cut_pvalue_joint`], maximized over the root-size range. Leaves and the
/// root have no cut p-value.
#[allow(clippy::too_many_arguments)]
pub fn branch_cut_pvalues(
    tree: &Phylogeny,
    cache: &MatrixCache,
    rates: NodeRates,
    range: &FamilySizeRange,
    counts_by_species: &HashMap<String, u32>,
    trials: usize,
    seed: u64,
) -> Result<Vec<Option<f64>>> {
    let mut out = vec![None; tree.len()];
    for node in 0..tree.len() {
        if node == tree.root() || tree.is_leaf(node) {
            continue;
        }
        let below = tree.extract_subtree(node);
        let rest = tree.extract_remainder(node)?;

        let side_seed = seed.wrapping_add(node as u64).wrapping_mul(0x100_0000_01B3);
        let p1 = side_observed_and_null(&below, cache, rates, range, counts_by_species, trials, side_seed)?;
        let p2 = side_observed_and_null(&rest, cache, rates, range, counts_by_species, trials, side_seed ^ 0x5555_5555)?;

        let mut best = 0.0f64;
        for r in range.root_min..=range.root_max {
            let i = r - range.root_min;
            if let (Some(d1), Some(d2)) = (p1.1.dist(r), p2.1.dist(r)) {
                best = best.max(cut_pvalue_joint(p1.0[i], p2.0[i], d1, d2));
            }
        }
        out[node] = Some(best);
    }
    Ok(out)
}

type SideResult = (Vec<f64>, ConditionalDistribution);

fn side_observed_and_null(
    side: &Phylogeny,
    cache: &MatrixCache,
    rates: NodeRates,
    range: &FamilySizeRange,
    counts_by_species: &HashMap<String, u32>,
    trials: usize,
    seed: u64,
) -> Result<SideResult> {
    let assignment = RateAssignment {
        per_node: vec![rates; side.len()],
        clusters: None,
    };
    let matrices = cache.apply_to_tree(side, &assignment)?;

    let counts: Vec<Option<u32>> = (0..side.len())
        .map(|id| {
            side.node(id)
                .name
                .as_deref()
                .and_then(|name| counts_by_species.get(name).copied())
        })
        .collect();
    let errors = vec![None; side.len()];
    let mut ws = PruneWorkspace::new();
    let observed = prune_family(side, &matrices, &counts, &errors, range, &mut ws)?;
    let null = conditional_distribution(side, &matrices, range, trials, seed)?;
    Ok((observed, null))
}
