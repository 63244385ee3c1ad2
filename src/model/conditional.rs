//! # Conditional Distributions
//!
//! Null distributions of family likelihoods conditioned on a fixed root
//! size: for each root size r, N forward simulations are run down the tree
//! and the pruning likelihood L[r] of each simulated leaf pattern is
//! recorded. The sorted vectors are the reference distributions for family
//! and branch p-values.
//!
//! Trial seeds are derived from (root size, trial index), so the result is
//! identical under any thread schedule.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::data::tree::Phylogeny;
use crate::data::FamilySizeRange;
use crate::error::Result;
use crate::model::cache::AppliedMatrices;
use crate::model::likelihood::{prune_family, PruneWorkspace};
use crate::model::simulate::{leaf_counts_of, random_family_sizes};

/// Sorted likelihood distributions, one per root size.
#[derive(Debug, Clone)]
pub struct ConditionalDistribution {
    root_min: usize,
    /// dists[r - root_min], each sorted ascending
    dists: Vec<Vec<f64>>,
}

impl ConditionalDistribution {
    /// First root size covered
    pub fn root_min(&self) -> usize {
        self.root_min
    }

    /// Number of root sizes covered
    pub fn len(&self) -> usize {
        self.dists.len()
    }

    /// True when no root sizes are covered
    pub fn is_empty(&self) -> bool {
        self.dists.is_empty()
    }

    /// Sorted distribution for one root size
    pub fn dist(&self, root_size: usize) -> Option<&[f64]> {
        root_size
            .checked_sub(self.root_min)
            .and_then(|i| self.dists.get(i))
            .map(Vec::as_slice)
    }
}

fn trial_seed(seed: u64, root_size: usize, trial: usize) -> u64 {
    seed.wrapping_add(
        (((root_size as u64) << 32) | trial as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15),
    )
}

/// Build conditional distributions for every root size in the range.
pub fn conditional_distribution(
    tree: &Phylogeny,
    matrices: &AppliedMatrices,
    range: &FamilySizeRange,
    trials: usize,
    seed: u64,
) -> Result<ConditionalDistribution> {
    let dists: Vec<Vec<f64>> = (range.root_min..=range.root_max)
        .into_par_iter()
        .map(|root_size| -> Result<Vec<f64>> {
            let mut ws = PruneWorkspace::new();
            let mut values = Vec::with_capacity(trials);
            for trial in 0..trials {
                let mut rng = StdRng::seed_from_u64(trial_seed(seed, root_size, trial));
                let sizes = random_family_sizes(tree, matrices, root_size as u32, &mut rng)?;
                let counts = leaf_counts_of(tree, &sizes);
                let errors = vec![None; tree.len()];
                let root_like =
                    prune_family(tree, matrices, &counts, &errors, range, &mut ws)?;
                values.push(root_like[root_size - range.root_min]);
            }
            values.sort_by(|a, b| a.partial_cmp(b).expect("finite simulated likelihoods"));
            Ok(values)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ConditionalDistribution {
        root_min: range.root_min,
        dists,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::cache::MatrixCache;
    use crate::model::rates::ParamLayout;

    fn setup() -> (Phylogeny, AppliedMatrices, FamilySizeRange) {
        let tree = Phylogeny::parse("((a:1,b:1):1,(c:1,d:1):1)").unwrap();
        let range = FamilySizeRange::new(0, 7, 0, 3).unwrap();
        let cache = MatrixCache::new(7);
        let rates = ParamLayout::new(1, false)
            .decode(&[0.05], &tree, None)
            .unwrap();
        let matrices = cache.apply_to_tree(&tree, &rates).unwrap();
        (tree, matrices, range)
    }

    #[test]
    fn test_one_distribution_per_root_size() {
        let (tree, matrices, range) = setup();
        let cd = conditional_distribution(&tree, &matrices, &range, 20, 17).unwrap();
        assert_eq!(cd.len(), 4);
        assert_eq!(cd.root_min(), 0);
        for r in 0..=3 {
            assert_eq!(cd.dist(r).unwrap().len(), 20);
        }
        assert!(cd.dist(4).is_none());
    }

    #[test]
    fn test_distributions_are_sorted() {
        let (tree, matrices, range) = setup();
        let cd = conditional_distribution(&tree, &matrices, &range, 50, 3).unwrap();
        for r in range.root_min..=range.root_max {
            let d = cd.dist(r).unwrap();
            assert!(d.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn test_deterministic_given_seed() {
        let (tree, matrices, range) = setup();
        let a = conditional_distribution(&tree, &matrices, &range, 25, 99).unwrap();
        let b = conditional_distribution(&tree, &matrices, &range, 25, 99).unwrap();
        for r in range.root_min..=range.root_max {
            assert_eq!(a.dist(r).unwrap(), b.dist(r).unwrap());
        }
        let c = conditional_distribution(&tree, &matrices, &range, 25, 100).unwrap();
        assert_ne!(a.dist(1).unwrap(), c.dist(1).unwrap());
    }

    #[test]
    fn test_extinct_root_gives_certain_extinction() {
        let (tree, matrices, range) = setup();
        let cd = conditional_distribution(&tree, &matrices, &range, 10, 5).unwrap();
        // root size 0 is absorbing: every simulation stays extinct and its
        // likelihood at root 0 is exactly 1
        for &v in cd.dist(0).unwrap() {
            assert!((v - 1.0).abs() < 1e-12);
        }
    }
}
