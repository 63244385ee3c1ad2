//! # Viterbi Ancestral Reconstruction
//!
//! MAP assignment of ancestral family sizes: the root takes the size
//! maximizing likelihood times prior, then each child takes the size
//! maximizing its transition row from the parent's assigned size times its
//! own conditional vector, top-down. Each non-root node also gets a
//! marginal p-value locating its assigned size within the parent's
//! transition row.

use crate::data::tree::Phylogeny;
use crate::data::FamilySizeRange;
use crate::error::{RafeError, Result};
use crate::model::cache::AppliedMatrices;
use crate::model::likelihood::PruneWorkspace;
use crate::model::prior::RootPrior;

/// MAP sizes and marginal p-values for one family, per node id.
#[derive(Debug, Clone)]
pub struct ViterbiResult {
    pub map_sizes: Vec<u32>,
    /// None on the root
    pub node_pvalues: Vec<Option<f64>>,
}

/// Run the top-down MAP pass. `ws` must hold the conditional vectors of a
/// completed pruning pass for the same family.
pub fn viterbi_map(
    tree: &Phylogeny,
    matrices: &AppliedMatrices,
    ws: &PruneWorkspace,
    prior: &RootPrior,
    range: &FamilySizeRange,
) -> Result<ViterbiResult> {
    let mut map_sizes = vec![0u32; tree.len()];
    let mut node_pvalues = vec![None; tree.len()];

    // MAP root size
    let root_like = ws.node_likelihood(tree.root());
    let mut best = f64::NEG_INFINITY;
    let mut best_root = range.root_min;
    for r in range.root_min..=range.root_max {
        let joint = root_like[r] * prior.get(r);
        if joint > best {
            best = joint;
            best_root = r;
        }
    }
    map_sizes[tree.root()] = best_root as u32;

    for id in tree.preorder() {
        let Some(parent) = tree.node(id).parent else {
            continue;
        };
        let matrix = matrices.single[id].as_ref().ok_or_else(|| {
            RafeError::inconsistent(format!(
                "transition matrix missing on node {} during the Viterbi pass",
                id
            ))
        })?;
        let parent_size = map_sizes[parent] as usize;
        let row = matrix.row(parent_size);

        let like = ws.node_likelihood(id);
        let mut best = f64::NEG_INFINITY;
        let mut best_size = 0usize;
        for s in range.min..=range.max {
            let score = row[s] * like[s];
            if score > best {
                best = score;
                best_size = s;
            }
        }
        map_sizes[id] = best_size as u32;

        let below: f64 = row[..best_size].iter().sum();
        node_pvalues[id] = Some(below + row[best_size] / 2.0);
    }

    Ok(ViterbiResult {
        map_sizes,
        node_pvalues,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::cache::MatrixCache;
    use crate::model::likelihood::prune_family;
    use crate::model::rates::ParamLayout;

    fn run_viterbi(lambda: f64, counts_ab: (u32, u32)) -> (Phylogeny, ViterbiResult) {
        let tree = Phylogeny::parse("(a:1,b:1)").unwrap();
        let range = FamilySizeRange::new(0, 10, 1, 8).unwrap();
        let cache = MatrixCache::new(10);
        let rates = ParamLayout::new(1, false)
            .decode(&[lambda], &tree, None)
            .unwrap();
        let matrices = cache.apply_to_tree(&tree, &rates).unwrap();

        let mut counts = vec![None; tree.len()];
        counts[tree.find("a").unwrap()] = Some(counts_ab.0);
        counts[tree.find("b").unwrap()] = Some(counts_ab.1);
        let errors = vec![None; tree.len()];

        let mut ws = PruneWorkspace::new();
        prune_family(&tree, &matrices, &counts, &errors, &range, &mut ws).unwrap();
        let prior = RootPrior::poisson(3.0, 10).unwrap();
        let result = viterbi_map(&tree, &matrices, &ws, &prior, &range).unwrap();
        (tree, result)
    }

    #[test]
    fn test_leaves_keep_observed_sizes() {
        // with a slow clock the MAP path passes through the observations
        let (tree, result) = run_viterbi(0.01, (3, 3));
        assert_eq!(result.map_sizes[tree.find("a").unwrap()], 3);
        assert_eq!(result.map_sizes[tree.find("b").unwrap()], 3);
        assert_eq!(result.map_sizes[tree.root()], 3);
    }

    #[test]
    fn test_root_has_no_pvalue() {
        let (tree, result) = run_viterbi(0.01, (3, 5));
        assert!(result.node_pvalues[tree.root()].is_none());
        for leaf in tree.leaves() {
            assert!(result.node_pvalues[leaf].is_some());
        }
    }

    #[test]
    fn test_node_pvalue_is_row_position() {
        // nearly-identity matrices: a leaf matching the parent's size sits
        // mid-row, p approximately sum(below) + P(match)/2 ~ 0.5
        let (tree, result) = run_viterbi(0.001, (4, 4));
        let a = tree.find("a").unwrap();
        let p = result.node_pvalues[a].unwrap();
        assert!((p - 0.5).abs() < 0.02, "p = {}", p);
    }

    #[test]
    fn test_missing_matrix_is_an_error() {
        let tree = Phylogeny::parse("(a:1,b:1)").unwrap();
        let range = FamilySizeRange::new(0, 5, 0, 5).unwrap();
        let cache = MatrixCache::new(5);
        let rates = ParamLayout::new(1, false)
            .decode(&[0.01], &tree, None)
            .unwrap();
        let matrices = cache.apply_to_tree(&tree, &rates).unwrap();

        let counts: Vec<Option<u32>> = (0..tree.len())
            .map(|id| tree.is_leaf(id).then_some(1))
            .collect();
        let errors = vec![None; tree.len()];
        let mut ws = PruneWorkspace::new();
        prune_family(&tree, &matrices, &counts, &errors, &range, &mut ws).unwrap();

        let empty = AppliedMatrices {
            single: vec![None; tree.len()],
            clustered: None,
        };
        let prior = RootPrior::poisson(3.0, 5).unwrap();
        assert!(viterbi_map(&tree, &empty, &ws, &prior, &range).is_err());
    }
}
