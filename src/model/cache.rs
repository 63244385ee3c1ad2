//! # Transition Matrix Cache
//!
//! At most one matrix per (branch length, lambda, mu) key. Branch lengths
//! are truncated to whole units before both lookup and computation: empirical
//! sub-unit differences do not change the probabilities at the precision the
//! search needs, and the truncation is part of the cache contract - callers
//! must tolerate matrix sharing between close branch lengths.
//!
//! Matrices are handed out as `Arc`s: the cache owns the canonical copy,
//! tree-side holders keep cheap shared references, and a `reset` cannot
//! invalidate anything still in use.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::data::tree::Phylogeny;
use crate::error::Result;
use crate::model::birthdeath::{transition_matrix, DeathRate};
use crate::model::chooseln::LogChooseCache;
use crate::model::matrix::TransitionMatrix;
use crate::model::rates::RateAssignment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct MatrixKey {
    branch: i64,
    lambda_bits: u64,
    mu_bits: u64,
}

impl MatrixKey {
    fn new(t: f64, lambda: f64, mu: f64) -> Self {
        Self {
            branch: t.trunc() as i64,
            lambda_bits: lambda.to_bits(),
            mu_bits: mu.to_bits(),
        }
    }
}

/// Transition matrices for one tree, laid out per node id. The root entry
/// is `None`; with clustering every non-root node carries K matrices.
#[derive(Debug, Clone, Default)]
pub struct AppliedMatrices {
    pub single: Vec<Option<Arc<TransitionMatrix>>>,
    pub clustered: Option<ClusteredMatrices>,
}

/// K parallel matrices per node for the latent-cluster variant.
#[derive(Debug, Clone)]
pub struct ClusteredMatrices {
    pub k: usize,
    /// per_node[node][cluster]; empty on the root
    pub per_node: Vec<Vec<Arc<TransitionMatrix>>>,
}

/// Keyed cache of birth-death transition matrices.
#[derive(Debug)]
pub struct MatrixCache {
    max_size: usize,
    chooseln: LogChooseCache,
    entries: Mutex<HashMap<MatrixKey, Arc<TransitionMatrix>>>,
}

impl MatrixCache {
    /// Create a cache producing matrices of side `max_size + 1`.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            chooseln: LogChooseCache::new(2 * max_size + 2),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Side bound of produced matrices
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Number of cached matrices
    pub fn len(&self) -> usize {
        self.entries.lock().expect("matrix cache poisoned").len()
    }

    /// True when nothing has been cached yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch the matrix for a branch, computing and inserting on miss.
    pub fn get(&self, t: f64, lambda: f64, death: DeathRate) -> Arc<TransitionMatrix> {
        let mu = death.resolve(lambda);
        let key = MatrixKey::new(t, lambda, mu);
        if let Some(hit) = self.entries.lock().expect("matrix cache poisoned").get(&key) {
            return Arc::clone(hit);
        }
        let computed = Arc::new(transition_matrix(
            key.branch as f64,
            lambda,
            death,
            self.max_size,
            &self.chooseln,
        ));
        let mut entries = self.entries.lock().expect("matrix cache poisoned");
        Arc::clone(entries.entry(key).or_insert(computed))
    }

    /// Drop every entry and change the matrix side for future insertions.
    /// Requires exclusive access: callers must join all workers first.
    pub fn reset(&mut self, max_size: usize) {
        if max_size != self.max_size {
            self.max_size = max_size;
            self.chooseln = LogChooseCache::new(2 * max_size + 2);
        }
        self.entries.get_mut().expect("matrix cache poisoned").clear();
    }

    /// Assign a matrix to every non-root node of the tree from its branch
    /// length and decoded rates. Must run before any likelihood evaluation.
    pub fn apply_to_tree(
        &self,
        tree: &Phylogeny,
        rates: &RateAssignment,
    ) -> Result<AppliedMatrices> {
        let n = tree.len();
        let mut single = vec![None; n];
        for id in 0..n {
            if id == tree.root() {
                continue;
            }
            if let Some(branch) = tree.node(id).branch {
                let r = &rates.per_node[id];
                single[id] = Some(self.get(branch, r.birth, r.death));
            }
        }

        let clustered = match &rates.clusters {
            None => None,
            Some(clusters) => {
                let mut per_node = vec![Vec::new(); n];
                for id in 0..n {
                    if id == tree.root() {
                        continue;
                    }
                    if let Some(branch) = tree.node(id).branch {
                        per_node[id] = clusters.per_node[id]
                            .iter()
                            .map(|r| self.get(branch, r.birth, r.death))
                            .collect();
                    }
                }
                Some(ClusteredMatrices {
                    k: clusters.k,
                    per_node,
                })
            }
        };

        Ok(AppliedMatrices { single, clustered })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::rates::ParamLayout;

    #[test]
    fn test_fractional_branch_lengths_collapse() {
        let cache = MatrixCache::new(140);
        let a = cache.get(68.0, 0.006335, DeathRate::SameAsBirth);
        let b = cache.get(68.7, 0.006335, DeathRate::SameAsBirth);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
        // the cached matrix is the whole-unit one
        assert!((a.get(5, 5) - 0.195791).abs() < 1e-4);
    }

    #[test]
    fn test_distinct_keys_get_distinct_matrices() {
        let cache = MatrixCache::new(10);
        let a = cache.get(5.0, 0.01, DeathRate::SameAsBirth);
        let b = cache.get(6.0, 0.01, DeathRate::SameAsBirth);
        let c = cache.get(5.0, 0.02, DeathRate::SameAsBirth);
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_death_sentinel_matches_explicit_equal_rate() {
        let cache = MatrixCache::new(10);
        let implicit = cache.get(5.0, 0.01, DeathRate::SameAsBirth);
        let explicit = cache.get(5.0, 0.01, DeathRate::Value(0.01));
        // same resolved key, same matrix
        assert!(Arc::ptr_eq(&implicit, &explicit));
    }

    #[test]
    fn test_reset_clears_and_resizes() {
        let mut cache = MatrixCache::new(10);
        cache.get(5.0, 0.01, DeathRate::SameAsBirth);
        assert_eq!(cache.len(), 1);
        cache.reset(20);
        assert!(cache.is_empty());
        let m = cache.get(5.0, 0.01, DeathRate::SameAsBirth);
        assert_eq!(m.size(), 21);
    }

    #[test]
    fn test_apply_to_tree() {
        let tree = Phylogeny::parse("((a:1,b:1):1,(c:1,d:1):1)").unwrap();
        let cache = MatrixCache::new(7);
        let layout = ParamLayout::new(1, false);
        let rates = layout.decode(&[0.01], &tree, None).unwrap();

        let applied = cache.apply_to_tree(&tree, &rates).unwrap();
        assert!(applied.single[tree.root()].is_none());
        for id in 0..tree.len() {
            if id != tree.root() {
                let m = applied.single[id].as_ref().expect("non-root node matrix");
                let expected = cache.get(1.0, 0.01, DeathRate::SameAsBirth);
                assert!(Arc::ptr_eq(m, &expected));
            }
        }
        // all branches share one (t, lambda, mu) key
        assert_eq!(cache.len(), 1);
    }
}
