//! # Pruning Likelihood Engine
//!
//! Bottom-up (postorder) computation of P(observed leaf counts | root size)
//! for every root size. Leaves hold a delta on the observed count, or the
//! observed row of their error model; each internal node multiplies, over
//! its children, the child's transition matrix applied to the child's
//! conditional vector. Sums stay in linear space: family-size ranges are
//! small enough that no renormalization is needed inside one family, and
//! any non-finite value is left to the objective, which treats it as
//! infinite cost.
//!
//! Scratch vectors live in a per-call workspace so parallel family
//! evaluations never alias.

use std::sync::Arc;

use crate::data::errormodel::ErrorModel;
use crate::data::tree::Phylogeny;
use crate::data::FamilySizeRange;
use crate::error::{RafeError, Result};
use crate::model::cache::AppliedMatrices;
use crate::model::matrix::TransitionMatrix;

/// Pre-allocated conditional-likelihood vectors, one per tree node.
#[derive(Debug, Default)]
pub struct PruneWorkspace {
    /// node_like[node][size]
    node_like: Vec<Vec<f64>>,
    /// scratch for one child's contribution
    factor: Vec<f64>,
}

impl PruneWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    fn resize(&mut self, n_nodes: usize, vector_len: usize) {
        self.node_like.resize(n_nodes, Vec::new());
        for v in &mut self.node_like {
            v.clear();
            v.resize(vector_len, 0.0);
        }
        self.factor.clear();
        self.factor.resize(vector_len, 0.0);
    }

    /// Conditional likelihood vector of one node after a pruning pass
    pub fn node_likelihood(&self, node: usize) -> &[f64] {
        &self.node_like[node]
    }
}

/// One pruning pass with a single transition matrix per node.
///
/// `leaf_counts` and `errors` are laid out per node id; leaves without a
/// count are treated as unobserved (uniform conditional). Returns the root
/// vector over `root_min..=root_max`, leaving every node's conditional
/// vector available in the workspace.
pub fn prune_family(
    tree: &Phylogeny,
    matrices: &AppliedMatrices,
    leaf_counts: &[Option<u32>],
    errors: &[Option<Arc<ErrorModel>>],
    range: &FamilySizeRange,
    ws: &mut PruneWorkspace,
) -> Result<Vec<f64>> {
    prune_with(
        tree,
        |node| matrices.single[node].as_deref(),
        leaf_counts,
        errors,
        range,
        ws,
    )?;
    Ok(ws.node_like[tree.root()][range.root_min..=range.root_max].to_vec())
}

/// Clustered pruning: one pass per latent cluster, root vectors combined by
/// the cluster weight simplex.
pub fn prune_family_clustered(
    tree: &Phylogeny,
    matrices: &AppliedMatrices,
    weights: &[f64],
    leaf_counts: &[Option<u32>],
    errors: &[Option<Arc<ErrorModel>>],
    range: &FamilySizeRange,
    ws: &mut PruneWorkspace,
) -> Result<Vec<f64>> {
    let clustered = matrices.clustered.as_ref().ok_or_else(|| {
        RafeError::inconsistent("clustered pruning requested without cluster matrices")
    })?;
    if weights.len() != clustered.k {
        return Err(RafeError::inconsistent(format!(
            "{} cluster weights for {} clusters",
            weights.len(),
            clustered.k
        )));
    }

    let mut combined = vec![0.0; range.n_root_sizes()];
    for (cluster, &weight) in weights.iter().enumerate() {
        prune_with(
            tree,
            |node| clustered.per_node[node].get(cluster).map(Arc::as_ref),
            leaf_counts,
            errors,
            range,
            ws,
        )?;
        let root = &ws.node_like[tree.root()];
        for (slot, r) in combined.iter_mut().zip(range.root_min..=range.root_max) {
            *slot += weight * root[r];
        }
    }
    Ok(combined)
}

fn prune_with<'a>(
    tree: &Phylogeny,
    matrix_of: impl Fn(usize) -> Option<&'a TransitionMatrix>,
    leaf_counts: &[Option<u32>],
    errors: &[Option<Arc<ErrorModel>>],
    range: &FamilySizeRange,
    ws: &mut PruneWorkspace,
) -> Result<()> {
    let vector_len = range.max + 1;
    ws.resize(tree.len(), vector_len);

    for id in tree.postorder() {
        if tree.is_leaf(id) {
            fill_leaf(id, leaf_counts, errors, range, &mut ws.node_like[id])?;
            continue;
        }
        ws.node_like[id].fill(1.0);
        for &child in &tree.node(id).children {
            let matrix = matrix_of(child).ok_or_else(|| {
                RafeError::inconsistent(format!(
                    "transition matrix missing on node {}; apply the cache to the tree first",
                    child
                ))
            })?;
            matrix.multiply_range(
                &ws.node_like[child],
                (0, range.max),
                (0, range.max),
                &mut ws.factor,
            );
            let own = &mut ws.node_like[id];
            for (l, f) in own.iter_mut().zip(&ws.factor) {
                *l *= f;
            }
        }
    }
    Ok(())
}

fn fill_leaf(
    id: usize,
    leaf_counts: &[Option<u32>],
    errors: &[Option<Arc<ErrorModel>>],
    range: &FamilySizeRange,
    out: &mut [f64],
) -> Result<()> {
    match leaf_counts[id] {
        None => out.fill(1.0),
        Some(count) => {
            let count = count as usize;
            if count > range.max {
                return Err(RafeError::OutOfRange {
                    value: count as i64,
                    bound: range.max as i64,
                });
            }
            match &errors[id] {
                None => {
                    out.fill(0.0);
                    out[count] = 1.0;
                }
                Some(model) => {
                    for (size, slot) in out.iter_mut().enumerate() {
                        *slot = model.p_observed_given_true(count, size);
                    }
                }
            }
        }
    }
    Ok(())
}
