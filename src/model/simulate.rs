//! # Forward Simulation
//!
//! Ancestral simulation along the tree: starting from a fixed root size,
//! each child's size is drawn from its transition-matrix row at the
//! parent's size, top-down, so the leaves become one simulated observation
//! of the family. Also resamples observed counts through an attached error
//! model (misclassification simulation).

use rand::Rng;

use crate::data::family::FamilyStore;
use crate::data::tree::Phylogeny;
use crate::error::{RafeError, Result};
use crate::model::cache::AppliedMatrices;

/// Draw an index from an (approximately normalized) probability row.
/// Truncated tail mass falls through to the last index.
pub fn sample_index(row: &[f64], rng: &mut impl Rng) -> usize {
    let u: f64 = rng.gen();
    let mut cumulative = 0.0;
    for (idx, &p) in row.iter().enumerate() {
        cumulative += p;
        if cumulative >= u {
            return idx;
        }
    }
    row.len() - 1
}

/// Simulate a family downward from `root_size`, returning one size per
/// node id. Sizes never exceed the matrix bound.
pub fn random_family_sizes(
    tree: &Phylogeny,
    matrices: &AppliedMatrices,
    root_size: u32,
    rng: &mut impl Rng,
) -> Result<Vec<u32>> {
    let mut sizes = vec![0u32; tree.len()];
    for id in tree.preorder() {
        match tree.node(id).parent {
            None => sizes[id] = root_size,
            Some(parent) => {
                let matrix = matrices.single[id].as_ref().ok_or_else(|| {
                    RafeError::inconsistent(format!(
                        "transition matrix missing on node {} during simulation",
                        id
                    ))
                })?;
                let row = matrix.row(sizes[parent] as usize);
                sizes[id] = sample_index(row, rng) as u32;
            }
        }
    }
    Ok(sizes)
}

/// Leaf counts of a simulated assignment, laid out per node id.
pub fn leaf_counts_of(tree: &Phylogeny, sizes: &[u32]) -> Vec<Option<u32>> {
    (0..tree.len())
        .map(|id| tree.is_leaf(id).then(|| sizes[id]))
        .collect()
}

/// Resample every observed count through its species' error model,
/// replacing the stored counts with simulated misclassified observations.
/// Species without an attached model keep their counts.
pub fn simulate_misclassification(store: &mut FamilyStore, rng: &mut impl Rng) -> Result<()> {
    let n_species = store.species().len();
    let columns: Vec<Option<Vec<Vec<f64>>>> = (0..n_species)
        .map(|col| {
            store.error_model_for(col).map(|model| {
                (0..=model.max_size())
                    .map(|truth| model.column(truth))
                    .collect()
            })
        })
        .collect();

    for family_idx in 0..store.len() {
        let counts = store.family(family_idx).counts.clone();
        let mut resampled = Vec::with_capacity(counts.len());
        for (col, &count) in counts.iter().enumerate() {
            match &columns[col] {
                None => resampled.push(count),
                Some(cols) => {
                    if count as usize >= cols.len() {
                        return Err(RafeError::OutOfRange {
                            value: count as i64,
                            bound: (cols.len() - 1) as i64,
                        });
                    }
                    resampled.push(sample_index(&cols[count as usize], rng) as u32);
                }
            }
        }
        store.set_counts(family_idx, resampled);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::errormodel::ErrorModel;
    use crate::data::family::GeneFamily;
    use crate::model::matrix::TransitionMatrix;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;

    fn delta_shift_matrices(tree: &Phylogeny, max: usize) -> AppliedMatrices {
        // deterministic growth: every row r puts all mass on min(r+1, max)
        let mut m = TransitionMatrix::new(max + 1);
        for r in 0..=max {
            m.set(r, (r + 1).min(max), 1.0);
        }
        let m = Arc::new(m);
        let mut single = vec![None; tree.len()];
        for id in 0..tree.len() {
            if id != tree.root() {
                single[id] = Some(Arc::clone(&m));
            }
        }
        AppliedMatrices {
            single,
            clustered: None,
        }
    }

    #[test]
    fn test_simulation_follows_matrix_rows() {
        let tree = Phylogeny::parse("((a:1,b:1):1,c:1)").unwrap();
        let matrices = delta_shift_matrices(&tree, 10);
        let mut rng = StdRng::seed_from_u64(7);
        let sizes = random_family_sizes(&tree, &matrices, 3, &mut rng).unwrap();

        assert_eq!(sizes[tree.root()], 3);
        let c = tree.find("c").unwrap();
        assert_eq!(sizes[c], 4); // one step below the root
        let a = tree.find("a").unwrap();
        assert_eq!(sizes[a], 5); // two steps below the root
    }

    #[test]
    fn test_simulation_never_exceeds_bound() {
        let tree = Phylogeny::parse("((a:1,b:1):1,c:1)").unwrap();
        let max = 4usize;
        let matrices = delta_shift_matrices(&tree, max);
        let mut rng = StdRng::seed_from_u64(11);
        let sizes = random_family_sizes(&tree, &matrices, max as u32, &mut rng).unwrap();
        assert!(sizes.iter().all(|&s| s <= max as u32));
    }

    #[test]
    fn test_leaf_counts_extraction() {
        let tree = Phylogeny::parse("(a:1,b:1)").unwrap();
        let sizes = vec![5u32; tree.len()];
        let counts = leaf_counts_of(&tree, &sizes);
        assert_eq!(counts[tree.root()], None);
        assert_eq!(counts[tree.find("a").unwrap()], Some(5));
    }

    #[test]
    fn test_sample_index_distribution() {
        let row = [0.0, 0.0, 1.0, 0.0];
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..50 {
            assert_eq!(sample_index(&row, &mut rng), 2);
        }
    }

    #[test]
    fn test_sample_index_tail_fallthrough() {
        // all-zero row: mass never accumulates, the last index wins
        let row = [0.0, 0.0, 0.0];
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(sample_index(&row, &mut rng), 2);
    }

    #[test]
    fn test_misclassification_resamples_through_model() {
        let tree = Phylogeny::parse("(chimp:1,dog:1)").unwrap();
        let mut store = FamilyStore::new(vec!["chimp".into(), "dog".into()]);
        store
            .add(GeneFamily::new("id", "description", vec![3, 2]))
            .unwrap();
        store.set_species_index(&tree).unwrap();

        // chimp's model maps every true count deterministically to 1
        let mut model = ErrorModel::new(4, -4, 4);
        for truth in 0..=4 {
            model.set(1, truth, 1.0);
        }
        model.set_source("det.txt");
        store
            .attach_error_model(Arc::new(model), Some("chimp"))
            .unwrap();

        let mut rng = StdRng::seed_from_u64(3);
        simulate_misclassification(&mut store, &mut rng).unwrap();
        assert_eq!(store.family(0).counts, vec![1, 2]);
    }
}
