//! # Gene Family Store
//!
//! Owns the gene families read from a count file, the species column names,
//! the species-to-tree-leaf index used by the likelihood engine, and any
//! attached observation error models. Families are never mutated after
//! loading except by reindexing (and by explicit misclassification
//! simulation).

use std::sync::Arc;

use crate::data::errormodel::ErrorModel;
use crate::data::tree::Phylogeny;
use crate::error::{RafeError, Result};

/// One orthology group: an id, a free-text description, and one count per
/// species column of the source file.
#[derive(Debug, Clone)]
pub struct GeneFamily {
    pub id: String,
    pub desc: String,
    pub counts: Vec<u32>,
}

impl GeneFamily {
    pub fn new(id: impl Into<String>, desc: impl Into<String>, counts: Vec<u32>) -> Self {
        Self {
            id: id.into(),
            desc: desc.into(),
            counts,
        }
    }
}

/// Indexed collection of gene families.
#[derive(Debug, Clone, Default)]
pub struct FamilyStore {
    species: Vec<String>,
    families: Vec<GeneFamily>,
    /// species column -> tree leaf node, set by `set_species_index`
    leaf_index: Vec<Option<usize>>,
    /// loaded error models, shared across species assignments
    error_models: Vec<Arc<ErrorModel>>,
    /// species column -> index into `error_models`
    species_error: Vec<Option<usize>>,
}

impl FamilyStore {
    /// Create an empty store over the given species columns.
    pub fn new(species: Vec<String>) -> Self {
        let n = species.len();
        Self {
            species,
            families: Vec::new(),
            leaf_index: vec![None; n],
            error_models: Vec::new(),
            species_error: vec![None; n],
        }
    }

    /// Species column names
    pub fn species(&self) -> &[String] {
        &self.species
    }

    /// Number of families
    pub fn len(&self) -> usize {
        self.families.len()
    }

    /// True when no families are loaded
    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }

    /// Borrow all families
    pub fn families(&self) -> &[GeneFamily] {
        &self.families
    }

    /// Borrow one family
    pub fn family(&self, idx: usize) -> &GeneFamily {
        &self.families[idx]
    }

    /// Append a family; its count vector must match the species columns.
    pub fn add(&mut self, family: GeneFamily) -> Result<()> {
        if family.counts.len() != self.species.len() {
            return Err(RafeError::inconsistent(format!(
                "family {} has {} counts for {} species",
                family.id,
                family.counts.len(),
                self.species.len()
            )));
        }
        self.families.push(family);
        Ok(())
    }

    /// Largest count observed anywhere in the store
    pub fn max_observed(&self) -> u32 {
        self.families
            .iter()
            .flat_map(|f| f.counts.iter().copied())
            .max()
            .unwrap_or(0)
    }

    /// Iterate over every observed count
    pub fn observed_counts(&self) -> impl Iterator<Item = u32> + '_ {
        self.families.iter().flat_map(|f| f.counts.iter().copied())
    }

    /// Match each species column to a leaf of the tree (case-insensitive).
    pub fn set_species_index(&mut self, tree: &Phylogeny) -> Result<()> {
        let leaves = tree.leaves();
        for (col, species) in self.species.iter().enumerate() {
            let hit = leaves.iter().copied().find(|&leaf| {
                tree.node(leaf)
                    .name
                    .as_deref()
                    .is_some_and(|n| n.eq_ignore_ascii_case(species))
            });
            match hit {
                Some(leaf) => self.leaf_index[col] = Some(leaf),
                None => {
                    return Err(RafeError::inconsistent(format!(
                        "species '{}' from the family file is not a leaf of the tree",
                        species
                    )))
                }
            }
        }
        Ok(())
    }

    /// Tree leaf node for a species column, if indexed
    pub fn leaf_node(&self, col: usize) -> Option<usize> {
        self.leaf_index.get(col).copied().flatten()
    }

    /// Verify the store is usable against `tree`: every species indexed, and
    /// every index naming a leaf that still exists.
    pub fn sync_sanity_check(&self, tree: &Phylogeny) -> Result<()> {
        for (col, idx) in self.leaf_index.iter().enumerate() {
            match *idx {
                None => return Err(RafeError::NotSynchronized),
                Some(node) => {
                    if node >= tree.len() || !tree.is_leaf(node) {
                        return Err(RafeError::inconsistent(format!(
                            "species '{}' is indexed to node {} which is not a leaf",
                            self.species[col], node
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Counts of one family laid out per tree node id (`None` on internals
    /// and on leaves without a species column).
    pub fn counts_by_node(&self, family_idx: usize, n_nodes: usize) -> Result<Vec<Option<u32>>> {
        let family = &self.families[family_idx];
        let mut out = vec![None; n_nodes];
        for (col, &count) in family.counts.iter().enumerate() {
            let node = self.leaf_index[col].ok_or(RafeError::NotSynchronized)?;
            out[node] = Some(count);
        }
        Ok(out)
    }

    /// Attached error models laid out per tree node id.
    pub fn errors_by_node(&self, n_nodes: usize) -> Vec<Option<Arc<ErrorModel>>> {
        let mut out = vec![None; n_nodes];
        for (col, slot) in self.species_error.iter().enumerate() {
            if let (Some(model_idx), Some(node)) = (slot, self.leaf_index[col]) {
                out[node] = Some(Arc::clone(&self.error_models[*model_idx]));
            }
        }
        out
    }

    /// Attach an error model to one species, or to all species when
    /// `species` is `None`. A model with the same source file as an already
    /// loaded one is shared rather than duplicated.
    pub fn attach_error_model(
        &mut self,
        model: Arc<ErrorModel>,
        species: Option<&str>,
    ) -> Result<()> {
        let model_idx = match model.source().and_then(|src| {
            self.error_models
                .iter()
                .position(|m| m.source().is_some_and(|s| s.eq_ignore_ascii_case(src)))
        }) {
            Some(existing) => existing,
            None => {
                self.error_models.push(model);
                self.error_models.len() - 1
            }
        };

        match species {
            Some(name) => {
                let col = self
                    .species
                    .iter()
                    .position(|s| s.eq_ignore_ascii_case(name))
                    .ok_or_else(|| {
                        RafeError::inconsistent(format!(
                            "cannot attach error model: unknown species '{}'",
                            name
                        ))
                    })?;
                self.species_error[col] = Some(model_idx);
            }
            None => {
                for slot in &mut self.species_error {
                    *slot = Some(model_idx);
                }
            }
        }
        Ok(())
    }

    /// Detach the error model from one species.
    pub fn detach_error_model(&mut self, species: &str) {
        if let Some(col) = self
            .species
            .iter()
            .position(|s| s.eq_ignore_ascii_case(species))
        {
            self.species_error[col] = None;
        }
    }

    /// Detach every error model and drop the loaded set.
    pub fn detach_all_error_models(&mut self) {
        for slot in &mut self.species_error {
            *slot = None;
        }
        self.error_models.clear();
    }

    /// Error model attached to a species column, if any
    pub fn error_model_for(&self, col: usize) -> Option<&Arc<ErrorModel>> {
        self.species_error
            .get(col)
            .copied()
            .flatten()
            .map(|idx| &self.error_models[idx])
    }

    /// Replace a family's counts; used by misclassification simulation.
    pub(crate) fn set_counts(&mut self, family_idx: usize, counts: Vec<u32>) {
        debug_assert_eq!(counts.len(), self.species.len());
        self.families[family_idx].counts = counts;
    }
}
