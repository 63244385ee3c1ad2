//! # Data Model
//!
//! In-memory representations: the phylogeny, the gene family store, the
//! observation error model, and the family size range shared by every
//! likelihood evaluation.

pub mod errormodel;
pub mod family;
pub mod tree;

pub use errormodel::ErrorModel;
pub use family::{FamilyStore, GeneFamily};
pub use tree::{PhyloNode, Phylogeny};

use crate::error::{RafeError, Result};

/// Size bounds for family-size probability vectors.
///
/// Vectors over sizes are indexed `0..=max`; root vectors are indexed
/// `root_min..=root_max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FamilySizeRange {
    pub min: usize,
    pub max: usize,
    pub root_min: usize,
    pub root_max: usize,
}

impl FamilySizeRange {
    /// Build a range from explicit bounds.
    pub fn new(min: usize, max: usize, root_min: usize, root_max: usize) -> Result<Self> {
        let range = Self {
            min,
            max,
            root_min,
            root_max,
        };
        range.validate()?;
        Ok(range)
    }

    /// Derive bounds from the largest observed family size, leaving headroom
    /// for ancestral sizes above anything observed.
    pub fn from_observed(max_observed: usize) -> Self {
        Self {
            min: 0,
            max: (max_observed * 3 / 2).max(60),
            root_min: 1,
            root_max: (max_observed * 5 / 4).max(30),
        }
    }

    /// Check the internal ordering invariants.
    pub fn validate(&self) -> Result<()> {
        if self.min > self.max {
            return Err(RafeError::inconsistent(format!(
                "family size range min {} exceeds max {}",
                self.min, self.max
            )));
        }
        if self.root_min < self.min || self.root_min > self.root_max {
            return Err(RafeError::inconsistent(format!(
                "root size range {}..{} is not nested in {}..{}",
                self.root_min, self.root_max, self.min, self.max
            )));
        }
        Ok(())
    }

    /// Number of root sizes covered
    pub fn n_root_sizes(&self) -> usize {
        self.root_max - self.root_min + 1
    }
}
