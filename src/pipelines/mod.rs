//! # Pipelines Module (Orchestration)
//!
//! High-level workflow coordination: load inputs, run the model layer,
//! write outputs. Parallelism and progress logging live here.
//!
//! ## Sub-modules
//! - `estimate`: rate estimation, posterior/p-value pass, report
//! - `simulate`: forward simulation of synthetic families
//! - `lhtest`: likelihood-ratio test of nested models

pub mod estimate;
pub mod lhtest;
pub mod simulate;

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::data::family::FamilyStore;
use crate::data::tree::Phylogeny;
use crate::data::FamilySizeRange;
use crate::error::{RafeError, Result};
use crate::io::counts::read_counts_file;
use crate::io::errfile::read_error_model_file;
use crate::model::rates::ParamLayout;

/// Read and sanity-check the phylogeny.
pub(crate) fn load_tree(path: &Path) -> Result<Phylogeny> {
    let text = std::fs::read_to_string(path).map_err(|_| RafeError::FileNotFound {
        path: path.to_path_buf(),
    })?;
    let tree = Phylogeny::parse(&text)?;
    info!(
        nodes = tree.len(),
        leaves = tree.leaves().len(),
        depth = tree.max_root_to_leaf_length(),
        "loaded tree"
    );
    if !tree.is_ultrametric() {
        warn!("tree is not ultrametric; leaf depths differ");
    }
    Ok(tree)
}

/// Load the family store, index it against the tree, attach any configured
/// error model, and derive the family size range.
pub(crate) fn load_families(
    config: &Config,
    tree: &Phylogeny,
) -> Result<(FamilyStore, FamilySizeRange)> {
    let path = config
        .families
        .as_ref()
        .ok_or_else(|| RafeError::config("--families is required"))?;
    let mut store = read_counts_file(path)?;
    store.set_species_index(tree)?;
    store.sync_sanity_check(tree)?;

    let range = FamilySizeRange::from_observed(store.max_observed() as usize);
    info!(
        families = store.len(),
        species = store.species().len(),
        max_observed = store.max_observed(),
        family_max = range.max,
        root_max = range.root_max,
        "loaded families"
    );

    if let Some(model_path) = &config.errormodel {
        let model = read_error_model_file(model_path, range.max)?;
        store.attach_error_model(Arc::new(model), config.errormodel_species())?;
        info!(
            model = %model_path.display(),
            species = config.errormodel_species().unwrap_or("all"),
            "attached error model"
        );
    }
    Ok((store, range))
}

/// The configured parameter layout plus the loaded lambda tree.
pub(crate) fn load_layout(config: &Config) -> Result<(ParamLayout, Option<Phylogeny>)> {
    let lambda_tree = match &config.lambda_tree {
        None => None,
        Some(path) => Some(load_tree(path)?),
    };
    let n_groups = match &lambda_tree {
        None => 1,
        Some(lt) => {
            let max_tag = (0..lt.len())
                .map(|id| lt.node(id).taxon_group)
                .max()
                .unwrap_or(-1);
            (max_tag.max(0) as usize) + 1
        }
    };
    let layout = if config.clusters > 1 {
        ParamLayout::clustered(n_groups, config.clusters, config.fix_cluster0)
    } else {
        ParamLayout::new(n_groups, config.mu)
    };
    Ok((layout, lambda_tree))
}
