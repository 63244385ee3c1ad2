//! # Simulation Pipeline
//!
//! Generates synthetic families: a root size drawn from the prior, a
//! forward pass down the tree through the birth-death matrices, and one
//! count file row per simulated family. With an error model configured,
//! the true leaf counts are additionally pushed through misclassification
//! before writing.

use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use crate::config::Config;
use crate::data::family::{FamilyStore, GeneFamily};
use crate::data::FamilySizeRange;
use crate::error::{RafeError, Result};
use crate::io::counts::write_species_counts;
use crate::io::errfile::read_error_model_file;
use crate::model::cache::MatrixCache;
use crate::model::prior::RootPrior;
use crate::model::rates::ParamLayout;
use crate::model::simulate::{random_family_sizes, sample_index, simulate_misclassification};

/// Run the simulation mode.
pub fn run(config: &Config) -> Result<()> {
    let n_families = config
        .simulate
        .ok_or_else(|| RafeError::config("simulation mode needs --simulate"))?;
    let rate = config
        .lambda
        .ok_or_else(|| RafeError::config("simulation needs a fixed birth rate (--lambda)"))?;

    let tree = super::load_tree(&config.tree)?;
    let species: Vec<String> = tree
        .leaves()
        .iter()
        .enumerate()
        .map(|(i, &leaf)| {
            tree.node(leaf)
                .name
                .clone()
                .unwrap_or_else(|| format!("taxon{}", i))
        })
        .collect();

    let (prior, range) = match &config.families {
        Some(_) => {
            let (store, range) = super::load_families(config, &tree)?;
            (RootPrior::empirical(&store, range.max)?, range)
        }
        None => {
            let poisson = config
                .poisson
                .ok_or_else(|| RafeError::config("simulation needs --families or --poisson"))?;
            let spread = (poisson + 4.0 * poisson.sqrt()).ceil() as usize;
            let range = FamilySizeRange::from_observed(spread);
            (RootPrior::poisson(poisson, range.max)?, range)
        }
    };

    let cache = MatrixCache::new(range.max);
    let assignment = ParamLayout::new(1, false).decode(&[rate], &tree, None)?;
    let matrices = cache.apply_to_tree(&tree, &assignment)?;

    let leaves = tree.leaves();
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut store = FamilyStore::new(species);
    for i in 0..n_families {
        let root_size = sample_index(prior.probs(), &mut rng) as u32;
        let sizes = random_family_sizes(&tree, &matrices, root_size, &mut rng)?;
        let counts: Vec<u32> = leaves.iter().map(|&leaf| sizes[leaf]).collect();
        store.add(GeneFamily::new(
            format!("SIM{:05}", i),
            format!("root{}", root_size),
            counts,
        ))?;
    }

    if let Some(model_path) = &config.errormodel {
        store.set_species_index(&tree)?;
        let model = read_error_model_file(model_path, range.max)?;
        store.attach_error_model(Arc::new(model), config.errormodel_species())?;
        simulate_misclassification(&mut store, &mut rng)?;
        info!("applied misclassification to simulated counts");
    }

    let path = config.out.with_extension("simulated.tsv");
    let mut out = BufWriter::new(File::create(&path)?);
    write_species_counts(&store, &mut out)?;
    info!(
        families = n_families,
        output = %path.display(),
        "simulation written"
    );
    Ok(())
}
