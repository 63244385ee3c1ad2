//! # Estimation Pipeline
//!
//! The default workflow: fit birth (and optionally death) rates by
//! restarted simplex search, then run the posterior layer per family -
//! root posterior, family-wide p-value against simulated conditional
//! distributions, MAP ancestral sizes - and write the text report.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufWriter;

use tracing::info;

use crate::config::Config;
use crate::data::tree::Phylogeny;
use crate::error::Result;
use crate::io::report::{write_report, FamilyReport, ReportSummary};
use crate::model::cache::MatrixCache;
use crate::model::conditional::conditional_distribution;
use crate::model::likelihood::{prune_family, PruneWorkspace};
use crate::model::posterior::compute_posterior;
use crate::model::prior::RootPrior;
use crate::model::pvalue::{branch_cut_pvalues, family_pvalues};
use crate::model::rates::{NodeRates, ParamLayout, RateAssignment};
use crate::model::viterbi::viterbi_map;
use crate::optimize::driver::{estimate_rates, RateFit, RateObjective, SearchOptions};
use crate::optimize::fminsearch::SimplexOptions;

/// Run estimation and reporting.
pub fn run(config: &Config) -> Result<()> {
    let tree = super::load_tree(&config.tree)?;
    let (store, range) = super::load_families(config, &tree)?;
    let (layout, lambda_tree) = super::load_layout(config)?;

    let cache = MatrixCache::new(range.max);
    let prior = match config.poisson {
        Some(rate) => RootPrior::poisson(rate, range.max)?,
        None => RootPrior::empirical(&store, range.max)?,
    };

    let objective = RateObjective::new(
        &tree,
        &store,
        lambda_tree.as_ref(),
        layout,
        range,
        &cache,
        &prior,
    )?;

    let fit = match config.lambda {
        Some(rate) => fixed_rate_fit(&objective, layout, rate)?,
        None => {
            let opts = SearchOptions {
                simplex: SimplexOptions::default(),
                max_runs: config.max_runs,
                seed: config.seed,
            };
            estimate_rates(&objective, &opts)?
        }
    };
    info!(
        score = fit.minus_log_likelihood,
        converged = fit.converged,
        "model fitted"
    );

    // posterior pass under the fitted rates; clustered fits fall back to
    // their dominant cluster for reconstruction and p-values
    let effective = effective_assignment(&fit.assignment);
    let matrices = cache.apply_to_tree(&tree, &effective)?;
    let cd = conditional_distribution(&tree, &matrices, &range, config.trials, config.seed)?;

    let mut ws = PruneWorkspace::new();
    let errors = store.errors_by_node(tree.len());
    let postorder = tree.postorder();
    let mut rows = Vec::with_capacity(store.len());
    for family_idx in 0..store.len() {
        let counts = store.counts_by_node(family_idx, tree.len())?;
        let root_like = prune_family(&tree, &matrices, &counts, &errors, &range, &mut ws)?;
        let posterior = compute_posterior(&root_like, &prior, range.root_min)?;
        let pvalues = family_pvalues(&root_like, &cd);
        let viterbi = viterbi_map(&tree, &matrices, &ws, &prior, &range)?;

        let annotated = tree.to_newick_with(|id| Some(viterbi.map_sizes[id].to_string()));

        let cut = if config.cut_pvalues {
            let by_species: HashMap<String, u32> = store
                .species()
                .iter()
                .cloned()
                .zip(store.family(family_idx).counts.iter().copied())
                .collect();
            let global = global_rates(&effective, &tree);
            let per_node = branch_cut_pvalues(
                &tree,
                &cache,
                global,
                &range,
                &by_species,
                config.trials,
                config.seed.wrapping_add(family_idx as u64),
            )?;
            postorder
                .iter()
                .filter_map(|&id| per_node[id])
                .collect()
        } else {
            Vec::new()
        };

        rows.push(FamilyReport {
            id: store.family(family_idx).id.clone(),
            annotated_newick: annotated,
            pvalue: pvalues.max,
            map_root: posterior.map_root,
            cut_pvalues: cut,
        });
    }

    let summary = build_summary(config, &tree, layout, &fit);
    let path = config.out.with_extension("report.txt");
    let mut out = BufWriter::new(File::create(&path)?);
    write_report(&mut out, &summary, &rows)?;
    info!(report = %path.display(), "report written");
    Ok(())
}

/// Evaluate the objective at a caller-fixed rate instead of searching.
fn fixed_rate_fit(objective: &RateObjective, layout: ParamLayout, rate: f64) -> Result<RateFit> {
    let n = layout.n_params();
    let n_weights = if layout.k > 1 { layout.k - 1 } else { 0 };
    let params: Vec<f64> = (0..n)
        .map(|i| {
            if i < n - n_weights {
                rate
            } else {
                1.0 / layout.k as f64
            }
        })
        .collect();
    let minus_log_likelihood = -objective.log_likelihood(&params)?;
    Ok(RateFit {
        assignment: objective.decode(&params)?,
        params,
        minus_log_likelihood,
        runs: 0,
        converged: true,
    })
}

/// A single-rate-per-node view of a fit: clustered assignments collapse to
/// their highest-weight cluster.
fn effective_assignment(assignment: &RateAssignment) -> RateAssignment {
    match &assignment.clusters {
        None => assignment.clone(),
        Some(clusters) => {
            let best = clusters
                .weights
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)
                .unwrap_or(0);
            RateAssignment {
                per_node: clusters.per_node.iter().map(|c| c[best]).collect(),
                clusters: None,
            }
        }
    }
}

/// The rates of the first non-root node, used as the uniform model for
/// branch cutting.
fn global_rates(assignment: &RateAssignment, tree: &Phylogeny) -> NodeRates {
    let id = (0..tree.len())
        .find(|&id| id != tree.root())
        .unwrap_or(tree.root());
    assignment.per_node[id]
}

fn build_summary(
    config: &Config,
    tree: &Phylogeny,
    layout: ParamLayout,
    fit: &RateFit,
) -> ReportSummary {
    let mut lambda = Vec::new();
    let mut mu = Vec::new();
    let mut cluster_weights = Vec::new();

    if layout.k > 1 {
        let n_weights = layout.k - 1;
        let split = fit.params.len() - n_weights;
        lambda.extend_from_slice(&fit.params[..split]);
        cluster_weights.extend_from_slice(&fit.params[split..]);
        cluster_weights.push(1.0 - fit.params[split..].iter().sum::<f64>());
    } else if layout.estimate_death {
        for pair in fit.params.chunks(2) {
            lambda.push(pair[0]);
            mu.push(pair[1]);
        }
    } else {
        lambda.extend_from_slice(&fit.params);
    }

    ReportSummary {
        newick: tree.to_newick(),
        lambda,
        mu,
        cluster_weights,
        minus_log_likelihood: fit.minus_log_likelihood,
        search_runs: fit.runs,
        search_converged: fit.converged,
        pvalue_threshold: config.pvalue,
    }
}
