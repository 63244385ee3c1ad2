//! # Parameter Search Driver
//!
//! Turns a search vector into a scalar cost: decode per-node rates, refresh
//! the tree's transition matrices from the cache, evaluate every family's
//! likelihood in parallel, and return the negative total log-likelihood.
//! Infeasible vectors and numeric failures cost +infinity so the simplex
//! walks back out on its own; the search itself runs the simplex from
//! randomized restarts and keeps the best score seen.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::data::errormodel::ErrorModel;
use crate::data::family::FamilyStore;
use crate::data::tree::Phylogeny;
use crate::data::FamilySizeRange;
use crate::error::Result;
use crate::model::cache::MatrixCache;
use crate::model::likelihood::{prune_family, prune_family_clustered, PruneWorkspace};
use crate::model::posterior::family_log_likelihood;
use crate::model::prior::RootPrior;
use crate::model::rates::{ParamLayout, RateAssignment};
use crate::optimize::fminsearch::{minimize, SimplexOptions, SimplexResult};
use std::sync::Arc;

/// Restarted-search settings.
#[derive(Debug, Clone, Copy)]
pub struct SearchOptions {
    pub simplex: SimplexOptions,
    /// Randomized restarts before giving up (two successive runs agreeing
    /// within `tol_f` end the search early)
    pub max_runs: usize,
    pub seed: u64,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            simplex: SimplexOptions::default(),
            max_runs: 100,
            seed: 42,
        }
    }
}

/// Best result across restarts.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub best: SimplexResult,
    pub runs: usize,
    pub converged: bool,
}

/// Run the simplex from randomized starting points, keeping the best score.
/// The first run may use a caller-provided start. A search that exhausts
/// `max_runs` still returns its best-so-far with `converged = false`.
pub fn minimize_with_restarts(
    f: &mut dyn FnMut(&[f64]) -> f64,
    init: Option<&[f64]>,
    randomize: &mut dyn FnMut(&mut StdRng) -> Vec<f64>,
    opts: &SearchOptions,
) -> SearchOutcome {
    let mut rng = StdRng::seed_from_u64(opts.seed);
    let mut best: Option<SimplexResult> = None;
    let mut best_score = f64::INFINITY;
    let mut runs = 0;
    let mut converged = false;
    let max_runs = opts.max_runs.max(1);

    while !converged && runs < max_runs {
        let start = match (&best, init) {
            (None, Some(x0)) => x0.to_vec(),
            _ => randomize(&mut rng),
        };
        let result = minimize(f, &start, &opts.simplex);
        debug!(run = runs, score = result.fx, iters = result.iters, "simplex run finished");

        if runs > 0 && result.fx.is_finite() && (best_score - result.fx).abs() < opts.simplex.tol_f
        {
            converged = true;
        }
        if result.fx < best_score || best.is_none() {
            best_score = result.fx;
            best = Some(result);
        }
        runs += 1;
    }

    SearchOutcome {
        best: best.expect("at least one simplex run"),
        runs,
        converged,
    }
}

/// The -log L objective over families, with its per-family leaf bindings
/// prepared once.
pub struct RateObjective<'a> {
    tree: &'a Phylogeny,
    lambda_tree: Option<&'a Phylogeny>,
    layout: ParamLayout,
    range: FamilySizeRange,
    cache: &'a MatrixCache,
    prior: &'a RootPrior,
    /// per family, per node id
    counts: Vec<Vec<Option<u32>>>,
    /// per node id
    errors: Vec<Option<Arc<ErrorModel>>>,
}

impl<'a> RateObjective<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tree: &'a Phylogeny,
        store: &FamilyStore,
        lambda_tree: Option<&'a Phylogeny>,
        layout: ParamLayout,
        range: FamilySizeRange,
        cache: &'a MatrixCache,
        prior: &'a RootPrior,
    ) -> Result<Self> {
        store.sync_sanity_check(tree)?;
        let counts = (0..store.len())
            .map(|i| store.counts_by_node(i, tree.len()))
            .collect::<Result<Vec<_>>>()?;
        let errors = store.errors_by_node(tree.len());
        Ok(Self {
            tree,
            lambda_tree,
            layout,
            range,
            cache,
            prior,
            counts,
            errors,
        })
    }

    /// The search-vector layout
    pub fn layout(&self) -> ParamLayout {
        self.layout
    }

    /// Decode a search vector against this objective's trees
    pub fn decode(&self, params: &[f64]) -> Result<RateAssignment> {
        self.layout.decode(params, self.tree, self.lambda_tree)
    }

    /// Total log-likelihood of the data at a parameter vector.
    pub fn log_likelihood(&self, params: &[f64]) -> Result<f64> {
        let assignment = self.decode(params)?;
        let matrices = self.cache.apply_to_tree(self.tree, &assignment)?;
        let weights = assignment.clusters.as_ref().map(|c| c.weights.clone());

        let terms: Vec<f64> = self
            .counts
            .par_iter()
            .map_init(PruneWorkspace::new, |ws, counts| -> f64 {
                let root = match &weights {
                    None => prune_family(
                        self.tree, &matrices, counts, &self.errors, &self.range, ws,
                    ),
                    Some(w) => prune_family_clustered(
                        self.tree, &matrices, w, counts, &self.errors, &self.range, ws,
                    ),
                };
                match root {
                    Ok(root) => family_log_likelihood(&root, self.prior, self.range.root_min),
                    Err(_) => f64::NAN,
                }
            })
            .collect();

        // reduce in family-index order so the objective is deterministic
        let total: f64 = terms.iter().sum();
        if !total.is_finite() {
            return Err(crate::error::RafeError::numeric(format!(
                "non-finite log-likelihood {} at parameters {:?}",
                total, params
            )));
        }
        Ok(total)
    }

    /// Scalar cost for the simplex: -log L, +infinity on any violation.
    pub fn cost(&self, params: &[f64]) -> f64 {
        let assignment = match self.decode(params) {
            Ok(a) => a,
            Err(e) => {
                warn!("rejecting parameter vector: {}", e);
                return f64::INFINITY;
            }
        };
        if assignment.is_infeasible() {
            return f64::INFINITY;
        }
        match self.log_likelihood(params) {
            Ok(ln_l) => -ln_l,
            Err(e) => {
                debug!("infinite cost: {}", e);
                f64::INFINITY
            }
        }
    }
}

/// A finished rate search.
#[derive(Debug, Clone)]
pub struct RateFit {
    pub params: Vec<f64>,
    pub assignment: RateAssignment,
    pub minus_log_likelihood: f64,
    pub runs: usize,
    pub converged: bool,
}

/// Maximum-likelihood rates by restarted simplex search.
pub fn estimate_rates(objective: &RateObjective, opts: &SearchOptions) -> Result<RateFit> {
    let layout = objective.layout();
    let n_params = layout.n_params();
    let n_rate_params = n_params - if layout.k > 1 { layout.k - 1 } else { 0 };

    // random rates are scaled so lambda * depth stays order one
    let depth = objective.tree.max_root_to_leaf_length().max(1.0);
    let mut randomize = move |rng: &mut StdRng| -> Vec<f64> {
        (0..n_params)
            .map(|i| {
                if i < n_rate_params {
                    rng.gen::<f64>() / depth
                } else {
                    rng.gen::<f64>() / layout.k as f64
                }
            })
            .collect()
    };

    let mut f = |params: &[f64]| objective.cost(params);
    let outcome = minimize_with_restarts(&mut f, None, &mut randomize, opts);
    if !outcome.converged {
        warn!(
            runs = outcome.runs,
            score = outcome.best.fx,
            "rate search did not converge; reporting best parameters found"
        );
    }
    info!(
        score = outcome.best.fx,
        runs = outcome.runs,
        params = ?outcome.best.x,
        "rate search finished"
    );

    let assignment = objective.decode(&outcome.best.x)?;
    Ok(RateFit {
        params: outcome.best.x.clone(),
        assignment,
        minus_log_likelihood: outcome.best.fx,
        runs: outcome.runs,
        converged: outcome.converged,
    })
}
