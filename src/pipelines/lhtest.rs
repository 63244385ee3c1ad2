//! # Likelihood-Ratio Test Pipeline
//!
//! Fits the single-rate null and the configured richer model (branch
//! groups, separate death rate, or clusters) on the same data, and refers
//! twice the log-likelihood gain to a chi-squared distribution.

use std::fs::File;
use std::io::{BufWriter, Write};

use tracing::info;

use crate::config::Config;
use crate::error::{RafeError, Result};
use crate::model::cache::MatrixCache;
use crate::model::lhtest::likelihood_ratio;
use crate::model::prior::RootPrior;
use crate::model::rates::ParamLayout;
use crate::optimize::driver::{estimate_rates, RateObjective, SearchOptions};
use crate::optimize::fminsearch::SimplexOptions;

/// Run the likelihood-ratio test mode.
pub fn run(config: &Config) -> Result<()> {
    let tree = super::load_tree(&config.tree)?;
    let (store, range) = super::load_families(config, &tree)?;
    let (alt_layout, lambda_tree) = super::load_layout(config)?;

    let null_layout = ParamLayout::new(1, false);
    if alt_layout.n_params() <= null_layout.n_params() {
        return Err(RafeError::config(
            "the configured model adds no parameters over the single-rate null; \
             use --mu, --lambda-tree or --clusters",
        ));
    }

    let cache = MatrixCache::new(range.max);
    let prior = match config.poisson {
        Some(rate) => RootPrior::poisson(rate, range.max)?,
        None => RootPrior::empirical(&store, range.max)?,
    };
    let opts = SearchOptions {
        simplex: SimplexOptions::default(),
        max_runs: config.max_runs,
        seed: config.seed,
    };

    let null_objective =
        RateObjective::new(&tree, &store, None, null_layout, range, &cache, &prior)?;
    let null_fit = estimate_rates(&null_objective, &opts)?;
    info!(score = null_fit.minus_log_likelihood, "null model fitted");

    let alt_objective = RateObjective::new(
        &tree,
        &store,
        lambda_tree.as_ref(),
        alt_layout,
        range,
        &cache,
        &prior,
    )?;
    let alt_fit = estimate_rates(&alt_objective, &opts)?;
    info!(score = alt_fit.minus_log_likelihood, "alternative model fitted");

    let df = alt_layout.n_params() - null_layout.n_params();
    let lr = likelihood_ratio(
        -null_fit.minus_log_likelihood,
        -alt_fit.minus_log_likelihood,
        df,
    )?;
    info!(
        statistic = lr.statistic,
        df = lr.df,
        pvalue = lr.pvalue,
        "likelihood-ratio test finished"
    );

    let path = config.out.with_extension("lhtest.txt");
    let mut out = BufWriter::new(File::create(&path)?);
    writeln!(out, "Null score (-lnL):{}", null_fit.minus_log_likelihood)?;
    writeln!(out, "Null parameters:{:?}", null_fit.params)?;
    writeln!(out, "Alt score (-lnL):{}", alt_fit.minus_log_likelihood)?;
    writeln!(out, "Alt parameters:{:?}", alt_fit.params)?;
    writeln!(out, "2*dlnL:{}", lr.statistic)?;
    writeln!(out, "df:{}", lr.df)?;
    writeln!(out, "p-value:{}", lr.pvalue)?;
    Ok(())
}
