//! # Configuration Logic
//!
//! CLI argument parsing and validation using clap derive.

use clap::Parser;
use std::path::PathBuf;

use crate::error::{RafeError, Result};

/// Rafe: gene family evolution analysis by birth-death maximum likelihood
#[derive(Parser, Debug, Clone)]
#[command(name = "rafe")]
#[command(version = "0.1.0")]
#[command(about = "Gene family evolution analysis by birth-death maximum likelihood", long_about = None)]
pub struct Config {
    // ============ Data Parameters ============
    /// Newick tree with branch lengths (optional [group] annotations)
    #[arg(long, value_name = "FILE")]
    pub tree: PathBuf,

    /// Tab-separated family count file (Desc, Family ID, one column per species)
    #[arg(long, value_name = "FILE")]
    pub families: Option<PathBuf>,

    /// Output file prefix
    #[arg(long, short, value_name = "PREFIX", default_value = "rafe")]
    pub out: PathBuf,

    // ============ Model Parameters ============
    /// Estimate a death rate independently of the birth rate
    #[arg(long, default_value = "false")]
    pub mu: bool,

    /// Fix the birth rate instead of estimating it
    #[arg(long, value_name = "RATE")]
    pub lambda: Option<f64>,

    /// Lambda tree: same topology, [group] annotations partition branches
    /// into rate groups
    #[arg(long = "lambda-tree", value_name = "FILE")]
    pub lambda_tree: Option<PathBuf>,

    /// Number of latent rate clusters
    #[arg(long = "clusters", short = 'k', default_value = "1")]
    pub clusters: usize,

    /// Pin cluster 0 to birth rate zero (extinction-only cluster)
    #[arg(long = "fix-cluster0", default_value = "false")]
    pub fix_cluster0: bool,

    /// Poisson root prior with this rate (default: empirical fit)
    #[arg(long, value_name = "RATE")]
    pub poisson: Option<f64>,

    // ============ Error Model ============
    /// Observation error model file
    #[arg(long, value_name = "FILE")]
    pub errormodel: Option<PathBuf>,

    /// Species the error model applies to ("all" for every species)
    #[arg(long = "errormodel-species", value_name = "NAME", default_value = "all")]
    pub errormodel_species: String,

    // ============ Modes ============
    /// Simulate this many families instead of estimating
    #[arg(long, value_name = "N")]
    pub simulate: Option<usize>,

    /// Run a likelihood-ratio test of the configured model against the
    /// single-rate null
    #[arg(long, default_value = "false")]
    pub lhtest: bool,

    // ============ Monte Carlo ============
    /// Simulations per root size for conditional distributions
    #[arg(long, default_value = "1000")]
    pub trials: usize,

    /// Report significance threshold on family p-values
    #[arg(long, default_value = "0.01")]
    pub pvalue: f64,

    /// Compute per-branch cut p-values (expensive)
    #[arg(long = "cut-pvalues", default_value = "false")]
    pub cut_pvalues: bool,

    // ============ General Parameters ============
    /// Random seed for reproducibility
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Number of threads (default: all available cores)
    #[arg(long)]
    pub nthreads: Option<usize>,

    /// Randomized simplex restarts before giving up
    #[arg(long = "max-runs", default_value = "100")]
    pub max_runs: usize,
}

/// Which pipeline a configuration selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Estimate,
    Simulate,
    LhTest,
}

impl Config {
    /// Parse command line arguments and validate
    pub fn parse_and_validate() -> Result<Self> {
        let config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if !self.tree.exists() {
            return Err(RafeError::FileNotFound {
                path: self.tree.clone(),
            });
        }
        if let Some(path) = &self.families {
            if !path.exists() {
                return Err(RafeError::FileNotFound { path: path.clone() });
            }
        }
        if let Some(path) = &self.lambda_tree {
            if !path.exists() {
                return Err(RafeError::FileNotFound { path: path.clone() });
            }
        }
        if let Some(path) = &self.errormodel {
            if !path.exists() {
                return Err(RafeError::FileNotFound { path: path.clone() });
            }
        }

        if self.clusters == 0 {
            return Err(RafeError::config("clusters must be at least 1"));
        }
        if self.clusters > 1 && self.mu {
            return Err(RafeError::config(
                "latent clusters and a separate death rate cannot be combined",
            ));
        }
        if !(0.0..1.0).contains(&self.pvalue) || self.pvalue <= 0.0 {
            return Err(RafeError::config(
                "the p-value threshold must lie strictly between 0 and 1",
            ));
        }
        if self.trials == 0 {
            return Err(RafeError::config("trials must be positive"));
        }
        if self.max_runs == 0 {
            return Err(RafeError::config("max-runs must be positive"));
        }

        match self.mode() {
            Mode::Simulate => {
                if self.lambda.is_none() {
                    return Err(RafeError::config(
                        "simulation needs a fixed birth rate (--lambda)",
                    ));
                }
                if self.families.is_none() && self.poisson.is_none() {
                    return Err(RafeError::config(
                        "simulation needs either --families (empirical prior) or --poisson",
                    ));
                }
            }
            Mode::Estimate | Mode::LhTest => {
                if self.families.is_none() {
                    return Err(RafeError::config("--families is required"));
                }
            }
        }
        Ok(())
    }

    /// Selected pipeline
    pub fn mode(&self) -> Mode {
        if self.simulate.is_some() {
            Mode::Simulate
        } else if self.lhtest {
            Mode::LhTest
        } else {
            Mode::Estimate
        }
    }

    /// Get the number of threads to use
    pub fn nthreads(&self) -> usize {
        self.nthreads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    /// Species filter for error-model attachment (`None` means all)
    pub fn errormodel_species(&self) -> Option<&str> {
        if self.errormodel_species.eq_ignore_ascii_case("all") {
            None
        } else {
            Some(self.errormodel_species.as_str())
        }
    }
}
