//! # Rafe Library
//!
//! Gene family size evolution along a phylogeny under a continuous-time
//! birth-death process: maximum-likelihood rate estimation, ancestral
//! size posteriors, and significance testing of family expansions and
//! contractions.
//!
//! ## Modules
//! - `config`: CLI argument parsing and validation
//! - `data`: trees, gene family stores, error models, size ranges
//! - `error`: Error types and result aliases
//! - `io`: file reading/writing (count tables, error models, reports)
//! - `model`: birth-death kernel, caches, pruning engine, posteriors
//! - `optimize`: simplex search, rate objective, error-model estimation
//! - `pipelines`: High-level workflow orchestration

pub mod config;
pub mod data;
pub mod error;
pub mod io;
pub mod model;
pub mod optimize;
pub mod pipelines;

// Re-export commonly used types
pub use config::{Config, Mode};
pub use data::{ErrorModel, FamilySizeRange, FamilyStore, GeneFamily, PhyloNode, Phylogeny};
pub use error::{RafeError, Result};
pub use model::birthdeath::DeathRate;
pub use model::cache::MatrixCache;
pub use model::likelihood::PruneWorkspace;
pub use model::prior::RootPrior;
pub use model::rates::ParamLayout;
pub use optimize::driver::{RateFit, RateObjective, SearchOptions};
