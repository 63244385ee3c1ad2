//! # Application Entry Point
//!
//! Initializes logging, parses the CLI configuration, sizes the global
//! rayon pool, and dispatches to the selected pipeline.

use anyhow::Context;
use tracing::error;
use tracing_subscriber::EnvFilter;

use rafe::config::{Config, Mode};
use rafe::pipelines;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    if let Err(err) = run() {
        error!("{:#}", err);
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let config = Config::parse_and_validate().context("invalid configuration")?;

    rayon::ThreadPoolBuilder::new()
        .num_threads(config.nthreads())
        .thread_name(|i| format!("rafe-worker-{}", i))
        .build_global()
        .context("failed to build the thread pool")?;

    match config.mode() {
        Mode::Estimate => pipelines::estimate::run(&config)?,
        Mode::Simulate => pipelines::simulate::run(&config)?,
        Mode::LhTest => pipelines::lhtest::run(&config)?,
    }
    Ok(())
}
