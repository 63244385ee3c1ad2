//! # Result Report
//!
//! Text report of a finished analysis: the fitted rate parameters, the
//! search score, and one line per family with its size-annotated tree,
//! family-wide p-value and MAP root size.

use std::io::Write;

use crate::error::Result;

/// Header block of a report.
#[derive(Debug, Clone)]
pub struct ReportSummary {
    pub newick: String,
    pub lambda: Vec<f64>,
    pub mu: Vec<f64>,
    pub cluster_weights: Vec<f64>,
    pub minus_log_likelihood: f64,
    pub search_runs: usize,
    pub search_converged: bool,
    pub pvalue_threshold: f64,
}

/// One family's line in the report.
#[derive(Debug, Clone)]
pub struct FamilyReport {
    pub id: String,
    /// Newick annotated with per-node MAP sizes
    pub annotated_newick: String,
    pub pvalue: f64,
    pub map_root: usize,
    /// Cut p-values of internal branches, in postorder, when computed
    pub cut_pvalues: Vec<f64>,
}

/// Write the full report.
pub fn write_report<W: Write>(
    out: &mut W,
    summary: &ReportSummary,
    rows: &[FamilyReport],
) -> Result<()> {
    writeln!(out, "Tree:{}", summary.newick)?;
    writeln!(out, "Lambda:{}", join(&summary.lambda))?;
    if !summary.mu.is_empty() {
        writeln!(out, "Mu:{}", join(&summary.mu))?;
    }
    if !summary.cluster_weights.is_empty() {
        writeln!(out, "Cluster weights:{}", join(&summary.cluster_weights))?;
    }
    writeln!(out, "Score (-lnL):{}", summary.minus_log_likelihood)?;
    writeln!(
        out,
        "Search:{} runs, {}",
        summary.search_runs,
        if summary.search_converged {
            "converged"
        } else {
            "best-so-far (no convergence)"
        }
    )?;
    writeln!(out, "P-value threshold:{}", summary.pvalue_threshold)?;

    writeln!(out, "ID\tNewick\tFamily-wide P-value\tRoot size\tBranch cut P-values")?;
    for row in rows {
        let flag = if row.pvalue < summary.pvalue_threshold {
            "*"
        } else {
            ""
        };
        writeln!(
            out,
            "{}\t{}\t{}{}\t{}\t{}",
            row.id,
            row.annotated_newick,
            row.pvalue,
            flag,
            row.map_root,
            if row.cut_pvalues.is_empty() {
                "-".to_string()
            } else {
                join(&row.cut_pvalues)
            }
        )?;
    }
    Ok(())
}

fn join(values: &[f64]) -> String {
    values
        .iter()
        .map(f64::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
