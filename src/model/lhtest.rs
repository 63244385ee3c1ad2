//! # Likelihood-Ratio Testing
//!
//! Compares nested birth-death fits: twice the log-likelihood gain of the
//! richer model is referred to a chi-squared distribution with as many
//! degrees of freedom as the parameter-count difference.

use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::error::{RafeError, Result};

/// One likelihood-ratio comparison.
#[derive(Debug, Clone, Copy)]
pub struct LikelihoodRatio {
    /// 2 * (lnL_alt - lnL_null), clamped at zero
    pub statistic: f64,
    pub df: usize,
    pub pvalue: f64,
}

/// Survival function of the chi-squared distribution.
pub fn chi2_survival(x: f64, df: usize) -> Result<f64> {
    if df == 0 {
        return Err(RafeError::config(
            "likelihood-ratio test needs at least one degree of freedom",
        ));
    }
    let dist = ChiSquared::new(df as f64)
        .map_err(|e| RafeError::numeric(format!("chi-squared setup failed: {}", e)))?;
    Ok(dist.sf(x.max(0.0)))
}

/// Test the alternative fit against the null fit.
pub fn likelihood_ratio(ln_null: f64, ln_alt: f64, df: usize) -> Result<LikelihoodRatio> {
    if !ln_null.is_finite() || !ln_alt.is_finite() {
        return Err(RafeError::numeric(format!(
            "non-finite log-likelihoods in ratio test: null {} alt {}",
            ln_null, ln_alt
        )));
    }
    let statistic = (2.0 * (ln_alt - ln_null)).max(0.0);
    let pvalue = chi2_survival(statistic, df)?;
    Ok(LikelihoodRatio {
        statistic,
        df,
        pvalue,
    })
}
