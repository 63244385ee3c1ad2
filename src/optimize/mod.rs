//! # Optimization Module
//!
//! Derivative-free parameter search: the Nelder-Mead simplex, the rate
//! objective driving it, and misclassification-model estimation.

pub mod driver;
pub mod errorest;
pub mod fminsearch;
