//! # I/O Module
//!
//! File reading/writing boundaries. Converts between the line-oriented
//! disk formats (family count tables, error model files, reports) and the
//! in-memory stores.

pub mod counts;
pub mod errfile;
pub mod report;
