//! # Error Model Files
//!
//! Text format for misclassification matrices:
//!
//! ```text
//! maxcnt:68
//! cntdiff -1 0 1
//! 0 0.0 0.8 0.2
//! 1 0.2 0.6 0.2
//! ...
//! ```
//!
//! `cntdiff` lists the signed observed-minus-true offsets covered by the
//! columns of the following rows; each row gives the error distribution for
//! one true count. Omitted true counts inherit the previous row's
//! distribution, so writing after reading canonicalizes a sparse file.
//! Cells that would fall outside `0..=maxcnt` are written as `#nan` and
//! skipped when reading.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use crate::data::errormodel::ErrorModel;
use crate::error::{RafeError, Result};

/// Parse an error model. `min_max_size` (typically the family range max)
/// widens the matrix when it exceeds the file's `maxcnt`.
pub fn read_error_model<R: BufRead>(reader: R, min_max_size: usize) -> Result<ErrorModel> {
    let mut lines = reader.lines().enumerate();

    let (_, first) = lines
        .next()
        .ok_or_else(|| RafeError::parse(1, "empty error model file"))?;
    let first = first?;
    let file_max = parse_maxcnt(&first)?;
    let max_size = file_max.max(min_max_size);

    let (_, second) = lines
        .next()
        .ok_or_else(|| RafeError::parse(2, "error model file has no cntdiff line"))?;
    let second = second?;
    let diffs = parse_cntdiff(&second)?;
    let (from_diff, to_diff) = (diffs[0], *diffs.last().expect("nonempty cntdiff"));
    if from_diff > to_diff {
        return Err(RafeError::parse(2, "cntdiff offsets must be ascending"));
    }

    let mut model = ErrorModel::new(max_size, from_diff, to_diff);
    let mut next_row = 0usize;
    for (idx, line) in lines {
        let line_no = idx + 1;
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() != (to_diff - from_diff + 2) as usize {
            return Err(RafeError::parse(
                line_no,
                format!(
                    "expected {} fields for true count plus one per offset, found {}",
                    to_diff - from_diff + 2,
                    tokens.len()
                ),
            ));
        }
        let row: usize = tokens[0]
            .parse()
            .map_err(|_| RafeError::parse(line_no, format!("invalid true count '{}'", tokens[0])))?;
        if row < next_row {
            return Err(RafeError::parse(
                line_no,
                format!("true count {} out of order", row),
            ));
        }
        if row > max_size {
            continue;
        }
        if next_row == 0 && row != 0 {
            return Err(RafeError::parse(
                line_no,
                "the first error row must cover true count 0",
            ));
        }
        // missing rows inherit the previous distribution
        while next_row < row {
            model.inherit_column(next_row - 1, next_row);
            next_row += 1;
        }
        for (k, diff) in (from_diff..=to_diff).enumerate() {
            let obs = row as i64 + diff as i64;
            if (0..=max_size as i64).contains(&obs) {
                let value: f64 = tokens[k + 1].parse().map_err(|_| {
                    RafeError::parse(line_no, format!("invalid probability '{}'", tokens[k + 1]))
                })?;
                model.set(obs as usize, row, value);
            }
        }
        next_row = row + 1;
    }
    if next_row == 0 {
        return Err(RafeError::parse(3, "error model file has no data rows"));
    }
    while next_row <= max_size {
        model.inherit_column(next_row - 1, next_row);
        next_row += 1;
    }

    model.validate_column_sums()?;
    Ok(model)
}

/// Read and validate an error model file, recording its source path.
pub fn read_error_model_file(path: &Path, min_max_size: usize) -> Result<ErrorModel> {
    let file = File::open(path).map_err(|_| RafeError::FileNotFound {
        path: path.to_path_buf(),
    })?;
    let mut model = read_error_model(BufReader::new(file), min_max_size)?;
    model.set_source(path.to_string_lossy());
    Ok(model)
}

/// Write a model in canonical form: every row present.
pub fn write_error_model<W: Write>(model: &ErrorModel, out: &mut W) -> Result<()> {
    writeln!(out, "maxcnt:{}", model.max_size())?;
    write!(out, "cntdiff")?;
    for diff in model.from_diff()..=model.to_diff() {
        write!(out, " {}", diff)?;
    }
    writeln!(out)?;
    for truth in 0..=model.max_size() {
        write!(out, "{}", truth)?;
        for diff in model.from_diff()..=model.to_diff() {
            let obs = truth as i64 + diff as i64;
            if (0..=model.max_size() as i64).contains(&obs) {
                write!(out, " {}", model.p_observed_given_true(obs as usize, truth))?;
            } else {
                write!(out, " #nan")?;
            }
        }
        writeln!(out)?;
    }
    Ok(())
}

fn parse_maxcnt(line: &str) -> Result<usize> {
    let rest = line
        .trim()
        .strip_prefix("maxcnt")
        .ok_or_else(|| RafeError::parse(1, "error model file must start with 'maxcnt:'"))?;
    let rest = rest.trim_start().strip_prefix(':').unwrap_or(rest);
    rest.trim()
        .parse()
        .map_err(|_| RafeError::parse(1, format!("invalid maxcnt '{}'", rest.trim())))
}

fn parse_cntdiff(line: &str) -> Result<Vec<i32>> {
    let mut tokens = line.split_whitespace();
    if tokens.next() != Some("cntdiff") {
        return Err(RafeError::parse(2, "second line must start with 'cntdiff'"));
    }
    let diffs = tokens
        .map(|t| {
            t.parse::<i32>()
                .map_err(|_| RafeError::parse(2, format!("invalid offset '{}'", t)))
        })
        .collect::<Result<Vec<i32>>>()?;
    if diffs.is_empty() {
        return Err(RafeError::parse(2, "cntdiff lists no offsets"));
    }
    Ok(diffs)
}
