//! # Family Count Files
//!
//! Tab-separated gene counts: a header `Desc<TAB>Family ID<TAB>species...`
//! followed by one line per family with a description, an id, and one
//! non-negative integer per species.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use crate::data::family::{FamilyStore, GeneFamily};
use crate::error::{RafeError, Result};

/// Parse a family count table.
pub fn read_counts<R: BufRead>(reader: R) -> Result<FamilyStore> {
    let mut lines = reader.lines().enumerate();

    let (_, header) = lines
        .next()
        .ok_or_else(|| RafeError::parse(1, "empty family count file"))?;
    let header = header?;
    let columns: Vec<&str> = header.trim_end().split('\t').collect();
    if columns.len() < 3 {
        return Err(RafeError::parse(
            1,
            "header must be Desc<TAB>Family ID<TAB>species...",
        ));
    }
    let species: Vec<String> = columns[2..].iter().map(|s| s.trim().to_string()).collect();
    let mut store = FamilyStore::new(species);

    for (idx, line) in lines {
        let line_no = idx + 1;
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.trim_end().split('\t').collect();
        if fields.len() != columns.len() {
            return Err(RafeError::parse(
                line_no,
                format!(
                    "expected {} tab-separated fields, found {}",
                    columns.len(),
                    fields.len()
                ),
            ));
        }
        let counts = fields[2..]
            .iter()
            .map(|f| {
                f.trim().parse::<u32>().map_err(|_| {
                    RafeError::parse(line_no, format!("invalid count '{}'", f.trim()))
                })
            })
            .collect::<Result<Vec<u32>>>()?;
        store.add(GeneFamily::new(fields[1].trim(), fields[0].trim(), counts))?;
    }
    Ok(store)
}

/// Read a family count file from disk.
pub fn read_counts_file(path: &Path) -> Result<FamilyStore> {
    let file = File::open(path).map_err(|_| RafeError::FileNotFound {
        path: path.to_path_buf(),
    })?;
    read_counts(BufReader::new(file))
}

/// Write the store back out in the count-file format.
pub fn write_species_counts<W: Write>(store: &FamilyStore, out: &mut W) -> Result<()> {
    write!(out, "Desc\tFamily ID")?;
    for species in store.species() {
        write!(out, "\t{}", species)?;
    }
    writeln!(out)?;
    for family in store.families() {
        write!(out, "{}\t{}", family.desc, family.id)?;
        for count in &family.counts {
            write!(out, "\t{}", count)?;
        }
        writeln!(out)?;
    }
    Ok(())
}
