// src/process/lookup.rs
use anyhow::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

use super::utils::file_stem_of;
use crate::error::PrepError;
use crate::table::{read_table, write_table, ReadOptions, Table, WriteOptions};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub total: usize,
    pub matched: usize,
}

fn check_id_column(t: &Table, label: &str) -> Result<(), PrepError> {
    match t.headers.first() {
        Some(h) if h.trim().trim_start_matches('\u{feff}').eq_ignore_ascii_case("ID") => Ok(()),
        _ => Err(PrepError::MissingIdColumn(label.to_string())),
    }
}

/// Append `fields` from `original` to every row of `final_table`, joined on
/// the first column of each (which must be `ID`). Unmatched rows get blanks.
/// When an ID repeats in `original`, its last row wins.
pub fn merge_lookup(
    final_table: &Table,
    original: &Table,
    fields: &[String],
) -> Result<(Table, MergeStats), PrepError> {
    check_id_column(final_table, "final")?;
    check_id_column(original, "original")?;
    let field_idx: Vec<usize> = fields
        .iter()
        .map(|f| original.require_column(f))
        .collect::<Result<_, _>>()?;

    let mut by_id: HashMap<&str, &[String]> = HashMap::new();
    for row in &original.rows {
        let id = row[0].trim();
        if !id.is_empty() {
            by_id.insert(id, row);
        }
    }

    let mut merged = final_table.clone();
    let hits: Vec<Option<&[String]>> = merged
        .rows
        .iter()
        .map(|r| by_id.get(r[0].trim()).copied())
        .collect();
    let matched = hits.iter().filter(|h| h.is_some()).count();

    for (field, &src) in fields.iter().zip(&field_idx) {
        let mut i = 0;
        merged.set_column_with(field, |_| {
            let v = hits[i].map(|r| r[src].clone()).unwrap_or_default();
            i += 1;
            v
        });
    }

    let stats = MergeStats {
        total: merged.len(),
        matched,
    };
    Ok((merged, stats))
}

/// File-level merge; writes `<final stem>_MERGED.csv` next to `final_path`.
#[instrument(level = "info", skip_all, fields(final_file = %final_path.display()))]
pub fn merge_lookup_files(
    final_path: &Path,
    original_path: &Path,
    fields: &[String],
) -> Result<(PathBuf, MergeStats)> {
    let final_table = read_table(final_path, &ReadOptions::default())?;
    let original = read_table(original_path, &ReadOptions::default())?;
    let (merged, stats) = merge_lookup(&final_table, &original, fields)?;
    let out = final_path.with_file_name(format!("{}_MERGED.csv", file_stem_of(final_path)));
    write_table(&merged, &out, &WriteOptions::default())?;
    info!(
        total = stats.total,
        matched = stats.matched,
        out = %out.display(),
        "lookup merged"
    );
    Ok((out, stats))
}
