// src/jobs/break_mark.rs
//! DP Marketing break marks: read a presorted list, mark the tray breaks and
//! hand the result to the mail shop share.

use anyhow::{bail, Result};
use std::path::Path;
use tracing::{info, instrument};

use crate::handoff::{save_with_fallback, Saved};
use crate::jobs::JobNumber;
use crate::process::breakmark::{assign_break_marks, BreakMarkSpec};
use crate::table::{read_raw_rows, write_table, ReadOptions, Table, WriteOptions};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakMarkReport {
    pub saved: Saved,
    pub rows: usize,
    pub groups: usize,
}

/// `<job> DP Marketing_WBREAK.csv`
pub fn break_mark_file_name(job_number: &JobNumber) -> String {
    format!("{job_number} DP Marketing_WBREAK.csv")
}

/// Read `input`, skipping any preamble above the header, and add break
/// marks. Errors when no row names a tray column.
pub fn mark_file(input: &Path, spec: &BreakMarkSpec) -> Result<(Table, usize)> {
    let raw = read_raw_rows(input, &ReadOptions::default())?;
    let Some(mut table) = spec.table_from_raw(raw) else {
        bail!("{} has none of the tray columns {:?}", input.display(), spec.tray_columns);
    };
    let Some(groups) = assign_break_marks(&mut table, spec) else {
        bail!("{} has none of the tray columns {:?}", input.display(), spec.tray_columns);
    };
    Ok((table, groups))
}

/// Mark `input` and save it as `name` on the share, or in `fallback` when
/// the share is missing or the write fails. Every field is quoted.
#[instrument(level = "info", skip_all, fields(input = %input.display(), name = %name))]
pub fn run_break_mark(
    input: &Path,
    spec: &BreakMarkSpec,
    name: &str,
    primary: Option<&Path>,
    fallback: &Path,
) -> Result<BreakMarkReport> {
    let (table, groups) = mark_file(input, spec)?;
    let opts = WriteOptions::quote_all();
    let saved = save_with_fallback(primary, fallback, name, |target| {
        write_table(&table, target, &opts)
    })?;
    info!(groups, rows = table.len(), out = %saved.path().display(), "break marks written");
    Ok(BreakMarkReport {
        saved,
        rows: table.len(),
        groups,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const LIST: &str = "DP Marketing list,,\n\
                        ,,\n\
                        Full Name,TRAY NUMBER,City\n\
                        Ann,2,Waco\n\
                        Bo,1,Tyler\n\
                        Cy,2,Waco\n";

    #[test]
    fn preamble_is_skipped_and_every_field_is_quoted() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("list.txt");
        fs::write(&input, LIST)?;
        let share = dir.path().join("W");
        fs::create_dir_all(&share)?;
        let job: JobNumber = "12345".parse()?;
        let name = break_mark_file_name(&job);
        assert_eq!(name, "12345 DP Marketing_WBREAK.csv");

        let report = run_break_mark(
            &input,
            &BreakMarkSpec::default(),
            &name,
            Some(&share),
            &dir.path().join("MOVE TO BUSKRO"),
        )?;
        assert_eq!(report.saved, Saved::Primary(share.join(&name)));
        assert_eq!((report.rows, report.groups), (3, 2));
        assert_eq!(
            fs::read_to_string(share.join(&name))?,
            "\"BREAKMARK\",\"Full Name\",\"TRAY NUMBER\",\"City\"\n\
             \"##\",\"Bo\",\"1\",\"Tyler\"\n\
             \"\",\"Ann\",\"2\",\"Waco\"\n\
             \"###\",\"Cy\",\"2\",\"Waco\"\n"
        );
        Ok(())
    }

    #[test]
    fn missing_share_falls_back_locally() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("list.txt");
        fs::write(&input, LIST)?;
        let fallback = dir.path().join("MOVE TO BUSKRO");
        let report = run_break_mark(
            &input,
            &BreakMarkSpec::default(),
            "out.csv",
            Some(&dir.path().join("no share")),
            &fallback,
        )?;
        assert_eq!(report.saved, Saved::Fallback(fallback.join("out.csv")));
        assert!(fallback.join("out.csv").exists());
        Ok(())
    }

    #[test]
    fn list_without_tray_column_fails() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("list.txt");
        fs::write(&input, "Name,City\nAnn,Waco\n")?;
        assert!(mark_file(&input, &BreakMarkSpec::default()).is_err());
        Ok(())
    }
}
