// src/process/counts.rs
//! Version counts per file, consolidated into reporting groups and compared
//! between a job's input and output files.

use anyhow::{Context, Result};
use rayon::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

use super::split::{CompiledMatcher, Matcher};
use super::utils::local_stamp;
use crate::error::PrepError;
use crate::table::{read_table, write_table, ReadOptions, Table, WriteOptions};

pub const DEFAULT_VERSION_PATTERN: &str = r"^RAC\d{4}-DM\d{2}";
pub const REPORT_NAME: &str = "COUNTS.csv";

pub type VersionCounts = BTreeMap<String, usize>;

/// Count trimmed, upper-cased values of `column` that match `pattern`.
pub fn count_versions(
    table: &Table,
    column: &str,
    pattern: &Regex,
) -> Result<VersionCounts, PrepError> {
    let idx = table.require_column(column)?;
    let mut counts = VersionCounts::new();
    for row in &table.rows {
        let v = row[idx].trim().to_ascii_uppercase();
        if pattern.is_match(&v) {
            *counts.entry(v).or_insert(0) += 1;
        }
    }
    Ok(counts)
}

pub fn merge_counts(into: &mut VersionCounts, other: VersionCounts) {
    for (k, n) in other {
        *into.entry(k).or_insert(0) += n;
    }
}

/// One reporting group; a version belongs to the first group with a
/// matching matcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountGroup {
    pub name: String,
    pub matchers: Vec<Matcher>,
}

impl CountGroup {
    pub fn new(name: &str, matchers: Vec<Matcher>) -> Self {
        Self {
            name: name.to_string(),
            matchers,
        }
    }
}

pub struct CountGroups {
    groups: Vec<(String, Vec<CompiledMatcher>)>,
}

impl CountGroups {
    pub fn compile(groups: &[CountGroup]) -> Result<Self> {
        let groups = groups
            .iter()
            .map(|g| {
                let ms = g
                    .matchers
                    .iter()
                    .map(Matcher::compile)
                    .collect::<Result<Vec<_>>>()?;
                Ok((g.name.clone(), ms))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { groups })
    }

    pub fn group_of(&self, version: &str) -> Option<&str> {
        self.groups
            .iter()
            .find(|(_, ms)| ms.iter().any(|m| m.is_match(version)))
            .map(|(name, _)| name.as_str())
    }

    /// Totals per group, every group present (zero when empty).
    pub fn consolidate(&self, counts: &VersionCounts) -> Vec<(String, usize)> {
        let mut totals: Vec<(String, usize)> =
            self.groups.iter().map(|(n, _)| (n.clone(), 0)).collect();
        for (version, n) in counts {
            match self.group_of(version) {
                Some(g) => {
                    if let Some(slot) = totals.iter_mut().find(|(name, _)| name == g) {
                        slot.1 += n;
                    }
                }
                None => debug!(version = %version, "version belongs to no count group"),
            }
        }
        totals
    }
}

/// A labelled breakdown of one job's output versions, printed below the
/// summary in listed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountSection {
    pub job: String,
    pub title: String,
    pub labels: Vec<CountLabel>,
}

/// Versions whose counts add up under one label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountLabel {
    pub label: String,
    pub versions: Vec<String>,
}

impl CountLabel {
    pub fn new(label: &str, versions: &[&str]) -> Self {
        Self {
            label: label.to_string(),
            versions: versions.iter().map(|v| v.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionCounts {
    pub title: String,
    pub rows: Vec<(String, usize)>,
}

/// Every label is reported, zero when none of its versions were seen.
pub fn tally_sections(sections: &[CountSection], counts: &VersionCounts) -> Vec<SectionCounts> {
    sections
        .iter()
        .map(|s| SectionCounts {
            title: s.title.clone(),
            rows: s
                .labels
                .iter()
                .map(|l| {
                    let n = l
                        .versions
                        .iter()
                        .filter_map(|v| counts.get(&v.trim().to_ascii_uppercase()))
                        .sum();
                    (l.label.clone(), n)
                })
                .collect(),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountRow {
    pub group: String,
    pub input: usize,
    pub output: usize,
    pub difference: i64,
}

impl CountRow {
    /// More output than input means records were duplicated.
    pub fn is_error(&self) -> bool {
        self.difference > 0
    }
}

pub fn reconcile(input: &VersionCounts, output: &VersionCounts, groups: &CountGroups) -> Vec<CountRow> {
    let ins = groups.consolidate(input);
    let outs = groups.consolidate(output);
    ins.into_iter()
        .zip(outs)
        .map(|((group, i), (_, o))| CountRow {
            group,
            input: i,
            output: o,
            difference: o as i64 - i as i64,
        })
        .collect()
}

/// One file to count and the column carrying its version code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountFile {
    pub path: PathBuf,
    pub column: String,
}

/// Count every file in parallel and sum the results. Files that do not
/// carry the version column are skipped with a warning.
#[instrument(level = "info", skip_all, fields(files = files.len()))]
pub fn count_files(files: &[CountFile], pattern: &Regex) -> Result<VersionCounts> {
    let per_file: Vec<VersionCounts> = files
        .par_iter()
        .map(|f| -> Result<VersionCounts> {
            let table = read_table(&f.path, &ReadOptions::default())?;
            match count_versions(&table, &f.column, pattern) {
                Ok(c) => {
                    debug!(file = %f.path.display(), versions = c.len(), "counted");
                    Ok(c)
                }
                Err(PrepError::MissingColumns { .. }) => {
                    warn!(file = %f.path.display(), column = %f.column, "version column missing; skipped");
                    Ok(VersionCounts::new())
                }
                Err(e) => Err(e.into()),
            }
        })
        .collect::<Result<_>>()?;

    let mut total = VersionCounts::new();
    for c in per_file {
        merge_counts(&mut total, c);
    }
    Ok(total)
}

/// Write `COUNTS.csv` into `dir`, moving a previous report to
/// `ARCHIVE/COUNTS_<YYYYMMDD_HHMM>.csv` first.
///
/// The group summary comes first. Each section follows after a blank row as
/// a `=== <title> Counts ===` line and one row per label, its count in the
/// OUTPUT column.
#[instrument(level = "info", skip_all, fields(dir = %dir.display()))]
pub fn write_counts_report(
    dir: &Path,
    rows: &[CountRow],
    sections: &[SectionCounts],
) -> Result<PathBuf> {
    let report = dir.join(REPORT_NAME);
    if report.exists() {
        let archive = dir.join("ARCHIVE");
        fs::create_dir_all(&archive)
            .with_context(|| format!("creating {}", archive.display()))?;
        let mut dest = archive.join(format!("COUNTS_{}.csv", local_stamp("%Y%m%d_%H%M")));
        if dest.exists() {
            dest = archive.join(format!("COUNTS_{}.csv", local_stamp("%Y%m%d_%H%M%S")));
        }
        fs::rename(&report, &dest)
            .with_context(|| format!("archiving {} to {}", report.display(), dest.display()))?;
        info!(archived = %dest.display(), "previous counts archived");
    }

    let mut table = Table::new(
        ["GROUP", "INPUT", "OUTPUT", "DIFFERENCE", "STATUS"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    );
    for r in rows {
        let status = if r.is_error() { "ERROR" } else { "" };
        table.rows.push(vec![
            r.group.clone(),
            r.input.to_string(),
            r.output.to_string(),
            r.difference.to_string(),
            status.to_string(),
        ]);
    }
    let line = |first: String, output: String| {
        vec![first, String::new(), output, String::new(), String::new()]
    };
    for section in sections {
        table.rows.push(line(String::new(), String::new()));
        table.rows.push(line(format!("=== {} Counts ===", section.title), String::new()));
        for (label, n) in &section.rows {
            table.rows.push(line(label.clone(), n.to_string()));
        }
    }
    write_table(&table, &report, &WriteOptions::default())?;
    Ok(report)
}
