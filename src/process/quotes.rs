// src/process/quotes.rs
//! Detect and strip stray double quotes that break downstream CSV readers,
//! with timestamped backups that can be restored.

use anyhow::{Context, Result};
use csv::{ReaderBuilder, WriterBuilder};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use super::utils::{file_name_of, has_extension, local_stamp};
use crate::table::{detect_delimiter, read_text};

static BACKUP_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<stem>.+)_(?P<stamp>\d{8}-\d{4})$").expect("static regex"));

/// A file with stray quotes and the 1-based line numbers where they occur.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrayQuoteReport {
    pub path: PathBuf,
    pub lines: Vec<usize>,
}

/// True when some tab- or comma-separated field holds a `"` without being
/// fully quoted and without a `""` escape.
pub fn line_has_stray_quotes(line: &str) -> bool {
    if !line.contains('"') {
        return false;
    }
    let sep = if line.contains('\t') { '\t' } else { ',' };
    line.split(sep).map(str::trim).any(|part| {
        part.contains('"')
            && !(part.len() >= 2 && part.starts_with('"') && part.ends_with('"'))
            && !part.contains("\"\"")
    })
}

fn offending_lines(text: &str) -> Vec<usize> {
    text.lines()
        .enumerate()
        .filter(|(_, l)| line_has_stray_quotes(l))
        .map(|(i, _)| i + 1)
        .collect()
}

/// Walk `dirs` for `.csv` files, skipping directories named in `exclude`.
#[instrument(level = "info", skip_all, fields(dirs = dirs.len()))]
pub fn scan_for_stray_quotes(dirs: &[PathBuf], exclude: &[String]) -> Result<Vec<StrayQuoteReport>> {
    let mut found = Vec::new();
    for dir in dirs {
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "scan directory missing; skipped");
            continue;
        }
        let walker = WalkDir::new(dir).into_iter().filter_entry(|e| {
            !(e.file_type().is_dir()
                && e.depth() > 0
                && exclude
                    .iter()
                    .any(|x| e.file_name().to_string_lossy().eq_ignore_ascii_case(x)))
        });
        for entry in walker {
            let entry = entry.with_context(|| format!("walking {}", dir.display()))?;
            let path = entry.path();
            if !entry.file_type().is_file() || !has_extension(path, "csv") {
                continue;
            }
            let text = read_text(path)?;
            let lines = offending_lines(&text);
            if !lines.is_empty() {
                warn!(file = %path.display(), count = lines.len(), "stray quotes");
                found.push(StrayQuoteReport {
                    path: path.to_path_buf(),
                    lines,
                });
            }
        }
    }
    Ok(found)
}

/// Remove every `"` from every field and rewrite the file with minimal
/// quoting. Returns the number of records written.
#[instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
pub fn clean_stray_quotes(path: impl AsRef<Path>) -> Result<usize> {
    let path = path.as_ref();
    let text = read_text(path)?;
    let delimiter = detect_delimiter(&text, b',');

    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());
    let mut wtr = WriterBuilder::new()
        .flexible(true)
        .delimiter(delimiter)
        .from_writer(Vec::new());

    let mut records = 0;
    for rec in rdr.records() {
        let rec = rec.with_context(|| format!("parsing {}", path.display()))?;
        let cleaned: Vec<String> = rec.iter().map(|f| f.replace('"', "")).collect();
        wtr.write_record(&cleaned)?;
        records += 1;
    }
    let bytes = wtr.into_inner().map_err(|e| e.into_error())?;

    let tmp = path.with_file_name(format!("{}.tmp", file_name_of(path)));
    fs::write(&tmp, &bytes).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(records)
}

/// Copy `file` into `backup_dir`, keeping its path relative to `base_dir`,
/// as `<stem>_<YYYYMMDD-HHMM>.<ext>`.
pub fn backup_file(file: &Path, base_dir: &Path, backup_dir: &Path) -> Result<PathBuf> {
    let rel = file.strip_prefix(base_dir).unwrap_or(file);
    let rel_dir = rel.parent().unwrap_or_else(|| Path::new(""));
    let stem = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match file.extension() {
        Some(ext) => format!("{stem}_{}.{}", local_stamp("%Y%m%d-%H%M"), ext.to_string_lossy()),
        None => format!("{stem}_{}", local_stamp("%Y%m%d-%H%M")),
    };
    let dest_dir = backup_dir.join(rel_dir);
    fs::create_dir_all(&dest_dir)
        .with_context(|| format!("creating {}", dest_dir.display()))?;
    let dest = dest_dir.join(name);
    fs::copy(file, &dest)
        .with_context(|| format!("backing up {} to {}", file.display(), dest.display()))?;
    Ok(dest)
}

/// Back up then clean each file. Stops at the first failure.
pub fn fix_stray_quotes(files: &[PathBuf], base_dir: &Path, backup_dir: &Path) -> Result<usize> {
    for file in files {
        let backup = backup_file(file, base_dir, backup_dir)?;
        let rows = clean_stray_quotes(file)?;
        info!(file = %file.display(), backup = %backup.display(), rows, "quotes removed");
    }
    Ok(files.len())
}

/// Restore the newest backup of every file under `backup_dir` to its place
/// under `base_dir`, delete the consumed backups and prune empty folders.
/// Returns the restored paths.
#[instrument(level = "info", skip_all, fields(backup_dir = %backup_dir.display()))]
pub fn restore_quote_backups(base_dir: &Path, backup_dir: &Path) -> Result<Vec<PathBuf>> {
    if !backup_dir.is_dir() {
        return Ok(Vec::new());
    }

    // original path -> (stamp, backup path) of each backup found
    let mut by_original: BTreeMap<PathBuf, Vec<(String, PathBuf)>> = BTreeMap::new();
    for entry in WalkDir::new(backup_dir) {
        let entry = entry.with_context(|| format!("walking {}", backup_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let Some(caps) = BACKUP_NAME.captures(&stem) else {
            debug!(file = %path.display(), "not a backup name; left alone");
            continue;
        };
        let original_name = match path.extension() {
            Some(ext) => format!("{}.{}", &caps["stem"], ext.to_string_lossy()),
            None => caps["stem"].to_string(),
        };
        let rel_dir = path
            .parent()
            .and_then(|p| p.strip_prefix(backup_dir).ok())
            .unwrap_or_else(|| Path::new(""));
        by_original
            .entry(base_dir.join(rel_dir).join(original_name))
            .or_default()
            .push((caps["stamp"].to_string(), path.to_path_buf()));
    }

    let mut restored = Vec::with_capacity(by_original.len());
    for (original, mut backups) in by_original {
        backups.sort();
        let Some((stamp, newest)) = backups.last() else {
            continue;
        };
        if let Some(parent) = original.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(newest, &original).with_context(|| {
            format!("restoring {} from {}", original.display(), newest.display())
        })?;
        info!(file = %original.display(), stamp = %stamp, "restored");
        for (_, b) in &backups {
            fs::remove_file(b).with_context(|| format!("removing backup {}", b.display()))?;
        }
        restored.push(original);
    }

    prune_empty_dirs(backup_dir)?;
    Ok(restored)
}

/// Remove empty directories below `root` (not `root` itself).
pub fn prune_empty_dirs(root: &Path) -> Result<()> {
    for entry in WalkDir::new(root).min_depth(1).contents_first(true) {
        let entry = entry?;
        if entry.file_type().is_dir() {
            let empty = fs::read_dir(entry.path())?.next().is_none();
            if empty {
                fs::remove_dir(entry.path())
                    .with_context(|| format!("removing {}", entry.path().display()))?;
            }
        }
    }
    Ok(())
}
