// src/jobs/housekeeping.rs
//! Folder upkeep between weeks.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use walkdir::WalkDir;

use crate::handoff::remove_file_with_retry;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanReport {
    pub deleted: Vec<PathBuf>,
    pub missing_dirs: Vec<PathBuf>,
    pub failures: Vec<(PathBuf, String)>,
}

impl CleanReport {
    /// True when every folder existed and every file was deleted.
    pub fn is_success(&self) -> bool {
        self.missing_dirs.is_empty() && self.failures.is_empty()
    }
}

fn clean_one(dir: &Path, retry_delay: Duration, report: &mut CleanReport) -> Result<()> {
    let entries = fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            info!(path = %path.display(), "skipped non-file item");
            continue;
        }
        match remove_file_with_retry(&path, 3, retry_delay) {
            Ok(()) => {
                info!(path = %path.display(), "deleted");
                report.deleted.push(path);
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "delete failed");
                report.failures.push((path, format!("{e:#}")));
            }
        }
    }
    Ok(())
}

/// Delete the files (never subfolders) in each of `dirs`, carrying on past
/// individual failures.
#[instrument(level = "info", skip_all, fields(dirs = dirs.len()))]
pub fn clean_input_folders(dirs: &[PathBuf], retry_delay: Duration) -> CleanReport {
    let mut report = CleanReport::default();
    for dir in dirs {
        if !dir.is_dir() {
            warn!(dir = %dir.display(), "folder does not exist");
            report.missing_dirs.push(dir.clone());
            continue;
        }
        if let Err(e) = clean_one(dir, retry_delay, &mut report) {
            error!(dir = %dir.display(), error = %e, "cleanup failed");
            report.failures.push((dir.clone(), format!("{e:#}")));
        }
    }
    if report.is_success() {
        info!(deleted = report.deleted.len(), "cleanup completed");
    } else {
        warn!(
            deleted = report.deleted.len(),
            failures = report.failures.len(),
            "cleanup completed with errors"
        );
    }
    report
}

/// Recreate the folder tree under `src` inside `dest`, without files.
/// Returns the number of folders created.
#[instrument(level = "info", fields(src = %src.display(), dest = %dest.display()))]
pub fn copy_dir_skeleton(src: &Path, dest: &Path) -> Result<usize> {
    if !src.is_dir() {
        anyhow::bail!("{} is not a folder", src.display());
    }
    if dest.starts_with(src) {
        anyhow::bail!("{} lies inside {}", dest.display(), src.display());
    }
    let mut created = 0;
    for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walking {}", src.display()))?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let rel = entry.path().strip_prefix(src)?;
        let target = dest.join(rel);
        if !target.exists() {
            fs::create_dir_all(&target)
                .with_context(|| format!("creating {}", target.display()))?;
            debug!(dir = %target.display(), "created");
            created += 1;
        }
    }
    fs::create_dir_all(dest).with_context(|| format!("creating {}", dest.display()))?;
    info!(created, "skeleton copied");
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deletes_files_but_not_folders() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let a = dir.path().join("CBC/JOB/INPUT");
        let b = dir.path().join("EXC/JOB/INPUT");
        fs::create_dir_all(a.join("keep"))?;
        fs::create_dir_all(&b)?;
        fs::write(a.join("x.txt"), "x")?;
        fs::write(a.join("keep/y.txt"), "y")?;
        let missing = dir.path().join("NOPE/INPUT");

        let report = clean_input_folders(&[a.clone(), missing.clone(), b], Duration::ZERO);
        assert_eq!(report.deleted, vec![a.join("x.txt")]);
        assert_eq!(report.missing_dirs, vec![missing]);
        assert!(!report.is_success());
        assert!(a.join("keep/y.txt").exists());
        Ok(())
    }

    #[test]
    fn skeleton_has_folders_only() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let src = dir.path().join("CBC");
        fs::create_dir_all(src.join("JOB/INPUT"))?;
        fs::create_dir_all(src.join("JOB/PROOF"))?;
        fs::write(src.join("JOB/INPUT/list.txt"), "x")?;
        let dest = dir.path().join("NEW");

        assert_eq!(copy_dir_skeleton(&src, &dest)?, 3);
        assert!(dest.join("JOB/INPUT").is_dir());
        assert!(dest.join("JOB/PROOF").is_dir());
        assert!(!dest.join("JOB/INPUT/list.txt").exists());
        assert_eq!(copy_dir_skeleton(&src, &dest)?, 0);
        assert!(copy_dir_skeleton(&src, &src.join("JOB/copy")).is_err());
        Ok(())
    }
}
