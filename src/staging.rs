// src/staging.rs
//! Transactional filesystem changes.
//!
//! Outputs are written into a hidden staging directory next to their
//! destinations; deletions and moves are only planned. [`Staging::commit`]
//! applies the plan in order and journals every change, so a failure part
//! way through rolls the filesystem back to where it started.

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::table::{write_table, Table, WriteOptions};

const STAGING_PREFIX: &str = ".mailprep-staging-";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Planned {
    Place { staged: PathBuf, dest: PathBuf },
    Remove { path: PathBuf },
    Move { from: PathBuf, to: PathBuf },
}

/// One change that [`Staging::commit`] made, with what is needed to undo it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    CreatedDir { path: PathBuf },
    Created { path: PathBuf },
    Replaced { path: PathBuf, backup: PathBuf },
    Removed { path: PathBuf, backup: PathBuf },
    Moved {
        from: PathBuf,
        to: PathBuf,
        backup: Option<PathBuf>,
    },
}

/// Ordered record of applied changes.
#[derive(Debug, Default)]
pub struct Journal {
    entries: Vec<Applied>,
}

impl Journal {
    pub fn entries(&self) -> &[Applied] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, a: Applied) {
        debug!(change = ?a, "applied");
        self.entries.push(a);
    }

    /// Undo every entry in reverse order. Each undo checks the current
    /// filesystem first, so running this again changes nothing. Failures are
    /// logged and returned; the remaining entries are still attempted.
    pub fn rollback(&self) -> Vec<String> {
        let mut failures = Vec::new();
        for (i, entry) in self.entries.iter().enumerate().rev() {
            if let Applied::Created { path } = entry {
                if self.restored_before(i, path) {
                    debug!(path = %path.display(), "already restored; keeping");
                    continue;
                }
            }
            if let Err(e) = undo(entry) {
                warn!(change = ?entry, error = %e, "rollback step failed");
                failures.push(format!("{entry:?}: {e:#}"));
            }
        }
        failures
    }

    /// True when an entry before `i` vacated `path` and its undo has already
    /// put the old content back, so `path` no longer holds what entry `i`
    /// created.
    fn restored_before(&self, i: usize, path: &Path) -> bool {
        self.entries[..i]
            .iter()
            .rev()
            .find_map(|e| match e {
                Applied::Removed { path: p, backup } if p == path => Some(backup.as_path()),
                Applied::Moved { from, to, backup } if from == path => {
                    Some(backup.as_deref().unwrap_or(to.as_path()))
                }
                _ => None,
            })
            .is_some_and(|holder| !exists(holder))
    }
}

fn undo(entry: &Applied) -> Result<()> {
    match entry {
        Applied::CreatedDir { path } => {
            if path.is_dir() && fs::read_dir(path)?.next().is_none() {
                fs::remove_dir(path)?;
            }
        }
        Applied::Created { path } => remove_path(path)?,
        Applied::Replaced { path, backup } | Applied::Removed { path, backup } => {
            if exists(backup) {
                remove_path(path)?;
                move_path(backup, path)?;
            }
        }
        Applied::Moved { from, to, backup } => {
            if exists(to) && !exists(from) {
                move_path(to, from)?;
            }
            if let Some(b) = backup {
                if exists(b) && !exists(to) {
                    move_path(b, to)?;
                }
            }
        }
    }
    Ok(())
}

fn exists(p: &Path) -> bool {
    fs::symlink_metadata(p).is_ok()
}

/// Remove a file or directory tree; a missing path is not an error.
fn remove_path(p: &Path) -> Result<()> {
    match fs::symlink_metadata(p) {
        Ok(m) if m.is_dir() => {
            fs::remove_dir_all(p).with_context(|| format!("removing {}", p.display()))
        }
        Ok(_) => fs::remove_file(p).with_context(|| format!("removing {}", p.display())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("inspecting {}", p.display())),
    }
}

/// Copy a file, or a directory tree, from `src` to `dest`.
pub fn copy_tree(src: &Path, dest: &Path) -> Result<u64> {
    if src.is_file() {
        return fs::copy(src, dest)
            .with_context(|| format!("copying {} to {}", src.display(), dest.display()));
    }
    let mut bytes = 0;
    for entry in WalkDir::new(src) {
        let entry = entry.with_context(|| format!("walking {}", src.display()))?;
        let rel = entry.path().strip_prefix(src)?;
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("creating {}", target.display()))?;
        } else {
            bytes += fs::copy(entry.path(), &target).with_context(|| {
                format!("copying {} to {}", entry.path().display(), target.display())
            })?;
        }
    }
    Ok(bytes)
}

/// Rename, falling back to copy-then-remove when the rename fails (for
/// example across filesystems).
pub fn move_path(from: &Path, to: &Path) -> Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!(from = %from.display(), to = %to.display(), error = %e, "rename failed; copying");
            copy_tree(from, to)?;
            remove_path(from)
        }
    }
}

/// A set of pending filesystem changes.
///
/// Dropping it without calling [`Staging::commit`] discards every staged
/// output and leaves destinations untouched.
pub struct Staging {
    dir: TempDir,
    plan: Vec<Planned>,
    next_id: usize,
    committed: bool,
}

impl Staging {
    /// Create the staging directory under `root`, on the same filesystem as
    /// the outputs it will hold.
    pub fn begin(root: &Path) -> Result<Self> {
        fs::create_dir_all(root).with_context(|| format!("creating {}", root.display()))?;
        let dir = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(root)
            .with_context(|| format!("creating staging directory in {}", root.display()))?;
        debug!(dir = %dir.path().display(), "staging started");
        Ok(Self {
            dir,
            plan: Vec::new(),
            next_id: 0,
            committed: false,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Number of planned changes.
    pub fn pending(&self) -> usize {
        self.plan.len()
    }

    fn fresh_slot(&mut self, area: &str) -> Result<PathBuf> {
        self.next_id += 1;
        let slot = self.dir.path().join(area).join(self.next_id.to_string());
        fs::create_dir_all(&slot).with_context(|| format!("creating {}", slot.display()))?;
        Ok(slot)
    }

    /// A private working directory inside staging; never placed anywhere.
    pub fn scratch_dir(&mut self, name: &str) -> Result<PathBuf> {
        Ok(self.fresh_slot("scratch")?.join(name))
    }

    /// Stage an output for `dest`. `write` receives the staged path and must
    /// create it. Returns the staged path, readable until commit.
    pub fn stage_file<F>(&mut self, dest: impl Into<PathBuf>, write: F) -> Result<PathBuf>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        let dest = dest.into();
        let name = dest
            .file_name()
            .ok_or_else(|| anyhow!("destination {} has no file name", dest.display()))?
            .to_owned();
        let staged = self.fresh_slot("out")?.join(name);
        write(&staged).with_context(|| format!("staging {}", dest.display()))?;
        self.plan.push(Planned::Place {
            staged: staged.clone(),
            dest,
        });
        Ok(staged)
    }

    pub fn write_table(
        &mut self,
        table: &Table,
        dest: impl Into<PathBuf>,
        opts: &WriteOptions,
    ) -> Result<PathBuf> {
        self.stage_file(dest, |p| write_table(table, p, opts))
    }

    /// Plan the removal of `path` (file or directory).
    pub fn remove(&mut self, path: impl Into<PathBuf>) {
        self.plan.push(Planned::Remove { path: path.into() });
    }

    /// Plan moving `from` to `to`, replacing anything already at `to`.
    pub fn move_into(&mut self, from: impl Into<PathBuf>, to: impl Into<PathBuf>) {
        self.plan.push(Planned::Move {
            from: from.into(),
            to: to.into(),
        });
    }

    fn ensure_parent(path: &Path, journal: &mut Journal) -> Result<()> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        let missing: Vec<PathBuf> = parent
            .ancestors()
            .take_while(|a| !a.as_os_str().is_empty() && !a.exists())
            .map(Path::to_path_buf)
            .collect();
        for dir in missing.into_iter().rev() {
            fs::create_dir(&dir).with_context(|| format!("creating {}", dir.display()))?;
            journal.push(Applied::CreatedDir { path: dir });
        }
        Ok(())
    }

    /// Move whatever sits at `path` into the backup area.
    fn back_up(&mut self, path: &Path) -> Result<Option<PathBuf>> {
        if !exists(path) {
            return Ok(None);
        }
        let name = path.file_name().map(|n| n.to_owned()).unwrap_or_default();
        let backup = self.fresh_slot("backup")?.join(name);
        move_path(path, &backup)
            .with_context(|| format!("backing up {}", path.display()))?;
        Ok(Some(backup))
    }

    fn apply_one(&mut self, step: Planned, journal: &mut Journal) -> Result<()> {
        match step {
            Planned::Place { staged, dest } => {
                Self::ensure_parent(&dest, journal)?;
                let backup = self.back_up(&dest)?;
                if let Some(b) = &backup {
                    journal.push(Applied::Replaced {
                        path: dest.clone(),
                        backup: b.clone(),
                    });
                }
                move_path(&staged, &dest)
                    .with_context(|| format!("placing {}", dest.display()))?;
                if backup.is_none() {
                    journal.push(Applied::Created { path: dest });
                }
            }
            Planned::Remove { path } => match self.back_up(&path)? {
                Some(backup) => journal.push(Applied::Removed { path, backup }),
                None => debug!(path = %path.display(), "nothing to remove"),
            },
            Planned::Move { from, to } => {
                if !exists(&from) {
                    return Err(anyhow!("cannot move {}: it does not exist", from.display()));
                }
                Self::ensure_parent(&to, journal)?;
                let backup = self.back_up(&to)?;
                if let Err(e) = move_path(&from, &to) {
                    if let Some(b) = backup {
                        journal.push(Applied::Replaced { path: to.clone(), backup: b });
                    }
                    return Err(e).with_context(|| {
                        format!("moving {} to {}", from.display(), to.display())
                    });
                }
                journal.push(Applied::Moved { from, to, backup });
            }
        }
        Ok(())
    }

    /// Apply the plan in order, stopping at the first failure.
    fn apply_plan(&mut self) -> (Journal, Result<()>) {
        let mut journal = Journal::default();
        let plan = std::mem::take(&mut self.plan);
        for step in plan {
            if let Err(e) = self.apply_one(step, &mut journal) {
                return (journal, Err(e));
            }
        }
        (journal, Ok(()))
    }

    /// Apply every planned change. On failure, everything already applied
    /// is rolled back and the original error is returned.
    pub fn commit(mut self) -> Result<usize> {
        let planned = self.plan.len();
        let (journal, outcome) = self.apply_plan();
        self.committed = true;
        match outcome {
            Ok(()) => {
                info!(changes = planned, "staging committed");
                Ok(planned)
            }
            Err(e) => {
                let failures = journal.rollback();
                if failures.is_empty() {
                    warn!(undone = journal.len(), "commit failed; changes rolled back");
                    Err(e.context("commit failed; changes rolled back"))
                } else {
                    Err(e.context(format!(
                        "commit failed; rollback incomplete: {}",
                        failures.join("; ")
                    )))
                }
            }
        }
    }
}

impl Drop for Staging {
    fn drop(&mut self) {
        if !self.committed && !self.plan.is_empty() {
            info!(discarded = self.plan.len(), "staging dropped without commit");
        }
    }
}
