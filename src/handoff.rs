// src/handoff.rs
//! Writing to the shared network folder, with a local fallback, and file
//! removal that tolerates transient Windows locks.

use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const REMOVE_ATTEMPTS: u32 = 5;
pub const REMOVE_DELAY: Duration = Duration::from_secs(1);

/// Where [`save_with_fallback`] ended up writing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Saved {
    Primary(PathBuf),
    Fallback(PathBuf),
}

impl Saved {
    pub fn path(&self) -> &Path {
        match self {
            Saved::Primary(p) | Saved::Fallback(p) => p,
        }
    }
}

/// Write `name` with `write` into `primary` when that folder exists and the
/// write succeeds, otherwise into `fallback` (created if needed).
pub fn save_with_fallback<F>(
    primary: Option<&Path>,
    fallback: &Path,
    name: &str,
    mut write: F,
) -> Result<Saved>
where
    F: FnMut(&Path) -> Result<()>,
{
    if let Some(dir) = primary {
        if dir.is_dir() {
            let target = dir.join(name);
            match write(&target) {
                Ok(()) => {
                    info!(path = %target.display(), "saved to network share");
                    return Ok(Saved::Primary(target));
                }
                Err(e) => {
                    warn!(path = %target.display(), error = %e, "network save failed; using fallback");
                    // a half-written file on the share is worse than none
                    let _ = fs::remove_file(&target);
                }
            }
        } else {
            warn!(dir = %dir.display(), "network share unavailable; using fallback");
        }
    }

    fs::create_dir_all(fallback)
        .with_context(|| format!("creating fallback folder {}", fallback.display()))?;
    let target = fallback.join(name);
    write(&target).with_context(|| format!("writing {}", target.display()))?;
    info!(path = %target.display(), "saved to fallback folder");
    Ok(Saved::Fallback(target))
}

/// Remove `path`, retrying `attempts` times with `delay` in between.
/// A file that is already gone counts as removed.
pub fn remove_file_with_retry(path: &Path, attempts: u32, delay: Duration) -> Result<()> {
    let attempts = attempts.max(1);
    let mut last = None;
    for attempt in 1..=attempts {
        match fs::remove_file(path) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                debug!(path = %path.display(), attempt, error = %e, "remove failed");
                last = Some(e);
                if attempt < attempts {
                    thread::sleep(delay);
                }
            }
        }
    }
    let err = last.unwrap_or_else(|| io::Error::other("remove failed"));
    Err(err).with_context(|| format!("removing {} after {attempts} attempts", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn primary_is_used_when_present() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let share = dir.path().join("share");
        fs::create_dir_all(&share)?;
        let local = dir.path().join("local");
        let saved = save_with_fallback(Some(&share), &local, "x.csv", |p| Ok(fs::write(p, "x")?))?;
        assert_eq!(saved, Saved::Primary(share.join("x.csv")));
        assert!(!local.exists());
        Ok(())
    }

    #[test]
    fn missing_or_failing_share_falls_back() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let local = dir.path().join("local");
        let gone = dir.path().join("offline");
        let saved = save_with_fallback(Some(&gone), &local, "x.csv", |p| Ok(fs::write(p, "x")?))?;
        assert_eq!(saved, Saved::Fallback(local.join("x.csv")));

        let share = dir.path().join("share");
        fs::create_dir_all(&share)?;
        let mut calls = 0;
        let saved = save_with_fallback(Some(&share), &local, "y.csv", |p| {
            calls += 1;
            if p.starts_with(&share) {
                fs::write(p, "partial")?;
                return Err(anyhow!("share went away"));
            }
            Ok(fs::write(p, "y")?)
        })?;
        assert_eq!(calls, 2);
        assert!(matches!(saved, Saved::Fallback(_)));
        assert!(!share.join("y.csv").exists());
        Ok(())
    }

    #[test]
    fn retry_removes_or_reports() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let f = dir.path().join("lock.txt");
        fs::write(&f, "x")?;
        remove_file_with_retry(&f, REMOVE_ATTEMPTS, Duration::ZERO)?;
        assert!(!f.exists());
        remove_file_with_retry(&f, 2, Duration::ZERO)?;

        // a directory cannot be removed as a file
        let err = remove_file_with_retry(dir.path(), 2, Duration::ZERO).unwrap_err();
        assert!(format!("{err:#}").contains("after 2 attempts"));
        Ok(())
    }
}
