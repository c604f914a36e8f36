// src/jobs/post_proof.rs
//! After proofs are approved: archive the week's working tree under the job's
//! base folder with `"<job> <week>-"` file prefixes, clear the working
//! folders and zip the proofs for hand-off.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

use super::{job_week_prefix, JobNumber, WeekCode};
use crate::archive::zip_dir;
use crate::config::{Config, JobConfig};
use crate::process::utils::file_name_of;
use crate::staging::{copy_tree, Staging};

pub const WORK_FOLDERS: [&str; 3] = ["INPUT", "OUTPUT", "PROOF"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostProofReport {
    pub job: String,
    pub archived_to: PathBuf,
    pub backed_up: Option<PathBuf>,
    pub zip: PathBuf,
    pub cleared: usize,
}

fn top_level_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("listing {}", dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    Ok(files)
}

/// Copy `working` to `dest`, prefixing files directly inside the work
/// folders with `"<prefix>-"`.
fn copy_with_prefix(working: &Path, dest: &Path, prefix: &str) -> Result<()> {
    copy_tree(working, dest)?;
    for folder in WORK_FOLDERS {
        for f in top_level_files(&dest.join(folder))? {
            let renamed = f.with_file_name(format!("{prefix}-{}", file_name_of(&f)));
            fs::rename(&f, &renamed)
                .with_context(|| format!("prefixing {}", f.display()))?;
        }
    }
    Ok(())
}

/// Stage the post-proof archive of one job. The caller commits.
#[instrument(level = "info", skip(config, job, staging), fields(job = %job.name))]
pub fn run_post_proof(
    config: &Config,
    job: &JobConfig,
    job_number: &JobNumber,
    week: &WeekCode,
    staging: &mut Staging,
) -> Result<PostProofReport> {
    let working = config.job_dir(job);
    if !working.is_dir() {
        bail!("working folder {} does not exist", working.display());
    }
    let prefix = job_week_prefix(job_number, week);
    let base = config.resolve(&job.archive_base);
    let dest = base.join(week.as_str());

    let backed_up = if dest.exists() {
        let backup = base.join(format!("{}_backup", week.as_str()));
        if backup.exists() {
            warn!(backup = %backup.display(), "previous backup will be replaced");
        }
        staging.move_into(&dest, &backup);
        Some(backup)
    } else {
        None
    };

    let staged_week = staging.stage_file(&dest, |p| copy_with_prefix(&working, p, &prefix))?;

    let mut cleared = 0;
    for folder in WORK_FOLDERS {
        for f in top_level_files(&working.join(folder))? {
            staging.remove(f);
            cleared += 1;
        }
    }

    let zip = config
        .resolve(&config.intake.weekly_zip_dir)
        .join(format!("{prefix} {}.zip", job.proof_zip_suffix));
    let proof_src = staged_week.join("PROOF");
    staging.stage_file(&zip, |p| {
        if proof_src.is_dir() {
            zip_dir(&proof_src, p).map(|_| ())
        } else {
            warn!("no PROOF folder; writing an empty archive");
            let empty = tempfile::tempdir()?;
            zip_dir(empty.path(), p).map(|_| ())
        }
    })?;

    info!(dest = %dest.display(), zip = %zip.display(), cleared, "post-proof staged");
    Ok(PostProofReport {
        job: job.name.clone(),
        archived_to: dest,
        backed_up,
        zip,
        cleared,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::extract_zip;

    fn setup(root: &Path) -> Config {
        let mut cfg = Config::default();
        cfg.root = root.to_path_buf();
        cfg.jobs.retain(|j| j.name == "CBC");
        let work = cfg.job_dir(&cfg.jobs[0]);
        for f in WORK_FOLDERS {
            fs::create_dir_all(work.join(f)).unwrap();
        }
        fs::create_dir_all(work.join("ART")).unwrap();
        fs::write(work.join("INPUT/list.txt"), "in").unwrap();
        fs::write(work.join("OUTPUT/CBC2.csv"), "out").unwrap();
        fs::write(work.join("PROOF/CBC2-PD.csv"), "proof").unwrap();
        fs::write(work.join("ART/logo.pdf"), "art").unwrap();
        cfg
    }

    #[test]
    fn archives_clears_and_zips() -> Result<()> {
        crate::init_test_logging();
        let dir = tempfile::tempdir()?;
        let cfg = setup(dir.path());
        let job = &cfg.jobs[0];
        let j: JobNumber = "12345".parse()?;
        let w: WeekCode = "4.22".parse()?;
        let base = cfg.resolve(&job.archive_base);
        fs::create_dir_all(base.join("4.22"))?;
        fs::write(base.join("4.22/old.txt"), "old")?;

        let mut staging = Staging::begin(dir.path())?;
        let report = run_post_proof(&cfg, job, &j, &w, &mut staging)?;
        staging.commit()?;

        assert_eq!(report.cleared, 3);
        assert_eq!(report.backed_up, Some(base.join("4.22_backup")));
        assert!(base.join("4.22_backup/old.txt").exists());
        let week = base.join("4.22");
        assert_eq!(fs::read_to_string(week.join("OUTPUT/12345 4.22-CBC2.csv"))?, "out");
        assert!(week.join("ART/logo.pdf").exists());

        let work = cfg.job_dir(job);
        assert!(fs::read_dir(work.join("PROOF"))?.next().is_none());
        assert!(work.join("ART/logo.pdf").exists());

        assert!(report.zip.ends_with("12345 4.22 CBCPROOFS.zip"));
        let out = tempfile::tempdir()?;
        let files = extract_zip(&report.zip, out.path())?;
        assert_eq!(files, vec![out.path().join("12345 4.22-CBC2-PD.csv")]);
        Ok(())
    }

    #[test]
    fn missing_working_folder_is_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut cfg = Config::default();
        cfg.root = dir.path().to_path_buf();
        let j: JobNumber = "12345".parse()?;
        let w: WeekCode = "4.22".parse()?;
        let mut staging = Staging::begin(dir.path())?;
        assert!(run_post_proof(&cfg, &cfg.jobs[0], &j, &w, &mut staging).is_err());
        Ok(())
    }
}
