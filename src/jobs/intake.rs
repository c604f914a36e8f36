// src/jobs/intake.rs
//! Weekly intake: unpack the client's ZIP drop, route each list to its job
//! and prepare each job's INPUT folder.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::archive::extract_zip;
use crate::config::{Config, JobConfig};
use crate::error::PrepError;
use crate::process::format::split_date_range;
use crate::process::split::{split_with, RuleSet, SplitRule};
use crate::process::utils::{clean_str, file_name_of, has_extension};
use crate::staging::Staging;
use crate::table::{
    detect_delimiter, normalize_to_utf8, parse_table, read_text, write_table, ReadOptions, Table,
    WriteOptions,
};

fn txt() -> String {
    "txt".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuffixRename {
    pub suffix: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternRename {
    pub pattern: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRangeColumns {
    pub column: String,
    pub start: String,
    pub end: String,
}

/// One preparation step run over a job's INPUT folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum InputStep {
    /// Write `<value>.csv` holding the rows of every source file whose
    /// `column` equals `value`. Sources are kept.
    SplitByColumn {
        column: String,
        values: Vec<String>,
        #[serde(default = "txt")]
        extension: String,
    },
    /// Merge every source into `output`, keeping one header, and remove the
    /// sources.
    Concatenate {
        output: String,
        #[serde(default = "txt")]
        extension: String,
    },
    /// Rename each source by the suffix of its first `column` value.
    RenameByValueSuffix {
        column: String,
        renames: Vec<SuffixRename>,
        /// Exact number of sources required.
        #[serde(default)]
        expect: Option<usize>,
        #[serde(default = "txt")]
        extension: String,
    },
    /// Rename sources whose name contains `pattern`; first match wins.
    RenameByPattern {
        renames: Vec<PatternRename>,
        #[serde(default = "txt")]
        extension: String,
    },
    /// Read every source under a fixed header, write them combined to
    /// `combined`, then write one `<bucket>.csv` per non-empty bucket with
    /// `VERSION` set to the bucket name.
    CombineAndSplit {
        header: Vec<String>,
        combined: String,
        version_column: String,
        rules: Vec<SplitRule>,
        #[serde(default)]
        date_range: Option<DateRangeColumns>,
        #[serde(default = "txt")]
        extension: String,
    },
}

/// Top-level files in `dir` with the given extension, sorted by name.
fn sources(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("listing {}", dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && has_extension(p, extension))
        .collect();
    files.sort();
    Ok(files)
}

/// Read a source keeping track of its delimiter, so rewritten files keep it.
fn read_source(path: &Path, opts: &ReadOptions) -> Result<(Table, u8)> {
    let text = read_text(path)?;
    let delimiter = opts
        .delimiter
        .unwrap_or_else(|| detect_delimiter(&text, b'\t'));
    let opts = ReadOptions {
        delimiter: Some(delimiter),
        ..opts.clone()
    };
    let table = parse_table(&text, &opts).with_context(|| format!("parsing {}", path.display()))?;
    Ok((table, delimiter))
}

fn replace_file(from: &Path, to: &Path) -> Result<()> {
    if from == to {
        return Ok(());
    }
    if to.exists() {
        fs::remove_file(to).with_context(|| format!("replacing {}", to.display()))?;
    }
    fs::rename(from, to)
        .with_context(|| format!("renaming {} to {}", from.display(), to.display()))
}

impl InputStep {
    /// Run the step over the files in `dir`.
    #[instrument(level = "debug", skip(self), fields(dir = %dir.display()))]
    pub fn apply(&self, dir: &Path) -> Result<()> {
        match self {
            InputStep::SplitByColumn {
                column,
                values,
                extension,
            } => {
                let mut merged: Option<Table> = None;
                for src in sources(dir, extension)? {
                    let (t, _) = read_source(&src, &ReadOptions::default())?;
                    match merged.as_mut() {
                        Some(m) => m.concat(t).with_context(|| format!("merging {}", src.display()))?,
                        None => merged = Some(t),
                    }
                }
                let Some(all) = merged else {
                    warn!("no sources to split");
                    return Ok(());
                };
                let idx = all.require_column(column)?;
                for value in values {
                    let part = all.filter(|r| r[idx].trim() == value.as_str());
                    let out = dir.join(format!("{value}.csv"));
                    write_table(&part, &out, &WriteOptions::default())?;
                    debug!(version = %value, rows = part.len(), "split written");
                }
            }
            InputStep::Concatenate { output, extension } => {
                let out = dir.join(output);
                let mut files = sources(dir, extension)?;
                files.retain(|f| *f != out);
                let mut merged: Option<(Table, u8)> = None;
                for src in &files {
                    let (t, delim) = read_source(src, &ReadOptions::default())?;
                    match merged.as_mut() {
                        Some((m, _)) => m
                            .concat(t)
                            .with_context(|| format!("merging {}", src.display()))?,
                        None => merged = Some((t, delim)),
                    }
                }
                let Some((all, delim)) = merged else {
                    warn!("no sources to concatenate");
                    return Ok(());
                };
                let opts = WriteOptions {
                    delimiter: delim as char,
                    ..WriteOptions::default()
                };
                write_table(&all, &out, &opts)?;
                for src in &files {
                    fs::remove_file(src).with_context(|| format!("removing {}", src.display()))?;
                }
                info!(files = files.len(), rows = all.len(), out = %output, "concatenated");
            }
            InputStep::RenameByValueSuffix {
                column,
                renames,
                expect,
                extension,
            } => {
                let files = sources(dir, extension)?;
                if let Some(n) = expect {
                    if files.len() != *n {
                        bail!(
                            "expected exactly {n} .{extension} files in {}, found {}",
                            dir.display(),
                            files.len()
                        );
                    }
                }
                // decide every name first so renames cannot clobber a source
                let mut plan = Vec::with_capacity(files.len());
                for src in files {
                    let (t, _) = read_source(&src, &ReadOptions::default())?;
                    let value = t
                        .rows
                        .first()
                        .and_then(|r| t.require_column(column).ok().map(|i| clean_str(&r[i])))
                        .unwrap_or_default();
                    let Some(r) = renames
                        .iter()
                        .find(|r| value.to_ascii_uppercase().ends_with(&r.suffix.to_ascii_uppercase()))
                    else {
                        return Err(PrepError::UnexpectedFile {
                            path: src,
                            reason: format!("unexpected {column} value `{value}`"),
                        }
                        .into());
                    };
                    plan.push((src, dir.join(&r.name)));
                }
                let staged: Vec<(PathBuf, PathBuf)> = plan
                    .into_iter()
                    .enumerate()
                    .map(|(i, (src, dest))| {
                        let tmp = dir.join(format!(".rename-{i}"));
                        fs::rename(&src, &tmp)
                            .with_context(|| format!("renaming {}", src.display()))?;
                        Ok((tmp, dest))
                    })
                    .collect::<Result<_>>()?;
                for (tmp, dest) in staged {
                    replace_file(&tmp, &dest)?;
                    info!(to = %file_name_of(&dest), "renamed by version suffix");
                }
            }
            InputStep::RenameByPattern { renames, extension } => {
                for src in sources(dir, extension)? {
                    let name = file_name_of(&src);
                    if let Some(r) = renames.iter().find(|r| name.contains(&r.pattern)) {
                        replace_file(&src, &dir.join(&r.name))?;
                        info!(from = %name, to = %r.name, "renamed by pattern");
                    }
                }
            }
            InputStep::CombineAndSplit {
                header,
                combined,
                version_column,
                rules,
                date_range,
                extension,
            } => {
                let opts = ReadOptions {
                    header_names: Some(header.clone()),
                    ..ReadOptions::default()
                };
                let mut all = Table::new(header.clone());
                for src in sources(dir, extension)? {
                    let (t, _) = read_source(&src, &opts)?;
                    all.concat(t)?;
                }
                if all.is_empty() {
                    bail!("no input rows found in {}", dir.display());
                }
                if let Some(dr) = date_range {
                    let src = all.require_column(&dr.column)?;
                    all.set_column_with(&dr.start, |r| split_date_range(&r[src]).0);
                    all.set_column_with(&dr.end, |r| split_date_range(&r[src]).1);
                }
                all.set_column_with("VERSION", |_| String::new());
                write_table(&all, dir.join(combined), &WriteOptions::default())?;

                let set = RuleSet::compile(rules)?;
                let outcome = split_with(all, version_column, &set)?;
                for (bucket, mut part) in outcome.buckets {
                    if part.is_empty() {
                        continue;
                    }
                    part.set_column_with("VERSION", |_| bucket.clone());
                    write_table(
                        &part,
                        dir.join(format!("{bucket}.csv")),
                        &WriteOptions::default(),
                    )?;
                    debug!(bucket = %bucket, rows = part.len(), "version file written");
                }
                if !outcome.unmatched.is_empty() {
                    warn!(rows = outcome.unmatched.len(), "rows with no known version code");
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IntakeReport {
    pub zips: usize,
    pub extracted: usize,
    /// Routed file count per job.
    pub routed: BTreeMap<String, usize>,
    pub unrouted: Vec<String>,
}

/// Give extension-less files `.txt`; anything else that is not `.txt`
/// aborts the intake.
fn check_extensions(filebox: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(filebox).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walking {}", filebox.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.into_path();
        match path.extension() {
            None => {
                let renamed = path.with_extension("txt");
                fs::rename(&path, &renamed)
                    .with_context(|| format!("renaming {}", path.display()))?;
                info!(file = %file_name_of(&renamed), "added .txt extension");
                files.push(renamed);
            }
            Some(_) if has_extension(&path, "txt") => files.push(path),
            Some(_) => {
                return Err(PrepError::UnexpectedFile {
                    path,
                    reason: "only .txt lists are accepted".to_string(),
                }
                .into())
            }
        }
    }
    Ok(files)
}

fn route<'a>(jobs: &'a [JobConfig], file_name: &str) -> Option<&'a JobConfig> {
    jobs.iter()
        .find(|j| j.routes.iter().any(|p| file_name.contains(p.as_str())))
}

/// Prepare one job's INPUT folder from `arrivals` alone. Whatever INPUT
/// held from an earlier drop is removed through `staging`, so a re-drop
/// replaces the previous lists instead of adding to them.
fn prepare_job(
    job: &JobConfig,
    input_dir: &Path,
    arrivals: &[PathBuf],
    staging: &mut Staging,
) -> Result<()> {
    let work = staging.scratch_dir(&job.name)?;
    fs::create_dir_all(&work).with_context(|| format!("creating {}", work.display()))?;

    let mut cleared = 0;
    if input_dir.is_dir() {
        for e in fs::read_dir(input_dir).with_context(|| format!("listing {}", input_dir.display()))? {
            let p = e?.path();
            if p.is_file() {
                staging.remove(p);
                cleared += 1;
            }
        }
    }
    for f in arrivals {
        fs::rename(f, work.join(file_name_of(f)))
            .with_context(|| format!("moving {} into {}", f.display(), job.name))?;
    }

    for step in &job.input_steps {
        step.apply(&work)
            .with_context(|| format!("{}: input step {:?}", job.name, step))?;
    }

    let mut produced = 0;
    for e in fs::read_dir(&work).with_context(|| format!("listing {}", work.display()))? {
        let p = e?.path();
        if p.is_file() {
            let dest = input_dir.join(file_name_of(&p));
            staging.stage_file(dest, |staged| {
                fs::rename(&p, staged).with_context(|| format!("staging {}", p.display()))
            })?;
            produced += 1;
        }
    }
    info!(job = %job.name, cleared, files = produced, "input prepared");
    Ok(())
}

/// Run the weekly intake inside `staging`. The caller commits.
#[instrument(level = "info", skip_all)]
pub fn run_intake(config: &Config, staging: &mut Staging) -> Result<IntakeReport> {
    let zip_dir = config.resolve(&config.intake.zip_dir);
    let mut zips: Vec<PathBuf> = glob::glob(&format!("{}/*.zip", zip_dir.display()))
        .context("invalid intake glob")?
        .filter_map(Result::ok)
        .collect();
    zips.sort();
    if zips.is_empty() {
        bail!("no ZIP files found in {}", zip_dir.display());
    }

    let mut report = IntakeReport {
        zips: zips.len(),
        ..IntakeReport::default()
    };
    let filebox = staging.scratch_dir("FILEBOX")?;
    for z in &zips {
        let files = extract_zip(z, &filebox)?;
        info!(zip = %file_name_of(z), files = files.len(), "extracted");
        report.extracted += files.len();
    }

    let files = check_extensions(&filebox)?;
    for f in &files {
        normalize_to_utf8(f)?;
    }

    let mut by_job: BTreeMap<&str, Vec<PathBuf>> = BTreeMap::new();
    for f in files {
        let name = file_name_of(&f);
        match route(&config.jobs, &name) {
            Some(job) => by_job.entry(job.name.as_str()).or_default().push(f),
            None => {
                warn!(file = %name, "no job route matches; file left out");
                report.unrouted.push(name);
            }
        }
    }

    for job in &config.jobs {
        let arrivals = by_job.remove(job.name.as_str()).unwrap_or_default();
        if arrivals.is_empty() {
            debug!(job = %job.name, "nothing arrived");
            continue;
        }
        report.routed.insert(job.name.clone(), arrivals.len());
        let input_dir = config.job_dir(job).join("INPUT");
        prepare_job(job, &input_dir, &arrivals, staging)?;
    }

    for z in zips {
        staging.remove(z);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::split::Matcher;
    use crate::table::read_table;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn load_input(path: PathBuf) -> Result<Table> {
        read_table(path, &ReadOptions::default())
    }

    #[test]
    fn split_by_column_keeps_sources() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(
            dir.path().join("a.txt"),
            "ID\tCreative_Version_Cd\n1\tRAC2401-DM03-A\n2\tRAC2401-DM03-PR\n",
        )?;
        fs::write(dir.path().join("b.txt"), "ID\tCreative_Version_Cd\n3\tRAC2401-DM03-A\n")?;
        InputStep::SplitByColumn {
            column: "Creative_Version_Cd".into(),
            values: vec!["RAC2401-DM03-A".into(), "RAC2401-DM03-CANC".into()],
            extension: txt(),
        }
        .apply(dir.path())?;
        let a = load_input(dir.path().join("RAC2401-DM03-A.csv"))?;
        assert_eq!(a.len(), 2);
        let canc = load_input(dir.path().join("RAC2401-DM03-CANC.csv"))?;
        assert!(canc.is_empty());
        assert!(dir.path().join("a.txt").exists());
        Ok(())
    }

    #[test]
    fn concatenate_keeps_one_header_and_delimiter() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("x1.txt"), "ID\tName\n1\tAnn\n")?;
        fs::write(dir.path().join("x2.txt"), "ID\tName\n2\tBo\n")?;
        InputStep::Concatenate {
            output: "EXC.txt".into(),
            extension: txt(),
        }
        .apply(dir.path())?;
        assert_eq!(
            fs::read_to_string(dir.path().join("EXC.txt"))?,
            "ID\tName\n1\tAnn\n2\tBo\n"
        );
        assert!(!dir.path().join("x1.txt").exists());
        Ok(())
    }

    #[test]
    fn rename_by_value_suffix_checks_count_and_suffix() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("f1.txt"), "Creative_Version_Cd\n\"RAC2504-DM03-A-PU\"\n")?;
        fs::write(dir.path().join("f2.txt"), "Creative_Version_Cd\nRAC2504-DM03-A-PO\n")?;
        let step = InputStep::RenameByValueSuffix {
            column: "Creative_Version_Cd".into(),
            renames: vec![
                SuffixRename { suffix: "-PU".into(), name: "APU.txt".into() },
                SuffixRename { suffix: "-PO".into(), name: "APO.txt".into() },
            ],
            expect: Some(2),
            extension: txt(),
        };
        step.apply(dir.path())?;
        assert!(dir.path().join("APU.txt").exists());
        assert!(dir.path().join("APO.txt").exists());

        fs::write(dir.path().join("f3.txt"), "Creative_Version_Cd\nRAC2504-DM03-XX\n")?;
        assert!(step.apply(dir.path()).is_err());
        Ok(())
    }

    #[test]
    fn combine_and_split_tags_versions() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(
            dir.path().join("n1.txt"),
            "c1\tc2\tc3\nRAC2504-DM04-NCWO1-AP\t01/01 - 02/01\tx\nRAC2504-DM04-NCWO1-A\tbad\ty\n",
        )?;
        InputStep::CombineAndSplit {
            header: vec!["Creative_Version_Cd".into(), "CUSTOM_04".into(), "Name".into()],
            combined: "ALLINPUT.csv".into(),
            version_column: "Creative_Version_Cd".into(),
            rules: vec![
                SplitRule::new("1-AP", Matcher::Exact("RAC2504-DM04-NCWO1-AP".into())),
                SplitRule::new("1-A", Matcher::Exact("RAC2504-DM04-NCWO1-A".into())),
                SplitRule::new("2-A", Matcher::Exact("RAC2504-DM04-NCWO2-A".into())),
            ],
            date_range: Some(DateRangeColumns {
                column: "CUSTOM_04".into(),
                start: "START_DATE".into(),
                end: "END_DATE".into(),
            }),
            extension: txt(),
        }
        .apply(dir.path())?;

        let all = load_input(dir.path().join("ALLINPUT.csv"))?;
        assert_eq!(all.len(), 2);
        assert_eq!(all.value(0, "START_DATE"), Some("01/01"));
        assert_eq!(all.value(1, "END_DATE"), Some(""));
        let ap = load_input(dir.path().join("1-AP.csv"))?;
        assert_eq!(ap.value(0, "VERSION"), Some("1-AP"));
        assert!(!dir.path().join("2-A.csv").exists());
        Ok(())
    }

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) -> Result<()> {
        let mut zip = ZipWriter::new(fs::File::create(path)?);
        for (name, body) in entries {
            zip.start_file(*name, SimpleFileOptions::default())?;
            zip.write_all(body)?;
        }
        zip.finish()?;
        Ok(())
    }

    fn test_config(root: &Path) -> Config {
        let mut cfg = Config::default();
        cfg.root = root.to_path_buf();
        cfg.jobs.retain(|j| j.name == "EXC");
        cfg
    }

    #[test]
    fn intake_routes_and_commits() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cfg = test_config(dir.path());
        let zip_dir = cfg.resolve(&cfg.intake.zip_dir);
        fs::create_dir_all(&zip_dir)?;
        write_zip(
            &zip_dir.join("drop.zip"),
            &[
                ("RAC_202406_a", &b"ID\tName\n1\tPe\xF1a\n"[..]),
                ("RAC_202406_b.txt", &b"ID\tName\n2\tBo\n"[..]),
                ("__MACOSX/._RAC_202406_a", &b"junk"[..]),
                ("other_999.txt", &b"ID\n9\n"[..]),
            ],
        )?;

        let mut staging = Staging::begin(dir.path())?;
        let report = run_intake(&cfg, &mut staging)?;
        staging.commit()?;

        assert_eq!(report.routed.get("EXC"), Some(&2));
        assert_eq!(report.unrouted, vec!["other_999.txt".to_string()]);
        let input = cfg.job_dir(&cfg.jobs[0]).join("INPUT");
        let exc = fs::read_to_string(input.join("EXC.txt"))?;
        assert_eq!(exc, "ID\tName\n1\tPeña\n2\tBo\n");
        assert!(!zip_dir.join("drop.zip").exists());
        Ok(())
    }

    #[test]
    fn redrop_replaces_previous_input() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cfg = test_config(dir.path());
        let zip_dir = cfg.resolve(&cfg.intake.zip_dir);
        let input = cfg.job_dir(&cfg.jobs[0]).join("INPUT");
        fs::create_dir_all(&zip_dir)?;
        let body = &b"ID\tName\n1\tAnn\n2\tBo\n"[..];

        write_zip(&zip_dir.join("w1.zip"), &[("RAC_202406_a.txt", body)])?;
        let mut staging = Staging::begin(dir.path())?;
        run_intake(&cfg, &mut staging)?;
        staging.commit()?;
        assert_eq!(load_input(input.join("EXC.txt"))?.len(), 2);
        fs::write(input.join("stale.txt"), "ID\tName\n9\tOld\n")?;

        write_zip(&zip_dir.join("w1b.zip"), &[("RAC_202406_a.txt", body)])?;
        let mut staging = Staging::begin(dir.path())?;
        run_intake(&cfg, &mut staging)?;
        staging.commit()?;
        assert_eq!(load_input(input.join("EXC.txt"))?.len(), 2);
        assert!(!input.join("stale.txt").exists());
        assert_eq!(fs::read_dir(&input)?.count(), 1);
        Ok(())
    }

    #[test]
    fn non_txt_member_aborts_without_changes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cfg = test_config(dir.path());
        let zip_dir = cfg.resolve(&cfg.intake.zip_dir);
        fs::create_dir_all(&zip_dir)?;
        write_zip(&zip_dir.join("drop.zip"), &[("RAC_202406.xlsx", &b"PK"[..])])?;

        let mut staging = Staging::begin(dir.path())?;
        let err = run_intake(&cfg, &mut staging).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PrepError>(),
            Some(PrepError::UnexpectedFile { .. })
        ));
        drop(staging);
        assert!(zip_dir.join("drop.zip").exists());
        assert!(!cfg.job_dir(&cfg.jobs[0]).join("INPUT").exists());
        Ok(())
    }
}
