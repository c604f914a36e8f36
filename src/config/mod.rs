// src/config/mod.rs
//! YAML configuration. Every folder, route, version table and proof rule
//! lives here so a new campaign week is a config edit, not a code change.

mod defaults;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::PrepError;
use crate::jobs::{InputStep, ProofJob};
use crate::process::breakmark::BreakMarkSpec;
use crate::process::counts::{CountGroup, CountSection, DEFAULT_VERSION_PATTERN};
use crate::process::proof::ProofSpec;
use crate::process::split::RuleSet;

pub const ROOT_ENV: &str = "MAILPREP_ROOT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoffConfig {
    /// Network share; skipped when absent or unreachable.
    pub primary: Option<PathBuf>,
    pub fallback: PathBuf,
    /// Where break-marked lists go when the share is unavailable.
    pub break_mark_fallback: PathBuf,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            primary: None,
            fallback: PathBuf::from("HANDOFF"),
            break_mark_fallback: PathBuf::from("MOVE TO BUSKRO"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    pub zip_dir: PathBuf,
    pub weekly_zip_dir: PathBuf,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            zip_dir: PathBuf::from("WEEKLY/INPUTZIP"),
            weekly_zip_dir: PathBuf::from("WEEKLY/WEEKLY_ZIP"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,
    /// Folder holding INPUT, OUTPUT and PROOF.
    pub working_dir: PathBuf,
    /// Weekly archives land in `<archive_base>/<week>`.
    pub archive_base: PathBuf,
    pub proof_zip_suffix: String,
    /// Intake sends a file here when its name contains one of these.
    #[serde(default)]
    pub routes: Vec<String>,
    #[serde(default)]
    pub input_steps: Vec<InputStep>,
    #[serde(default)]
    pub proof_jobs: Vec<ProofJob>,
}

/// Files counted for one job: a glob inside one of its folders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountSource {
    pub job: String,
    pub folder: String,
    pub pattern: String,
    pub column: String,
}

impl CountSource {
    pub fn new(job: &str, folder: &str, pattern: &str, column: &str) -> Self {
        Self {
            job: job.to_string(),
            folder: folder.to_string(),
            pattern: pattern.to_string(),
            column: column.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CountsConfig {
    pub version_pattern: String,
    pub report_dir: PathBuf,
    pub groups: Vec<CountGroup>,
    pub inputs: Vec<CountSource>,
    pub outputs: Vec<CountSource>,
    pub sections: Vec<CountSection>,
}

impl CountsConfig {
    /// Drop count sources for jobs not in `jobs`.
    pub fn retain_jobs(&mut self, jobs: &[JobConfig]) {
        let known = |src: &CountSource| jobs.iter().any(|j| j.name == src.job);
        self.inputs.retain(known);
        self.outputs.retain(known);
        self.sections
            .retain(|s| jobs.iter().any(|j| j.name == s.job));
    }
}

impl Default for CountsConfig {
    fn default() -> Self {
        Self {
            version_pattern: DEFAULT_VERSION_PATTERN.to_string(),
            report_dir: PathBuf::from("COUNTS"),
            groups: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            sections: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotesConfig {
    /// Backups keep paths relative to this folder.
    pub base_dir: PathBuf,
    pub scan_dirs: Vec<PathBuf>,
    pub exclude: Vec<String>,
    pub backup_dir: PathBuf,
}

impl Default for QuotesConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            scan_dirs: Vec::new(),
            exclude: vec!["ARCHIVE".into(), "ART".into()],
            backup_dir: PathBuf::from("QUOTE_BACKUPS"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Relative paths below resolve against this.
    pub root: PathBuf,
    pub ledger_dir: PathBuf,
    pub handoff: HandoffConfig,
    pub intake: IntakeConfig,
    pub jobs: Vec<JobConfig>,
    pub counts: CountsConfig,
    pub quotes: QuotesConfig,
    pub proof: ProofSpec,
    pub break_mark: BreakMarkSpec,
}

impl Default for Config {
    fn default() -> Self {
        defaults::rac_weekly()
    }
}

impl Config {
    /// Parse YAML text and validate it. When the file lists its own jobs
    /// but leaves out `counts` or `quotes`, those defaults are narrowed to
    /// the listed jobs.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let value: serde_yaml::Value = serde_yaml::from_str(text).context("parse config YAML")?;
        let given = |key: &str| value.get(key).is_some();
        let (jobs_given, counts_given, quotes_given) = (given("jobs"), given("counts"), given("quotes"));
        let mut cfg: Config = serde_yaml::from_value(value).context("parse config YAML")?;
        if jobs_given {
            if !counts_given {
                cfg.counts.retain_jobs(&cfg.jobs);
            }
            if !quotes_given {
                cfg.quotes.scan_dirs = defaults::quote_scan_dirs(&cfg.jobs);
            }
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from `path`, or the built-in layout when `None`, then apply the
    /// `MAILPREP_ROOT` override.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(p) => {
                let text =
                    fs::read_to_string(p).with_context(|| format!("read config {}", p.display()))?;
                let cfg = Self::from_yaml(&text)?;
                info!(path = %p.display(), jobs = cfg.jobs.len(), "config loaded");
                cfg
            }
            None => {
                debug!("no config file; using built-in layout");
                Self::default()
            }
        };
        if let Some(root) = std::env::var_os(ROOT_ENV) {
            cfg.root = PathBuf::from(root);
            debug!(root = %cfg.root.display(), "root overridden from environment");
        }
        Ok(cfg)
    }

    /// Job names are unique; every rule table has unique, valid buckets;
    /// every count source names a known job.
    pub fn validate(&self) -> Result<(), PrepError> {
        let mut names = HashSet::new();
        for job in &self.jobs {
            if !names.insert(job.name.as_str()) {
                return Err(PrepError::Config(format!("job `{}` is defined twice", job.name)));
            }
            for pj in &job.proof_jobs {
                let mut buckets = HashSet::new();
                for input in &pj.inputs {
                    if let Some(schema) = &input.schema {
                        schema.aliases.validate(&[]).map_err(|e| {
                            PrepError::Config(format!("{} / {}: {e}", job.name, pj.name))
                        })?;
                    }
                    RuleSet::compile(&input.rules).map_err(|e| {
                        PrepError::Config(format!("{} / {}: {e:#}", job.name, pj.name))
                    })?;
                    for r in &input.rules {
                        if !buckets.insert(r.bucket.as_str()) {
                            return Err(PrepError::Config(format!(
                                "{} / {}: bucket `{}` is produced by two inputs",
                                job.name, pj.name, r.bucket
                            )));
                        }
                    }
                }
            }
            for step in &job.input_steps {
                if let InputStep::CombineAndSplit { rules, .. } = step {
                    RuleSet::compile(rules)
                        .map_err(|e| PrepError::Config(format!("{}: {e:#}", job.name)))?;
                }
            }
        }
        for src in self.counts.inputs.iter().chain(&self.counts.outputs) {
            if !names.contains(src.job.as_str()) {
                return Err(PrepError::Config(format!(
                    "count source refers to unknown job `{}`",
                    src.job
                )));
            }
        }
        for section in &self.counts.sections {
            if !names.contains(section.job.as_str()) {
                return Err(PrepError::Config(format!(
                    "count section `{}` refers to unknown job `{}`",
                    section.title, section.job
                )));
            }
        }
        Ok(())
    }

    /// `p` if absolute, else `root/p`.
    pub fn resolve(&self, p: &Path) -> PathBuf {
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        }
    }

    pub fn job(&self, name: &str) -> Result<&JobConfig, PrepError> {
        self.jobs
            .iter()
            .find(|j| j.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| PrepError::Config(format!("unknown job `{name}`")))
    }

    pub fn job_dir(&self, job: &JobConfig) -> PathBuf {
        self.resolve(&job.working_dir)
    }

    pub fn input_dirs(&self) -> Vec<PathBuf> {
        self.jobs
            .iter()
            .map(|j| self.job_dir(j).join("INPUT"))
            .collect()
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.resolve(&self.ledger_dir)
    }

    /// Serialise as YAML, e.g. to seed a config file.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("serialize config YAML")
    }
}
