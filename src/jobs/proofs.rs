// src/jobs/proofs.rs
//! Split a job's processed files into treatment buckets and draw a proof
//! sample from each.

use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, instrument, warn};

use crate::process::format::{apply_all, Transform};
use crate::process::proof::{draw_proof, ProofSpec};
use crate::process::split::{split_with, RuleSet, SplitRule};
use crate::process::utils::file_stem_of;
use crate::schema::SourceSchema;
use crate::staging::Staging;
use crate::table::{read_raw_rows, read_table, ReadOptions, Table, WriteOptions};

fn output_dir() -> String {
    "OUTPUT".to_string()
}

fn proof_dir() -> String {
    "PROOF".to_string()
}

fn yes() -> bool {
    true
}

/// Keep an input whole instead of writing one file per bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinedOutput {
    /// The transformed input, written to the output folder. Skipped when
    /// absent.
    #[serde(default)]
    pub output: Option<String>,
    /// Every bucket's proof rows, in rule order, in the proof folder.
    pub proof: String,
    #[serde(default)]
    pub write: WriteOptions,
}

/// One file feeding a proof job, with the rules that split it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofInput {
    pub file: String,
    /// Required columns and header aliases; lets the header sit below a
    /// preamble.
    #[serde(default)]
    pub schema: Option<SourceSchema>,
    #[serde(default)]
    pub transforms: Vec<Transform>,
    pub split_column: String,
    pub rules: Vec<SplitRule>,
    #[serde(default)]
    pub combined: Option<CombinedOutput>,
}

/// Per-bucket output settings. Buckets without an entry use the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketOutput {
    pub bucket: String,
    /// Applied to the bucket only, after the input's transforms.
    #[serde(default)]
    pub transforms: Vec<Transform>,
    #[serde(default)]
    pub write: WriteOptions,
    /// Whether the proof must include a row with the required column set.
    #[serde(default = "yes")]
    pub use_required_column: bool,
    /// Replaces the job's proof settings for this bucket.
    #[serde(default)]
    pub proof: Option<ProofSpec>,
}

impl BucketOutput {
    fn defaults(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            transforms: Vec::new(),
            write: WriteOptions::default(),
            use_required_column: true,
            proof: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofJob {
    pub name: String,
    pub inputs: Vec<ProofInput>,
    #[serde(default)]
    pub buckets: Vec<BucketOutput>,
    /// Overrides the configured proof defaults.
    #[serde(default)]
    pub proof: Option<ProofSpec>,
    /// Folder (under the job's working directory) holding the inputs and
    /// receiving `<bucket>.csv`.
    #[serde(default = "output_dir")]
    pub output_dir: String,
    #[serde(default = "proof_dir")]
    pub proof_dir: String,
}

impl ProofJob {
    fn bucket_settings(&self, bucket: &str) -> BucketOutput {
        self.buckets
            .iter()
            .find(|b| b.bucket == bucket)
            .cloned()
            .unwrap_or_else(|| BucketOutput::defaults(bucket))
    }

    /// Every bucket name this job can produce, in rule order.
    pub fn bucket_names(&self) -> Vec<&str> {
        self.inputs
            .iter()
            .flat_map(|i| i.rules.iter().map(|r| r.bucket.as_str()))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketSummary {
    pub bucket: String,
    pub rows: usize,
    pub proof_rows: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProofReport {
    pub job: String,
    pub input_rows: usize,
    pub buckets: Vec<BucketSummary>,
    pub unmatched: usize,
}

impl ProofReport {
    pub fn total_rows(&self) -> usize {
        self.buckets.iter().map(|b| b.rows).sum::<usize>() + self.unmatched
    }
}

fn load_input(path: &Path, schema: Option<&SourceSchema>) -> Result<Table> {
    match schema {
        Some(schema) => {
            let raw = read_raw_rows(path, &ReadOptions::default())?;
            Ok(schema.table_from_raw(raw)?)
        }
        None => read_table(path, &ReadOptions::default()),
    }
}

/// Read, transform and split every input of `job`, staging `<bucket>.csv`
/// and `<bucket>-PD.csv` for each non-empty bucket and
/// `UNMATCHED-<file>.csv` when rows matched no rule. A combined input
/// writes its whole table and one proof file instead; bucket transforms then
/// only shape that bucket's proof rows.
#[instrument(level = "info", skip_all, fields(job = %job.name))]
pub fn run_proof_job<R: Rng + ?Sized>(
    job: &ProofJob,
    working_dir: &Path,
    defaults: &ProofSpec,
    staging: &mut Staging,
    rng: &mut R,
) -> Result<ProofReport> {
    let out_dir = working_dir.join(&job.output_dir);
    let proof_dir = working_dir.join(&job.proof_dir);
    let spec = job.proof.as_ref().unwrap_or(defaults);
    let mut report = ProofReport {
        job: job.name.clone(),
        ..ProofReport::default()
    };

    for input in &job.inputs {
        let path = out_dir.join(&input.file);
        let mut table = load_input(&path, input.schema.as_ref())
            .with_context(|| format!("reading proof input {}", path.display()))?;
        apply_all(&mut table, &input.transforms)
            .with_context(|| format!("transforming {}", path.display()))?;
        report.input_rows += table.len();

        if let Some(c) = &input.combined {
            if let Some(name) = &c.output {
                staging.write_table(&table, out_dir.join(name), &c.write)?;
            }
        }
        let mut combined_proof: Option<Table> = None;

        let rules = RuleSet::compile(&input.rules)?;
        let outcome = split_with(table, &input.split_column, &rules)
            .with_context(|| format!("splitting {}", path.display()))?;

        for (bucket, mut rows) in outcome.buckets {
            if rows.is_empty() {
                debug!(bucket = %bucket, "empty bucket; nothing written");
                continue;
            }
            let settings = job.bucket_settings(&bucket);
            apply_all(&mut rows, &settings.transforms)
                .with_context(|| format!("transforming bucket {bucket}"))?;

            let mut bucket_spec = settings.proof.clone().unwrap_or_else(|| spec.clone());
            if !settings.use_required_column {
                bucket_spec.required_column = None;
            }
            let proof = draw_proof(&rows, &bucket_spec, rng);

            if input.combined.is_some() {
                match combined_proof.as_mut() {
                    Some(all) => all.concat(proof.clone())?,
                    None => combined_proof = Some(proof.clone()),
                }
            } else {
                staging.write_table(&rows, out_dir.join(format!("{bucket}.csv")), &settings.write)?;
                staging.write_table(
                    &proof,
                    proof_dir.join(format!("{bucket}-PD.csv")),
                    &settings.write,
                )?;
            }
            info!(bucket = %bucket, rows = rows.len(), proof = proof.len(), "bucket staged");
            report.buckets.push(BucketSummary {
                bucket,
                rows: rows.len(),
                proof_rows: proof.len(),
            });
        }

        if let (Some(c), Some(all)) = (&input.combined, combined_proof) {
            staging.write_table(&all, proof_dir.join(&c.proof), &c.write)?;
            debug!(file = %c.proof, rows = all.len(), "combined proof staged");
        }

        if !outcome.unmatched.is_empty() {
            let name = format!("UNMATCHED-{}.csv", file_stem_of(&path));
            warn!(file = %input.file, rows = outcome.unmatched.len(), out = %name, "unmatched rows kept aside");
            report.unmatched += outcome.unmatched.len();
            staging.write_table(&outcome.unmatched, out_dir.join(name), &WriteOptions::default())?;
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PrepError;
    use crate::process::split::Matcher;
    use crate::table::TextEncoding;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::fs;

    fn inactive_job() -> ProofJob {
        ProofJob {
            name: "INACTIVE".into(),
            inputs: vec![ProofInput {
                file: "APU.txt".into(),
                schema: Some(SourceSchema::new("inactive", &["Creative_Version_Cd"])),
                transforms: vec![Transform::Uppercase {
                    column: "First Name".into(),
                    into: None,
                }],
                split_column: "Creative_Version_Cd".into(),
                rules: vec![
                    SplitRule::new("PR-PU", Matcher::Suffix("-PR-PU".into())),
                    SplitRule::new("AT-PU", Matcher::Suffix("-AT-PU".into())),
                    SplitRule::new("A-PU", Matcher::Suffix("-A-PU".into())),
                ],
                combined: None,
            }],
            buckets: vec![BucketOutput {
                bucket: "PR-PU".into(),
                transforms: vec![Transform::ZipPad {
                    column: "SZIP".into(),
                }],
                write: WriteOptions {
                    encoding: TextEncoding::Windows1252,
                    ..WriteOptions::default()
                },
                use_required_column: false,
                proof: None,
            }],
            proof: Some(ProofSpec {
                size: 2,
                ..ProofSpec::default()
            }
            .with_required("Store_License")),
            output_dir: output_dir(),
            proof_dir: proof_dir(),
        }
    }

    fn seed(dir: &Path) {
        fs::create_dir_all(dir.join("OUTPUT")).unwrap();
        fs::write(
            dir.join("OUTPUT/APU.txt"),
            "First Name\tCreative_Version_Cd\tSZIP\tStore_License\n\
             ana\tRAC2504-DM03-A-PU\t123\t\n\
             bo\tRAC2504-DM03-A-PU\t76706\tL-1\n\
             cy\tRAC2504-DM03-A-PU\t76706\t\n\
             dee\tRAC2501-DM06-PR-PU\t501\t\n\
             ed\tRAC9999-XX\t1\t\n",
        )
        .unwrap();
    }

    #[test]
    fn buckets_and_proofs_are_written_on_commit() -> Result<()> {
        crate::init_test_logging();
        let dir = tempfile::tempdir()?;
        seed(dir.path());
        let mut staging = Staging::begin(dir.path())?;
        let mut rng = StdRng::seed_from_u64(7);
        let report = run_proof_job(
            &inactive_job(),
            dir.path(),
            &ProofSpec::default(),
            &mut staging,
            &mut rng,
        )?;
        assert!(!dir.path().join("OUTPUT/A-PU.csv").exists());
        staging.commit()?;

        assert_eq!(report.input_rows, 5);
        assert_eq!(report.total_rows(), report.input_rows);
        assert_eq!(report.unmatched, 1);
        let names: Vec<_> = report.buckets.iter().map(|b| b.bucket.as_str()).collect();
        assert_eq!(names, vec!["PR-PU", "A-PU"]);

        let a = read_table(dir.path().join("OUTPUT/A-PU.csv"), &ReadOptions::default())?;
        assert_eq!(a.len(), 3);
        assert_eq!(a.value(0, "First Name"), Some("ANA"));

        let pd = read_table(dir.path().join("PROOF/A-PU-PD.csv"), &ReadOptions::default())?;
        assert_eq!(pd.len(), 2);
        let has_license = (0..pd.len()).any(|i| pd.value(i, "Store_License") == Some("L-1"));
        assert!(has_license);

        let pr = read_table(dir.path().join("OUTPUT/PR-PU.csv"), &ReadOptions::default())?;
        assert_eq!(pr.value(0, "SZIP"), Some("00501"));
        assert!(dir.path().join("PROOF/PR-PU-PD.csv").exists());
        assert!(dir.path().join("OUTPUT/UNMATCHED-APU.csv").exists());
        assert!(!dir.path().join("OUTPUT/AT-PU.csv").exists());
        Ok(())
    }

    #[test]
    fn preamble_above_header_is_skipped_and_missing_columns_fail() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join("OUTPUT"))?;
        fs::write(
            dir.path().join("OUTPUT/APU.txt"),
            "Presort report\t\t\t\n\
             First Name\tCreative_Version_Cd\tSZIP\tStore_License\n\
             ana\tRAC2504-DM03-A-PU\t1\t\n",
        )?;
        let mut staging = Staging::begin(dir.path())?;
        let mut rng = StdRng::seed_from_u64(3);
        let report = run_proof_job(
            &inactive_job(),
            dir.path(),
            &ProofSpec::default(),
            &mut staging,
            &mut rng,
        )?;
        assert_eq!(report.input_rows, 1);
        drop(staging);

        fs::write(dir.path().join("OUTPUT/APU.txt"), "First Name\tSZIP\nana\t1\n")?;
        let mut staging = Staging::begin(dir.path())?;
        let err = run_proof_job(
            &inactive_job(),
            dir.path(),
            &ProofSpec::default(),
            &mut staging,
            &mut rng,
        )
        .unwrap_err();
        let header_missing = err.chain().any(|e| {
            matches!(
                e.downcast_ref::<PrepError>(),
                Some(PrepError::HeaderNotFound(_))
            )
        });
        assert!(header_missing);
        Ok(())
    }

    #[test]
    fn missing_input_leaves_nothing_behind() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join("OUTPUT"))?;
        let mut staging = Staging::begin(dir.path())?;
        let mut rng = StdRng::seed_from_u64(1);
        let res = run_proof_job(
            &inactive_job(),
            dir.path(),
            &ProofSpec::default(),
            &mut staging,
            &mut rng,
        );
        assert!(res.is_err());
        drop(staging);
        assert_eq!(fs::read_dir(dir.path().join("OUTPUT"))?.count(), 0);
        Ok(())
    }

    #[test]
    fn job_parses_from_yaml_with_defaults() {
        let yaml = r#"
name: NCWO
inputs:
  - file: 1-A_OUTPUT.csv
    split_column: Creative_Version_Cd
    rules:
      - { bucket: 1-PR, matcher: { kind: suffix, value: NCWO1-PR } }
      - { bucket: 1-A, matcher: { kind: suffix, value: NCWO1-A } }
buckets:
  - bucket: 1-PR
    use_required_column: false
    write: { encoding: windows-1252 }
"#;
        let job: ProofJob = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(job.output_dir, "OUTPUT");
        assert_eq!(job.bucket_names(), vec!["1-PR", "1-A"]);
        assert!(!job.bucket_settings("1-PR").use_required_column);
        assert!(job.bucket_settings("1-A").use_required_column);
    }
}
