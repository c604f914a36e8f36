use super::state::State;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use glob::glob;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};
use tracing::{debug, instrument, warn};

/// One ledger event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub job: String,
    pub step: String,
    pub state: State,
    pub rows: usize,
    pub at: DateTime<Utc>,
    /// Microsecond stamp, strictly increasing within one ledger directory.
    pub seq: i64,
}

/// `Ledger` keeps a directory of single-event files named
/// `<job>---<step>---<State>---<seq>.json`. Each file holds one JSON line
/// and is written to `.tmp` first, then renamed into place.
///
/// `new` scans the directory so `completed` answers from memory.
pub struct Ledger {
    dir: PathBuf,
    /// Latest record per (job, step), plus the last sequence number issued.
    latest: Mutex<(HashMap<(String, String), LedgerRecord>, i64)>,
}

fn safe_part(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl Ledger {
    /// Open (creating if needed) the ledger in `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir: PathBuf = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating ledger directory {}", dir.display()))?;

        let mut latest: HashMap<(String, String), LedgerRecord> = HashMap::new();
        let mut last_seq = 0;
        let pattern = format!("{}/*.json", dir.display());
        for entry in glob(&pattern).context("invalid glob pattern for Ledger::new")? {
            let path = match entry {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "cannot read ledger entry");
                    continue;
                }
            };
            let record = match Self::read_record(&path) {
                Ok(r) => r,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "skipping unreadable ledger record");
                    continue;
                }
            };
            last_seq = last_seq.max(record.seq);
            let key = (record.job.clone(), record.step.clone());
            match latest.get(&key) {
                Some(prev) if prev.seq >= record.seq => {}
                _ => {
                    latest.insert(key, record);
                }
            }
        }
        debug!(dir = %dir.display(), entries = latest.len(), "ledger loaded");

        Ok(Self {
            dir,
            latest: Mutex::new((latest, last_seq)),
        })
    }

    fn read_record(path: &Path) -> Result<LedgerRecord> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(text.trim())
            .with_context(|| format!("parsing ledger record {}", path.display()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append an event for `(job, step)`.
    #[instrument(level = "debug", skip(self), fields(state = state.as_str()))]
    pub fn record(&self, job: &str, step: &str, state: State, rows: usize) -> Result<LedgerRecord> {
        let mut guard = self
            .latest
            .lock()
            .map_err(|_| anyhow::anyhow!("ledger lock poisoned"))?;

        let now = Utc::now();
        let seq = now.timestamp_micros().max(guard.1 + 1);
        guard.1 = seq;

        let record = LedgerRecord {
            job: job.to_string(),
            step: step.to_string(),
            state,
            rows,
            at: now,
            seq,
        };

        let file_name = format!(
            "{}---{}---{}---{}.json",
            safe_part(job),
            safe_part(step),
            state.as_str(),
            seq
        );
        let final_path = self.dir.join(&file_name);
        let tmp_path = self.dir.join(format!("{file_name}.tmp"));

        let mut line = serde_json::to_string(&record).context("serialising ledger record")?;
        line.push('\n');
        fs::write(&tmp_path, line)
            .with_context(|| format!("could not write temporary file `{}`", tmp_path.display()))?;
        fs::rename(&tmp_path, &final_path).with_context(|| {
            format!(
                "failed to rename `{}` to `{}`",
                tmp_path.display(),
                final_path.display()
            )
        })?;

        guard
            .0
            .insert((job.to_string(), step.to_string()), record.clone());
        Ok(record)
    }

    /// Latest recorded state of `(job, step)`.
    pub fn last_state(&self, step: &str, job: &str) -> Option<State> {
        let guard = self.latest.lock().ok()?;
        guard
            .0
            .get(&(job.to_string(), step.to_string()))
            .map(|r| r.state)
    }

    /// True when the most recent event for `(job, step)` is a commit.
    pub fn completed(&self, step: &str, job: &str) -> bool {
        self.last_state(step, job) == Some(State::Committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_event_decides_completion() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let ledger = Ledger::new(dir.path())?;
        assert!(!ledger.completed("proofs", "CBC 12345"));

        ledger.record("CBC 12345", "proofs", State::Started, 0)?;
        assert!(!ledger.completed("proofs", "CBC 12345"));
        ledger.record("CBC 12345", "proofs", State::Committed, 120)?;
        assert!(ledger.completed("proofs", "CBC 12345"));
        assert!(!ledger.completed("intake", "CBC 12345"));

        ledger.record("CBC 12345", "proofs", State::Started, 0)?;
        ledger.record("CBC 12345", "proofs", State::RolledBack, 0)?;
        assert_eq!(ledger.last_state("proofs", "CBC 12345"), Some(State::RolledBack));
        assert!(!ledger.completed("proofs", "CBC 12345"));
        Ok(())
    }

    #[test]
    fn reopened_ledger_sees_previous_runs() -> Result<()> {
        let dir = tempfile::tempdir()?;
        {
            let ledger = Ledger::new(dir.path())?;
            ledger.record("EXC", "intake", State::Started, 0)?;
            ledger.record("EXC", "intake", State::Committed, 7)?;
        }
        fs::write(dir.path().join("junk.json"), "not json")?;

        let ledger = Ledger::new(dir.path())?;
        assert!(ledger.completed("intake", "EXC"));
        let leftover_tmp = fs::read_dir(dir.path())?
            .filter_map(Result::ok)
            .any(|e| e.path().extension().is_some_and(|x| x == "tmp"));
        assert!(!leftover_tmp);
        Ok(())
    }

    #[test]
    fn file_names_are_sanitised() {
        assert_eq!(safe_part("CBC 12/3"), "CBC_12_3");
        assert_eq!(safe_part("post-proof"), "post-proof");
    }
}
