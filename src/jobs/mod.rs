// src/jobs/mod.rs
//! Weekly job workflow: intake, proofs, post-proof archiving and
//! housekeeping, driven by [`crate::config::Config`].

pub mod break_mark;
pub mod housekeeping;
pub mod intake;
pub mod post_proof;
pub mod proofs;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PrepError;

pub use break_mark::{break_mark_file_name, run_break_mark, BreakMarkReport};
pub use housekeeping::{clean_input_folders, copy_dir_skeleton, CleanReport};
pub use intake::{run_intake, InputStep, IntakeReport};
pub use post_proof::{run_post_proof, PostProofReport};
pub use proofs::{run_proof_job, BucketOutput, ProofJob, ProofReport};

static WEEK_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2})\.(\d{1,2})$").expect("static regex"));

/// Five-digit campaign batch number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobNumber(String);

impl JobNumber {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for JobNumber {
    type Err = PrepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() == 5 && s.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(s.to_string()))
        } else {
            Err(PrepError::InvalidJobNumber(s.to_string()))
        }
    }
}

impl TryFrom<String> for JobNumber {
    type Error = PrepError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<JobNumber> for String {
    fn from(j: JobNumber) -> Self {
        j.0
    }
}

impl fmt::Display for JobNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `W.S` week code: week 1-52, sub-week 1-99. Displayed as typed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WeekCode {
    raw: String,
    pub week: u8,
    pub sub_week: u8,
}

impl WeekCode {
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for WeekCode {
    type Err = PrepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let bad = || PrepError::InvalidWeekCode(s.to_string());
        let caps = WEEK_CODE.captures(s).ok_or_else(bad)?;
        let week: u8 = caps[1].parse().map_err(|_| bad())?;
        let sub_week: u8 = caps[2].parse().map_err(|_| bad())?;
        if !(1..=52).contains(&week) || !(1..=99).contains(&sub_week) {
            return Err(bad());
        }
        Ok(Self {
            raw: s.to_string(),
            week,
            sub_week,
        })
    }
}

impl TryFrom<String> for WeekCode {
    type Error = PrepError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<WeekCode> for String {
    fn from(w: WeekCode) -> Self {
        w.raw
    }
}

impl fmt::Display for WeekCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// `"<job> <week>"`, the prefix used for archived file and zip names.
pub fn job_week_prefix(job: &JobNumber, week: &WeekCode) -> String {
    format!("{job} {week}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_numbers_are_five_digits() {
        assert_eq!("12345".parse::<JobNumber>().unwrap().as_str(), "12345");
        assert_eq!(" 01234 ".parse::<JobNumber>().unwrap().as_str(), "01234");
        for bad in ["1234", "123456", "12a45", ""] {
            assert!(matches!(
                bad.parse::<JobNumber>(),
                Err(PrepError::InvalidJobNumber(_))
            ));
        }
    }

    #[test]
    fn week_codes_are_range_checked() {
        let w: WeekCode = "4.22".parse().unwrap();
        assert_eq!((w.week, w.sub_week), (4, 22));
        assert_eq!(w.to_string(), "4.22");
        assert!("52.99".parse::<WeekCode>().is_ok());
        for bad in ["0.1", "53.1", "4.0", "4", "4.100", "a.b", "04.22.1"] {
            assert!(bad.parse::<WeekCode>().is_err(), "{bad}");
        }
    }

    #[test]
    fn prefix_joins_job_and_week() {
        let j: JobNumber = "12345".parse().unwrap();
        let w: WeekCode = "04.22".parse().unwrap();
        assert_eq!(job_week_prefix(&j, &w), "12345 04.22");
    }

    #[test]
    fn codes_deserialize_with_validation() {
        let j: JobNumber = serde_json::from_str("\"54321\"").unwrap();
        assert_eq!(j.as_str(), "54321");
        assert!(serde_json::from_str::<JobNumber>("\"5432\"").is_err());
    }
}
