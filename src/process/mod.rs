// src/process/mod.rs
//! Row-level processing: splitting, sampling, marking, formatting and the
//! file-level checks built on top of [`crate::table::Table`].

pub mod breakmark;
pub mod counts;
pub mod format;
pub mod lookup;
pub mod proof;
pub mod quotes;
pub mod split;
pub mod trimming;
pub mod utils;

pub use breakmark::{assign_break_marks, BreakMarkSpec};
pub use format::{apply_all, Transform};
pub use proof::{draw_proof, ProofSpec};
pub use split::{split_by_rules, Matcher, RuleSet, SplitOutcome, SplitRule};
