// src/prompt.rs
//! Operator prompts. Commands take their answers from the command line when
//! given and fall back to a [`Prompter`] otherwise.

use anyhow::{bail, Context, Result};
use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use tracing::warn;

use crate::jobs::{JobNumber, WeekCode};

pub const MAX_HEADER_LEN: usize = 50;
const FORBIDDEN: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
/// Attempts before an interactive question gives up.
pub const MAX_ATTEMPTS: usize = 5;

pub trait Prompter {
    /// Ask for a line of text, trimmed.
    fn ask(&mut self, question: &str) -> Result<String>;

    fn confirm(&mut self, question: &str) -> Result<bool> {
        let answer = self.ask(&format!("{question} [y/N]"))?;
        Ok(matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes"))
    }
}

/// Reads answers from stdin.
#[derive(Debug, Default)]
pub struct ConsolePrompter;

impl Prompter for ConsolePrompter {
    fn ask(&mut self, question: &str) -> Result<String> {
        let mut out = io::stdout().lock();
        write!(out, "{question}: ").context("write prompt")?;
        out.flush().context("flush prompt")?;
        let mut line = String::new();
        let n = io::stdin()
            .lock()
            .read_line(&mut line)
            .context("read answer")?;
        if n == 0 {
            bail!("input closed while waiting for: {question}");
        }
        Ok(line.trim().to_string())
    }
}

/// Replays canned answers; errors once they run out.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: VecDeque<String>,
    pub asked: Vec<String>,
}

impl ScriptedPrompter {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            asked: Vec::new(),
        }
    }
}

impl Prompter for ScriptedPrompter {
    fn ask(&mut self, question: &str) -> Result<String> {
        self.asked.push(question.to_string());
        match self.answers.pop_front() {
            Some(a) => Ok(a.trim().to_string()),
            None => bail!("no scripted answer for: {question}"),
        }
    }
}

/// Ask until `parse` accepts the answer.
fn ask_parsed<P, T, E>(prompter: &mut P, question: &str, parse: impl Fn(&str) -> Result<T, E>) -> Result<T>
where
    P: Prompter + ?Sized,
    E: std::fmt::Display,
{
    for _ in 0..MAX_ATTEMPTS {
        let answer = prompter.ask(question)?;
        match parse(&answer) {
            Ok(v) => return Ok(v),
            Err(e) => warn!(answer = %answer, "{e}; try again"),
        }
    }
    bail!("no valid answer to `{question}` after {MAX_ATTEMPTS} attempts")
}

pub fn ask_job_number<P: Prompter + ?Sized>(prompter: &mut P, job: &str) -> Result<JobNumber> {
    ask_parsed(prompter, &format!("Job number for {job} (5 digits)"), str::parse::<JobNumber>)
}

pub fn ask_week_code<P: Prompter + ?Sized>(prompter: &mut P) -> Result<WeekCode> {
    ask_parsed(prompter, "Week (e.g. 4.22)", str::parse::<WeekCode>)
}

/// Parse `"1,3"`, `"2-4"`, `"ALL"` or a mix into sorted, distinct 0-based
/// column indices below `count`. Input is 1-based.
pub fn parse_column_selection(input: &str, count: usize) -> Result<Vec<usize>> {
    let input = input.trim();
    if input.eq_ignore_ascii_case("all") {
        return Ok((0..count).collect());
    }
    let mut picked = Vec::new();
    for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (lo, hi) = match part.split_once('-') {
            Some((a, b)) => (parse_index(a)?, parse_index(b)?),
            None => {
                let n = parse_index(part)?;
                (n, n)
            }
        };
        if lo > hi {
            bail!("range `{part}` runs backwards");
        }
        if hi > count {
            bail!("column {hi} is out of range (1-{count})");
        }
        picked.extend(lo - 1..hi);
    }
    if picked.is_empty() {
        bail!("no columns selected");
    }
    picked.sort_unstable();
    picked.dedup();
    Ok(picked)
}

fn parse_index(s: &str) -> Result<usize> {
    match s.trim().parse::<usize>() {
        Ok(0) | Err(_) => bail!("`{}` is not a column number", s.trim()),
        Ok(n) => Ok(n),
    }
}

/// A new header must be non-empty, short, free of path characters and not
/// already present in `existing` (case-insensitive).
pub fn validate_header_name(name: &str, existing: &[String]) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        bail!("header name is empty");
    }
    if name.chars().count() > MAX_HEADER_LEN {
        bail!("header name is longer than {MAX_HEADER_LEN} characters");
    }
    if let Some(c) = name.chars().find(|c| FORBIDDEN.contains(c)) {
        bail!("header name contains `{c}`");
    }
    if existing.iter().any(|h| h.trim().eq_ignore_ascii_case(name)) {
        bail!("header `{name}` already exists");
    }
    Ok(())
}

pub fn validate_file_name(name: &str) -> Result<()> {
    let name = name.trim();
    if name.is_empty() || name == "." || name == ".." {
        bail!("`{name}` is not a file name");
    }
    if let Some(c) = name.chars().find(|c| FORBIDDEN.contains(c) || c.is_control()) {
        bail!("file name contains `{}`", c.escape_default());
    }
    if name.ends_with('.') || name.ends_with(' ') {
        bail!("file name may not end with a dot or space");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reprompts_until_valid() {
        let mut p = ScriptedPrompter::new(["1234", "abcde", " 54321 "]);
        let job = ask_job_number(&mut p, "CBC").unwrap();
        assert_eq!(job.to_string(), "54321");
        assert_eq!(p.asked.len(), 3);

        let mut p = ScriptedPrompter::new(["53.1", "4.22"]);
        assert_eq!(ask_week_code(&mut p).unwrap().as_str(), "4.22");
    }

    #[test]
    fn gives_up_when_answers_run_out() {
        let mut p = ScriptedPrompter::new(["x"]);
        assert!(ask_week_code(&mut p).is_err());
    }

    #[test]
    fn confirm_defaults_to_no() {
        let mut p = ScriptedPrompter::new(["Y", "", "nope"]);
        assert!(p.confirm("go?").unwrap());
        assert!(!p.confirm("go?").unwrap());
        assert!(!p.confirm("go?").unwrap());
    }

    #[test]
    fn column_selection() {
        assert_eq!(parse_column_selection("1,3", 4).unwrap(), vec![0, 2]);
        assert_eq!(parse_column_selection("2-4, 1", 4).unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(parse_column_selection("all", 3).unwrap(), vec![0, 1, 2]);
        assert!(parse_column_selection("0", 3).is_err());
        assert!(parse_column_selection("5", 3).is_err());
        assert!(parse_column_selection("3-1", 3).is_err());
        assert!(parse_column_selection(" , ", 3).is_err());
    }

    #[test]
    fn header_and_file_names() {
        let existing = vec!["Name".to_string()];
        assert!(validate_header_name("Zip", &existing).is_ok());
        assert!(validate_header_name(" name ", &existing).is_err());
        assert!(validate_header_name("", &existing).is_err());
        assert!(validate_header_name("a/b", &existing).is_err());
        assert!(validate_header_name(&"x".repeat(51), &existing).is_err());

        assert!(validate_file_name("EXC.txt").is_ok());
        assert!(validate_file_name("bad?.csv").is_err());
        assert!(validate_file_name("trailing.").is_err());
        assert!(validate_file_name("..").is_err());
    }
}
