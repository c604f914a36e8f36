// src/process/split.rs
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, instrument, warn};

use crate::error::PrepError;
use crate::table::Table;

/// How a rule recognises a version code. Text matchers compare trimmed,
/// ASCII-case-insensitive values; `Regex` is applied as written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Matcher {
    Exact(String),
    Prefix(String),
    Suffix(String),
    Contains(String),
    Regex(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitRule {
    pub bucket: String,
    pub matcher: Matcher,
}

impl SplitRule {
    pub fn new(bucket: &str, matcher: Matcher) -> Self {
        Self {
            bucket: bucket.to_string(),
            matcher,
        }
    }
}

impl Matcher {
    pub fn compile(&self) -> Result<CompiledMatcher> {
        let text = |s: &String, f: fn(&str, &str) -> bool| {
            CompiledMatcher::Text(f, s.trim().to_ascii_uppercase())
        };
        Ok(match self {
            Matcher::Exact(s) => text(s, |v, p| v == p),
            Matcher::Prefix(s) => text(s, |v, p| v.starts_with(p)),
            Matcher::Suffix(s) => text(s, |v, p| v.ends_with(p)),
            Matcher::Contains(s) => text(s, |v, p| v.contains(p)),
            Matcher::Regex(p) => CompiledMatcher::Pattern(
                Regex::new(p).with_context(|| format!("invalid version pattern `{p}`"))?,
            ),
        })
    }
}

pub enum CompiledMatcher {
    Text(fn(&str, &str) -> bool, String),
    Pattern(Regex),
}

impl CompiledMatcher {
    pub fn is_match(&self, value: &str) -> bool {
        match self {
            CompiledMatcher::Text(f, p) => f(&value.trim().to_ascii_uppercase(), p),
            CompiledMatcher::Pattern(re) => re.is_match(value.trim()),
        }
    }
}

/// Compiled rule list, reusable across files.
pub struct RuleSet {
    rules: Vec<(String, CompiledMatcher)>,
}

impl RuleSet {
    pub fn compile(rules: &[SplitRule]) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut compiled = Vec::with_capacity(rules.len());
        for r in rules {
            if !seen.insert(r.bucket.as_str()) {
                return Err(PrepError::Config(format!("bucket `{}` is listed twice", r.bucket)).into());
            }
            compiled.push((r.bucket.clone(), r.matcher.compile()?));
        }
        Ok(Self { rules: compiled })
    }

    /// Index of the first rule matching `value`.
    pub fn classify(&self, value: &str) -> Option<usize> {
        self.rules.iter().position(|(_, m)| m.is_match(value))
    }

    /// Bucket name of the first rule matching `value`.
    pub fn bucket_of(&self, value: &str) -> Option<&str> {
        self.classify(value).map(|i| self.rules[i].0.as_str())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Buckets in rule order, plus rows no rule claimed.
#[derive(Debug)]
pub struct SplitOutcome {
    pub buckets: Vec<(String, Table)>,
    pub unmatched: Table,
}

impl SplitOutcome {
    pub fn total(&self) -> usize {
        self.buckets.iter().map(|(_, t)| t.len()).sum::<usize>() + self.unmatched.len()
    }

    pub fn bucket(&self, name: &str) -> Option<&Table> {
        self.buckets
            .iter()
            .find(|(b, _)| b == name)
            .map(|(_, t)| t)
    }
}

/// Assign every row to the first rule whose matcher accepts its `column`
/// value. Every input row lands in exactly one bucket or in `unmatched`.
#[instrument(level = "debug", skip(table, rules), fields(rows = table.len(), rules = rules.len()))]
pub fn split_by_rules(table: Table, column: &str, rules: &[SplitRule]) -> Result<SplitOutcome> {
    let set = RuleSet::compile(rules)?;
    split_with(table, column, &set)
}

pub fn split_with(table: Table, column: &str, set: &RuleSet) -> Result<SplitOutcome> {
    let idx = table.require_column(column)?;
    let mut buckets: Vec<(String, Table)> = set
        .rules
        .iter()
        .map(|(b, _)| (b.clone(), table.empty_like()))
        .collect();
    let mut unmatched = table.empty_like();

    for row in table.rows {
        match set.classify(&row[idx]) {
            Some(i) => buckets[i].1.rows.push(row),
            None => unmatched.rows.push(row),
        }
    }

    for (b, t) in &buckets {
        debug!(bucket = %b, rows = t.len(), "bucket filled");
    }
    if !unmatched.is_empty() {
        warn!(rows = unmatched.len(), column, "rows matched no version rule");
    }
    Ok(SplitOutcome { buckets, unmatched })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::table;

    fn inactive_rules() -> Vec<SplitRule> {
        vec![
            SplitRule::new("PR-PU", Matcher::Regex("-PR-PU$".into())),
            SplitRule::new("AT-PU", Matcher::Suffix("-AT-PU".into())),
            SplitRule::new("A-PU", Matcher::Suffix("-A-PU".into())),
        ]
    }

    #[test]
    fn row_count_is_conserved() -> Result<()> {
        let t = table(
            &["Creative_Version_Cd", "id"],
            &[
                &["RAC2504-DM03-A-PU", "1"],
                &["RAC2501-DM06-PR-PU", "2"],
                &["RAC2504-DM03-AT-PU", "3"],
                &["RAC2504-DM03-XX", "4"],
                &["rac2504-dm03-a-pu", "5"],
                &["", "6"],
            ],
        );
        let input = t.len();
        let out = split_by_rules(t, "Creative_Version_Cd", &inactive_rules())?;
        assert_eq!(out.total(), input);
        assert_eq!(out.bucket("A-PU").map(Table::len), Some(2));
        assert_eq!(out.bucket("PR-PU").map(Table::len), Some(1));
        assert_eq!(out.bucket("AT-PU").map(Table::len), Some(1));
        assert_eq!(out.unmatched.len(), 2);
        Ok(())
    }

    #[test]
    fn first_matching_rule_wins() -> Result<()> {
        let rules = vec![
            SplitRule::new("1-AP", Matcher::Contains("NCWO1-AP".into())),
            SplitRule::new("1-A", Matcher::Contains("NCWO1-A".into())),
        ];
        let t = table(&["v"], &[&["RAC2504-DM04-NCWO1-APPR"], &["RAC2504-DM04-NCWO1-A"]]);
        let out = split_by_rules(t, "v", &rules)?;
        assert_eq!(out.bucket("1-AP").map(Table::len), Some(1));
        assert_eq!(out.bucket("1-A").map(Table::len), Some(1));
        Ok(())
    }

    #[test]
    fn duplicate_bucket_and_bad_regex_are_rejected() {
        let dup = vec![
            SplitRule::new("A", Matcher::Exact("x".into())),
            SplitRule::new("A", Matcher::Exact("y".into())),
        ];
        assert!(RuleSet::compile(&dup).is_err());
        let bad = vec![SplitRule::new("A", Matcher::Regex("(".into()))];
        assert!(RuleSet::compile(&bad).is_err());
    }

    #[test]
    fn missing_split_column_is_an_error() {
        let t = table(&["other"], &[&["x"]]);
        assert!(split_by_rules(t, "Creative_Version_Cd", &inactive_rules()).is_err());
    }

    #[test]
    fn rules_parse_from_yaml() {
        let yaml = "- bucket: PR\n  matcher: { kind: suffix, value: -PR }\n- bucket: CANC\n  matcher: { kind: exact, value: RAC2401-DM03-CANC }\n";
        let rules: Vec<SplitRule> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rules[0].matcher, Matcher::Suffix("-PR".into()));
        assert_eq!(rules[1].bucket, "CANC");
    }
}
