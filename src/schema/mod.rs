// src/schema/mod.rs
//! Declarative column schemas: which columns a source must carry and how its
//! header names map onto canonical field names.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use crate::error::PrepError;
use crate::process::utils::clean_str;
use crate::table::Table;

/// Ordered `source header → canonical header` renames.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct ColumnMap {
    pairs: Vec<(String, String)>,
}

impl From<BTreeMap<String, String>> for ColumnMap {
    fn from(m: BTreeMap<String, String>) -> Self {
        Self {
            pairs: m.into_iter().collect(),
        }
    }
}

impl From<ColumnMap> for BTreeMap<String, String> {
    fn from(m: ColumnMap) -> Self {
        m.pairs.into_iter().collect()
    }
}

impl ColumnMap {
    pub fn new<I, S, T>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(s, t)| (s.into(), t.into()))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    /// Exact source match first, then trimmed case-insensitive.
    pub fn target_of(&self, source: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(s, _)| s == source)
            .or_else(|| {
                let wanted = source.trim();
                self.pairs
                    .iter()
                    .find(|(s, _)| s.trim().eq_ignore_ascii_case(wanted))
            })
            .map(|(_, t)| t.as_str())
    }

    /// Check the map is total over `expected_sources` and injective.
    pub fn validate(&self, expected_sources: &[&str]) -> Result<(), PrepError> {
        let unmapped: Vec<&str> = expected_sources
            .iter()
            .copied()
            .filter(|s| self.target_of(s).is_none())
            .collect();
        if !unmapped.is_empty() {
            return Err(PrepError::ColumnMap(format!(
                "no mapping for {}",
                unmapped.join(", ")
            )));
        }

        let mut sources = HashSet::new();
        let mut targets: BTreeMap<&str, &str> = BTreeMap::new();
        for (s, t) in &self.pairs {
            if !sources.insert(s.as_str()) {
                return Err(PrepError::ColumnMap(format!("`{s}` is mapped twice")));
            }
            if let Some(prev) = targets.insert(t.as_str(), s.as_str()) {
                return Err(PrepError::ColumnMap(format!(
                    "`{prev}` and `{s}` both map to `{t}`"
                )));
            }
        }
        Ok(())
    }
}

/// The columns one kind of input file must provide.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSchema {
    pub name: String,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub aliases: ColumnMap,
}

impl SourceSchema {
    pub fn new(name: &str, required: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            required: required.iter().map(|s| s.to_string()).collect(),
            aliases: ColumnMap::default(),
        }
    }

    pub fn with_aliases(mut self, aliases: ColumnMap) -> Self {
        self.aliases = aliases;
        self
    }

    fn canonical<'a>(&'a self, header: &'a str) -> &'a str {
        self.aliases.target_of(header).unwrap_or(header)
    }

    /// Required columns absent from `headers` once aliases are applied.
    pub fn missing(&self, headers: &[String]) -> Vec<String> {
        let present: Vec<String> = headers
            .iter()
            .map(|h| self.canonical(clean_str(h).as_str()).to_ascii_uppercase())
            .collect();
        self.required
            .iter()
            .filter(|r| !present.contains(&r.trim().to_ascii_uppercase()))
            .cloned()
            .collect()
    }

    /// Rename aliased headers and check the required columns are present.
    pub fn apply(&self, table: &mut Table) -> Result<(), PrepError> {
        table.rename_columns(&self.aliases);
        let mut seen = HashSet::new();
        for h in &table.headers {
            if !seen.insert(h.to_ascii_uppercase()) {
                return Err(PrepError::ColumnMap(format!(
                    "header `{h}` appears twice after renaming ({})",
                    self.name
                )));
            }
        }
        let missing = self.missing(&table.headers);
        if !missing.is_empty() {
            return Err(PrepError::MissingColumns {
                schema: self.name.clone(),
                missing,
            });
        }
        Ok(())
    }

    /// Index of the first raw row that carries every required column.
    pub fn locate_header(&self, raw: &[Vec<String>]) -> Result<usize, PrepError> {
        raw.iter()
            .position(|row| self.missing(row).is_empty())
            .ok_or_else(|| PrepError::HeaderNotFound(self.name.clone()))
    }

    /// Build a table from raw rows: rows above the header are preamble and
    /// are dropped; the header row itself becomes the table header.
    pub fn table_from_raw(&self, mut raw: Vec<Vec<String>>) -> Result<Table, PrepError> {
        let idx = self.locate_header(&raw)?;
        if idx > 0 {
            debug!(schema = %self.name, row = idx + 1, "header found below preamble");
        }
        let rows = raw.split_off(idx + 1);
        let headers: Vec<String> = raw
            .pop()
            .unwrap_or_default()
            .iter()
            .map(|h| clean_str(h))
            .collect();
        let mut table = Table::with_rows(headers, rows);
        self.apply(&mut table)?;
        Ok(table)
    }
}
