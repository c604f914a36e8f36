// src/table/mod.rs
//! In-memory mailing-list tables and the column operations the job steps use.

pub mod encoding;
pub mod read;
pub mod write;

use crate::error::PrepError;
use crate::schema::ColumnMap;

pub use encoding::{
    decode_bytes, encode_text, normalize_to_utf8, read_text, reencode_to_windows_1252, TextEncoding,
};
pub use read::{detect_delimiter, parse_table, read_raw_rows, read_table, ReadOptions};
pub use write::{to_bytes, write_table, QuoteStyle, WriteOptions};

/// A delimited file held in memory.
///
/// Every row has exactly `headers.len()` cells. A blank cell is the null value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    /// Build a table, padding short rows with blanks and cutting long ones.
    pub fn with_rows(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let width = headers.len();
        let rows = rows
            .into_iter()
            .map(|mut r| {
                r.resize(width, String::new());
                r
            })
            .collect();
        Self { headers, rows }
    }

    /// Same shape, no rows.
    pub fn empty_like(&self) -> Self {
        Self::new(self.headers.clone())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn width(&self) -> usize {
        self.headers.len()
    }

    /// Exact header match first, then a trimmed case-insensitive match.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name).or_else(|| {
            let wanted = name.trim();
            self.headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(wanted))
        })
    }

    pub fn require_column(&self, name: &str) -> Result<usize, PrepError> {
        self.column_index(name)
            .ok_or_else(|| PrepError::MissingColumns {
                schema: "table".into(),
                missing: vec![name.to_string()],
            })
    }

    pub fn value(&self, row: usize, name: &str) -> Option<&str> {
        let idx = self.column_index(name)?;
        self.rows.get(row).map(|r| r[idx].as_str())
    }

    pub fn filter<F>(&self, mut keep: F) -> Table
    where
        F: FnMut(&[String]) -> bool,
    {
        Table {
            headers: self.headers.clone(),
            rows: self.rows.iter().filter(|r| keep(r)).cloned().collect(),
        }
    }

    /// Append another table's rows. Headers must be identical.
    pub fn concat(&mut self, other: Table) -> Result<(), PrepError> {
        if self.headers.is_empty() && self.rows.is_empty() {
            *self = other;
            return Ok(());
        }
        if self.headers != other.headers {
            return Err(PrepError::HeaderMismatch {
                left: self.headers.clone(),
                right: other.headers,
            });
        }
        self.rows.extend(other.rows);
        Ok(())
    }

    pub fn push_column(&mut self, name: &str, default: &str) {
        self.headers.push(name.to_string());
        for r in &mut self.rows {
            r.push(default.to_string());
        }
    }

    pub fn insert_column(&mut self, at: usize, name: &str, default: &str) {
        let at = at.min(self.headers.len());
        self.headers.insert(at, name.to_string());
        for r in &mut self.rows {
            r.insert(at, default.to_string());
        }
    }

    /// Set `name` on every row from a function of the whole row, adding the
    /// column at the end when it does not exist yet.
    pub fn set_column_with<F>(&mut self, name: &str, mut f: F)
    where
        F: FnMut(&[String]) -> String,
    {
        let idx = match self.column_index(name) {
            Some(i) => i,
            None => {
                self.push_column(name, "");
                self.headers.len() - 1
            }
        };
        for r in &mut self.rows {
            let v = f(r);
            r[idx] = v;
        }
    }

    pub fn map_column<F>(&mut self, name: &str, mut f: F) -> Result<(), PrepError>
    where
        F: FnMut(&str) -> String,
    {
        let idx = self.require_column(name)?;
        for r in &mut self.rows {
            r[idx] = f(&r[idx]);
        }
        Ok(())
    }

    pub fn rename_columns(&mut self, map: &ColumnMap) {
        for h in &mut self.headers {
            if let Some(target) = map.target_of(h) {
                *h = target.to_string();
            }
        }
    }

    /// Keep only `names`, in that order.
    pub fn select(&self, names: &[&str]) -> Result<Table, PrepError> {
        let mut missing = Vec::new();
        let idx: Vec<usize> = names
            .iter()
            .filter_map(|n| {
                let i = self.column_index(n);
                if i.is_none() {
                    missing.push(n.to_string());
                }
                i
            })
            .collect();
        if !missing.is_empty() {
            return Err(PrepError::MissingColumns {
                schema: "selection".into(),
                missing,
            });
        }
        Ok(Table {
            headers: idx.iter().map(|&i| self.headers[i].clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|r| idx.iter().map(|&i| r[i].clone()).collect())
                .collect(),
        })
    }

    /// Stable sort on a column's numeric value; non-numeric cells sort as 0.
    pub fn sort_by_numeric(&mut self, name: &str) -> Result<(), PrepError> {
        let idx = self.require_column(name)?;
        self.rows.sort_by(|a, b| {
            numeric_key(&a[idx])
                .partial_cmp(&numeric_key(&b[idx]))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(())
    }

    /// True when none of `columns` is blank in `row`.
    pub fn row_is_complete(&self, row: &[String], columns: &[usize]) -> bool {
        columns.iter().all(|&c| !row[c].trim().is_empty())
    }
}

pub(crate) fn numeric_key(s: &str) -> f64 {
    s.trim().parse::<f64>().ok().filter(|v| v.is_finite()).unwrap_or(0.0)
}

#[cfg(test)]
pub(crate) fn table(headers: &[&str], rows: &[&[&str]]) -> Table {
    Table::with_rows(
        headers.iter().map(|s| s.to_string()).collect(),
        rows.iter()
            .map(|r| r.iter().map(|s| s.to_string()).collect())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_lookup_falls_back_to_case_insensitive() {
        let t = table(&["First Name", " TRAY "], &[]);
        assert_eq!(t.column_index("First Name"), Some(0));
        assert_eq!(t.column_index("tray"), Some(1));
        assert!(t.column_index("Last Name").is_none());
    }

    #[test]
    fn concat_rejects_different_headers() {
        let mut a = table(&["x", "y"], &[&["1", "2"]]);
        let b = table(&["x", "z"], &[&["3", "4"]]);
        let err = a.concat(b).unwrap_err();
        assert!(matches!(err, PrepError::HeaderMismatch { .. }));

        let c = table(&["x", "y"], &[&["5", "6"]]);
        a.concat(c).unwrap();
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn numeric_sort_is_stable_and_treats_text_as_zero() {
        let mut t = table(
            &["tray", "id"],
            &[&["10", "a"], &["2", "b"], &["x", "c"], &["2", "d"]],
        );
        t.sort_by_numeric("tray").unwrap();
        let ids: Vec<_> = t.rows.iter().map(|r| r[1].as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "d", "a"]);
    }

    #[test]
    fn select_reports_all_missing_columns() {
        let t = table(&["a", "b"], &[&["1", "2"]]);
        let err = t.select(&["b", "q", "r"]).unwrap_err();
        match err {
            PrepError::MissingColumns { missing, .. } => assert_eq!(missing, vec!["q", "r"]),
            other => panic!("unexpected {other:?}"),
        }
        let s = t.select(&["b", "a"]).unwrap();
        assert_eq!(s.rows[0], vec!["2", "1"]);
    }
}
