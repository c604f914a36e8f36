// src/process/breakmark.rs
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::process::utils::clean_str;
use crate::table::{numeric_key, Table};

pub const GROUP_END: &str = "##";
pub const FINAL_END: &str = "###";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakMarkSpec {
    /// Candidate tray column names, matched case-insensitively in order.
    pub tray_columns: Vec<String>,
    pub mark_column: String,
}

impl Default for BreakMarkSpec {
    fn default() -> Self {
        Self {
            tray_columns: vec!["TRAY".into(), "TRAY NUMBER".into()],
            mark_column: "BREAKMARK".into(),
        }
    }
}

impl BreakMarkSpec {
    fn find_tray(&self, table: &Table) -> Option<usize> {
        self.tray_columns.iter().find_map(|name| {
            table
                .headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name.trim()))
        })
    }

    fn is_tray_header(&self, cell: &str) -> bool {
        let cell = clean_str(cell);
        self.tray_columns
            .iter()
            .any(|t| cell.eq_ignore_ascii_case(t.trim()))
    }

    /// Index of the first raw row naming a tray column.
    pub fn locate_header(&self, raw: &[Vec<String>]) -> Option<usize> {
        raw.iter()
            .position(|row| row.iter().any(|c| self.is_tray_header(c)))
    }

    /// Build a table from raw rows, dropping any preamble above the header
    /// and blank lines below it. `None` when no row names a tray column.
    pub fn table_from_raw(&self, mut raw: Vec<Vec<String>>) -> Option<Table> {
        let idx = self.locate_header(&raw)?;
        if idx > 0 {
            debug!(row = idx + 1, "header found below preamble");
        }
        let rows: Vec<Vec<String>> = raw
            .split_off(idx + 1)
            .into_iter()
            .filter(|r| r.iter().any(|c| !c.trim().is_empty()))
            .collect();
        let headers = raw.pop()?.iter().map(|h| clean_str(h)).collect();
        Some(Table::with_rows(headers, rows))
    }
}

/// Sort rows by tray and mark the last row of each tray group.
///
/// Trays sort by numeric value (non-numeric as 0); rows sharing a tray stay
/// together in their original relative order. Returns the number of groups,
/// or `None` when the table has no tray column.
pub fn assign_break_marks(table: &mut Table, spec: &BreakMarkSpec) -> Option<usize> {
    let Some(mut tray) = spec.find_tray(table) else {
        warn!(candidates = ?spec.tray_columns, "no tray column; break marks skipped");
        return None;
    };

    let mark = match table.column_index(&spec.mark_column) {
        Some(i) => i,
        None => {
            table.insert_column(0, &spec.mark_column, "");
            tray += 1;
            0
        }
    };

    let mut first_seen: HashMap<String, usize> = HashMap::new();
    for row in &mut table.rows {
        row[tray] = row[tray].trim().to_string();
        row[mark].clear();
        let next = first_seen.len();
        first_seen.entry(row[tray].clone()).or_insert(next);
    }
    table.rows.sort_by(|a, b| {
        numeric_key(&a[tray])
            .total_cmp(&numeric_key(&b[tray]))
            .then_with(|| first_seen[&a[tray]].cmp(&first_seen[&b[tray]]))
    });

    let n = table.rows.len();
    let mut groups = 0;
    for i in 0..n {
        let ends_group = i + 1 == n || table.rows[i + 1][tray] != table.rows[i][tray];
        if ends_group {
            groups += 1;
            let m = if i + 1 == n { FINAL_END } else { GROUP_END };
            table.rows[i][mark] = m.to_string();
        }
    }

    info!(rows = n, groups, "break marks assigned");
    Some(groups)
}
