// src/process/format.rs
//! Field formatters applied to whole columns, configured as a list of
//! [`Transform`]s per input file or bucket.

use anyhow::{bail, Result};
use chrono::format::{Item, StrftimeItems};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::trimming::apply_trimming;
use crate::table::Table;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Transform {
    /// Left-pad to 5 digits; blank becomes `00000`.
    ZipPad { column: String },
    /// `$1234.5` → `1,234.50`. Unparseable values are left alone.
    Currency { column: String },
    /// Upper-case `column`, writing to `into` (added if missing) when set.
    Uppercase {
        column: String,
        #[serde(default)]
        into: Option<String>,
    },
    /// `05/31` → `05 de 31`.
    SpanishDate { column: String },
    /// Lower-case accented capitals that are not the first letter of a word.
    /// Applies to every column when `columns` is empty.
    FixSpanishAccents {
        #[serde(default)]
        columns: Vec<String>,
    },
    /// `"A - B"` in `column` → `start` = A, `end` = B (both blank if malformed).
    SplitDateRange {
        column: String,
        start: String,
        end: String,
    },
    /// Keep the text from character `keep_from` on and prepend `message`.
    ReplacePrefix {
        column: String,
        keep_from: usize,
        message: String,
    },
    /// Blank out cells equal to any of `values` (e.g. `nan`).
    NullTokens { values: Vec<String> },
    Trim { columns: Vec<String> },
    /// Stable sort on a numeric column, e.g. the presort position.
    SortNumeric { column: String },
    /// Keep only `columns`, in this order.
    Select { columns: Vec<String> },
    /// Rewrite dates in `format` (strftime). Unreadable values are left alone.
    ReformatDate {
        column: String,
        #[serde(default = "us_date")]
        format: String,
    },
    /// `into` = the date in `from` plus `days`, in `format`; blank when
    /// `from` holds no readable date.
    ShiftDate {
        from: String,
        into: String,
        days: i64,
        #[serde(default = "us_date")]
        format: String,
    },
}

fn us_date() -> String {
    US_DATE.to_string()
}

pub const US_DATE: &str = "%m/%d/%Y";

const DATE_INPUTS: [&str; 4] = ["%m/%d/%Y", "%Y-%m-%d", "%m/%d/%y", "%d-%b-%Y"];
const DATETIME_INPUTS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%m/%d/%Y %H:%M", "%m/%d/%Y %H:%M:%S"];

impl Transform {
    pub fn apply(&self, table: &mut Table) -> Result<()> {
        match self {
            Transform::ZipPad { column } => table.map_column(column, zip_pad)?,
            Transform::Currency { column } => table.map_column(column, currency)?,
            Transform::Uppercase { column, into } => {
                let src = table.require_column(column)?;
                match into {
                    Some(dest) => table.set_column_with(dest, |r| r[src].to_uppercase()),
                    None => table.map_column(column, str::to_uppercase)?,
                }
            }
            Transform::SpanishDate { column } => table.map_column(column, spanish_date)?,
            Transform::FixSpanishAccents { columns } => {
                if columns.is_empty() {
                    for row in &mut table.rows {
                        for cell in row.iter_mut() {
                            *cell = fix_spanish_accents(cell);
                        }
                    }
                } else {
                    for c in columns {
                        table.map_column(c, fix_spanish_accents)?;
                    }
                }
            }
            Transform::SplitDateRange { column, start, end } => {
                let src = table.require_column(column)?;
                table.set_column_with(start, |r| split_date_range(&r[src]).0);
                table.set_column_with(end, |r| split_date_range(&r[src]).1);
            }
            Transform::ReplacePrefix {
                column,
                keep_from,
                message,
            } => table.map_column(column, |v| replace_prefix(v, *keep_from, message))?,
            Transform::NullTokens { values } => {
                for row in &mut table.rows {
                    for cell in row.iter_mut() {
                        if values.iter().any(|v| v == cell.trim()) {
                            cell.clear();
                        }
                    }
                }
            }
            Transform::Trim { columns } => apply_trimming(table, columns)?,
            Transform::SortNumeric { column } => table.sort_by_numeric(column)?,
            Transform::Select { columns } => {
                let names: Vec<&str> = columns.iter().map(String::as_str).collect();
                *table = table.select(&names)?;
            }
            Transform::ReformatDate { column, format } => {
                check_date_format(format)?;
                table.map_column(column, |v| match parse_date(v) {
                    Some(d) => d.format(format).to_string(),
                    None => v.to_string(),
                })?
            }
            Transform::ShiftDate {
                from,
                into,
                days,
                format,
            } => {
                check_date_format(format)?;
                let src = table.require_column(from)?;
                table.set_column_with(into, |r| {
                    parse_date(&r[src])
                        .zip(Duration::try_days(*days))
                        .and_then(|(d, shift)| d.checked_add_signed(shift))
                        .map(|d| d.format(format).to_string())
                        .unwrap_or_default()
                });
            }
        }
        debug!(transform = ?self, "applied");
        Ok(())
    }
}

pub fn apply_all(table: &mut Table, transforms: &[Transform]) -> Result<()> {
    transforms.iter().try_for_each(|t| t.apply(table))
}

pub fn zip_pad(v: &str) -> String {
    let v = v.trim();
    if v.is_empty() {
        "00000".to_string()
    } else if v.chars().count() < 5 {
        format!("{v:0>5}")
    } else {
        v.to_string()
    }
}

pub fn currency(v: &str) -> String {
    let cleaned: String = v.trim().chars().filter(|c| *c != '$' && *c != ',').collect();
    if cleaned.is_empty() {
        return String::new();
    }
    match cleaned.parse::<f64>() {
        Ok(n) if n.is_finite() => {
            let fixed = format!("{:.2}", n.abs());
            let (int_part, frac) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
            let sign = if n < 0.0 && fixed != "0.00" { "-" } else { "" };
            format!("{sign}{}.{frac}", group_thousands(int_part))
        }
        _ => v.to_string(),
    }
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

pub fn spanish_date(v: &str) -> String {
    v.replace('/', " de ")
}

pub fn fix_spanish_accents(v: &str) -> String {
    let mut out = String::with_capacity(v.len());
    let mut at_word_start = true;
    for c in v.chars() {
        if c.is_whitespace() {
            at_word_start = true;
            out.push(c);
            continue;
        }
        let lowered = match c {
            'Á' => 'á',
            'É' => 'é',
            'Í' => 'í',
            'Ó' => 'ó',
            'Ú' => 'ú',
            'Ñ' => 'ñ',
            other => other,
        };
        out.push(if at_word_start { c } else { lowered });
        at_word_start = false;
    }
    out
}

pub fn split_date_range(v: &str) -> (String, String) {
    let parts: Vec<&str> = v.split('-').map(str::trim).collect();
    match parts.as_slice() {
        [start, end] => (start.to_string(), end.to_string()),
        _ => (String::new(), String::new()),
    }
}

/// Read a date in any of the layouts the client files use.
pub fn parse_date(v: &str) -> Option<NaiveDate> {
    let v = v.trim();
    if v.is_empty() {
        return None;
    }
    DATE_INPUTS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(v, f).ok())
        .or_else(|| {
            DATETIME_INPUTS
                .iter()
                .find_map(|f| NaiveDateTime::parse_from_str(v, f).ok())
                .map(|dt| dt.date())
        })
}

fn check_date_format(format: &str) -> Result<()> {
    if StrftimeItems::new(format).any(|i| matches!(i, Item::Error)) {
        bail!("invalid date format `{format}`");
    }
    Ok(())
}

pub fn replace_prefix(v: &str, keep_from: usize, message: &str) -> String {
    let rest: String = v.chars().skip(keep_from).collect();
    format!("{message}{rest}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::table;

    #[test]
    fn zip_codes_are_padded() {
        assert_eq!(zip_pad("501"), "00501");
        assert_eq!(zip_pad(" "), "00000");
        assert_eq!(zip_pad("76706-1234"), "76706-1234");
    }

    #[test]
    fn currency_formatting() {
        assert_eq!(currency("$1234.5"), "1,234.50");
        assert_eq!(currency("1,000,000"), "1,000,000.00");
        assert_eq!(currency("12"), "12.00");
        assert_eq!(currency("-4567.891"), "-4,567.89");
        assert_eq!(currency("n/a"), "n/a");
        assert_eq!(currency(""), "");
    }

    #[test]
    fn spanish_text_helpers() {
        assert_eq!(spanish_date("05/31"), "05 de 31");
        assert_eq!(fix_spanish_accents("JOSÉ  ÁNGEL PEÑA"), "JOSé  ÁNGEL PEñA");
        assert_eq!(
            split_date_range("05/01/2025 - 05/31/2025"),
            ("05/01/2025".to_string(), "05/31/2025".to_string())
        );
        assert_eq!(split_date_range("garbage"), (String::new(), String::new()));
        assert_eq!(
            replace_prefix("Offer is valid through the   06/30", 29, "Válida hasta el "),
            "Válida hasta el 06/30"
        );
    }

    #[test]
    fn transforms_apply_in_order() -> Result<()> {
        let mut t = table(
            &["First Name", "SZIP", "CUSTOM_04", "TOTAL"],
            &[&["josé", "501", "01/02 - 03/04", "nan"]],
        );
        let ops: Vec<Transform> = serde_yaml::from_str(
            r#"
- { op: null_tokens, values: [nan] }
- { op: uppercase, column: First Name, into: FIRST_NAME }
- { op: zip_pad, column: SZIP }
- { op: split_date_range, column: CUSTOM_04, start: START_DATE, end: END_DATE }
- { op: spanish_date, column: START_DATE }
"#,
        )?;
        apply_all(&mut t, &ops)?;
        assert_eq!(t.value(0, "FIRST_NAME"), Some("JOSÉ"));
        assert_eq!(t.value(0, "First Name"), Some("josé"));
        assert_eq!(t.value(0, "SZIP"), Some("00501"));
        assert_eq!(t.value(0, "START_DATE"), Some("01 de 02"));
        assert_eq!(t.value(0, "END_DATE"), Some("03/04"));
        assert_eq!(t.value(0, "TOTAL"), Some(""));
        Ok(())
    }

    #[test]
    fn dates_are_reformatted_and_shifted() -> Result<()> {
        assert_eq!(parse_date("2025-03-01"), NaiveDate::from_ymd_opt(2025, 3, 1));
        assert_eq!(parse_date("03/01/2025 00:00"), NaiveDate::from_ymd_opt(2025, 3, 1));
        assert_eq!(parse_date("soon"), None);

        let mut t = table(&["BEGIN DATE"], &[&["2025-03-01"], &[""], &["TBD"]]);
        let ops: Vec<Transform> = serde_yaml::from_str(
            r#"
- { op: reformat_date, column: BEGIN DATE }
- { op: shift_date, from: BEGIN DATE, into: END DATE, days: 54 }
- { op: reformat_date, column: END DATE, format: "%d/%m/%Y" }
"#,
        )?;
        apply_all(&mut t, &ops)?;
        assert_eq!(t.value(0, "BEGIN DATE"), Some("03/01/2025"));
        assert_eq!(t.value(0, "END DATE"), Some("24/04/2025"));
        assert_eq!(t.value(1, "END DATE"), Some(""));
        assert_eq!(t.value(2, "BEGIN DATE"), Some("TBD"));

        let bad = Transform::ReformatDate {
            column: "BEGIN DATE".into(),
            format: "%Q".into(),
        };
        assert!(bad.apply(&mut t).is_err());
        Ok(())
    }

    #[test]
    fn missing_column_is_an_error() {
        let mut t = table(&["a"], &[&["1"]]);
        let op = Transform::ZipPad {
            column: "SZIP".into(),
        };
        assert!(op.apply(&mut t).is_err());
    }

    #[test]
    fn sort_then_select() -> Result<()> {
        let mut t = table(
            &["Sort Position", "Name", "Junk"],
            &[&["10", "c", "x"], &["2", "a", "y"], &["3", "b", "z"]],
        );
        apply_all(
            &mut t,
            &[
                Transform::SortNumeric {
                    column: "Sort Position".into(),
                },
                Transform::Select {
                    columns: vec!["Name".into(), "Sort Position".into()],
                },
            ],
        )?;
        assert_eq!(t.headers, vec!["Name", "Sort Position"]);
        let names: Vec<_> = t.rows.iter().map(|r| r[0].as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        Ok(())
    }
}
