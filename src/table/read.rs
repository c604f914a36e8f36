// src/table/read.rs

use anyhow::{Context, Result};
use csv::ReaderBuilder;
use std::{fs, path::Path};
use tracing::{debug, instrument};

use super::encoding::decode_bytes;
use super::Table;
use crate::error::PrepError;
use crate::process::utils::clean_str;

#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Fixed delimiter; `None` sniffs it from the first lines.
    pub delimiter: Option<u8>,
    /// Used when sniffing is inconclusive.
    pub default_delimiter: u8,
    /// Replace the file's own header row with these names.
    pub header_names: Option<Vec<String>>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            delimiter: None,
            default_delimiter: b',',
            header_names: None,
        }
    }
}

impl ReadOptions {
    pub fn tab() -> Self {
        Self {
            delimiter: Some(b'\t'),
            ..Self::default()
        }
    }

    pub fn comma() -> Self {
        Self {
            delimiter: Some(b','),
            ..Self::default()
        }
    }
}

/// Tab if a line has tabs and no commas, comma if it has commas and no tabs,
/// checked over the first three lines.
pub fn detect_delimiter(text: &str, default: u8) -> u8 {
    for line in text.lines().take(3) {
        let tabs = line.contains('\t');
        let commas = line.contains(',');
        if tabs && !commas {
            return b'\t';
        }
        if commas && !tabs {
            return b',';
        }
    }
    default
}

#[instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
pub fn read_table(path: impl AsRef<Path>, opts: &ReadOptions) -> Result<Table> {
    let path = path.as_ref();
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let decoded = decode_bytes(&bytes);
    debug!(encoding = ?decoded.encoding, bytes = bytes.len(), "decoded");
    parse_table(&decoded.text, opts).with_context(|| format!("parsing {}", path.display()))
}

/// Parse delimited text with a header row.
pub fn parse_table(text: &str, opts: &ReadOptions) -> Result<Table> {
    let delimiter = opts
        .delimiter
        .unwrap_or_else(|| detect_delimiter(text, opts.default_delimiter));
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());

    let mut records = rdr.records();
    let file_headers: Vec<String> = match records.next() {
        Some(rec) => rec
            .context("reading header row")?
            .iter()
            .map(|h| clean_str(h.trim_start_matches('\u{feff}')))
            .collect(),
        None => Vec::new(),
    };
    let headers = opts.header_names.clone().unwrap_or(file_headers);
    let width = headers.len();

    let mut rows = Vec::new();
    for rec in records {
        let rec = rec.context("reading CSV record")?;
        if rec.len() == 1 && rec.get(0).map_or(true, |s| s.trim().is_empty()) {
            continue;
        }
        if rec.len() > width {
            let line = rec.position().map(|p| p.line()).unwrap_or(0);
            return Err(PrepError::RaggedRow {
                line,
                expected: width,
                found: rec.len(),
            }
            .into());
        }
        let mut row: Vec<String> = rec.iter().map(str::to_string).collect();
        row.resize(width, String::new());
        rows.push(row);
    }

    Ok(Table { headers, rows })
}

/// Every record as raw cells, no header handling.
pub fn read_raw_rows(path: impl AsRef<Path>, opts: &ReadOptions) -> Result<Vec<Vec<String>>> {
    let path = path.as_ref();
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let text = decode_bytes(&bytes).text;
    let delimiter = opts
        .delimiter
        .unwrap_or_else(|| detect_delimiter(&text, opts.default_delimiter));
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());
    let mut out = Vec::new();
    for rec in rdr.records() {
        let rec = rec.with_context(|| format!("reading {}", path.display()))?;
        out.push(rec.iter().map(str::to_string).collect());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_tab_and_comma() {
        assert_eq!(detect_delimiter("a\tb\n1\t2", b','), b'\t');
        assert_eq!(detect_delimiter("a,b\n1,2", b'\t'), b',');
        assert_eq!(detect_delimiter("a\tb,c\nx", b'|'), b'|');
    }

    #[test]
    fn cleans_headers_and_pads_short_rows() -> Result<()> {
        let t = parse_table(
            "\u{feff}\"ID\",\" Name \",City\n1,Ann\n2,Bo,Waco\n",
            &ReadOptions::default(),
        )?;
        assert_eq!(t.headers, vec!["ID", "Name", "City"]);
        assert_eq!(t.rows[0], vec!["1", "Ann", ""]);
        assert_eq!(t.rows[1], vec!["2", "Bo", "Waco"]);
        Ok(())
    }

    #[test]
    fn long_rows_are_reported_with_line_number() {
        let err = parse_table("a,b\n1,2\n1,2,3\n", &ReadOptions::comma()).unwrap_err();
        match err.downcast_ref::<PrepError>() {
            Some(PrepError::RaggedRow { line, expected, found }) => {
                assert_eq!((*line, *expected, *found), (3, 2, 3));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn header_override_replaces_file_header() -> Result<()> {
        let opts = ReadOptions {
            header_names: Some(vec!["A".into(), "B".into()]),
            ..ReadOptions::tab()
        };
        let t = parse_table("x\ty\n1\t2\n", &opts)?;
        assert_eq!(t.headers, vec!["A", "B"]);
        assert_eq!(t.len(), 1);
        Ok(())
    }

    #[test]
    fn blank_lines_are_skipped() -> Result<()> {
        let t = parse_table("a,b\n1,2\n\n3,4\n", &ReadOptions::comma())?;
        assert_eq!(t.len(), 2);
        Ok(())
    }
}
