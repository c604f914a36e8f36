// src/table/write.rs

use anyhow::{Context, Result};
use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use tracing::{debug, instrument, warn};

use super::encoding::{encode_text, TextEncoding};
use super::Table;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuoteStyle {
    /// Quote only fields that need it.
    #[default]
    Necessary,
    /// Quote every field.
    Always,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteOptions {
    pub delimiter: char,
    pub quote_style: QuoteStyle,
    /// Prefix a UTF-8 byte-order mark (Excel-friendly).
    pub bom: bool,
    pub encoding: TextEncoding,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            delimiter: ',',
            quote_style: QuoteStyle::Necessary,
            bom: false,
            encoding: TextEncoding::Utf8,
        }
    }
}

impl WriteOptions {
    pub fn quote_all() -> Self {
        Self {
            quote_style: QuoteStyle::Always,
            ..Self::default()
        }
    }
}

pub fn to_bytes(table: &Table, opts: &WriteOptions) -> Result<Vec<u8>> {
    let style = match opts.quote_style {
        QuoteStyle::Necessary => csv::QuoteStyle::Necessary,
        QuoteStyle::Always => csv::QuoteStyle::Always,
    };
    let mut wtr = WriterBuilder::new()
        .delimiter(opts.delimiter as u8)
        .quote_style(style)
        .from_writer(Vec::new());
    wtr.write_record(&table.headers)
        .context("writing header row")?;
    for row in &table.rows {
        wtr.write_record(row).context("writing row")?;
    }
    let buf = wtr.into_inner().map_err(|e| e.into_error())?;
    let text = String::from_utf8(buf).context("csv writer produced invalid utf-8")?;

    let (mut bytes, replaced) = encode_text(&text, opts.encoding);
    if replaced > 0 {
        warn!(replaced, "characters not representable in output encoding");
    }
    if opts.bom && opts.encoding == TextEncoding::Utf8 {
        let mut with_bom = b"\xEF\xBB\xBF".to_vec();
        with_bom.append(&mut bytes);
        bytes = with_bom;
    }
    Ok(bytes)
}

/// Write `table` to `path` through a `.tmp` sibling and a rename, so a
/// reader never sees a half-written file.
#[instrument(level = "debug", skip_all, fields(path = %path.as_ref().display(), rows = table.len()))]
pub fn write_table(table: &Table, path: impl AsRef<Path>, opts: &WriteOptions) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    let bytes = to_bytes(table, opts)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "table".into());
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));
    fs::write(&tmp_path, &bytes)
        .with_context(|| format!("writing {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| {
        format!(
            "failed to rename `{}` to `{}`",
            tmp_path.display(),
            path.display()
        )
    })?;
    debug!(bytes = bytes.len(), "wrote table");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{read_table, table, ReadOptions};

    #[test]
    fn quote_all_quotes_every_field() -> Result<()> {
        let t = table(&["a", "b"], &[&["1", "x y"]]);
        let bytes = to_bytes(&t, &WriteOptions::quote_all())?;
        assert_eq!(String::from_utf8(bytes)?, "\"a\",\"b\"\n\"1\",\"x y\"\n");
        Ok(())
    }

    #[test]
    fn bom_and_tab_delimiter() -> Result<()> {
        let t = table(&["a", "b"], &[&["1", "2"]]);
        let opts = WriteOptions {
            delimiter: '\t',
            bom: true,
            ..WriteOptions::default()
        };
        let bytes = to_bytes(&t, &opts)?;
        assert!(bytes.starts_with(b"\xEF\xBB\xBFa\tb\n"));
        Ok(())
    }

    #[test]
    fn written_file_reads_back() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out").join("list.csv");
        let t = table(
            &["Name", "Note"],
            &[&["Peña", "says \"hi\""], &["Bo", "a,b"]],
        );
        write_table(&t, &path, &WriteOptions::default())?;
        assert!(!dir.path().join("out").join("list.csv.tmp").exists());
        let back = read_table(&path, &ReadOptions::comma())?;
        assert_eq!(back, t);
        Ok(())
    }

    #[test]
    fn windows_1252_output() -> Result<()> {
        let t = table(&["n"], &[&["Peña"]]);
        let opts = WriteOptions {
            encoding: TextEncoding::Windows1252,
            ..WriteOptions::default()
        };
        assert_eq!(to_bytes(&t, &opts)?, b"n\nPe\xF1a\n");
        Ok(())
    }
}
