// src/table/encoding.rs

use anyhow::{bail, Context, Result};
use encoding_rs::{EncoderResult, WINDOWS_1252};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextEncoding {
    #[default]
    #[serde(alias = "utf-8")]
    Utf8,
    #[serde(alias = "windows-1252", alias = "cp1252")]
    Windows1252,
}

#[derive(Debug)]
pub struct Decoded {
    pub text: String,
    pub encoding: TextEncoding,
    pub had_bom: bool,
}

/// UTF-8 when the bytes are valid UTF-8 (BOM stripped), Windows-1252 otherwise.
pub fn decode_bytes(bytes: &[u8]) -> Decoded {
    let (body, had_bom) = match bytes.strip_prefix(UTF8_BOM) {
        Some(rest) => (rest, true),
        None => (bytes, false),
    };
    match std::str::from_utf8(body) {
        Ok(s) => Decoded {
            text: s.to_string(),
            encoding: TextEncoding::Utf8,
            had_bom,
        },
        Err(_) => {
            let (cow, _, _) = WINDOWS_1252.decode(body);
            Decoded {
                text: cow.into_owned(),
                encoding: TextEncoding::Windows1252,
                had_bom,
            }
        }
    }
}

/// Encode `text`; characters Windows-1252 cannot hold become `?`.
/// Returns the bytes and how many characters were replaced.
pub fn encode_text(text: &str, encoding: TextEncoding) -> (Vec<u8>, usize) {
    match encoding {
        TextEncoding::Utf8 => (text.as_bytes().to_vec(), 0),
        TextEncoding::Windows1252 => {
            let mut encoder = WINDOWS_1252.new_encoder();
            let mut out = Vec::with_capacity(text.len());
            let mut buf = [0u8; 4096];
            let mut src = text;
            let mut replaced = 0;
            loop {
                let (result, read, written) =
                    encoder.encode_from_utf8_without_replacement(src, &mut buf, true);
                out.extend_from_slice(&buf[..written]);
                src = &src[read..];
                match result {
                    EncoderResult::InputEmpty => break,
                    EncoderResult::OutputFull => continue,
                    EncoderResult::Unmappable(_) => {
                        out.push(b'?');
                        replaced += 1;
                    }
                }
            }
            (out, replaced)
        }
    }
}

/// Read a file as text using the same fallback as [`decode_bytes`].
pub fn read_text(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(decode_bytes(&bytes).text)
}

/// Rewrite `path` as plain UTF-8 if it is not already. Returns true when the
/// file was rewritten.
#[instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
pub fn normalize_to_utf8(path: impl AsRef<Path>) -> Result<bool> {
    let path = path.as_ref();
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let decoded = decode_bytes(&bytes);
    if decoded.encoding == TextEncoding::Utf8 && !decoded.had_bom {
        debug!("already utf-8");
        return Ok(false);
    }
    fs::write(path, decoded.text.as_bytes())
        .with_context(|| format!("rewriting {} as utf-8", path.display()))?;
    info!(from = ?decoded.encoding, bom = decoded.had_bom, "converted to utf-8");
    Ok(true)
}

/// Rewrite `path` as Windows-1252, keeping the original bytes in
/// `<stem>_original.<ext>`. An existing backup is never overwritten.
/// Returns the backup path and the count of unmappable characters.
#[instrument(level = "info", fields(path = %path.display()))]
pub fn reencode_to_windows_1252(path: &Path) -> Result<(PathBuf, usize)> {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let backup = match path.extension() {
        Some(ext) => path.with_file_name(format!("{stem}_original.{}", ext.to_string_lossy())),
        None => path.with_file_name(format!("{stem}_original")),
    };
    if backup.exists() {
        bail!("backup {} already exists", backup.display());
    }
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let decoded = decode_bytes(&bytes);
    let (out, replaced) = encode_text(&decoded.text, TextEncoding::Windows1252);
    fs::copy(path, &backup).with_context(|| format!("backing up to {}", backup.display()))?;
    fs::write(path, out).with_context(|| format!("writing {}", path.display()))?;
    if replaced > 0 {
        warn!(replaced, "characters with no windows-1252 form written as `?`");
    }
    info!(from = ?decoded.encoding, backup = %backup.display(), "re-encoded");
    Ok((backup, replaced))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_bom_and_keeps_utf8() {
        let d = decode_bytes(b"\xEF\xBB\xBFID,Name\n");
        assert!(d.had_bom);
        assert_eq!(d.encoding, TextEncoding::Utf8);
        assert_eq!(d.text, "ID,Name\n");
    }

    #[test]
    fn falls_back_to_windows_1252() {
        // "Peña" in cp1252
        let d = decode_bytes(b"Pe\xF1a");
        assert_eq!(d.encoding, TextEncoding::Windows1252);
        assert_eq!(d.text, "Peña");
    }

    #[test]
    fn unmappable_characters_become_question_marks() {
        let (bytes, replaced) = encode_text("válida ✓", TextEncoding::Windows1252);
        assert_eq!(replaced, 1);
        assert_eq!(bytes, b"v\xE1lida ?");
    }

    #[test]
    fn normalize_rewrites_only_when_needed() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs::write(&a, "plain")?;
        fs::write(&b, b"Se\xF1or")?;
        assert!(!normalize_to_utf8(&a)?);
        assert!(normalize_to_utf8(&b)?);
        assert_eq!(fs::read_to_string(&b)?, "Señor");
        Ok(())
    }

    #[test]
    fn reencode_keeps_an_original() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let f = dir.path().join("PR-PU.csv");
        fs::write(&f, "Nombre\nPeña\n")?;
        let (backup, replaced) = reencode_to_windows_1252(&f)?;
        assert_eq!(replaced, 0);
        assert_eq!(backup, dir.path().join("PR-PU_original.csv"));
        assert_eq!(fs::read(&f)?, b"Nombre\nPe\xF1a\n");
        assert_eq!(fs::read_to_string(&backup)?, "Nombre\nPeña\n");
        assert!(reencode_to_windows_1252(&f).is_err());
        Ok(())
    }
}
