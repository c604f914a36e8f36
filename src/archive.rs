// src/archive.rs
//! ZIP helpers: pack a directory tree, unpack an archive safely.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::PrepError;

const MACOS_METADATA: &str = "__MACOSX";

/// Zip every file under `dir` into `zip_path` (DEFLATE), with entry names
/// relative to `dir`. Returns the number of files written.
#[instrument(level = "info", skip_all, fields(dir = %dir.as_ref().display(), zip = %zip_path.as_ref().display()))]
pub fn zip_dir(dir: impl AsRef<Path>, zip_path: impl AsRef<Path>) -> Result<usize> {
    let dir = dir.as_ref();
    let zip_path = zip_path.as_ref();
    if let Some(parent) = zip_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let file = File::create(zip_path)
        .with_context(|| format!("Failed to create ZIP file: {:?}", zip_path))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut written = 0;
    let mut entries: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    entries.sort();

    for path in entries {
        let rel = path.strip_prefix(dir).unwrap_or(&path);
        let name = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        zip.start_file(name.as_str(), options)
            .with_context(|| format!("adding {name} to {:?}", zip_path))?;
        let mut src = BufReader::new(
            File::open(&path).with_context(|| format!("opening {}", path.display()))?,
        );
        io::copy(&mut src, &mut zip).with_context(|| format!("compressing {}", path.display()))?;
        written += 1;
        debug!(entry = %name, "zipped");
    }
    zip.finish().context("finishing ZIP archive")?;
    info!(files = written, "archive written");
    Ok(written)
}

/// Extract `zip_path` into `dest`, skipping `__MACOSX` metadata. Entries
/// whose names would escape `dest` abort the extraction.
/// Returns the extracted file paths in archive order.
#[instrument(level = "info", skip_all, fields(zip = %zip_path.as_ref().display(), dest = %dest.as_ref().display()))]
pub fn extract_zip(zip_path: impl AsRef<Path>, dest: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let zip_path = zip_path.as_ref();
    let dest = dest.as_ref();
    let file = File::open(zip_path)
        .with_context(|| format!("Failed to open ZIP file: {:?}", zip_path))?;
    let mut archive = ZipArchive::new(BufReader::new(file))
        .with_context(|| format!("Failed to read ZIP archive: {:?}", zip_path))?;

    let mut out = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).with_context(|| {
            format!("Failed to access ZIP entry #{} in {:?}", i, zip_path)
        })?;
        let raw_name = entry.name().to_string();
        if raw_name.split('/').any(|part| part == MACOS_METADATA) {
            debug!(entry = %raw_name, "skipping macOS metadata");
            continue;
        }
        let rel = entry
            .enclosed_name()
            .ok_or_else(|| PrepError::UnsafeArchivePath(raw_name.clone()))?;
        let target = dest.join(rel);

        if entry.is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("creating {}", target.display()))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut w = BufWriter::new(
            File::create(&target).with_context(|| format!("creating {}", target.display()))?,
        );
        io::copy(&mut entry, &mut w)
            .with_context(|| format!("Failed to extract {} from {:?}", raw_name, zip_path))?;
        out.push(target);
    }
    info!(files = out.len(), "archive extracted");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    #[test]
    fn round_trip_is_byte_identical() -> Result<()> {
        crate::init_test_logging();
        let src = tempfile::tempdir()?;
        let nested = src.path().join("sub").join("deeper");
        fs::create_dir_all(&nested)?;
        let payloads: Vec<(PathBuf, Vec<u8>)> = vec![
            (src.path().join("a.csv"), b"ID,Name\n1,Pe\xF1a\n".to_vec()),
            (nested.join("b.bin"), (0u8..=255).cycle().take(5000).collect()),
            (src.path().join("empty.txt"), Vec::new()),
        ];
        for (p, bytes) in &payloads {
            fs::write(p, bytes)?;
        }

        let work = tempfile::tempdir()?;
        let zip_path = work.path().join("out").join("proofs.zip");
        assert_eq!(zip_dir(src.path(), &zip_path)?, 3);

        let dest = work.path().join("x");
        let extracted = extract_zip(&zip_path, &dest)?;
        assert_eq!(extracted.len(), 3);
        for (p, bytes) in &payloads {
            let rel = p.strip_prefix(src.path())?;
            assert_eq!(&fs::read(dest.join(rel))?, bytes);
        }
        Ok(())
    }

    fn zip_with(names: &[&str]) -> Result<tempfile::NamedTempFile> {
        let mut buf = Vec::new();
        {
            let mut zip = ZipWriter::new(Cursor::new(&mut buf));
            let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
            for n in names {
                zip.start_file(*n, options)?;
                zip.write_all(b"data")?;
            }
            zip.finish()?;
        }
        let mut tmp = tempfile::NamedTempFile::new()?;
        tmp.write_all(&buf)?;
        Ok(tmp)
    }

    #[test]
    fn macos_metadata_is_skipped() -> Result<()> {
        let z = zip_with(&["list.txt", "__MACOSX/._list.txt"])?;
        let dest = tempfile::tempdir()?;
        let files = extract_zip(z.path(), dest.path())?;
        assert_eq!(files, vec![dest.path().join("list.txt")]);
        assert!(!dest.path().join(MACOS_METADATA).exists());
        Ok(())
    }

    #[test]
    fn escaping_entries_are_rejected() -> Result<()> {
        let z = zip_with(&["../evil.txt"])?;
        let dest = tempfile::tempdir()?;
        let err = extract_zip(z.path(), dest.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PrepError>(),
            Some(PrepError::UnsafeArchivePath(_))
        ));
        Ok(())
    }
}
