use chrono::Local;
use std::path::Path;

/// Trim whitespace and strip one pair of outer quotes if present.
pub fn clean_str(raw: &str) -> String {
    let trimmed = raw.trim().trim_start_matches('\u{feff}');
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

/// Local wall-clock stamp in the given `strftime` format, e.g. `%Y%m%d-%H%M`.
pub fn local_stamp(fmt: &str) -> String {
    Local::now().format(fmt).to_string()
}

/// File name as an owned string; empty when the path has none.
pub fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// File stem as an owned string; empty when the path has none.
pub fn file_stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// True when `path` has the given extension, ignoring case.
pub fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_str_strips_quotes_and_bom() {
        assert_eq!(clean_str("  \"Name\" "), "Name");
        assert_eq!(clean_str("\u{feff}ID"), "ID");
        assert_eq!(clean_str("\""), "\"");
        assert_eq!(clean_str("plain"), "plain");
    }

    #[test]
    fn extension_check_ignores_case() {
        assert!(has_extension(Path::new("a/B.CSV"), "csv"));
        assert!(!has_extension(Path::new("a/b"), "csv"));
        assert_eq!(file_stem_of(Path::new("x/list.txt")), "list");
        assert_eq!(file_name_of(Path::new("x/list.txt")), "list.txt");
    }
}
