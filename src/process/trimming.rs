use crate::error::PrepError;
use crate::process::utils::clean_str;
use crate::table::Table;

/// Apply trimming to flagged columns
pub fn apply_trimming(table: &mut Table, trim_columns: &[String]) -> Result<(), PrepError> {
    if trim_columns.is_empty() {
        return Ok(());
    }

    let idx: Vec<usize> = trim_columns
        .iter()
        .map(|c| table.require_column(c))
        .collect::<Result<_, _>>()?;
    for row in &mut table.rows {
        for &i in &idx {
            row[i] = clean_str(&row[i]);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::table;

    #[test]
    fn trims_only_flagged_columns() {
        let mut t = table(&["a", "b"], &[&["  x ", " \"y\" "]]);
        apply_trimming(&mut t, &["b".to_string()]).unwrap();
        assert_eq!(t.rows[0], vec!["  x ", "y"]);
    }
}
