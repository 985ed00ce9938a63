//! Tabular input: CSV files with a header row, read into raw rows.

use std::path::Path;

use anyhow::{Context, Result};
use csv::{ReaderBuilder, Trim};
use serde_json::Value;

use crate::model::RawRow;

/// Reads every record of `path` as a header-keyed row. Empty cells become
/// nulls; short records simply lack the trailing columns.
pub fn read_rows(path: &Path) -> Result<Vec<RawRow>> {
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let headers = reader
        .headers()
        .with_context(|| format!("failed to read header row of {}", path.display()))?
        .clone();

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.with_context(|| {
            format!("failed to read record {} of {}", index + 1, path.display())
        })?;

        let row = headers
            .iter()
            .zip(record.iter())
            .map(|(header, cell)| {
                let value = if cell.is_empty() {
                    Value::Null
                } else {
                    Value::String(cell.to_string())
                };
                (header.to_string(), value)
            })
            .collect::<RawRow>();

        rows.push(row);
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;

    use super::*;

    #[test]
    fn read_rows_maps_headers_and_nulls_empty_cells() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("students.csv");
        fs::write(
            &path,
            "StudentID,Age,Gender,GPA,GradeClass\n1001, 17 ,1,2.93,2.0\n1002,18,,3.04,1.0\n1003,15\n",
        )
        .expect("write csv");

        let rows = read_rows(&path).expect("csv should parse");

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["StudentID"], json!("1001"));
        assert_eq!(rows[0]["Age"], json!("17"));
        assert_eq!(rows[1]["Gender"], Value::Null);
        assert_eq!(rows[2].len(), 2);
        assert!(!rows[2].contains_key("GPA"));
    }

    #[test]
    fn read_rows_reports_missing_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = read_rows(&temp.path().join("absent.csv")).expect_err("file is missing");
        assert!(err.to_string().contains("failed to open"));
    }
}
