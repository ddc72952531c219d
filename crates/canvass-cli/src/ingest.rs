//! CSV loading into string-typed frames.
//!
//! Records enter the engine as text; typing is the rule set's concern.
//! Cells are trimmed on the way in, and empty cells read as missing
//! downstream.

use std::path::Path;

use anyhow::{Context, Result, bail};
use csv::ReaderBuilder;
use polars::prelude::{Column, DataFrame, IntoColumn, NamedFrom, Series};

use canvass_edits::cell_to_string;

/// Reads a headed CSV file into a frame of string columns.
pub fn load_csv(path: &Path) -> Result<DataFrame> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("read csv: {}", path.display()))?;
    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("read headers: {}", path.display()))?
        .iter()
        .map(|header| header.trim().to_string())
        .collect();
    for (idx, name) in headers.iter().enumerate() {
        if name.is_empty() {
            bail!("{}: header column {} is unnamed", path.display(), idx + 1);
        }
        if headers[..idx]
            .iter()
            .any(|prior| prior.eq_ignore_ascii_case(name))
        {
            bail!("{}: column {name} appears more than once", path.display());
        }
    }

    let mut columns: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
    for record in reader.records() {
        let record = record.with_context(|| format!("read record: {}", path.display()))?;
        for (column, value) in columns.iter_mut().zip(record.iter()) {
            column.push(value.trim().to_string());
        }
    }

    let series: Vec<Column> = headers
        .iter()
        .zip(columns)
        .map(|(name, values)| Series::new(name.as_str().into(), values).into_column())
        .collect();
    DataFrame::new(series).with_context(|| format!("assemble frame: {}", path.display()))
}

/// Writes a frame as headed CSV, rendering cells the way records are
/// declared: null and NaN as empty, whole floats without a fraction.
pub fn write_csv(frame: &DataFrame, path: &Path) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("create csv: {}", path.display()))?;
    let columns = frame.get_columns();
    writer
        .write_record(columns.iter().map(|column| column.name().as_str()))
        .with_context(|| format!("write header: {}", path.display()))?;
    let mut cells = vec![String::new(); columns.len()];
    for row in 0..frame.height() {
        for (cell, column) in cells.iter_mut().zip(columns) {
            let value = column
                .get(row)
                .map_err(|err| anyhow::anyhow!("{err}"))
                .with_context(|| format!("render row {row}: {}", path.display()))?;
            *cell = cell_to_string(&value);
        }
        writer
            .write_record(&cells)
            .with_context(|| format!("write row {row}: {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("flush csv: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "canvass-ingest-{tag}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn cells_are_trimmed_and_empty_cells_stay_empty() {
        let dir = scratch_dir("trim");
        let path = dir.join("people.csv");
        std::fs::write(&path, "id, AGE ,SEX\nr1, 34 ,m\nr2,,f\n").unwrap();

        let frame = load_csv(&path).unwrap();
        assert_eq!(frame.height(), 2);
        let names: Vec<&str> = frame
            .get_columns()
            .iter()
            .map(|column| column.name().as_str())
            .collect();
        assert_eq!(names, vec!["id", "AGE", "SEX"]);
        let age = frame.column("AGE").unwrap();
        assert_eq!(cell_to_string(&age.get(0).unwrap()), "34");
        assert_eq!(cell_to_string(&age.get(1).unwrap()), "");
    }

    #[test]
    fn duplicate_columns_are_rejected_case_insensitively() {
        let dir = scratch_dir("dup");
        let path = dir.join("dup.csv");
        std::fs::write(&path, "AGE,age\n1,2\n").unwrap();

        let err = load_csv(&path).unwrap_err();
        assert!(err.to_string().contains("more than once"), "{err}");
    }

    #[test]
    fn ragged_rows_are_fatal() {
        let dir = scratch_dir("ragged");
        let path = dir.join("ragged.csv");
        std::fs::write(&path, "A,B\n1,2\n3\n").unwrap();

        assert!(load_csv(&path).is_err());
    }

    #[test]
    fn written_frames_read_back_unchanged() {
        let dir = scratch_dir("roundtrip");
        let source = dir.join("in.csv");
        std::fs::write(&source, "id,VALUE\nr1,10\nr2,\n").unwrap();
        let frame = load_csv(&source).unwrap();

        let sink = dir.join("out.csv");
        write_csv(&frame, &sink).unwrap();
        let back = load_csv(&sink).unwrap();
        assert!(frame.equals(&back));
    }
}
