//! CSV ingest of time-activity curves.
//!
//! Layout: one header row, then one row per frame and one column per unit.
//! Bookkeeping columns named `frame`, `start`, `end` or `mid` are ignored so
//! that a curves export can be fed straight back in.

use std::fs::File;
use std::path::Path;

use csv::StringRecord;
use nalgebra::DMatrix;

use crate::error::{FitError, Result};

const BOOKKEEPING: [&str; 4] = ["frame", "start", "end", "mid"];

/// TAC matrix (frames × units) with the unit names taken from the header.
#[derive(Debug, Clone)]
pub struct TacTable {
    pub units: Vec<String>,
    pub tac: DMatrix<f64>,
}

/// Load a TAC matrix from CSV.
pub fn read_tac_csv(path: &Path) -> Result<TacTable> {
    let file = File::open(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let headers = reader.headers()?.clone();
    let columns = unit_columns(&headers);
    let units: Vec<String> = columns
        .iter()
        .map(|&i| normalize_header_name(&headers[i]))
        .collect();

    // Row-major while reading; transposed into column-major at the end.
    let mut rows: Vec<f64> = Vec::new();
    let mut frames = 0usize;
    for (idx, result) in reader.records().enumerate() {
        // records() starts after the header; lines are 1-based.
        let line = idx + 2;
        let record = result?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        for (&col, unit) in columns.iter().zip(&units) {
            rows.push(parse_cell(&record, col, line, unit)?);
        }
        frames += 1;
    }

    let tac = DMatrix::from_row_slice(frames, units.len(), &rows);
    Ok(TacTable { units, tac })
}

fn unit_columns(headers: &StringRecord) -> Vec<usize> {
    headers
        .iter()
        .enumerate()
        .filter(|(_, name)| {
            let name = normalize_header_name(name).to_ascii_lowercase();
            !BOOKKEEPING.contains(&name.as_str())
        })
        .map(|(i, _)| i)
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports may prefix the first header with a UTF-8 BOM.
    name.trim().trim_start_matches('\u{feff}').to_string()
}

fn parse_cell(record: &StringRecord, col: usize, line: usize, unit: &str) -> Result<f64> {
    let raw = record
        .get(col)
        .ok_or_else(|| FitError::shape(format!("Line {line}: missing value for unit '{unit}'.")))?;
    let value: f64 = raw
        .parse()
        .map_err(|_| FitError::config(format!("Line {line}: '{raw}' for unit '{unit}' is not a number.")))?;
    if !value.is_finite() {
        return Err(FitError::config(format!(
            "Line {line}: non-finite value for unit '{unit}'."
        )));
    }
    Ok(value)
}
