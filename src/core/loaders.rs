//! Loaders for detector and linker output tables.
//!
//! Tables arrive as CSV with a header row. `frame`, `x` and `y` are required
//! (matched case-insensitively), `particle` is optional, and every other
//! numeric column becomes a named feature. Columns holding non-numeric text
//! are skipped with a warning; an unnamed leading index column is ignored.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord};
use log::{debug, warn};
use thiserror::Error;

use super::table::{FeatureTable, TableError};

/// Errors that can occur during table loading.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Missing required columns: {0}")]
    MissingColumns(String),

    #[error("Row {row}, column '{column}': cannot parse '{value}'")]
    Parse {
        row: usize,
        column: String,
        value: String,
    },

    #[error("Invalid table in {path}: {source}")]
    Table {
        path: PathBuf,
        #[source]
        source: TableError,
    },
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Load a particle or trajectory table from a CSV file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, lacks `frame`/`x`/`y`, or a
/// required column holds a value that is not a number.
pub fn load_feature_csv<P: AsRef<Path>>(path: P) -> Result<FeatureTable> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let table = read_feature_csv(BufReader::new(file)).map_err(|e| match e {
        LoaderError::Table { source, .. } => LoaderError::Table {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    })?;
    debug!(
        "{}: loaded {} rows, features {:?}",
        path.display(),
        table.len(),
        table.feature_names()
    );
    Ok(table)
}

/// Parse a table from any CSV reader.
pub fn read_feature_csv<R: Read>(reader: R) -> Result<FeatureTable> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(reader);

    let headers = reader.headers()?.clone();
    let records: Vec<StringRecord> = reader.records().collect::<std::result::Result<_, _>>()?;

    let find = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
    };
    let frame_idx = find("frame");
    let x_idx = find("x");
    let y_idx = find("y");
    let particle_idx = find("particle");

    let missing: Vec<&str> = [("frame", frame_idx), ("x", x_idx), ("y", y_idx)]
        .iter()
        .filter_map(|(name, idx)| idx.is_none().then_some(*name))
        .collect();
    let (Some(frame_idx), Some(x_idx), Some(y_idx)) = (frame_idx, x_idx, y_idx) else {
        return Err(LoaderError::MissingColumns(missing.join(", ")));
    };

    let frame = parse_int_column(&records, frame_idx, "frame")?;
    let x = parse_float_column(&records, x_idx, "x")?;
    let y = parse_float_column(&records, y_idx, "y")?;
    let particle = particle_idx
        .map(|idx| parse_int_column(&records, idx, "particle"))
        .transpose()?;

    let reserved = [Some(frame_idx), Some(x_idx), Some(y_idx), particle_idx];
    let mut features = BTreeMap::new();
    for (idx, name) in headers.iter().enumerate() {
        let name = name.trim();
        if name.is_empty() || reserved.contains(&Some(idx)) {
            continue;
        }
        match parse_float_column(&records, idx, name) {
            Ok(values) => {
                features.insert(name.to_string(), values);
            }
            Err(LoaderError::Parse { value, .. }) => {
                warn!("skipping non-numeric column '{}' (value '{}')", name, value);
            }
            Err(e) => return Err(e),
        }
    }

    FeatureTable::from_columns(frame, x, y, particle, features).map_err(|source| {
        LoaderError::Table {
            path: PathBuf::new(),
            source,
        }
    })
}

/// Empty cells read as NaN.
fn parse_float_column(records: &[StringRecord], idx: usize, column: &str) -> Result<Vec<f64>> {
    records
        .iter()
        .enumerate()
        .map(|(row, record)| {
            let raw = record.get(idx).unwrap_or("").trim();
            if raw.is_empty() {
                return Ok(f64::NAN);
            }
            raw.parse::<f64>().map_err(|_| LoaderError::Parse {
                row,
                column: column.to_string(),
                value: raw.to_string(),
            })
        })
        .collect()
}

/// Accepts integral floats such as `3.0`, which spreadsheet exports produce.
fn parse_int_column(records: &[StringRecord], idx: usize, column: &str) -> Result<Vec<i64>> {
    records
        .iter()
        .enumerate()
        .map(|(row, record)| {
            let raw = record.get(idx).unwrap_or("").trim();
            let err = || LoaderError::Parse {
                row,
                column: column.to_string(),
                value: raw.to_string(),
            };
            if let Ok(v) = raw.parse::<i64>() {
                return Ok(v);
            }
            match raw.parse::<f64>() {
                Ok(v) if v.is_finite() && v.fract() == 0.0 => Ok(v as i64),
                _ => Err(err()),
            }
        })
        .collect()
}
