//! CSV writers for tables and review results.
//!
//! - Feature/trajectory tables, with the reserved columns first
//! - Scored links, including the human-readable issues
//! - Errant candidates with their margin to the nearest threshold
//! - Memory links

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use thiserror::Error;

use super::table::FeatureTable;
use crate::processors::{ErrantCandidate, LinkScore, LinkScoringParams, MemoryLink};

/// Errors that can occur during write operations.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Failed to create parent directories.
    #[error("failed to create parent directories for '{path}': {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or open file for writing.
    #[error("failed to create file '{path}': {source}")]
    CreateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to flush data to file.
    #[error("failed to write to file '{path}': {source}")]
    WriteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// CSV writing error.
    #[error("CSV write error for '{path}': {source}")]
    CsvError {
        path: String,
        #[source]
        source: csv::Error,
    },
}

/// Result type for write operations.
pub type Result<T> = std::result::Result<T, WriteError>;

/// Creates parent directories for a file path if they don't exist.
fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| WriteError::CreateDirectory {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
    }
    Ok(())
}

/// Thin wrapper that tags every csv error with the output path.
struct RecordWriter {
    path: String,
    inner: csv::Writer<BufWriter<File>>,
}

impl RecordWriter {
    fn create(path: &Path) -> Result<Self> {
        ensure_parent_dirs(path)?;
        let file = File::create(path).map_err(|e| WriteError::CreateFile {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(Self {
            path: path.display().to_string(),
            inner: csv::Writer::from_writer(BufWriter::new(file)),
        })
    }

    fn write<I, T>(&mut self, record: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.inner
            .write_record(record)
            .map_err(|e| WriteError::CsvError {
                path: self.path.clone(),
                source: e,
            })
    }

    fn finish(mut self) -> Result<()> {
        self.inner.flush().map_err(|e| WriteError::WriteFile {
            path: self.path,
            source: e,
        })
    }
}

/// NaN is written as an empty cell so the loader reads it back as NaN.
fn float_cell(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else {
        format!("{:.6}", value)
    }
}

/// Write a feature or trajectory table.
///
/// Columns are `frame,x,y`, then `particle` when present, then the features
/// in name order.
///
/// # Errors
///
/// Returns an error if the parent directories or the file cannot be created
/// or written to.
///
/// # Example
///
/// ```no_run
/// use particle_review::core::table::FeatureTable;
/// use particle_review::core::writers::write_table_csv;
/// use std::path::Path;
///
/// let table = FeatureTable::default();
/// write_table_csv(Path::new("filtered.csv"), &table).unwrap();
/// ```
pub fn write_table_csv(path: &Path, table: &FeatureTable) -> Result<()> {
    let mut writer = RecordWriter::create(path)?;
    writer.write(table.column_names())?;

    for row in 0..table.len() {
        let mut record = vec![
            table.frame[row].to_string(),
            float_cell(table.x[row]),
            float_cell(table.y[row]),
        ];
        if let Some(particle) = &table.particle {
            record.push(particle[row].to_string());
        }
        record.extend(table.features.values().map(|column| float_cell(column[row])));
        writer.write(&record)?;
    }

    writer.finish()
}

/// Write scored links, worst first, with the issues joined by `"; "`.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written to.
pub fn write_link_scores_csv(
    path: &Path,
    links: &[LinkScore],
    params: &LinkScoringParams,
) -> Result<()> {
    let mut writer = RecordWriter::create(path)?;
    writer.write([
        "particle",
        "frame_i",
        "frame_i1",
        "x_i",
        "y_i",
        "x_i1",
        "y_i1",
        "jump_distance",
        "frame_gap",
        "deviation",
        "excess_gap",
        "score",
        "issues",
    ])?;

    for link in links {
        writer.write(&[
            link.particle_id.to_string(),
            link.frame_i.to_string(),
            link.frame_i1.to_string(),
            float_cell(link.x_i),
            float_cell(link.y_i),
            float_cell(link.x_i1),
            float_cell(link.y_i1),
            float_cell(link.jump_distance),
            link.frame_gap.to_string(),
            float_cell(link.deviation),
            link.excess_gap.to_string(),
            float_cell(link.score),
            link.issues(params.search_range, params.memory).join("; "),
        ])?;
    }

    writer.finish()
}

/// Write errant candidates in rank order.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written to.
pub fn write_errant_csv(path: &Path, candidates: &[ErrantCandidate]) -> Result<()> {
    let mut writer = RecordWriter::create(path)?;
    writer.write([
        "rank", "row", "frame", "particle", "x", "y", "feature", "value", "filter", "distance",
        "reason",
    ])?;

    for (rank, c) in candidates.iter().enumerate() {
        writer.write(&[
            (rank + 1).to_string(),
            c.row.to_string(),
            c.frame.to_string(),
            c.particle.map(|p| p.to_string()).unwrap_or_default(),
            float_cell(c.x),
            float_cell(c.y),
            c.feature.clone(),
            float_cell(c.value),
            format!("{} {} {}", c.feature, c.operator, c.threshold),
            float_cell(c.distance),
            c.reason(),
        ])?;
    }

    writer.finish()
}

/// Write memory links, most memory used first.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written to.
pub fn write_memory_links_csv(path: &Path, links: &[MemoryLink]) -> Result<()> {
    let mut writer = RecordWriter::create(path)?;
    writer.write([
        "particle",
        "memory_used",
        "last_frame",
        "reappear_frame",
        "x_start",
        "y_start",
        "x_end",
        "y_end",
    ])?;

    for link in links {
        writer.write(&[
            link.particle_id.to_string(),
            link.memory_used.to_string(),
            link.last_frame.to_string(),
            link.reappear_frame.to_string(),
            float_cell(link.start.0),
            float_cell(link.start.1),
            float_cell(link.end.0),
            float_cell(link.end.1),
        ])?;
    }

    writer.finish()
}
