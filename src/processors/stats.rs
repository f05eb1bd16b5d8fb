//! Trajectory summary statistics and stub removal.

use super::drift::correct_drift;
use super::{ProcessingError, Result};
use crate::core::table::FeatureTable;

/// Summary of a trajectory table.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrajectoryStats {
    pub num_trajectories: usize,
    pub num_frames: usize,
    pub total_detections: usize,
    /// Mean rows per trajectory.
    pub mean_length: f64,
    /// Sample standard deviation of rows per trajectory.
    pub std_length: f64,
}

/// Keeps only trajectories with at least `min_length` rows.
pub fn filter_stubs(table: &FeatureTable, min_length: usize) -> Result<FeatureTable> {
    if table.is_empty() {
        return Ok(table.clone());
    }
    let groups = table
        .particle_groups()
        .ok_or_else(|| ProcessingError::unknown_feature("particle"))?;

    let before = groups.len();
    let mut keep = vec![false; table.len()];
    let mut kept = 0usize;
    for rows in groups.values().filter(|rows| rows.len() >= min_length) {
        kept += 1;
        for &row in rows {
            keep[row] = true;
        }
    }
    log::info!(
        "kept {}/{} trajectories with at least {} frames",
        kept,
        before,
        min_length
    );

    Ok(table.select(&keep)?)
}

/// Readies a linked table for link review: drops stubs shorter than
/// `min_length`, then removes ensemble drift when `subtract_drift` is set.
pub fn prepare_trajectories(
    table: &FeatureTable,
    min_length: usize,
    subtract_drift: bool,
) -> Result<FeatureTable> {
    let kept = filter_stubs(table, min_length)?;
    if subtract_drift {
        correct_drift(&kept)
    } else {
        Ok(kept)
    }
}

/// Counts and length statistics for a trajectory table.
pub fn trajectory_stats(table: &FeatureTable) -> Result<TrajectoryStats> {
    if table.is_empty() {
        return Ok(TrajectoryStats::default());
    }
    let groups = table
        .particle_groups()
        .ok_or_else(|| ProcessingError::unknown_feature("particle"))?;

    let lengths: Vec<f64> = groups.values().map(|rows| rows.len() as f64).collect();
    let n = lengths.len() as f64;
    let mean_length = lengths.iter().sum::<f64>() / n;
    let std_length = if lengths.len() > 1 {
        let ss: f64 = lengths.iter().map(|l| (l - mean_length).powi(2)).sum();
        (ss / (n - 1.0)).sqrt()
    } else {
        0.0
    };

    Ok(TrajectoryStats {
        num_trajectories: lengths.len(),
        num_frames: table.frames().len(),
        total_detections: table.len(),
        mean_length,
        std_length,
    })
}
