//! Ensemble drift estimation and subtraction.
//!
//! Stage or camera motion shifts every tracked particle by the same amount.
//! The drift between two consecutive frames is the mean displacement of the
//! particles present in both; accumulating it gives the offset of each frame
//! relative to the first, which is then subtracted from the positions.

use std::collections::{BTreeMap, HashMap};

use log::debug;

use super::{ProcessingError, Result};
use crate::core::table::FeatureTable;

/// Fewest shared particles needed to trust a frame-to-frame estimate.
pub const MIN_COMMON_PARTICLES: usize = 2;

/// Cumulative drift of one frame relative to the first frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameDrift {
    pub frame: i64,
    pub dx: f64,
    pub dy: f64,
}

/// Computes the cumulative drift of every distinct frame, ascending.
///
/// The first frame has zero drift. A frame sharing fewer than
/// [`MIN_COMMON_PARTICLES`] particles with the previous frame adds nothing,
/// so the cumulative drift carries forward unchanged. When a particle id
/// appears twice in one frame, its last row is used.
///
/// # Errors
///
/// `UnknownFeature("particle")` for a non-empty table without trajectory ids.
pub fn compute_drift(table: &FeatureTable) -> Result<Vec<FrameDrift>> {
    if table.is_empty() {
        return Ok(Vec::new());
    }
    let particle = table
        .particle
        .as_ref()
        .ok_or_else(|| ProcessingError::unknown_feature("particle"))?;

    let mut positions: BTreeMap<i64, HashMap<i64, (f64, f64)>> = BTreeMap::new();
    for row in 0..table.len() {
        positions
            .entry(table.frame[row])
            .or_default()
            .insert(particle[row], (table.x[row], table.y[row]));
    }

    let mut drift = Vec::with_capacity(positions.len());
    let (mut cum_x, mut cum_y) = (0.0, 0.0);
    let mut previous: Option<&HashMap<i64, (f64, f64)>> = None;

    for (&frame, current) in &positions {
        if let Some(prev) = previous {
            let (mut sum_x, mut sum_y, mut common) = (0.0, 0.0, 0usize);
            for (id, &(x, y)) in current {
                if let Some(&(px, py)) = prev.get(id) {
                    let (dx, dy) = (x - px, y - py);
                    if dx.is_finite() && dy.is_finite() {
                        sum_x += dx;
                        sum_y += dy;
                        common += 1;
                    }
                }
            }

            if common >= MIN_COMMON_PARTICLES {
                cum_x += sum_x / common as f64;
                cum_y += sum_y / common as f64;
            } else {
                debug!(
                    "frame {}: only {} particles shared with previous frame, drift carried forward",
                    frame, common
                );
            }
        }

        drift.push(FrameDrift {
            frame,
            dx: cum_x,
            dy: cum_y,
        });
        previous = Some(current);
    }

    Ok(drift)
}

/// Returns a copy of `table` with each row's frame drift subtracted.
///
/// Rows whose frame has no drift entry are copied unchanged.
pub fn subtract_drift(table: &FeatureTable, drift: &[FrameDrift]) -> FeatureTable {
    let by_frame: HashMap<i64, (f64, f64)> =
        drift.iter().map(|d| (d.frame, (d.dx, d.dy))).collect();

    let mut corrected = table.clone();
    for row in 0..corrected.len() {
        if let Some(&(dx, dy)) = by_frame.get(&corrected.frame[row]) {
            corrected.x[row] -= dx;
            corrected.y[row] -= dy;
        }
    }
    corrected
}

/// Computes and subtracts drift in one step. The input is left untouched.
pub fn correct_drift(table: &FeatureTable) -> Result<FeatureTable> {
    let drift = compute_drift(table)?;
    if let Some(last) = drift.last() {
        debug!(
            "drift over {} frames, final offset ({:.3}, {:.3})",
            drift.len(),
            last.dx,
            last.dy
        );
    }
    Ok(subtract_drift(table, &drift))
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn trajectories(rows: &[(i64, i64, f64, f64)]) -> FeatureTable {
        let mut table = FeatureTable::new();
        for &(frame, particle, x, y) in rows {
            table.push_row(frame, x, y, Some(particle), &[("mass", 100.0)]).unwrap();
        }
        table
    }

    #[test]
    fn test_uniform_shift_is_removed() {
        // Three particles all moving +2 in x and -1 in y per frame
        let mut rows = Vec::new();
        for frame in 0..4 {
            for (p, (x0, y0)) in [(10.0, 10.0), (50.0, 20.0), (30.0, 70.0)].into_iter().enumerate() {
                rows.push((frame, p as i64, x0 + 2.0 * frame as f64, y0 - frame as f64));
            }
        }
        let table = trajectories(&rows);

        let drift = compute_drift(&table).unwrap();
        assert_eq!(drift.len(), 4);
        assert_eq!(drift[0], FrameDrift { frame: 0, dx: 0.0, dy: 0.0 });
        assert!((drift[3].dx - 6.0).abs() < EPS);
        assert!((drift[3].dy + 3.0).abs() < EPS);

        let corrected = correct_drift(&table).unwrap();
        for row in 0..corrected.len() {
            let p = corrected.particle.as_ref().unwrap()[row];
            assert!((corrected.x[row] - table.x[p as usize]).abs() < EPS);
            assert!((corrected.y[row] - table.y[p as usize]).abs() < EPS);
        }
        // Input untouched
        assert_eq!(table.x[3], 12.0);
    }

    #[test]
    fn test_repeated_correction_is_identical() {
        let mut rows = Vec::new();
        for frame in 0..5 {
            for (p, (x0, y0)) in [(5.0, 5.0), (40.0, 12.0), (22.0, 60.0)].into_iter().enumerate() {
                rows.push((frame, p as i64, x0 + 3.0 * frame as f64, y0 + 0.5 * frame as f64));
            }
        }
        let table = trajectories(&rows);
        let before = table.clone();

        let first = correct_drift(&table).unwrap();
        let second = correct_drift(&table).unwrap();
        assert_eq!(first, second);
        assert_eq!(table, before);

        // A corrected table has no drift left to remove
        let again = correct_drift(&first).unwrap();
        for row in 0..first.len() {
            assert!((again.x[row] - first.x[row]).abs() < EPS);
            assert!((again.y[row] - first.y[row]).abs() < EPS);
        }
    }

    #[test]
    fn test_zero_motion_is_identity() {
        let table = trajectories(&[
            (0, 1, 0.0, 0.0),
            (0, 2, 10.0, 0.0),
            (1, 1, 1.0, 0.0),
            (1, 2, 9.0, 0.0),
            (2, 1, 0.5, 1.0),
            (2, 2, 9.5, -1.0),
        ]);
        let corrected = correct_drift(&table).unwrap();
        for row in 0..table.len() {
            assert!((corrected.x[row] - table.x[row]).abs() < EPS);
            assert!((corrected.y[row] - table.y[row]).abs() < EPS);
        }
    }

    #[test]
    fn test_sparse_frame_carries_drift_forward() {
        let table = trajectories(&[
            (0, 1, 0.0, 0.0),
            (0, 2, 10.0, 0.0),
            (1, 1, 4.0, 0.0),
            (1, 2, 14.0, 0.0),
            // Frame 2 shares only particle 1 with frame 1
            (2, 1, 100.0, 0.0),
            (2, 3, 50.0, 0.0),
        ]);
        let drift = compute_drift(&table).unwrap();
        assert_eq!(drift[1].dx, 4.0);
        assert_eq!(drift[2].dx, 4.0);
    }

    #[test]
    fn test_particles_missing_from_either_frame_are_ignored() {
        let table = trajectories(&[
            (0, 1, 0.0, 0.0),
            (0, 2, 0.0, 0.0),
            (0, 9, 0.0, 0.0),
            (1, 1, 1.0, 1.0),
            (1, 2, 3.0, 1.0),
            (1, 8, 500.0, 500.0),
        ]);
        let drift = compute_drift(&table).unwrap();
        assert_eq!(drift[1], FrameDrift { frame: 1, dx: 2.0, dy: 1.0 });
    }

    #[test]
    fn test_empty_and_missing_particle_column() {
        assert!(compute_drift(&FeatureTable::new()).unwrap().is_empty());
        assert!(correct_drift(&FeatureTable::new()).unwrap().is_empty());

        let mut table = FeatureTable::new();
        table.push_row(0, 1.0, 1.0, None, &[]).unwrap();
        assert_eq!(
            compute_drift(&table).unwrap_err(),
            ProcessingError::UnknownFeature {
                feature: "particle".to_string()
            }
        );
    }
}
