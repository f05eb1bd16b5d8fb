//! Trajectory link-quality scoring.
//!
//! Every consecutive pair of positions within a trajectory is a link. A link
//! is suspicious when its jump is longer than the linker's search range or
//! when it bridges more missing frames than the linker's memory allows. Each
//! trajectory reports only its single worst link; the survivors are ranked so
//! the most likely tracking errors come first.
//!
//! # Algorithm (Parallelized)
//!
//! 1. **Group**: rows are grouped by `particle` and sorted by `frame`
//! 2. **Score**: each trajectory is scored independently with rayon, keeping
//!    its highest-scoring transition
//! 3. **Threshold**: links whose deviation does not exceed
//!    `search_range * (min_deviation_multiplier - 1)` are dropped
//! 4. **Rank**: score descending, particle id ascending, truncated to
//!    `max_results`

use std::cmp::Ordering;

use log::debug;
use rayon::prelude::*;

use super::{require_nonzero, ProcessingError, Result};
use crate::core::table::FeatureTable;

/// Weight of the deviation term in the score.
const DEVIATION_WEIGHT: f64 = 10.0;

/// Weight of each frame of excess gap in the score.
const EXCESS_GAP_WEIGHT: f64 = 5.0;

/// Parameters for a scoring pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkScoringParams {
    /// Largest expected per-frame displacement, in pixels.
    pub search_range: f64,
    /// Frames a particle may go missing before a link is too distant.
    pub memory: i64,
    /// Inclusion factor: deviation must exceed `search_range * (m - 1)`.
    pub min_deviation_multiplier: f64,
    /// Maximum number of links returned.
    pub max_results: usize,
}

impl Default for LinkScoringParams {
    fn default() -> Self {
        Self {
            search_range: 10.0,
            memory: 10,
            min_deviation_multiplier: 1.5,
            max_results: 10,
        }
    }
}

impl LinkScoringParams {
    /// Rejects parameters that would make the scores meaningless.
    pub fn validate(&self) -> Result<()> {
        if !(self.search_range.is_finite() && self.search_range > 0.0) {
            return Err(ProcessingError::invalid(
                "search_range",
                self.search_range,
                "must be a finite value greater than zero",
            ));
        }
        if self.memory < 0 {
            return Err(ProcessingError::invalid(
                "memory",
                self.memory,
                "must not be negative",
            ));
        }
        if !self.min_deviation_multiplier.is_finite() {
            return Err(ProcessingError::invalid(
                "min_deviation_multiplier",
                self.min_deviation_multiplier,
                "must be finite",
            ));
        }
        require_nonzero("max_results", self.max_results)
    }

    /// Smallest deviation (exclusive) a link needs to be reported.
    #[inline]
    pub fn deviation_threshold(&self) -> f64 {
        self.search_range * (self.min_deviation_multiplier - 1.0)
    }
}

/// Score of one frame-to-frame transition of one trajectory.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkScore {
    pub particle_id: i64,
    pub frame_i: i64,
    pub frame_i1: i64,
    pub x_i: f64,
    pub y_i: f64,
    pub x_i1: f64,
    pub y_i1: f64,
    /// Euclidean jump between the two positions.
    pub jump_distance: f64,
    pub frame_gap: i64,
    /// `max(0, jump_distance - search_range)`.
    pub deviation: f64,
    /// Missing frames beyond `memory`; zero for consecutive frames.
    pub excess_gap: i64,
    /// `deviation * 10 + deviation + excess_gap * 5`.
    pub score: f64,
}

impl LinkScore {
    /// Scores the transition from `(frame_i, x_i, y_i)` to
    /// `(frame_i1, x_i1, y_i1)`.
    pub fn new(
        particle_id: i64,
        (frame_i, x_i, y_i): (i64, f64, f64),
        (frame_i1, x_i1, y_i1): (i64, f64, f64),
        search_range: f64,
        memory: i64,
    ) -> Self {
        let jump_distance = (x_i1 - x_i).hypot(y_i1 - y_i);
        let frame_gap = frame_i1.saturating_sub(frame_i);
        let deviation = (jump_distance - search_range).max(0.0);
        let excess_gap = if frame_gap > 1 {
            (frame_gap - 1).saturating_sub(memory).max(0)
        } else {
            0
        };
        // Deviation enters twice: once weighted and once as-is
        let score = deviation * DEVIATION_WEIGHT + deviation + excess_gap as f64 * EXCESS_GAP_WEIGHT;

        Self {
            particle_id,
            frame_i,
            frame_i1,
            x_i,
            y_i,
            x_i1,
            y_i1,
            jump_distance,
            frame_gap,
            deviation,
            excess_gap,
            score,
        }
    }

    /// Human-readable explanation of which linking parameters this link
    /// strains.
    pub fn issues(&self, search_range: f64, memory: i64) -> Vec<String> {
        let mut issues = Vec::with_capacity(2);

        if self.jump_distance > search_range {
            issues.push(format!(
                "Jump distance ({:.2} px) exceeds search_range ({} px) by {:.2} px",
                self.jump_distance,
                search_range,
                self.jump_distance - search_range
            ));
        } else {
            issues.push(format!(
                "Jump distance ({:.2} px) is within search_range ({} px)",
                self.jump_distance, search_range
            ));
        }

        if self.frame_gap > 1 {
            let missing = self.frame_gap - 1;
            if missing > memory {
                issues.push(format!(
                    "Frame gap ({} frames, {} disappearances) exceeds memory ({} frames) by {} frames",
                    self.frame_gap,
                    missing,
                    memory,
                    missing.saturating_sub(memory)
                ));
            } else {
                issues.push(format!(
                    "Frame gap ({} frames, {} disappearances) is within memory ({} frames)",
                    self.frame_gap, missing, memory
                ));
            }
        } else {
            issues.push("No frame gap (consecutive frames)".to_string());
        }

        issues
    }
}

/// Worst transition of one trajectory, given its rows sorted by frame.
///
/// Ties keep the earliest transition. Transitions with a non-finite score
/// are skipped.
pub fn worst_link(
    table: &FeatureTable,
    particle_id: i64,
    rows: &[usize],
    search_range: f64,
    memory: i64,
) -> Option<LinkScore> {
    let mut worst: Option<LinkScore> = None;

    for pair in rows.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let link = LinkScore::new(
            particle_id,
            (table.frame[a], table.x[a], table.y[a]),
            (table.frame[b], table.x[b], table.y[b]),
            search_range,
            memory,
        );
        if !link.score.is_finite() {
            continue;
        }
        if worst.as_ref().map_or(true, |w| link.score > w.score) {
            worst = Some(link);
        }
    }

    worst
}

fn rank(a: &LinkScore, b: &LinkScore) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.particle_id.cmp(&b.particle_id))
}

/// Scores every trajectory and returns the ranked worst links.
///
/// The table should already be drift-corrected. Trajectories with fewer
/// than two rows contribute nothing.
///
/// # Errors
///
/// `InvalidParameter` before any scoring if `params` are out of range;
/// `UnknownFeature("particle")` for a non-empty table without trajectory ids.
pub fn score_links(table: &FeatureTable, params: &LinkScoringParams) -> Result<Vec<LinkScore>> {
    params.validate()?;

    if table.is_empty() {
        return Ok(Vec::new());
    }

    let groups = table
        .particle_groups()
        .ok_or_else(|| ProcessingError::unknown_feature("particle"))?;
    let groups: Vec<(i64, Vec<usize>)> = groups.into_iter().collect();

    let worst: Vec<LinkScore> = groups
        .par_iter()
        .filter_map(|(id, rows)| worst_link(table, *id, rows, params.search_range, params.memory))
        .collect();

    let threshold = params.deviation_threshold();
    let mut links: Vec<LinkScore> = worst
        .into_iter()
        .filter(|link| link.deviation > threshold)
        .collect();

    debug!(
        "{} trajectories, {} worst links above deviation {:.2}",
        groups.len(),
        links.len(),
        threshold
    );

    links.sort_by(rank);
    links.truncate(params.max_results);
    Ok(links)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trajectories(rows: &[(i64, i64, f64, f64)]) -> FeatureTable {
        let mut table = FeatureTable::new();
        for &(frame, particle, x, y) in rows {
            table.push_row(frame, x, y, Some(particle), &[]).unwrap();
        }
        table
    }

    fn params(search_range: f64, memory: i64) -> LinkScoringParams {
        LinkScoringParams {
            search_range,
            memory,
            ..LinkScoringParams::default()
        }
    }

    #[test]
    fn test_two_particle_scenario() {
        // A moves 3 px, B moves 12 px between frames 0 and 1
        let table = trajectories(&[
            (0, 1, 0.0, 0.0),
            (1, 1, 3.0, 0.0),
            (0, 2, 100.0, 100.0),
            (1, 2, 100.0, 112.0),
        ]);

        let links = score_links(&table, &params(5.0, 0)).unwrap();
        assert_eq!(links.len(), 1);
        let b = &links[0];
        assert_eq!(b.particle_id, 2);
        assert_eq!(b.jump_distance, 12.0);
        assert_eq!(b.deviation, 7.0);
        assert_eq!(b.excess_gap, 0);
        assert_eq!(b.score, 77.0);
    }

    #[test]
    fn test_double_search_range_jump_inclusion() {
        let table = trajectories(&[(0, 1, 0.0, 0.0), (1, 1, 20.0, 0.0)]);

        let link = &score_links(&table, &params(10.0, 0)).unwrap()[0];
        assert_eq!(link.deviation, 10.0);

        // deviation 10 > 10 * (2.0 - 1) is false
        let strict = LinkScoringParams {
            min_deviation_multiplier: 2.0,
            ..params(10.0, 0)
        };
        assert!(score_links(&table, &strict).unwrap().is_empty());
    }

    #[test]
    fn test_one_link_per_trajectory() {
        let table = trajectories(&[
            (0, 1, 0.0, 0.0),
            (1, 1, 30.0, 0.0),
            (2, 1, 30.0, 50.0),
            (3, 1, 60.0, 50.0),
        ]);

        let links = score_links(&table, &params(5.0, 0)).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!((links[0].frame_i, links[0].frame_i1), (1, 2));
        assert_eq!(links[0].deviation, 45.0);
    }

    #[test]
    fn test_tie_within_trajectory_keeps_earliest() {
        let table = trajectories(&[(0, 1, 0.0, 0.0), (1, 1, 20.0, 0.0), (2, 1, 40.0, 0.0)]);
        let links = score_links(&table, &params(5.0, 0)).unwrap();
        assert_eq!(links[0].frame_i, 0);
    }

    #[test]
    fn test_ranked_by_score_then_particle() {
        let table = trajectories(&[
            (0, 9, 0.0, 0.0),
            (1, 9, 20.0, 0.0),
            (0, 4, 0.0, 0.0),
            (1, 4, 0.0, 20.0),
            (0, 7, 0.0, 0.0),
            (1, 7, 30.0, 0.0),
        ]);

        let links = score_links(&table, &params(5.0, 0)).unwrap();
        let order: Vec<i64> = links.iter().map(|l| l.particle_id).collect();
        assert_eq!(order, vec![7, 4, 9]);
        assert!(links.windows(2).all(|w| w[0].score >= w[1].score));

        let limited = score_links(
            &table,
            &LinkScoringParams {
                max_results: 2,
                ..params(5.0, 0)
            },
        )
        .unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn test_excess_gap_counts_frames_beyond_memory() {
        let link = LinkScore::new(3, (10, 0.0, 0.0), (15, 0.0, 0.0), 5.0, 2);
        assert_eq!(link.frame_gap, 5);
        assert_eq!(link.excess_gap, 2);
        assert_eq!(link.score, 10.0);

        let within = LinkScore::new(3, (10, 0.0, 0.0), (12, 0.0, 0.0), 5.0, 2);
        assert_eq!(within.excess_gap, 0);
    }

    #[test]
    fn test_extreme_frame_numbers_saturate() {
        let link = LinkScore::new(1, (i64::MIN, 0.0, 0.0), (i64::MAX, 0.0, 0.0), 5.0, 0);
        assert_eq!(link.frame_gap, i64::MAX);
        assert_eq!(link.excess_gap, i64::MAX - 1);
        assert!(link.score.is_finite());
        assert!(link.issues(5.0, 0)[1].contains("exceeds memory"));

        let table = trajectories(&[(i64::MIN, 1, 0.0, 0.0), (i64::MAX, 1, 0.0, 0.0)]);
        let links = score_links(&table, &params(5.0, 0)).unwrap();
        assert!(links.is_empty());
    }

    #[test]
    fn test_issues_describe_violations() {
        let link = LinkScore::new(3, (0, 0.0, 0.0), (4, 12.0, 0.0), 5.0, 1);
        let issues = link.issues(5.0, 1);
        assert_eq!(
            issues[0],
            "Jump distance (12.00 px) exceeds search_range (5 px) by 7.00 px"
        );
        assert_eq!(
            issues[1],
            "Frame gap (4 frames, 3 disappearances) exceeds memory (1 frames) by 2 frames"
        );

        let calm = LinkScore::new(3, (0, 0.0, 0.0), (1, 1.0, 0.0), 5.0, 1);
        assert_eq!(calm.issues(5.0, 1)[1], "No frame gap (consecutive frames)");
    }

    #[test]
    fn test_invalid_parameters_rejected_before_scoring() {
        let empty = FeatureTable::new();
        assert!(matches!(
            score_links(&empty, &params(0.0, 0)).unwrap_err(),
            ProcessingError::InvalidParameter { name: "search_range", .. }
        ));
        assert!(matches!(
            score_links(&empty, &params(f64::NAN, 0)).unwrap_err(),
            ProcessingError::InvalidParameter { name: "search_range", .. }
        ));
        assert!(matches!(
            score_links(&empty, &params(5.0, -1)).unwrap_err(),
            ProcessingError::InvalidParameter { name: "memory", .. }
        ));
        let zero = LinkScoringParams {
            max_results: 0,
            ..params(5.0, 0)
        };
        assert!(matches!(
            score_links(&empty, &zero).unwrap_err(),
            ProcessingError::InvalidParameter { name: "max_results", .. }
        ));
    }

    #[test]
    fn test_short_trajectories_and_missing_ids() {
        let table = trajectories(&[(0, 1, 0.0, 0.0), (5, 2, 99.0, 99.0)]);
        assert!(score_links(&table, &params(1.0, 0)).unwrap().is_empty());
        assert!(score_links(&FeatureTable::new(), &params(1.0, 0)).unwrap().is_empty());

        let mut particles = FeatureTable::new();
        particles.push_row(0, 0.0, 0.0, None, &[]).unwrap();
        assert!(matches!(
            score_links(&particles, &params(1.0, 0)).unwrap_err(),
            ProcessingError::UnknownFeature { .. }
        ));
    }

    #[test]
    fn test_repeated_scoring_is_identical() {
        let table = trajectories(&[(0, 1, 0.0, 0.0), (1, 1, 9.0, 0.0), (0, 2, 0.0, 0.0), (1, 2, 0.0, 9.0)]);
        let first = score_links(&table, &params(5.0, 0)).unwrap();
        let second = score_links(&table, &params(5.0, 0)).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.iter().map(|l| l.particle_id).collect::<Vec<_>>(), vec![1, 2]);
    }
}
