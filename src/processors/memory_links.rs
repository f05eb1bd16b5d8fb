//! Links that bridged missing frames.
//!
//! A trajectory that skips frames relies on the linker's memory. The links
//! using the most memory (while still inside the allowed budget) are the
//! ones most worth a second look.

use std::ops::RangeInclusive;

use super::{require_nonzero, ProcessingError, Result};
use crate::core::table::FeatureTable;

/// One link across a gap in a trajectory.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryLink {
    pub particle_id: i64,
    /// Frames the particle was missing (`frame_gap - 1`).
    pub memory_used: i64,
    /// Last frame before the disappearance.
    pub last_frame: i64,
    /// Frame where the particle was picked up again.
    pub reappear_frame: i64,
    pub start: (f64, f64),
    pub end: (f64, f64),
}

impl MemoryLink {
    /// Every frame from disappearance to reappearance, inclusive.
    pub fn frames(&self) -> RangeInclusive<i64> {
        self.last_frame..=self.reappear_frame
    }
}

/// Finds up to `max_links` gap-bridging links with `memory_used < memory`,
/// most memory first. Ties go to the lower particle id, then the earlier gap.
pub fn find_memory_links(
    table: &FeatureTable,
    memory: i64,
    max_links: usize,
) -> Result<Vec<MemoryLink>> {
    if memory < 0 {
        return Err(ProcessingError::invalid("memory", memory, "must not be negative"));
    }
    require_nonzero("max_links", max_links)?;

    if table.is_empty() {
        return Ok(Vec::new());
    }

    let groups = table
        .particle_groups()
        .ok_or_else(|| ProcessingError::unknown_feature("particle"))?;

    let mut links = Vec::new();
    for (id, rows) in groups {
        for pair in rows.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let gap = table.frame[b].saturating_sub(table.frame[a]);
            if gap <= 1 {
                continue;
            }
            let memory_used = gap - 1;
            if memory_used < memory {
                links.push(MemoryLink {
                    particle_id: id,
                    memory_used,
                    last_frame: table.frame[a],
                    reappear_frame: table.frame[b],
                    start: (table.x[a], table.y[a]),
                    end: (table.x[b], table.y[b]),
                });
            }
        }
    }

    links.sort_by(|a, b| {
        b.memory_used
            .cmp(&a.memory_used)
            .then_with(|| a.particle_id.cmp(&b.particle_id))
            .then_with(|| a.last_frame.cmp(&b.last_frame))
    });
    links.truncate(max_links);

    log::debug!("found {} memory links under memory {}", links.len(), memory);
    Ok(links)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trajectories(rows: &[(i64, i64)]) -> FeatureTable {
        let mut table = FeatureTable::new();
        for &(frame, particle) in rows {
            table
                .push_row(frame, frame as f64, 0.0, Some(particle), &[])
                .unwrap();
        }
        table
    }

    #[test]
    fn test_sorted_by_memory_used() {
        let table = trajectories(&[(0, 1), (3, 1), (4, 1), (0, 2), (5, 2), (10, 3), (12, 3)]);

        let links = find_memory_links(&table, 10, 5).unwrap();
        let summary: Vec<(i64, i64)> = links.iter().map(|l| (l.particle_id, l.memory_used)).collect();
        assert_eq!(summary, vec![(2, 4), (1, 2), (3, 1)]);
        assert_eq!(links[0].frames().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(links[0].end, (5.0, 0.0));
    }

    #[test]
    fn test_respects_memory_budget_and_limit() {
        let table = trajectories(&[(0, 1), (3, 1), (0, 2), (5, 2), (10, 3), (12, 3)]);

        // memory_used must be strictly below the budget
        let links = find_memory_links(&table, 2, 5).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].particle_id, 3);

        assert_eq!(find_memory_links(&table, 10, 2).unwrap().len(), 2);
    }

    #[test]
    fn test_extreme_frame_numbers_saturate() {
        let table = trajectories(&[(i64::MIN, 1), (i64::MAX, 1)]);
        let links = find_memory_links(&table, i64::MAX, 5).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].memory_used, i64::MAX - 1);

        assert!(find_memory_links(&table, 3, 5).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_parameters() {
        let table = FeatureTable::new();
        assert!(find_memory_links(&table, -1, 5).is_err());
        assert!(find_memory_links(&table, 3, 0).is_err());
        assert!(find_memory_links(&table, 3, 5).unwrap().is_empty());
    }
}
