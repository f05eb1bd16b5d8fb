//! Errant record selection.
//!
//! Finds the included records that sit closest to one of the active
//! thresholds, so a reviewer can judge whether the threshold is well placed.
//! Only rows the filter set currently includes are considered.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use log::debug;

use super::filter::Operator;
use super::filter_set::FilterSet;
use super::{require_nonzero, ProcessingError, Result};
use crate::core::table::FeatureTable;

/// One borderline record for one feature.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrantCandidate {
    /// Row index in the input table.
    pub row: usize,
    pub frame: i64,
    pub particle: Option<i64>,
    pub x: f64,
    pub y: f64,
    /// Feature whose threshold this record is close to.
    pub feature: String,
    pub value: f64,
    pub operator: Operator,
    pub threshold: f64,
    /// Signed distance to the threshold (positive = inside).
    pub distance: f64,
}

impl ErrantCandidate {
    /// One-line justification for display next to the record.
    ///
    /// A negative distance means the record fails this threshold and is only
    /// included through another branch of an `OR`/`XOR` filter.
    pub fn reason(&self) -> String {
        if self.distance < 0.0 {
            format!(
                "{} = {:.2} fails {} {} {} by {:.2} but is kept by its other filters",
                self.feature, self.value, self.feature, self.operator, self.threshold, -self.distance
            )
        } else {
            format!(
                "{} = {:.2} passes {} {} {} with margin {:.2}",
                self.feature, self.value, self.feature, self.operator, self.threshold, self.distance
            )
        }
    }
}

/// Closest-to-boundary ordering: smallest margin, then most recent frame,
/// then lowest row index.
fn rank(a: &ErrantCandidate, b: &ErrantCandidate) -> Ordering {
    a.distance
        .abs()
        .total_cmp(&b.distance.abs())
        .then_with(|| b.frame.cmp(&a.frame))
        .then_with(|| a.row.cmp(&b.row))
        .then_with(|| a.feature.cmp(&b.feature))
}

/// Selects up to `max_results` borderline records.
///
/// For every requested feature that is the subject of at least one simple
/// filter in `filter_set` (nested filters count), each included record gets
/// one candidate measured against the nearest of that feature's thresholds.
/// Features without a filter are ignored; if none of the requested features
/// has one, the result is empty.
///
/// # Errors
///
/// `InvalidParameter` for `max_results == 0`; `UnknownFeature` if the filter
/// set references a column the table lacks.
pub fn select_errant<S: AsRef<str>>(
    table: &FeatureTable,
    filter_set: &FilterSet,
    feature_names: &[S],
    max_results: usize,
) -> Result<Vec<ErrantCandidate>> {
    require_nonzero("max_errant_results", max_results)?;

    if table.is_empty() {
        return Ok(Vec::new());
    }

    // Thresholds per requested feature, in filter order
    let mut thresholds: BTreeMap<&str, Vec<(Operator, f64)>> = BTreeMap::new();
    for leaf in filter_set.simple_filters() {
        if feature_names.iter().any(|name| name.as_ref() == leaf.feature) {
            thresholds
                .entry(leaf.feature)
                .or_default()
                .push((leaf.operator, leaf.threshold));
        }
    }

    if thresholds.is_empty() {
        debug!("no active filters on the requested features; nothing to rank");
        return Ok(Vec::new());
    }

    let included = filter_set.included_mask(table)?;

    let mut candidates = Vec::new();
    for (feature, limits) in &thresholds {
        let column = table
            .column(feature)
            .ok_or_else(|| ProcessingError::unknown_feature(feature))?;

        for record in table.records().filter(|r| included[r.index()]) {
            let value = column.get(record.index());
            let nearest = limits
                .iter()
                .map(|&(operator, threshold)| {
                    (operator, threshold, operator.signed_distance(value, threshold))
                })
                .filter(|(_, _, distance)| distance.is_finite())
                .min_by(|a, b| a.2.abs().total_cmp(&b.2.abs()));

            if let Some((operator, threshold, distance)) = nearest {
                candidates.push(ErrantCandidate {
                    row: record.index(),
                    frame: record.frame(),
                    particle: record.particle(),
                    x: record.x(),
                    y: record.y(),
                    feature: feature.to_string(),
                    value,
                    operator,
                    threshold,
                    distance,
                });
            }
        }
    }

    debug!(
        "ranking {} errant candidates over {} features",
        candidates.len(),
        thresholds.len()
    );

    // Partial selection keeps this O(n) before sorting the short head
    if candidates.len() > max_results {
        candidates.select_nth_unstable_by(max_results - 1, rank);
        candidates.truncate(max_results);
    }
    candidates.sort_by(rank);

    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::filter::FilterExpression;

    fn particles(rows: &[(i64, f64, f64)]) -> FeatureTable {
        let mut table = FeatureTable::new();
        for &(frame, mass, size) in rows {
            table
                .push_row(frame, 1.0, 2.0, None, &[("mass", mass), ("size", size)])
                .unwrap();
        }
        table
    }

    #[test]
    fn test_closest_below_threshold_ranks_first() {
        let table = particles(&[(0, 300.0, 1.0), (0, 495.0, 1.0), (1, 450.0, 1.0), (2, 499.0, 1.0), (3, 510.0, 1.0)]);
        let set = FilterSet::parse_all(["mass < 500"]).unwrap();

        let errant = select_errant(&table, &set, &["mass"], 10).unwrap();
        let rows: Vec<usize> = errant.iter().map(|c| c.row).collect();
        assert_eq!(rows, vec![3, 1, 2, 0]);
        assert_eq!(errant[0].distance, 1.0);
        assert_eq!(errant[0].operator, Operator::Lt);
    }

    #[test]
    fn test_never_returns_excluded_rows() {
        let table = particles(&[(0, 480.0, 1.0), (0, 500.0, 1.0), (0, 520.0, 1.0)]);
        let set = FilterSet::parse_all(["mass < 500"]).unwrap();
        let (included, _) = set.apply(&table).unwrap();

        let errant = select_errant(&table, &set, &["mass"], 5).unwrap();
        assert_eq!(errant.len(), 1);
        assert!(errant.iter().all(|c| included[c.row]));
    }

    #[test]
    fn test_truncates_to_max_results() {
        let rows: Vec<(i64, f64, f64)> = (0..50).map(|i| (i, 100.0 + i as f64, 1.0)).collect();
        let table = particles(&rows);
        let set = FilterSet::parse_all(["mass > 90"]).unwrap();

        let errant = select_errant(&table, &set, &["mass"], 3).unwrap();
        assert_eq!(errant.iter().map(|c| c.row).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn test_ties_prefer_recent_frame_then_row() {
        let table = particles(&[(1, 490.0, 1.0), (4, 510.0, 1.0), (4, 490.0, 1.0), (2, 490.0, 1.0)]);
        let set = FilterSet::from(vec![FilterExpression::simple("mass", Operator::Ne, 500.0)]);

        let errant = select_errant(&table, &set, &["mass"], 10).unwrap();
        let rows: Vec<usize> = errant.iter().map(|c| c.row).collect();
        assert_eq!(rows, vec![1, 2, 3, 0]);
    }

    #[test]
    fn test_nearest_threshold_per_feature() {
        let table = particles(&[(0, 150.0, 1.0), (0, 390.0, 1.0)]);
        let set = FilterSet::parse_all(["(mass > 100) AND (mass < 400)"]).unwrap();

        let errant = select_errant(&table, &set, &["mass"], 10).unwrap();
        assert_eq!(errant.len(), 2);
        assert_eq!(errant[0].row, 1);
        assert_eq!(errant[0].threshold, 400.0);
        assert_eq!(errant[1].threshold, 100.0);
        assert_eq!(errant[1].distance, 50.0);
    }

    #[test]
    fn test_multiple_features_and_unfiltered_requests() {
        let table = particles(&[(0, 480.0, 2.1), (1, 300.0, 2.9)]);
        let set = FilterSet::parse_all(["mass < 500", "size > 2"]).unwrap();

        let errant = select_errant(&table, &set, &["mass", "size", "signal"], 10).unwrap();
        assert_eq!(errant.len(), 4);
        assert_eq!(errant[0].feature, "size");
        assert_eq!(errant[0].row, 0);
        assert!(errant[0].reason().starts_with("size = 2.10 passes size > 2"));

        let none = select_errant(&table, &set, &["eccentricity"], 10).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_failing_leaf_of_or_filter_gives_negative_distance() {
        let table = particles(&[(0, 600.0, 3.0), (1, 450.0, 1.0)]);
        let set = FilterSet::parse_all(["(mass < 500) OR (size > 2)"]).unwrap();

        let errant = select_errant(&table, &set, &["mass"], 10).unwrap();
        assert_eq!(errant.len(), 2);
        assert_eq!(errant[0].row, 1);
        assert_eq!(errant[0].distance, 50.0);

        let kept = &errant[1];
        assert_eq!(kept.row, 0);
        assert_eq!(kept.distance, -100.0);
        assert_eq!(
            kept.reason(),
            "mass = 600.00 fails mass < 500 by 100.00 but is kept by its other filters"
        );
    }

    #[test]
    fn test_repeated_selection_is_identical() {
        let table = particles(&[(0, 480.0, 2.1), (1, 300.0, 2.9), (2, 499.0, 3.5), (3, 700.0, 2.4)]);
        let set = FilterSet::parse_all(["mass < 500", "(size > 2) OR (mass < 400)"]).unwrap();
        let before = table.clone();

        let first = select_errant(&table, &set, &["mass", "size"], 3).unwrap();
        let second = select_errant(&table, &set, &["mass", "size"], 3).unwrap();
        assert_eq!(first, second);
        assert_eq!(table, before);
    }

    #[test]
    fn test_invalid_limit_and_empty_table() {
        let set = FilterSet::parse_all(["mass < 500"]).unwrap();
        let err = select_errant(&FeatureTable::new(), &set, &["mass"], 0).unwrap_err();
        assert!(matches!(err, ProcessingError::InvalidParameter { name: "max_errant_results", .. }));

        let errant = select_errant(&FeatureTable::new(), &set, &["mass"], 5).unwrap();
        assert!(errant.is_empty());
    }
}
