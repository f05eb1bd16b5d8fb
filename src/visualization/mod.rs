//! Visualization tools for review results.
//!
//! Two PNG plots are provided: a feature-vs-feature scatter showing which
//! records a filter set keeps, and a trajectory overview with the flagged
//! links drawn on top.

use std::path::Path;

use plotters::prelude::*;
use plotters_bitmap::BitMapBackend;
use thiserror::Error;

use crate::config::PlotConfig;
use crate::core::table::FeatureTable;
use crate::processors::LinkScore;

/// Errors that can occur during visualization.
#[derive(Error, Debug)]
pub enum VisualizationError {
    #[error("Plotting error: {0}")]
    PlottingError(String),

    #[error("Empty table")]
    EmptyTable,

    #[error("Unknown column '{0}'")]
    UnknownColumn(String),

    #[error("Mask has {mask_len} entries but table has {table_len} rows")]
    MaskLength { mask_len: usize, table_len: usize },

    #[error("Table has no particle column")]
    NotTrajectories,
}

/// Result type for visualization operations.
pub type Result<T> = std::result::Result<T, VisualizationError>;

const INCLUDED_COLOR: RGBColor = RGBColor(55, 126, 184);
const EXCLUDED_COLOR: RGBColor = RGBColor(190, 190, 190);
const ERRANT_COLOR: RGBColor = RGBColor(255, 127, 0);
const FLAGGED_LINK_COLOR: RGBColor = RGBColor(228, 26, 28);

/// Palette cycled over trajectories.
const TRACK_COLORS: &[(u8, u8, u8)] = &[
    (55, 126, 184),  // Blue
    (77, 175, 74),   // Green
    (152, 78, 163),  // Purple
    (166, 86, 40),   // Brown
    (247, 129, 191), // Pink
    (0, 206, 209),   // Turquoise
    (138, 43, 226),  // Blue Violet
    (0, 191, 255),   // Deep Sky Blue
];

fn plotting_error<E: std::fmt::Display>(e: E) -> VisualizationError {
    VisualizationError::PlottingError(e.to_string())
}

/// Scatter one feature against another, coloured by filter outcome.
///
/// Excluded records are drawn first in grey, included records on top, and
/// the errant rows last, enlarged, in orange.
///
/// # Arguments
///
/// * `output_path` - Path to save the PNG image
/// * `table` - Records to plot
/// * `x_feature`, `y_feature` - Any column name, including `x`, `y` and `frame`
/// * `included` - Filter mask, one entry per row
/// * `errant_rows` - Row indices to highlight
/// * `options` - Image size and marker radius
///
/// # Errors
///
/// Returns an error for an empty table, an unknown column, a mask of the
/// wrong length, or a drawing failure.
pub fn plot_feature_scatter(
    output_path: &Path,
    table: &FeatureTable,
    x_feature: &str,
    y_feature: &str,
    included: &[bool],
    errant_rows: &[usize],
    options: &PlotConfig,
) -> Result<()> {
    if table.is_empty() {
        return Err(VisualizationError::EmptyTable);
    }
    if included.len() != table.len() {
        return Err(VisualizationError::MaskLength {
            mask_len: included.len(),
            table_len: table.len(),
        });
    }
    let xs = table
        .column(x_feature)
        .ok_or_else(|| VisualizationError::UnknownColumn(x_feature.to_string()))?;
    let ys = table
        .column(y_feature)
        .ok_or_else(|| VisualizationError::UnknownColumn(y_feature.to_string()))?;

    let points: Vec<(f64, f64)> = (0..table.len()).map(|i| (xs.get(i), ys.get(i))).collect();
    let (x_min, x_max, y_min, y_max) = compute_bounds(points.iter().copied());
    let x_padding = (x_max - x_min) * 0.05;
    let y_padding = (y_max - y_min) * 0.05;

    let root =
        BitMapBackend::new(output_path, (options.width, options.height)).into_drawing_area();
    root.fill(&WHITE).map_err(plotting_error)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .build_cartesian_2d(
            (x_min - x_padding)..(x_max + x_padding),
            (y_min - y_padding)..(y_max + y_padding),
        )
        .map_err(plotting_error)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .disable_y_mesh()
        .draw()
        .map_err(plotting_error)?;

    let radius = options.point_size as i32;
    for (keep, color) in [(false, EXCLUDED_COLOR), (true, INCLUDED_COLOR)] {
        chart
            .draw_series(
                points
                    .iter()
                    .zip(included)
                    .filter(|(p, inc)| **inc == keep && p.0.is_finite() && p.1.is_finite())
                    .map(|(&p, _)| Circle::new(p, radius, color.filled())),
            )
            .map_err(plotting_error)?;
    }

    chart
        .draw_series(
            errant_rows
                .iter()
                .filter_map(|&row| points.get(row).copied())
                .filter(|(x, y)| x.is_finite() && y.is_finite())
                .map(|p| Circle::new(p, radius * 2, ERRANT_COLOR.stroke_width(2))),
        )
        .map_err(plotting_error)?;

    root.present().map_err(plotting_error)?;
    log::debug!("wrote scatter {}", output_path.display());

    Ok(())
}

/// Draw every trajectory as a polyline and overlay the flagged links.
///
/// # Errors
///
/// Returns an error for an empty table, a table without particle ids, or a
/// drawing failure.
pub fn plot_trajectories(
    output_path: &Path,
    table: &FeatureTable,
    links: &[LinkScore],
    options: &PlotConfig,
) -> Result<()> {
    if table.is_empty() {
        return Err(VisualizationError::EmptyTable);
    }
    let groups = table
        .particle_groups()
        .ok_or(VisualizationError::NotTrajectories)?;

    let link_points = links
        .iter()
        .flat_map(|l| [(l.x_i, l.y_i), (l.x_i1, l.y_i1)]);
    let (x_min, x_max, y_min, y_max) =
        compute_bounds(table.x.iter().copied().zip(table.y.iter().copied()).chain(link_points));
    let x_padding = (x_max - x_min) * 0.05;
    let y_padding = (y_max - y_min) * 0.05;

    let root =
        BitMapBackend::new(output_path, (options.width, options.height)).into_drawing_area();
    root.fill(&WHITE).map_err(plotting_error)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .build_cartesian_2d(
            (x_min - x_padding)..(x_max + x_padding),
            (y_min - y_padding)..(y_max + y_padding),
        )
        .map_err(plotting_error)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .disable_y_mesh()
        .draw()
        .map_err(plotting_error)?;

    for (n, rows) in groups.values().enumerate() {
        let (r, g, b) = TRACK_COLORS[n % TRACK_COLORS.len()];
        let path: Vec<(f64, f64)> = rows
            .iter()
            .map(|&row| (table.x[row], table.y[row]))
            .filter(|(x, y)| x.is_finite() && y.is_finite())
            .collect();
        chart
            .draw_series(LineSeries::new(path, RGBColor(r, g, b)))
            .map_err(plotting_error)?;
    }

    let radius = options.point_size as i32;
    for link in links {
        let segment = [(link.x_i, link.y_i), (link.x_i1, link.y_i1)];
        chart
            .draw_series(LineSeries::new(segment, FLAGGED_LINK_COLOR.stroke_width(3)))
            .map_err(plotting_error)?;
        chart
            .draw_series(
                segment
                    .into_iter()
                    .map(|p| Circle::new(p, radius, FLAGGED_LINK_COLOR.filled())),
            )
            .map_err(plotting_error)?;
    }

    root.present().map_err(plotting_error)?;
    log::debug!(
        "wrote {} trajectories and {} flagged links to {}",
        groups.len(),
        links.len(),
        output_path.display()
    );

    Ok(())
}

/// Compute the bounds (min/max) of the finite points.
fn compute_bounds(points: impl Iterator<Item = (f64, f64)>) -> (f64, f64, f64, f64) {
    let mut x_min = f64::MAX;
    let mut x_max = f64::MIN;
    let mut y_min = f64::MAX;
    let mut y_max = f64::MIN;

    for (x, y) in points.filter(|(x, y)| x.is_finite() && y.is_finite()) {
        x_min = x_min.min(x);
        x_max = x_max.max(x);
        y_min = y_min.min(y);
        y_max = y_max.max(y);
    }

    // No finite points at all
    if x_min > x_max {
        return (-1.0, 1.0, -1.0, 1.0);
    }

    if (x_max - x_min).abs() < f64::EPSILON {
        x_min -= 1.0;
        x_max += 1.0;
    }
    if (y_max - y_min).abs() < f64::EPSILON {
        y_min -= 1.0;
        y_max += 1.0;
    }

    (x_min, x_max, y_min, y_max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn small_options() -> PlotConfig {
        PlotConfig {
            width: 200,
            height: 150,
            point_size: 2,
        }
    }

    fn create_test_table() -> FeatureTable {
        let mut table = FeatureTable::new();
        for frame in 0..4 {
            for particle in 0..2 {
                let x = frame as f64 + 10.0 * particle as f64;
                table
                    .push_row(frame, x, 1.0, Some(particle), &[("mass", 100.0 * x)])
                    .unwrap();
            }
        }
        table
    }

    #[test]
    fn test_compute_bounds() {
        let bounds = compute_bounds([(1.0, 5.0), (f64::NAN, 0.0), (3.0, 5.0)].into_iter());
        assert_eq!(bounds, (1.0, 3.0, 4.0, 6.0));
        assert_eq!(compute_bounds(std::iter::empty()), (-1.0, 1.0, -1.0, 1.0));
    }

    #[test]
    fn test_plot_feature_scatter() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scatter.png");
        let table = create_test_table();
        let included: Vec<bool> = (0..table.len()).map(|i| i % 2 == 0).collect();

        plot_feature_scatter(&path, &table, "mass", "x", &included, &[1], &small_options())
            .unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_plot_feature_scatter_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scatter.png");
        let table = create_test_table();
        let included = vec![true; table.len()];

        assert!(matches!(
            plot_feature_scatter(&path, &table, "brightness", "x", &included, &[], &small_options()),
            Err(VisualizationError::UnknownColumn(name)) if name == "brightness"
        ));
        assert!(matches!(
            plot_feature_scatter(&path, &table, "mass", "x", &[true], &[], &small_options()),
            Err(VisualizationError::MaskLength { .. })
        ));
        assert!(matches!(
            plot_feature_scatter(&path, &FeatureTable::new(), "mass", "x", &[], &[], &small_options()),
            Err(VisualizationError::EmptyTable)
        ));

        // Backend write failures surface as plotting errors
        let unwritable = dir.path().join("missing").join("scatter.png");
        assert!(matches!(
            plot_feature_scatter(&unwritable, &table, "mass", "x", &included, &[], &small_options()),
            Err(VisualizationError::PlottingError(_))
        ));
    }

    #[test]
    fn test_plot_trajectories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tracks.png");
        let table = create_test_table();
        let link = LinkScore::new(1, (2, 12.0, 1.0), (3, 30.0, 1.0), 10.0, 10);

        plot_trajectories(&path, &table, &[link], &small_options()).unwrap();
        assert!(path.exists());
    }
}
