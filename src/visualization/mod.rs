//! Time series plots of harp variables.
//!
//! Plots are rendered without text: the bitmap backend is built without a
//! font stack, so axes carry no tick labels and titles are not drawn.

use std::path::Path;

use plotters::prelude::*;
use plotters_bitmap::BitMapBackend;
use thiserror::Error;

use crate::processors::harp_model::{HarpDataset, Variable};

/// Errors that can occur during visualization.
#[derive(Error, Debug)]
pub enum VisualizationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Plotting error: {0}")]
    PlottingError(String),

    #[error("no data to plot for {0}")]
    NoData(Variable),
}

/// Result type for visualization operations.
pub type Result<T> = std::result::Result<T, VisualizationError>;

/// Default plot width in pixels.
const DEFAULT_WIDTH: u32 = 1920;

/// Default plot height in pixels.
const DEFAULT_HEIGHT: u32 = 1080;

/// Line colours, cycled by segment.
const SEGMENT_COLORS: &[(u8, u8, u8)] = &[
    (228, 26, 28),   // Red
    (55, 126, 184),  // Blue
    (77, 175, 74),   // Green
    (152, 78, 163),  // Purple
    (255, 127, 0),   // Orange
    (166, 86, 40),   // Brown
    (247, 129, 191), // Pink
    (153, 153, 153), // Gray
    (0, 206, 209),   // Turquoise
    (138, 43, 226),  // Blue Violet
    (50, 205, 50),   // Lime Green
    (255, 20, 147),  // Deep Pink
    (0, 191, 255),   // Deep Sky Blue
    (255, 215, 0),   // Gold
];

/// Splits a series into runs of consecutive present values.
fn present_runs(x: &[f64], values: &[Option<f64>]) -> Vec<Vec<(f64, f64)>> {
    let mut runs = Vec::new();
    let mut current = Vec::new();
    for (&xi, value) in x.iter().zip(values) {
        match value {
            Some(v) => current.push((xi, *v)),
            None if !current.is_empty() => runs.push(std::mem::take(&mut current)),
            None => {}
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }
    runs
}

/// Compute `(min, max)` of a set of values, widened when degenerate.
fn compute_bounds(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let (min, max) = values.fold(None, |acc: Option<(f64, f64)>, v| match acc {
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        None => Some((v, v)),
    })?;
    if (max - min).abs() < f64::EPSILON {
        Some((min - 1.0, max + 1.0))
    } else {
        Some((min, max))
    }
}

/// Plot one variable of a harp dataset, one line per segment, and save as PNG.
///
/// The x axis is hours since the first sample. Gaps in a segment's series
/// break its line.
///
/// # Arguments
///
/// * `output_path` - Path to save the PNG image
/// * `dataset` - Dataset holding the variable
/// * `variable` - Variable to plot
/// * `_title` - Title for the plot (not drawn, see module docs)
///
/// # Errors
///
/// [`VisualizationError::NoData`] if the variable has no present value.
pub fn plot_variable(
    output_path: &Path,
    dataset: &HarpDataset,
    variable: Variable,
    _title: &str,
) -> Result<()> {
    let grid = dataset.variable(variable);
    let (y_min, y_max) = compute_bounds(grid.values()).ok_or(VisualizationError::NoData(variable))?;

    let t0 = dataset.time()[0];
    let hours: Vec<f64> = dataset
        .time()
        .iter()
        .map(|t| (*t - t0).num_milliseconds() as f64 / 3_600_000.0)
        .collect();
    let x_max = hours.last().copied().unwrap_or(0.0).max(1.0 / 60.0);

    let y_padding = (y_max - y_min) * 0.05;

    let root = BitMapBackend::new(output_path, (DEFAULT_WIDTH, DEFAULT_HEIGHT)).into_drawing_area();

    root.fill(&WHITE).map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .build_cartesian_2d(0.0..x_max, (y_min - y_padding)..(y_max + y_padding))
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .disable_y_mesh()
        .x_labels(0)
        .y_labels(0)
        .draw()
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    for s in 0..dataset.segments().len() {
        let (r, g, b) = SEGMENT_COLORS[s % SEGMENT_COLORS.len()];
        let color = RGBColor(r, g, b);
        for run in present_runs(&hours, &grid.column(s)) {
            chart
                .draw_series(LineSeries::new(run, color.stroke_width(2)))
                .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;
        }
    }

    root.present().map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::loaders::{ChannelKey, RawChannelTable, Sensor};
    use crate::core::series::parse_timestamp;
    use crate::processors::harp_model::build_dataset;
    use crate::processors::salinity::DerivationMethod;
    use tempfile::tempdir;

    #[test]
    fn test_present_runs_split_on_gaps() {
        let x = [0.0, 1.0, 2.0, 3.0, 4.0];
        let values = [Some(1.0), None, Some(2.0), Some(3.0), None];

        let runs = present_runs(&x, &values);

        assert_eq!(runs, vec![vec![(0.0, 1.0)], vec![(2.0, 2.0), (3.0, 3.0)]]);
    }

    #[test]
    fn test_compute_bounds() {
        assert_eq!(compute_bounds([1.0, -2.0, 3.0].into_iter()), Some((-2.0, 3.0)));
        assert_eq!(compute_bounds([5.0].into_iter()), Some((4.0, 6.0)));
        assert_eq!(compute_bounds(std::iter::empty()), None);
    }

    #[test]
    fn test_plot_without_data() {
        let t0 = parse_timestamp("2019-01-24T12:00:00").unwrap();
        let table = RawChannelTable::from_columns(
            vec![t0],
            vec![
                (ChannelKey::new(0, 0, Sensor::R16), vec![Some(0.5)]),
                (ChannelKey::new(0, 0, Sensor::Temperature), vec![Some(5.0)]),
            ],
            1,
            1,
        )
        .unwrap();
        // Above freezing: no brine salinity anywhere.
        let dataset = build_dataset(&table, 0, DerivationMethod::Assur).unwrap();
        let dir = tempdir().unwrap();

        let result = plot_variable(
            &dir.path().join("brine.png"),
            &dataset,
            Variable::BrineSalinity,
            "brine salinity",
        );

        assert!(matches!(result, Err(VisualizationError::NoData(Variable::BrineSalinity))));
        assert!(!dir.path().join("brine.png").exists());
    }
}
