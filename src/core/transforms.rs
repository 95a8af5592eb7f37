//! Reshaping and resampling of time-indexed data.
//!
//! Turns the flat channel namespace of a [`RawChannelTable`] into one
//! `(time x segment)` grid per sensor for a single module, and back. Also
//! holds the regular-grid resampling and gap interpolation used by the
//! Arduino reader.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime};

use super::loaders::{ChannelKey, RawChannelTable, Sensor};

/// Dense `time x segment` matrix of optional values, stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    rows: usize,
    cols: usize,
    data: Vec<Option<f64>>,
}

impl Grid {
    /// Creates a grid with every cell missing.
    pub fn missing(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![None; rows * cols],
        }
    }

    /// Builds a grid from per-segment columns of equal length.
    pub fn from_columns(rows: usize, columns: &[&[Option<f64>]]) -> Self {
        let mut grid = Self::missing(rows, columns.len());
        for (s, column) in columns.iter().enumerate() {
            debug_assert_eq!(column.len(), rows, "column length must match row count");
            for (t, value) in column.iter().enumerate() {
                grid.set(t, s, *value);
            }
        }
        grid
    }

    /// Number of time steps.
    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of segments.
    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn get(&self, t: usize, s: usize) -> Option<f64> {
        self.data[t * self.cols + s]
    }

    #[inline]
    pub fn set(&mut self, t: usize, s: usize, value: Option<f64>) {
        self.data[t * self.cols + s] = value;
    }

    /// Copy of the series of one segment.
    pub fn column(&self, s: usize) -> Vec<Option<f64>> {
        (0..self.rows).map(|t| self.get(t, s)).collect()
    }

    /// True if segment `s` has no value at any time step.
    pub fn column_is_missing(&self, s: usize) -> bool {
        (0..self.rows).all(|t| self.get(t, s).is_none())
    }

    /// Marks every cell of segment `s` as missing.
    pub fn clear_column(&mut self, s: usize) {
        for t in 0..self.rows {
            self.set(t, s, None);
        }
    }

    /// Iterates over all present values.
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.data.iter().flatten().copied()
    }
}

/// One module's channels laid out as a grid per sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleFrame {
    pub module: usize,
    pub time: Vec<NaiveDateTime>,
    pub segments: Vec<usize>,
    pub channels: BTreeMap<Sensor, Grid>,
}

impl ModuleFrame {
    /// Grid of one sensor.
    pub fn grid(&self, sensor: Sensor) -> Option<&Grid> {
        self.channels.get(&sensor)
    }
}

/// Reshape the channels of `module` into a [`ModuleFrame`].
///
/// Returns `None` if the module is not part of the table's layout.
pub fn reshape(table: &RawChannelTable, module: usize) -> Option<ModuleFrame> {
    if !table.has_module(module) {
        return None;
    }

    let rows = table.len();
    let segments: Vec<usize> = (0..table.segments_per_module()).collect();

    let mut channels = BTreeMap::new();
    for sensor in Sensor::ALL {
        let columns: Vec<&[Option<f64>]> = segments
            .iter()
            .map(|&segment| table.column(&ChannelKey::new(module, segment, sensor)))
            .collect::<Option<_>>()?;
        channels.insert(sensor, Grid::from_columns(rows, &columns));
    }

    Some(ModuleFrame {
        module,
        time: table.time().to_vec(),
        segments,
        channels,
    })
}

/// Inverse of [`reshape`]: flat columns keyed by channel.
pub fn flatten(frame: &ModuleFrame) -> BTreeMap<ChannelKey, Vec<Option<f64>>> {
    frame
        .channels
        .iter()
        .flat_map(|(&sensor, grid)| {
            frame.segments.iter().enumerate().map(move |(s, &segment)| {
                (ChannelKey::new(frame.module, segment, sensor), grid.column(s))
            })
        })
        .collect()
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Resample columns onto a regular grid of `step_secs` seconds.
///
/// Bins start at multiples of the step since the Unix epoch; each output
/// value is the median of the present values falling in its bin, `None` for
/// bins without any. `time` must be ascending. A zero step returns the input
/// unchanged.
pub fn resample_median(
    time: &[NaiveDateTime],
    columns: &[Vec<Option<f64>>],
    step_secs: u64,
) -> (Vec<NaiveDateTime>, Vec<Vec<Option<f64>>>) {
    if step_secs == 0 || time.is_empty() {
        return (time.to_vec(), columns.to_vec());
    }
    let step = step_secs as i64;
    let bin_of = |t: &NaiveDateTime| t.and_utc().timestamp().div_euclid(step);

    let first = bin_of(&time[0]);
    let last = bin_of(&time[time.len() - 1]);
    let bins = (last - first + 1) as usize;

    let grid: Vec<NaiveDateTime> = (first..=last)
        .filter_map(|b| DateTime::from_timestamp(b * step, 0).map(|dt| dt.naive_utc()))
        .collect();

    let resampled = columns
        .iter()
        .map(|column| {
            let mut buckets: Vec<Vec<f64>> = vec![Vec::new(); bins];
            for (t, value) in time.iter().zip(column) {
                if let Some(v) = value {
                    buckets[(bin_of(t) - first) as usize].push(*v);
                }
            }
            buckets.iter_mut().map(|bucket| median(bucket)).collect()
        })
        .collect();

    (grid, resampled)
}

/// Fill interior gaps by linear interpolation in time.
///
/// Leading and trailing gaps are left missing.
pub fn interpolate_linear(time: &[NaiveDateTime], values: &mut [Option<f64>]) {
    let mut previous: Option<usize> = None;
    for i in 0..values.len() {
        let Some(v1) = values[i] else { continue };
        if let Some(p) = previous {
            if i > p + 1 {
                let v0 = values[p].unwrap_or(v1);
                let t0 = time[p];
                let span = (time[i] - t0).num_milliseconds() as f64;
                for j in p + 1..i {
                    let frac = if span > 0.0 {
                        (time[j] - t0).num_milliseconds() as f64 / span
                    } else {
                        0.0
                    };
                    values[j] = Some(v0 + (v1 - v0) * frac);
                }
            }
        }
        previous = Some(i);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2019, 1, 24)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn sample_table() -> RawChannelTable {
        let time = vec![ts(12, 0, 0), ts(12, 1, 0), ts(12, 2, 0)];
        let mut columns = Vec::new();
        for module in 0..2 {
            for segment in 0..3 {
                for sensor in Sensor::ALL {
                    let base = (module * 100 + segment * 10 + sensor as usize) as f64;
                    let values = if module == 1 && segment == 2 && sensor == Sensor::R16 {
                        vec![None, Some(base), None]
                    } else {
                        vec![Some(base), Some(base + 0.5), Some(base + 1.0)]
                    };
                    columns.push((ChannelKey::new(module, segment, sensor), values));
                }
            }
        }
        RawChannelTable::from_columns(time, columns, 2, 3).unwrap()
    }

    #[test]
    fn test_reshape_grid_layout() {
        let table = sample_table();
        let frame = reshape(&table, 1).unwrap();

        assert_eq!(frame.module, 1);
        assert_eq!(frame.segments, vec![0, 1, 2]);
        assert_eq!(frame.time.len(), 3);

        let r16 = frame.grid(Sensor::R16).unwrap();
        assert_eq!(r16.rows(), 3);
        assert_eq!(r16.cols(), 3);
        assert_eq!(r16.get(0, 1), Some(112.0));
        assert_eq!(r16.column(2), vec![None, Some(122.0), None]);
    }

    #[test]
    fn test_reshape_unknown_module() {
        let table = sample_table();
        assert!(reshape(&table, 2).is_none());
    }

    #[test]
    fn test_reshape_flatten_round_trip() {
        let table = sample_table();
        for module in 0..2 {
            let frame = reshape(&table, module).unwrap();
            let flat = flatten(&frame);
            assert_eq!(flat.len(), 3 * Sensor::ALL.len());
            for (key, values) in &flat {
                assert_eq!(key.module, module);
                assert_eq!(Some(values.as_slice()), table.column(key));
            }
        }
    }

    #[test]
    fn test_grid_column_helpers() {
        let mut grid = Grid::from_columns(2, &[&[Some(1.0), None], &[None, None]]);
        assert!(!grid.column_is_missing(0));
        assert!(grid.column_is_missing(1));
        grid.clear_column(0);
        assert!(grid.column_is_missing(0));
        assert_eq!(grid.values().count(), 0);
    }

    #[test]
    fn test_resample_median_bins() {
        let time = vec![ts(0, 0, 1), ts(0, 0, 4), ts(0, 0, 8), ts(0, 0, 31)];
        let columns = vec![vec![Some(1.0), Some(5.0), Some(3.0), Some(7.0)]];

        let (grid, resampled) = resample_median(&time, &columns, 10);

        assert_eq!(grid, vec![ts(0, 0, 0), ts(0, 0, 10), ts(0, 0, 20), ts(0, 0, 30)]);
        assert_eq!(resampled[0], vec![Some(3.0), None, None, Some(7.0)]);
    }

    #[test]
    fn test_resample_median_even_count() {
        let time = vec![ts(0, 0, 0), ts(0, 0, 5)];
        let columns = vec![vec![Some(2.0), Some(4.0)], vec![None, None]];

        let (grid, resampled) = resample_median(&time, &columns, 10);

        assert_eq!(grid.len(), 1);
        assert_eq!(resampled[0], vec![Some(3.0)]);
        assert_eq!(resampled[1], vec![None]);
    }

    #[test]
    fn test_interpolate_linear_interior_only() {
        let time = vec![ts(0, 0, 0), ts(0, 0, 10), ts(0, 0, 20), ts(0, 0, 40), ts(0, 0, 50)];
        let mut values = vec![None, Some(0.0), None, Some(3.0), None];

        interpolate_linear(&time, &mut values);

        assert_eq!(values[0], None);
        assert!((values[2].unwrap() - 1.0).abs() < 1e-12);
        assert_eq!(values[4], None);
    }
}
