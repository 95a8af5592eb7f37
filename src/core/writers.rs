//! CSV writers for harp datasets and instrument tables.
//!
//! Missing values are written as empty cells and timestamps as ISO-8601
//! without offset.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::NaiveDateTime;
use thiserror::Error;

use super::loaders::RawChannelTable;
use super::series::InstrumentTable;
use crate::processors::harp_model::{HarpDataset, Variable};

/// Timestamp layout of every CSV export.
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

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

    /// Failed to write data to file.
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

/// Opens a buffered CSV writer, creating parent directories first.
fn create_csv_writer(path: &Path) -> Result<csv::Writer<BufWriter<File>>> {
    ensure_parent_dirs(path)?;
    let file = File::create(path).map_err(|e| WriteError::CreateFile {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(csv::Writer::from_writer(BufWriter::new(file)))
}

fn write_rows<W, I, R>(writer: &mut csv::Writer<W>, path: &Path, rows: I) -> Result<()>
where
    W: Write,
    I: IntoIterator<Item = R>,
    R: IntoIterator,
    R::Item: AsRef<[u8]>,
{
    for row in rows {
        writer.write_record(row).map_err(|e| WriteError::CsvError {
            path: path.display().to_string(),
            source: e,
        })?;
    }
    writer.flush().map_err(|e| WriteError::WriteFile {
        path: path.display().to_string(),
        source: e,
    })
}

#[inline]
fn format_time(time: &NaiveDateTime) -> String {
    time.format(TIME_FORMAT).to_string()
}

#[inline]
fn format_value(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Write a harp dataset in long format.
///
/// One row per `(time, segment)`:
/// `time,module,segment,resistance,conductivity,temperature,brine_salinity,
/// bulk_salinity,liquid_fraction,solid_fraction`.
///
/// # Errors
///
/// Returns an error if parent directories or the file cannot be created, or
/// a row cannot be written.
pub fn write_dataset_csv(path: &Path, dataset: &HarpDataset) -> Result<()> {
    let mut writer = create_csv_writer(path)?;

    let header = ["time", "module", "segment"]
        .into_iter()
        .map(str::to_string)
        .chain(Variable::ALL.iter().map(|v| v.name().to_string()))
        .collect::<Vec<_>>();

    let module = dataset.module().to_string();
    let rows = dataset.time().iter().enumerate().flat_map(|(t, time)| {
        let time = format_time(time);
        let module = module.clone();
        dataset.segments().iter().enumerate().map(move |(s, segment)| {
            let mut row = vec![time.clone(), module.clone(), segment.to_string()];
            row.extend(Variable::ALL.iter().map(|&v| format_value(dataset.get(v, t, s))));
            row
        })
    });

    write_rows(&mut writer, path, std::iter::once(header).chain(rows))
}

/// Write an instrument table: `time` followed by every column.
pub fn write_table_csv(path: &Path, table: &InstrumentTable) -> Result<()> {
    let mut writer = create_csv_writer(path)?;

    let header: Vec<String> = std::iter::once("time".to_string())
        .chain(table.columns.iter().map(|c| c.name.clone()))
        .collect();

    let rows = table.time.iter().enumerate().map(|(i, time)| {
        std::iter::once(format_time(time))
            .chain(table.columns.iter().map(|c| format_value(c.values[i])))
            .collect::<Vec<_>>()
    });

    write_rows(&mut writer, path, std::iter::once(header).chain(rows))
}

/// Write a raw harp table: `time` followed by every channel name.
pub fn write_raw_table_csv(path: &Path, table: &RawChannelTable) -> Result<()> {
    let mut writer = create_csv_writer(path)?;

    let header: Vec<String> = std::iter::once("time".to_string())
        .chain(table.columns().map(|(key, _)| key.to_string()))
        .collect();

    let rows = table.time().iter().enumerate().map(|(i, time)| {
        std::iter::once(format_time(time))
            .chain(table.columns().map(|(_, values)| format_value(values[i])))
            .collect::<Vec<_>>()
    });

    write_rows(&mut writer, path, std::iter::once(header).chain(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::loaders::{parse, ChannelKey, Sensor};
    use crate::processors::harp_model::build_dataset;
    use crate::processors::salinity::DerivationMethod;
    use chrono::NaiveDate;
    use std::fs;
    use tempfile::tempdir;

    fn ts(s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2019, 1, 24)
            .unwrap()
            .and_hms_opt(12, 0, s)
            .unwrap()
    }

    fn create_test_table() -> RawChannelTable {
        RawChannelTable::from_columns(
            vec![ts(0), ts(10)],
            vec![
                (ChannelKey::new(0, 0, Sensor::R16), vec![Some(0.5), Some(0.5)]),
                (ChannelKey::new(0, 0, Sensor::Temperature), vec![Some(-5.0), None]),
                (ChannelKey::new(0, 1, Sensor::R16), vec![Some(0.5), Some(0.5)]),
                (ChannelKey::new(0, 1, Sensor::Temperature), vec![Some(-4.0), Some(-4.5)]),
            ],
            1,
            2,
        )
        .unwrap()
    }

    #[test]
    fn test_write_dataset_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("harp_module_0.csv");
        let dataset = build_dataset(&create_test_table(), 0, DerivationMethod::Vancoppenolle).unwrap();

        write_dataset_csv(&path, &dataset).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();

        assert_eq!(
            lines[0],
            "time,module,segment,resistance,conductivity,temperature,brine_salinity,bulk_salinity,liquid_fraction,solid_fraction"
        );
        assert_eq!(lines.len(), 1 + 2 * 2);
        assert!(lines[1].starts_with("2019-01-24T12:00:00,0,0,0.5,2,-5,"));
        // Missing temperature leaves every derived cell empty.
        assert_eq!(lines[3], "2019-01-24T12:00:10,0,0,0.5,,,,,,");
    }

    #[test]
    fn test_write_raw_table_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("raw.csv");
        let table = create_test_table();

        write_raw_table_csv(&path, &table).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert!(lines[0].starts_with("time,m0s0_r2,m0s0_d2,m0s0_r16,"));
        assert_eq!(lines[0].split(',').count(), 1 + 2 * 6);
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_write_raw_table_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("raw.csv");
        let table = create_test_table();

        write_raw_table_csv(&path, &table).unwrap();
        let reread = parse(&path, 1, 2).unwrap();

        assert_eq!(reread.time(), table.time());
        for (key, values) in table.columns() {
            assert_eq!(reread.column(key), Some(values));
        }
    }

    #[test]
    fn test_write_table_csv_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("subdir").join("nested").join("ctd.csv");
        let mut table = InstrumentTable::new(vec![ts(0), ts(10)]);
        table.push_column("Temperature", None, vec![Some(-1.5), None]);

        write_table_csv(&path, &table).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "time,Temperature\n2019-01-24T12:00:00,-1.5\n2019-01-24T12:00:10,\n"
        );
    }
}
