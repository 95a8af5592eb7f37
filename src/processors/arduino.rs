//! Reader for the Arduino multi-sensor logger.
//!
//! The logger writes a CSV file with a commented header line
//! (`# timestamp,millis,CO2_value,...`) and ISO-8601 UTC timestamps. Boot
//! messages and partial lines are interleaved with the data and are skipped.

use std::collections::HashSet;
use std::fs;
use std::io::Cursor;
use std::path::Path;

use csv::{ReaderBuilder, Trim};
use log::{debug, info, warn};
use regex::Regex;

use crate::config::ArduinoConfig;
use crate::core::series::{coerce_numeric, parse_timestamp, InstrumentError, InstrumentTable};
use crate::core::transforms::{interpolate_linear, resample_median};

/// Result type for Arduino reading.
pub type Result<T> = std::result::Result<T, InstrumentError>;

/// Column names used by older firmware versions.
const LEGACY_NAMES: &[(&str, &str)] = &[
    ("CO2_value", "pCO2_air"),
    ("pH_value_1", "pH_china"),
    ("pH_value_2", "pH_GMH"),
    ("pH_value", "pH"),
    ("T_value", "T_air"),
    ("CO2_state", "CO2_flag"),
];

const UNITS: &[(&str, &str)] = &[
    ("CO2_air", "ppm"),
    ("Temp (GMH 3700)", "°C"),
    ("Temp (BME280)", "°C"),
    ("RelHumidity (BME280)", "%"),
    ("Pressure (BME280)", "hPa"),
];

/// Read an Arduino log and put it on a regular time grid.
///
/// # Arguments
///
/// * `path` - Path to the CSV log
/// * `config` - Separator, resampling step and interpolation switch
///
/// # Errors
///
/// [`InstrumentError::Header`] if no header line is found before the first
/// empty line or the header has no `timestamp` column,
/// [`InstrumentError::NoData`] if no row carries a valid timestamp.
pub fn read_arduino<P: AsRef<Path>>(path: P, config: &ArduinoConfig) -> Result<InstrumentTable> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    let sep = config.separator;

    let header_re = Regex::new(&format!(r"^# [a-z]+{}", regex::escape(&sep.to_string())))
        .expect("escaped separator forms a valid regex");
    let stamp_re = Regex::new(r"\d{4}-\d\d-\d\dT\d\d:\d\d:\d\dZ").expect("static regex");

    let mut lines = content.lines();
    let mut names: Option<Vec<String>> = None;
    for line in lines.by_ref() {
        let line = line.trim();
        if header_re.is_match(line) {
            names = Some(
                line.trim_start_matches(|c| c == '#' || c == ' ')
                    .split(sep)
                    .map(|n| n.trim().to_string())
                    .collect(),
            );
            break;
        }
        if line.is_empty() {
            break;
        }
    }
    let names = names.ok_or_else(|| InstrumentError::header(path, "no header found"))?;
    let stamp_idx = names
        .iter()
        .position(|n| n == "timestamp")
        .ok_or_else(|| InstrumentError::header(path, "header has no 'timestamp' column"))?;

    let body: String = lines.collect::<Vec<_>>().join("\n");
    let delimiter = u8::try_from(sep)
        .map_err(|_| InstrumentError::header(path, format!("separator '{}' is not ASCII", sep)))?;
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .comment(Some(b'#'))
        .trim(Trim::All)
        .from_reader(Cursor::new(body));

    let mut seen = HashSet::new();
    let mut rows: Vec<(chrono::NaiveDateTime, Vec<Option<f64>>)> = Vec::new();
    let mut skipped = 0usize;
    for record in reader.records() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                debug!("{}: unreadable row skipped: {}", path.display(), e);
                skipped += 1;
                continue;
            }
        };
        if record.len() > names.len() {
            skipped += 1;
            continue;
        }
        let Some(raw) = record.get(stamp_idx).filter(|s| stamp_re.is_match(s)) else {
            skipped += 1;
            continue;
        };
        let Some(time) = parse_timestamp(raw) else {
            skipped += 1;
            continue;
        };
        if !seen.insert(time) {
            debug!("{}: duplicate timestamp {} dropped", path.display(), time);
            continue;
        }
        let values = (0..names.len())
            .map(|i| record.get(i).and_then(coerce_numeric))
            .collect();
        rows.push((time, values));
    }
    if skipped > 0 {
        warn!("{}: skipped {} malformed rows", path.display(), skipped);
    }
    if rows.is_empty() {
        return Err(InstrumentError::NoData {
            path: path.to_path_buf(),
        });
    }

    rows.sort_by_key(|(time, _)| *time);
    let time: Vec<_> = rows.iter().map(|(t, _)| *t).collect();
    let kept: Vec<usize> = (0..names.len())
        .filter(|&i| i != stamp_idx && names[i] != "millis")
        .collect();
    let values: Vec<Vec<Option<f64>>> = kept
        .iter()
        .map(|&i| rows.iter().map(|(_, values)| values[i]).collect())
        .collect();

    let (time, mut values) = resample_median(&time, &values, config.resample_secs);
    if config.interpolate {
        for column in values.iter_mut() {
            interpolate_linear(&time, column);
        }
    }

    let mut table = InstrumentTable::new(time);
    for (&i, column) in kept.iter().zip(values) {
        let unit = UNITS
            .iter()
            .find(|(name, _)| *name == names[i])
            .map(|(_, unit)| unit.to_string());
        table.push_column(names[i].clone(), unit, column);
    }
    table.rename(LEGACY_NAMES);
    table.source = Some(path.to_path_buf());

    if let (Some(first), Some(last)) = (table.time.first(), table.time.last()) {
        info!(
            "Read Arduino log {}: {} rows from {} to {}",
            path.display(),
            table.len(),
            first,
            last
        );
    }

    Ok(table)
}
