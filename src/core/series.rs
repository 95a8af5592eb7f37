//! Time-indexed tables for the auxiliary instruments and the cell parsers
//! shared by every reader.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime};
use thiserror::Error;

/// Errors raised by the CTD, Arduino and LI-COR readers.
#[derive(Error, Debug)]
pub enum InstrumentError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error in {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("unrecognised instrument log {}: first line '{first_line}'", .path.display())]
    UnknownFormat { path: PathBuf, first_line: String },

    #[error("invalid header in {}: {reason}", .path.display())]
    Header { path: PathBuf, reason: String },

    #[error("no data rows in {}", .path.display())]
    NoData { path: PathBuf },
}

impl InstrumentError {
    pub(crate) fn header(path: &Path, reason: impl Into<String>) -> Self {
        InstrumentError::Header {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub(crate) fn csv(path: &Path, source: csv::Error) -> Self {
        InstrumentError::Csv {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Timestamp layouts accepted by [`parse_timestamp`], tried in order.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parse a logger timestamp into a naive (wall clock) date-time.
///
/// Accepts RFC 3339 with an offset or `Z`, in which case the offset is
/// discarded and the local wall clock time is kept, and the plain ISO-8601
/// variants in [`TIMESTAMP_FORMATS`].
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim().trim_matches('"');
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }

    let s = s.trim_end_matches('Z');
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

/// Coerce a raw cell to a number.
///
/// Loggers decorate values with labels and units (`R=1234.5Ohm`, `-1.2C`);
/// everything before the first sign, digit or dot and everything after the
/// last digit or dot is ignored. Returns `None` for anything that still does
/// not parse or is not finite.
pub fn coerce_numeric(raw: &str) -> Option<f64> {
    let start = raw.find(|c: char| c.is_ascii_digit() || matches!(c, '-' | '+' | '.'))?;
    let body = raw[start..].trim_end_matches(|c: char| !(c.is_ascii_digit() || c == '.'));
    body.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// One named variable of an [`InstrumentTable`].
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub unit: Option<String>,
    pub values: Vec<Option<f64>>,
}

/// Uniform representation of an instrument log: a time index plus named
/// columns of optional values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstrumentTable {
    /// Time index, one entry per row.
    pub time: Vec<NaiveDateTime>,
    /// Data columns, each as long as `time`.
    pub columns: Vec<Column>,
    /// Source file path.
    pub source: Option<PathBuf>,
}

impl InstrumentTable {
    /// Creates an empty table over the given time index.
    pub fn new(time: Vec<NaiveDateTime>) -> Self {
        Self {
            time,
            columns: Vec::new(),
            source: None,
        }
    }

    /// Number of rows.
    #[inline]
    pub fn len(&self) -> usize {
        self.time.len()
    }

    /// Returns true if the table has no rows.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Appends a column. `values` must have one entry per row.
    pub fn push_column(&mut self, name: impl Into<String>, unit: Option<String>, values: Vec<Option<f64>>) {
        debug_assert_eq!(values.len(), self.time.len(), "column length must match time index");
        self.columns.push(Column {
            name: name.into(),
            unit,
            values,
        });
    }

    /// Looks up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Column names in table order.
    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Units keyed by column name, for columns that have one.
    pub fn units(&self) -> HashMap<&str, &str> {
        self.columns
            .iter()
            .filter_map(|c| c.unit.as_deref().map(|u| (c.name.as_str(), u)))
            .collect()
    }

    /// Renames columns according to `(from, to)` pairs; unknown names are ignored.
    pub fn rename(&mut self, mapping: &[(&str, &str)]) {
        for column in &mut self.columns {
            if let Some((_, to)) = mapping.iter().find(|(from, _)| *from == column.name) {
                column.name = (*to).to_string();
            }
        }
    }

    /// Removes every column whose name matches `predicate`.
    pub fn drop_columns<F: Fn(&str) -> bool>(&mut self, predicate: F) {
        self.columns.retain(|c| !predicate(&c.name));
    }

    /// Sorts columns alphabetically by name.
    pub fn sort_columns(&mut self) {
        self.columns.sort_by(|a, b| a.name.cmp(&b.name));
    }

    /// Replaces values equal to a firmware missing-value flag with `None`.
    pub fn mask_flag(&mut self, flag: f64) {
        let tolerance = flag.abs() * 1e-6;
        for column in &mut self.columns {
            for value in column.values.iter_mut() {
                if matches!(value, Some(v) if (*v - flag).abs() <= tolerance) {
                    *value = None;
                }
            }
        }
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

    #[test]
    fn test_parse_timestamp_variants() {
        assert_eq!(parse_timestamp("2019-01-24T12:00:05"), Some(ts(12, 0, 5)));
        assert_eq!(parse_timestamp("2019-01-24 12:00:05"), Some(ts(12, 0, 5)));
        assert_eq!(parse_timestamp("2019/01/24 12:00:05"), Some(ts(12, 0, 5)));
        assert_eq!(parse_timestamp("2019-01-24T12:00:05Z"), Some(ts(12, 0, 5)));
        assert_eq!(parse_timestamp("\"2019-01-24 12:00:05\""), Some(ts(12, 0, 5)));
        assert_eq!(parse_timestamp("2019-01-24T12:00"), Some(ts(12, 0, 0)));
    }

    #[test]
    fn test_parse_timestamp_keeps_wall_clock() {
        assert_eq!(
            parse_timestamp("2019-01-24T12:00:05+02:00"),
            Some(ts(12, 0, 5))
        );
    }

    #[test]
    fn test_parse_timestamp_fractional_seconds() {
        let parsed = parse_timestamp("2019-01-24T12:00:05.250").unwrap();
        assert_eq!(parsed, ts(12, 0, 5) + chrono::Duration::milliseconds(250));
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp("2019-13-45T12:00:00"), None);
    }

    #[test]
    fn test_coerce_numeric() {
        assert_eq!(coerce_numeric("1234.5"), Some(1234.5));
        assert_eq!(coerce_numeric("R=1234.5Ohm"), Some(1234.5));
        assert_eq!(coerce_numeric("-1.25C"), Some(-1.25));
        assert_eq!(coerce_numeric("1.5e-3"), Some(1.5e-3));
        assert_eq!(coerce_numeric("nan"), None);
        assert_eq!(coerce_numeric("NaN"), None);
        assert_eq!(coerce_numeric("-"), None);
        assert_eq!(coerce_numeric(""), None);
    }

    #[test]
    fn test_table_column_operations() {
        let mut table = InstrumentTable::new(vec![ts(0, 0, 0), ts(0, 0, 10)]);
        table.push_column("Temp", Some("°C".to_string()), vec![Some(1.0), Some(-1000.0)]);
        table.push_column("Cond", None, vec![None, Some(2.0)]);
        table.push_column("millis", None, vec![Some(1.0), Some(2.0)]);

        table.rename(&[("Temp", "Temperature"), ("Cond", "Conductivity")]);
        table.drop_columns(|name| name == "millis");
        table.sort_columns();
        table.mask_flag(-1000.0);

        assert_eq!(table.names(), vec!["Conductivity", "Temperature"]);
        assert_eq!(table.column("Temperature").unwrap().values, vec![Some(1.0), None]);
        assert_eq!(table.units().get("Temperature"), Some(&"°C"));
        assert_eq!(table.len(), 2);
    }
}
