//! Loader for salinity harp log files.
//!
//! Two text layouts are understood:
//!
//! - **Interleaved**, as written by the harp logger: one line per segment
//!   reading,
//!   `i:k: <time> r2 d2 r16 d16 temperature logger_temp`,
//!   where `i` is the module and `k` the segment (both 0-based). The logger
//!   cycles through modules and segments in ascending order; a new sample
//!   block starts whenever the channel id does not increase. The block takes
//!   the time of its first line.
//! - **Wide**: a header `time` followed by every channel name in
//!   [`ChannelKey`] order (`m0s0_r2 m0s0_d2 ... m0s1_r2 ...`), then one row per
//!   sample interval. Comma separated if the header contains a comma,
//!   otherwise whitespace separated.
//!
//! Empty lines and lines starting with `#` are skipped in both layouts.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::NaiveDateTime;
use log::{debug, info, warn};
use regex::Regex;
use thiserror::Error;

use crate::config::{ConfigError, HarpConfig};
use crate::core::series::{coerce_numeric, parse_timestamp};

/// Errors that can occur while reading a harp log.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// File structure is inconsistent with the declared channel layout.
    #[error("format error in {}{}: {reason}", .path.display(), line_suffix(.line))]
    Format {
        path: PathBuf,
        line: Option<usize>,
        reason: String,
    },

    /// A timestamp could not be parsed.
    #[error("parse error in {} line {line}: {reason}", .path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

fn line_suffix(line: &Option<usize>) -> String {
    line.map(|l| format!(" line {}", l)).unwrap_or_default()
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Path reported for tables built in memory.
const IN_MEMORY: &str = "<in-memory>";

/// Number of values following the timestamp on an interleaved line.
const VALUES_PER_LINE: usize = Sensor::ALL.len();

/// Per-segment channels recorded by the harp logger, in logger order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Sensor {
    /// Resistance at 2 kHz [Ohm]
    R2,
    /// Debugging value of the 2 kHz measurement
    D2,
    /// Resistance at 16 kHz [Ohm]
    R16,
    /// Debugging value of the 16 kHz measurement
    D16,
    /// Temperature at the segment [°C]
    Temperature,
    /// Temperature of the controller [°C]
    LoggerTemp,
}

impl Sensor {
    /// All sensors in logger order.
    pub const ALL: [Sensor; 6] = [
        Sensor::R2,
        Sensor::D2,
        Sensor::R16,
        Sensor::D16,
        Sensor::Temperature,
        Sensor::LoggerTemp,
    ];

    /// Name used in column names and configuration.
    pub fn name(self) -> &'static str {
        match self {
            Sensor::R2 => "r2",
            Sensor::D2 => "d2",
            Sensor::R16 => "r16",
            Sensor::D16 => "d16",
            Sensor::Temperature => "temperature",
            Sensor::LoggerTemp => "logger_temp",
        }
    }

    /// Physical unit of the channel.
    pub fn unit(self) -> &'static str {
        match self {
            Sensor::R2 | Sensor::R16 => "Ohm",
            Sensor::D2 | Sensor::D16 => "1",
            Sensor::Temperature | Sensor::LoggerTemp => "°C",
        }
    }

    /// True for the channels that carry a wire-pair resistance.
    pub fn is_resistance(self) -> bool {
        matches!(self, Sensor::R2 | Sensor::R16)
    }

    #[inline]
    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Sensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Sensor {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Sensor::ALL
            .into_iter()
            .find(|sensor| sensor.name() == wanted)
            .ok_or_else(|| ConfigError::UnknownChannel(s.to_string()))
    }
}

/// Identifies one flat column: `(module, segment, sensor)`.
///
/// Rendered as `m{module}s{segment}_{sensor}`, e.g. `m0s1_r16`. The derived
/// ordering (module, then segment, then sensor) is the column order of a
/// [`RawChannelTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelKey {
    pub module: usize,
    pub segment: usize,
    pub sensor: Sensor,
}

impl ChannelKey {
    pub fn new(module: usize, segment: usize, sensor: Sensor) -> Self {
        Self {
            module,
            segment,
            sensor,
        }
    }

    /// Parses a column name following the `m{module}s{segment}_{sensor}` convention.
    pub fn parse(name: &str) -> Option<Self> {
        let (prefix, sensor) = name.trim().split_once('_')?;
        let (module, segment) = prefix.strip_prefix('m')?.split_once('s')?;
        Some(Self {
            module: module.parse().ok()?,
            segment: segment.parse().ok()?,
            sensor: sensor.parse().ok()?,
        })
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}s{}_{}", self.module, self.segment, self.sensor)
    }
}

/// Non-fatal anomalies found while reading.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadDiagnostic {
    /// A later row with an already seen timestamp was discarded.
    DuplicateTimestamp { line: usize, time: NaiveDateTime },
    /// A cell could not be coerced to a number and is missing.
    UnparsedValue {
        line: usize,
        channel: ChannelKey,
        raw: String,
    },
}

impl fmt::Display for ReadDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadDiagnostic::DuplicateTimestamp { line, time } => {
                write!(f, "line {}: duplicate timestamp {} discarded", line, time)
            }
            ReadDiagnostic::UnparsedValue { line, channel, raw } => {
                write!(f, "line {}: '{}' is not numeric ({} set missing)", line, raw, channel)
            }
        }
    }
}

/// Declared logger layout.
#[derive(Debug, Clone, Copy)]
struct Layout {
    module_count: usize,
    segments_per_module: usize,
}

impl Layout {
    fn channel_count(&self) -> usize {
        self.module_count * self.segments_per_module * Sensor::ALL.len()
    }

    fn channel_index(&self, module: usize, segment: usize, sensor: Sensor) -> usize {
        (module * self.segments_per_module + segment) * Sensor::ALL.len() + sensor.index()
    }

    fn contains(&self, key: &ChannelKey) -> bool {
        key.module < self.module_count && key.segment < self.segments_per_module
    }

    /// Every declared channel in column order.
    fn keys(&self) -> impl Iterator<Item = ChannelKey> + '_ {
        (0..self.module_count).flat_map(move |module| {
            (0..self.segments_per_module).flat_map(move |segment| {
                Sensor::ALL
                    .into_iter()
                    .map(move |sensor| ChannelKey::new(module, segment, sensor))
            })
        })
    }
}

/// Flat, time-indexed table of raw harp measurements.
///
/// Holds one column per declared `(module, segment, sensor)` channel. The
/// time index is strictly ascending. Channels that never appeared in the
/// source are present and entirely missing.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChannelTable {
    time: Vec<NaiveDateTime>,
    columns: BTreeMap<ChannelKey, Vec<Option<f64>>>,
    module_count: usize,
    segments_per_module: usize,
    source: Option<PathBuf>,
    diagnostics: Vec<ReadDiagnostic>,
}

impl RawChannelTable {
    /// Builds a table from in-memory columns.
    ///
    /// Declared channels not in `columns` are filled as missing. Fails with
    /// [`LoaderError::Format`] if the layout is empty, a column lies outside
    /// the layout, has the wrong length or appears twice, or `time` is not
    /// strictly ascending.
    pub fn from_columns<I>(
        time: Vec<NaiveDateTime>,
        columns: I,
        module_count: usize,
        segments_per_module: usize,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = (ChannelKey, Vec<Option<f64>>)>,
    {
        let path = Path::new(IN_MEMORY);
        let layout = checked_layout(path, module_count, segments_per_module)?;

        if let Some(pos) = time.windows(2).position(|w| w[0] >= w[1]) {
            return Err(format_error(
                path,
                None,
                format!("time index not strictly ascending at row {}", pos + 1),
            ));
        }

        let mut provided = BTreeMap::new();
        for (key, values) in columns {
            if !layout.contains(&key) {
                return Err(format_error(
                    path,
                    None,
                    format!(
                        "channel {} outside declared layout of {} modules x {} segments",
                        key, module_count, segments_per_module
                    ),
                ));
            }
            if values.len() != time.len() {
                return Err(format_error(
                    path,
                    None,
                    format!(
                        "channel {} has {} values for {} timestamps",
                        key,
                        values.len(),
                        time.len()
                    ),
                ));
            }
            if provided.insert(key, values).is_some() {
                return Err(format_error(path, None, format!("channel {} given more than once", key)));
            }
        }

        let n = time.len();
        let columns = layout
            .keys()
            .map(|key| {
                let values = provided.remove(&key).unwrap_or_else(|| vec![None; n]);
                (key, values)
            })
            .collect();

        Ok(Self {
            time,
            columns,
            module_count,
            segments_per_module,
            source: None,
            diagnostics: Vec::new(),
        })
    }

    /// Time index (strictly ascending).
    pub fn time(&self) -> &[NaiveDateTime] {
        &self.time
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

    pub fn module_count(&self) -> usize {
        self.module_count
    }

    pub fn segments_per_module(&self) -> usize {
        self.segments_per_module
    }

    /// True if `module` is part of the column namespace.
    pub fn has_module(&self, module: usize) -> bool {
        module < self.module_count
    }

    /// Values of one channel, if it is declared.
    pub fn column(&self, key: &ChannelKey) -> Option<&[Option<f64>]> {
        self.columns.get(key).map(Vec::as_slice)
    }

    /// All channels in column order.
    pub fn columns(&self) -> impl Iterator<Item = (&ChannelKey, &[Option<f64>])> {
        self.columns.iter().map(|(k, v)| (k, v.as_slice()))
    }

    /// Source file path, if read from disk.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Non-fatal anomalies recorded while reading.
    pub fn diagnostics(&self) -> &[ReadDiagnostic] {
        &self.diagnostics
    }
}

/// One sample interval under construction.
struct Row {
    line: usize,
    time: NaiveDateTime,
    values: Vec<Option<f64>>,
}

/// Parse a harp log file.
///
/// # Arguments
///
/// * `path` - Path to the logger text file
/// * `module_count` - Number of modules declared for the logger
/// * `segments_per_module` - Number of segments declared per module
///
/// # Errors
///
/// [`LoaderError::Format`] when the file does not match the declared layout,
/// [`LoaderError::Parse`] when a timestamp cannot be parsed (with its line
/// number), [`LoaderError::Io`] when the file cannot be read.
pub fn parse<P: AsRef<Path>>(
    path: P,
    module_count: usize,
    segments_per_module: usize,
) -> Result<RawChannelTable> {
    let path = path.as_ref();
    let layout = checked_layout(path, module_count, segments_per_module)?;
    let content = fs::read_to_string(path)?;

    let mut lines = content
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .peekable();

    let device_re = Regex::new(r"^(\d+):(\d+):?$").expect("static regex");

    let is_interleaved = match lines.peek() {
        Some((_, first)) => first
            .split_whitespace()
            .next()
            .is_some_and(|token| device_re.is_match(token)),
        None => return Err(format_error(path, None, "no data rows")),
    };

    let mut diagnostics = Vec::new();
    let rows = if is_interleaved {
        debug!("{}: interleaved harp layout", path.display());
        read_interleaved(path, lines, &layout, &device_re, &mut diagnostics)?
    } else {
        debug!("{}: wide harp layout", path.display());
        read_wide(path, lines, &layout, &mut diagnostics)?
    };

    if rows.is_empty() {
        return Err(format_error(path, None, "no data rows"));
    }

    let mut table = assemble(rows, &layout, &mut diagnostics);
    table.source = Some(path.to_path_buf());
    table.diagnostics = diagnostics;

    info!(
        "Read {} samples x {} channels from {}",
        table.len(),
        table.columns.len(),
        path.display()
    );

    Ok(table)
}

/// Parse a harp log using the layout declared in the configuration.
pub fn load_harp_log<P: AsRef<Path>>(path: P, config: &HarpConfig) -> Result<RawChannelTable> {
    parse(path, config.module_count, config.segments_per_module)
}

fn checked_layout(path: &Path, module_count: usize, segments_per_module: usize) -> Result<Layout> {
    if module_count == 0 || segments_per_module == 0 {
        return Err(format_error(
            path,
            None,
            format!(
                "module_count ({}) and segments_per_module ({}) must be positive",
                module_count, segments_per_module
            ),
        ));
    }
    Ok(Layout {
        module_count,
        segments_per_module,
    })
}

fn format_error(path: &Path, line: Option<usize>, reason: impl Into<String>) -> LoaderError {
    LoaderError::Format {
        path: path.to_path_buf(),
        line,
        reason: reason.into(),
    }
}

fn timestamp(path: &Path, line: usize, raw: &str) -> Result<NaiveDateTime> {
    parse_timestamp(raw).ok_or_else(|| LoaderError::Parse {
        path: path.to_path_buf(),
        line,
        reason: format!("unparseable timestamp '{}'", raw),
    })
}

fn read_interleaved<'a, I>(
    path: &Path,
    lines: I,
    layout: &Layout,
    device_re: &Regex,
    diagnostics: &mut Vec<ReadDiagnostic>,
) -> Result<Vec<Row>>
where
    I: Iterator<Item = (usize, &'a str)>,
{
    let mut rows = Vec::new();
    let mut current: Option<Row> = None;
    let mut previous: Option<(usize, usize)> = None;

    for (line_no, line) in lines {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() != 2 + VALUES_PER_LINE {
            return Err(format_error(
                path,
                Some(line_no),
                format!(
                    "expected {} fields (id, time and {} values), found {}",
                    2 + VALUES_PER_LINE,
                    VALUES_PER_LINE,
                    tokens.len()
                ),
            ));
        }

        let caps = device_re.captures(tokens[0]).ok_or_else(|| {
            format_error(path, Some(line_no), format!("malformed device id '{}'", tokens[0]))
        })?;
        let module: usize = caps[1]
            .parse()
            .map_err(|_| format_error(path, Some(line_no), "module id out of range"))?;
        let segment: usize = caps[2]
            .parse()
            .map_err(|_| format_error(path, Some(line_no), "segment id out of range"))?;

        if module >= layout.module_count {
            return Err(format_error(
                path,
                Some(line_no),
                format!("module {} outside declared module_count {}", module, layout.module_count),
            ));
        }
        if segment >= layout.segments_per_module {
            return Err(format_error(
                path,
                Some(line_no),
                format!(
                    "segment {} outside declared segments_per_module {}",
                    segment, layout.segments_per_module
                ),
            ));
        }

        let time = timestamp(path, line_no, tokens[1])?;

        let channel = (module, segment);
        let starts_block = previous.map_or(true, |prev| channel <= prev);
        previous = Some(channel);

        if starts_block {
            rows.extend(current.take());
        }
        let row = current.get_or_insert_with(|| Row {
            line: line_no,
            time,
            values: vec![None; layout.channel_count()],
        });

        for (sensor, raw) in Sensor::ALL.into_iter().zip(&tokens[2..]) {
            let value = coerce_numeric(raw);
            if value.is_none() {
                diagnostics.push(ReadDiagnostic::UnparsedValue {
                    line: line_no,
                    channel: ChannelKey::new(module, segment, sensor),
                    raw: (*raw).to_string(),
                });
            }
            row.values[layout.channel_index(module, segment, sensor)] = value;
        }
    }

    rows.extend(current);
    Ok(rows)
}

fn read_wide<'a, I>(
    path: &Path,
    mut lines: I,
    layout: &Layout,
    diagnostics: &mut Vec<ReadDiagnostic>,
) -> Result<Vec<Row>>
where
    I: Iterator<Item = (usize, &'a str)>,
{
    let (header_line, header) = match lines.next() {
        Some(entry) => entry,
        None => return Err(format_error(path, None, "missing header")),
    };

    let comma = header.contains(',');
    let split = |line: &'a str| -> Vec<&'a str> {
        if comma {
            line.split(',').map(str::trim).collect()
        } else {
            line.split_whitespace().collect()
        }
    };

    let names = split(header);
    if !names.first().is_some_and(|n| n.eq_ignore_ascii_case("time")) {
        return Err(format_error(
            path,
            Some(header_line),
            "header must start with a 'time' column",
        ));
    }

    let expected: Vec<ChannelKey> = layout.keys().collect();
    if names.len() - 1 != expected.len() {
        return Err(format_error(
            path,
            Some(header_line),
            format!(
                "expected {} channel columns for {} modules x {} segments, found {}",
                expected.len(),
                layout.module_count,
                layout.segments_per_module,
                names.len() - 1
            ),
        ));
    }
    for (name, key) in names[1..].iter().zip(&expected) {
        if ChannelKey::parse(name) != Some(*key) {
            return Err(format_error(
                path,
                Some(header_line),
                format!("column '{}' found where '{}' was expected", name, key),
            ));
        }
    }

    let mut rows = Vec::new();
    for (line_no, line) in lines {
        let fields = split(line);
        if fields.len() != names.len() {
            return Err(format_error(
                path,
                Some(line_no),
                format!("expected {} fields, found {}", names.len(), fields.len()),
            ));
        }

        let time = timestamp(path, line_no, fields[0])?;
        let mut values = Vec::with_capacity(expected.len());
        for (raw, key) in fields[1..].iter().zip(&expected) {
            let value = coerce_numeric(raw);
            if value.is_none() {
                diagnostics.push(ReadDiagnostic::UnparsedValue {
                    line: line_no,
                    channel: *key,
                    raw: (*raw).to_string(),
                });
            }
            values.push(value);
        }

        rows.push(Row {
            line: line_no,
            time,
            values,
        });
    }

    Ok(rows)
}

/// Sorts rows by time, drops duplicate timestamps and builds the columns.
fn assemble(mut rows: Vec<Row>, layout: &Layout, diagnostics: &mut Vec<ReadDiagnostic>) -> RawChannelTable {
    // Stable: among equal timestamps the earliest line stays first.
    rows.sort_by_key(|row| row.time);

    let mut kept: Vec<Row> = Vec::with_capacity(rows.len());
    for row in rows {
        if kept.last().is_some_and(|last| last.time == row.time) {
            warn!(
                "Duplicate timestamp {} at line {}, keeping first occurrence",
                row.time, row.line
            );
            diagnostics.push(ReadDiagnostic::DuplicateTimestamp {
                line: row.line,
                time: row.time,
            });
            continue;
        }
        kept.push(row);
    }

    let time: Vec<NaiveDateTime> = kept.iter().map(|row| row.time).collect();
    let columns = layout
        .keys()
        .enumerate()
        .map(|(idx, key)| (key, kept.iter().map(|row| row.values[idx]).collect()))
        .collect();

    RawChannelTable {
        time,
        columns,
        module_count: layout.module_count,
        segments_per_module: layout.segments_per_module,
        source: None,
        diagnostics: Vec::new(),
    }
}
