//! Reader for light harp logs.
//!
//! Each line is one reading of a colour sensor:
//! `cnt stick:diode:amplifier time C R G B Temp`. The counter restarts at 1
//! with every recording and only the first recording of a file is read.
//!
//! Sensors are polled one after another, so the readings of one sweep carry
//! slightly different times. Sweeps start with a clear-channel reading of the
//! first sensor (lowest stick, diode, amplifier); every sensor is assigned
//! its first reading at or after that start. The last sweep may be cut off
//! and is discarded.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use chrono::NaiveDateTime;
use log::{debug, info, warn};

use crate::core::series::{coerce_numeric, parse_timestamp, InstrumentError, InstrumentTable};

/// Result type for light harp reading.
pub type Result<T> = std::result::Result<T, InstrumentError>;

/// Channels of one light sensor in logger order, with units.
pub const CHANNELS: [(&str, Option<&str>); 5] = [
    ("C", None),
    ("R", None),
    ("G", None),
    ("B", None),
    ("Temp", Some("°C")),
];

/// Counter, identifier, time and one value per channel.
const FIELDS: usize = 3 + CHANNELS.len();

/// Position of one light sensor on the harp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LightKey {
    pub stick: u32,
    pub diode: u32,
    pub amplifier: u32,
}

impl LightKey {
    pub fn new(stick: u32, diode: u32, amplifier: u32) -> Self {
        Self {
            stick,
            diode,
            amplifier,
        }
    }

    /// Parses a `stick:diode:amplifier` identifier. Fields after the third are
    /// ignored.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split(':').map(|p| p.trim().parse::<u32>());
        let stick = parts.next()?.ok()?;
        let diode = parts.next()?.ok()?;
        let amplifier = parts.next()?.ok()?;
        Some(Self::new(stick, diode, amplifier))
    }

    /// Column name of `channel` for this sensor, e.g. `s1d2a1_C`.
    pub fn column_name(&self, channel: &str) -> String {
        format!("{}_{}", self, channel)
    }
}

impl fmt::Display for LightKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}d{}a{}", self.stick, self.diode, self.amplifier)
    }
}

#[derive(Debug)]
struct Reading {
    time: NaiveDateTime,
    key: LightKey,
    values: [Option<f64>; CHANNELS.len()],
}

/// Read the first recording of a light harp log into one row per sweep and
/// one column per sensor and channel.
///
/// # Errors
///
/// [`InstrumentError::NoData`] if the recording holds less than one
/// complete sweep.
pub fn read_light_harp<P: AsRef<Path>>(path: P) -> Result<InstrumentTable> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;

    let mut readings = Vec::new();
    let mut counted = 0usize;
    let mut skipped = 0usize;
    for (i, line) in content.lines().enumerate() {
        let line = line.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != FIELDS {
            debug!("{}: line {} has {} fields, expected {}", path.display(), i + 1, fields.len(), FIELDS);
            skipped += 1;
            continue;
        }
        let Ok(counter) = fields[0].parse::<u64>() else {
            skipped += 1;
            continue;
        };
        if counter == 1 && counted > 0 {
            debug!("{}: second recording starts at line {}", path.display(), i + 1);
            break;
        }
        counted += 1;

        let (Some(key), Some(time)) = (LightKey::parse(fields[1]), parse_timestamp(fields[2])) else {
            skipped += 1;
            continue;
        };
        let mut values = [None; CHANNELS.len()];
        for (value, raw) in values.iter_mut().zip(&fields[3..]) {
            *value = coerce_numeric(raw);
        }
        readings.push(Reading { time, key, values });
    }
    if skipped > 0 {
        warn!("{}: skipped {} malformed lines", path.display(), skipped);
    }

    readings.sort_by_key(|r| r.time);
    let first_key = readings.iter().map(|r| r.key).min();
    let mut starts: Vec<NaiveDateTime> = readings
        .iter()
        .filter(|r| Some(r.key) == first_key && r.values[0].is_some())
        .map(|r| r.time)
        .collect();
    starts.dedup();
    starts.pop();
    if starts.is_empty() {
        return Err(InstrumentError::NoData {
            path: path.to_path_buf(),
        });
    }

    // Present values per sensor and channel, in time order.
    let mut series: BTreeMap<LightKey, Vec<Vec<(NaiveDateTime, f64)>>> = BTreeMap::new();
    for reading in &readings {
        let channels = series
            .entry(reading.key)
            .or_insert_with(|| vec![Vec::new(); CHANNELS.len()]);
        for (points, value) in channels.iter_mut().zip(reading.values) {
            if let Some(v) = value {
                points.push((reading.time, v));
            }
        }
    }

    let mut table = InstrumentTable::new(starts.clone());
    for (key, channels) in &series {
        for ((name, unit), points) in CHANNELS.iter().zip(channels) {
            let values = starts
                .iter()
                .map(|start| {
                    let idx = points.partition_point(|(t, _)| t < start);
                    points.get(idx).map(|(_, v)| *v)
                })
                .collect();
            table.push_column(key.column_name(name), unit.map(str::to_string), values);
        }
    }
    table.source = Some(path.to_path_buf());

    info!(
        "Read {} light harp sweeps of {} sensors from {}",
        table.len(),
        series.len(),
        path.display()
    );

    Ok(table)
}
