//! CTD log readers.
//!
//! Supports Sea-Bird internal logs (`.cnv`), Sea-Bird serial logs captured
//! from the terminal and RBR internal logs. [`read_ctd`] picks the reader
//! from the first non-empty line of the file.

use std::fs;
use std::io::Cursor;
use std::path::Path;

use chrono::{DateTime, Duration, NaiveDateTime};
use csv::{ReaderBuilder, Trim};
use log::{debug, info, warn};
use regex::Regex;

use crate::config::CtdConfig;
use crate::core::series::{coerce_numeric, InstrumentError, InstrumentTable};

/// Result type for CTD reading.
pub type Result<T> = std::result::Result<T, InstrumentError>;

/// Read a CTD log of any supported kind.
///
/// # Errors
///
/// [`InstrumentError::UnknownFormat`] if the first non-empty line matches no
/// known CTD log, otherwise whatever the selected reader reports.
pub fn read_ctd<P: AsRef<Path>>(path: P, config: &CtdConfig) -> Result<InstrumentTable> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    let first_line = content
        .lines()
        .map(str::trim_end)
        .find(|line| !line.is_empty())
        .unwrap_or_default();

    let serial_re = Regex::new(r"^#\s+(-?\d+\.\d+,\s+)+").expect("static regex");

    if first_line.starts_with("* Sea-Bird") {
        debug!("{}: Sea-Bird internal log", path.display());
        parse_seabird(path, &content, config.seabird_nan_flag)
    } else if first_line.starts_with("RBR") {
        debug!("{}: RBR internal log", path.display());
        parse_rbr(path, &content, config.rbr_nan_flag)
    } else if serial_re.is_match(first_line) {
        debug!("{}: Sea-Bird serial log", path.display());
        parse_seabird_serial_log(path, &content)
    } else {
        Err(InstrumentError::UnknownFormat {
            path: path.to_path_buf(),
            first_line: first_line.to_string(),
        })
    }
}

/// Read a Sea-Bird internal log (`.cnv`).
///
/// Names and units come from the `# name N = code: Name [unit]` header lines,
/// the time index from `# start_time` and `# interval`. Columns whose name
/// contains `time` are dropped and `nan_flag` entries become missing.
pub fn read_seabird<P: AsRef<Path>>(path: P, nan_flag: f64) -> Result<InstrumentTable> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    parse_seabird(path, &content, nan_flag)
}

/// Read an RBR internal log.
pub fn read_rbr<P: AsRef<Path>>(path: P, nan_flag: f64) -> Result<InstrumentTable> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    parse_rbr(path, &content, nan_flag)
}

/// Read a Sea-Bird serial log: `# T, C, P, [S,] DD Mon YYYY, HH:MM:SS` lines.
pub fn read_seabird_serial_log<P: AsRef<Path>>(path: P) -> Result<InstrumentTable> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    parse_seabird_serial_log(path, &content)
}

/// Parses an interval such as `seconds: 10`.
fn interval_from(unit: &str, value: i64) -> std::result::Result<Duration, String> {
    let interval = match unit.to_ascii_lowercase().as_str() {
        "seconds" | "second" | "sec" | "s" => Duration::try_seconds(value),
        "minutes" | "minute" | "min" => Duration::try_minutes(value),
        "hours" | "hour" | "h" => Duration::try_hours(value),
        _ => return Err(format!("unsupported interval unit '{}'", unit)),
    };
    interval.ok_or_else(|| format!("interval {} {} out of range", value, unit))
}

/// Parses an `HH:MM:SS[.fff]` duration.
fn parse_duration(raw: &str) -> Option<Duration> {
    let mut parts = raw.trim().split(':');
    let hours: i64 = parts.next()?.parse().ok()?;
    let minutes: i64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || !seconds.is_finite() {
        return None;
    }
    Duration::try_hours(hours)?
        .checked_add(&Duration::try_minutes(minutes)?)?
        .checked_add(&Duration::try_milliseconds((seconds * 1000.0).round() as i64)?)
}

/// Rounds `t` to the nearest multiple of `step` since the epoch.
fn round_to(t: NaiveDateTime, step: Duration) -> Option<NaiveDateTime> {
    let step_ms = step.num_milliseconds();
    if step_ms <= 0 {
        return Some(t);
    }
    let ms = t.and_utc().timestamp_millis();
    let rounded = ms.checked_add(step_ms / 2)?.div_euclid(step_ms).checked_mul(step_ms)?;
    DateTime::from_timestamp_millis(rounded).map(|dt| dt.naive_utc())
}

/// `len` timestamps from `start` every `step`; `None` if the index leaves
/// the representable date range.
fn regular_index(start: NaiveDateTime, step: Duration, len: usize) -> Option<Vec<NaiveDateTime>> {
    let step_ms = step.num_milliseconds();
    (0..len)
        .map(|i| {
            let offset = i64::try_from(i).ok()?.checked_mul(step_ms)?;
            let t = start.checked_add_signed(Duration::try_milliseconds(offset)?)?;
            round_to(t, step)
        })
        .collect()
}

fn parse_seabird(path: &Path, content: &str, nan_flag: f64) -> Result<InstrumentTable> {
    let name_re = Regex::new(r"^# name \d+ = (?P<variable>.+?): (?P<name>.+?) \[(?P<unit>.+?)\]")
        .expect("static regex");
    let interval_re = Regex::new(r"^# interval = (?P<unit>\w+?): (?P<value>\d+)").expect("static regex");
    let start_re = Regex::new(r"^# start_time = (.+?) \[.+\]").expect("static regex");
    let blank_re = Regex::new(r",*\s+").expect("static regex");

    let mut names: Vec<String> = Vec::new();
    let mut units: Vec<String> = Vec::new();
    let mut interval = None;
    let mut start_time = None;

    let mut lines = content.lines();
    let mut header_closed = false;
    for line in lines.by_ref() {
        if line.starts_with("*END*") {
            header_closed = true;
            break;
        }
        if let Some(caps) = name_re.captures(line) {
            names.push(blank_re.replace_all(&caps["name"], "_").into_owned());
            units.push(caps["unit"].to_string());
        }
        if let Some(caps) = interval_re.captures(line) {
            let value: i64 = caps["value"]
                .parse()
                .map_err(|_| InstrumentError::header(path, "interval value out of range"))?;
            interval = Some(
                interval_from(&caps["unit"], value).map_err(|reason| InstrumentError::header(path, reason))?,
            );
        }
        if let Some(caps) = start_re.captures(line) {
            let raw = caps[1].trim();
            start_time = Some(NaiveDateTime::parse_from_str(raw, "%b %d %Y %H:%M:%S").map_err(|_| {
                InstrumentError::header(path, format!("unparseable start_time '{}'", raw))
            })?);
        }
    }

    if !header_closed {
        return Err(InstrumentError::header(path, "missing *END* marker"));
    }
    if names.is_empty() {
        return Err(InstrumentError::header(path, "no variable names found"));
    }
    let start_time = start_time.ok_or_else(|| InstrumentError::header(path, "no start time found"))?;
    let interval = interval.ok_or_else(|| InstrumentError::header(path, "no logging interval found"))?;

    let mut columns: Vec<Vec<Option<f64>>> = vec![Vec::new(); names.len()];
    for line in lines.filter(|l| !l.trim().is_empty()) {
        // Trailing fields (the flag column) are not part of the declared names.
        let mut fields = line.split_whitespace();
        for column in columns.iter_mut() {
            column.push(fields.next().and_then(coerce_numeric));
        }
    }

    let rows = columns[0].len();
    if rows == 0 {
        return Err(InstrumentError::NoData {
            path: path.to_path_buf(),
        });
    }

    let time = regular_index(start_time, interval, rows)
        .ok_or_else(|| InstrumentError::header(path, "time index exceeds the supported date range"))?;
    let mut table = InstrumentTable::new(time);
    for ((name, unit), values) in names.into_iter().zip(units).zip(columns) {
        table.push_column(name, Some(unit), values);
    }
    table.drop_columns(|name| name.to_lowercase().contains("time"));
    table.mask_flag(nan_flag);
    table.sort_columns();
    table.source = Some(path.to_path_buf());

    info!(
        "Read {} Sea-Bird samples ({} variables, every {}s) from {}",
        table.len(),
        table.columns.len(),
        interval.num_seconds(),
        path.display()
    );

    Ok(table)
}

/// Header fields of an RBR log that carry a time or a duration.
#[derive(Debug, Default)]
struct RbrHeader {
    logging_start: Option<NaiveDateTime>,
    logging_end: Option<NaiveDateTime>,
    sample_period: Option<Duration>,
}

const RBR_RENAMES: &[(&str, &str)] = &[
    ("Cond", "Conductivity"),
    ("Temp", "Temperature"),
    ("Pres", "Pressure"),
    ("Sal", "Salinity"),
    ("DensAnom", "Density_Anomaly"),
];

fn parse_rbr(path: &Path, content: &str, nan_flag: f64) -> Result<InstrumentTable> {
    let mut lines = content.lines();
    let header_lines: Vec<&str> = lines.by_ref().take_while(|l| !l.trim().is_empty()).collect();

    let field = |label: &str| -> Option<String> {
        let re = Regex::new(&format!(r"^{}\s+(\d.+)$", regex::escape(label))).ok()?;
        header_lines
            .iter()
            .find_map(|line| re.captures(line.trim_end()).map(|c| c[1].trim().to_string()))
    };
    let timestamp = |label: &str| -> Result<Option<NaiveDateTime>> {
        field(label)
            .map(|raw| {
                NaiveDateTime::parse_from_str(&raw, "%y/%m/%d %H:%M:%S")
                    .map_err(|_| InstrumentError::header(path, format!("unparseable {} '{}'", label, raw)))
            })
            .transpose()
    };

    let header = RbrHeader {
        logging_start: timestamp("Logging start")?,
        logging_end: timestamp("Logging end")?,
        sample_period: field("Sample period").and_then(|raw| parse_duration(&raw)),
    };
    for label in ["Host time", "Logger time"] {
        if let Some(raw) = field(label) {
            debug!("{}: {} {}", path.display(), label, raw);
        }
    }

    let start = header
        .logging_start
        .ok_or_else(|| InstrumentError::header(path, "no 'Logging start' found"))?;
    let period = header
        .sample_period
        .filter(|p| p.num_milliseconds() > 0)
        .ok_or_else(|| InstrumentError::header(path, "no valid 'Sample period' found"))?;

    let mut data_lines = lines.filter(|l| !l.trim().is_empty());
    let names: Vec<String> = match data_lines.next() {
        Some(line) => line.split_whitespace().map(str::to_string).collect(),
        None => {
            return Err(InstrumentError::NoData {
                path: path.to_path_buf(),
            })
        }
    };

    let mut columns: Vec<Vec<Option<f64>>> = vec![Vec::new(); names.len()];
    for line in data_lines {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < names.len() {
            warn!(
                "{}: skipping row with {} fields, expected {}",
                path.display(),
                fields.len(),
                names.len()
            );
            continue;
        }
        // Leading date and time tokens have no header name.
        let values = &fields[fields.len() - names.len()..];
        for (column, raw) in columns.iter_mut().zip(values) {
            column.push(coerce_numeric(raw));
        }
    }

    let mut time = regular_index(start, period, columns.first().map_or(0, Vec::len))
        .ok_or_else(|| InstrumentError::header(path, "time index exceeds the supported date range"))?;
    if let Some(end) = header.logging_end {
        let within = time.iter().take_while(|t| **t <= end).count();
        if within < time.len() {
            warn!(
                "{}: {} rows after logging end {} discarded",
                path.display(),
                time.len() - within,
                end
            );
            time.truncate(within);
            for column in columns.iter_mut() {
                column.truncate(within);
            }
        }
    }
    if time.is_empty() {
        return Err(InstrumentError::NoData {
            path: path.to_path_buf(),
        });
    }

    let mut table = InstrumentTable::new(time);
    for (name, values) in names.into_iter().zip(columns) {
        table.push_column(name, None, values);
    }
    table.mask_flag(nan_flag);
    table.rename(RBR_RENAMES);
    table.sort_columns();
    table.source = Some(path.to_path_buf());

    info!("Read {} RBR samples from {}", table.len(), path.display());

    Ok(table)
}

fn parse_seabird_serial_log(path: &Path, content: &str) -> Result<InstrumentTable> {
    let stripped: String = content
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .map(|line| line.trim_start_matches('#'))
        .collect::<Vec<_>>()
        .join("\n");

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(Cursor::new(stripped));

    let mut records = Vec::new();
    for record in reader.records() {
        records.push(record.map_err(|e| InstrumentError::csv(path, e))?);
    }

    let field_count = match records.first() {
        Some(record) => record.len(),
        None => {
            return Err(InstrumentError::NoData {
                path: path.to_path_buf(),
            })
        }
    };
    let (names, units): (Vec<&str>, Vec<&str>) = match field_count {
        5 => (
            vec!["Temperature", "Conductivity", "Pressure"],
            vec!["°C", "S/m", "dbar"],
        ),
        6 => (
            vec!["Temperature", "Conductivity", "Pressure", "Salinity"],
            vec!["°C", "S/m", "dbar", "psu"],
        ),
        n => {
            return Err(InstrumentError::header(
                path,
                format!("expected 5 or 6 fields per line, found {}", n),
            ))
        }
    };

    let mut time = Vec::with_capacity(records.len());
    let mut columns: Vec<Vec<Option<f64>>> = vec![Vec::with_capacity(records.len()); names.len()];
    for (i, record) in records.iter().enumerate() {
        if record.len() != field_count {
            warn!("{}: skipping line {} with {} fields", path.display(), i + 1, record.len());
            continue;
        }
        let stamp = format!("{} {}", &record[names.len()], &record[names.len() + 1]);
        let Ok(t) = NaiveDateTime::parse_from_str(&stamp, "%d %b %Y %H:%M:%S") else {
            warn!("{}: skipping line {} with timestamp '{}'", path.display(), i + 1, stamp);
            continue;
        };
        time.push(t);
        for (c, column) in columns.iter_mut().enumerate() {
            column.push(coerce_numeric(&record[c]));
        }
    }

    if time.is_empty() {
        return Err(InstrumentError::NoData {
            path: path.to_path_buf(),
        });
    }

    let mut table = InstrumentTable::new(time);
    for ((name, unit), values) in names.into_iter().zip(units).zip(columns) {
        table.push_column(name, Some(unit.to_string()), values);
    }
    table.sort_columns();
    table.source = Some(path.to_path_buf());

    info!("Read {} Sea-Bird serial samples from {}", table.len(), path.display());

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_log(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn ts(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2019, 3, 7)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    const SEABIRD: &str = "\
* Sea-Bird SBE37SM-RS232 Data File:
* FileName = C:\\ctd\\ice_tank.xml
# nquan = 6
# name 0 = timeS: Time, Elapsed [seconds]
# name 1 = tv290C: Temperature [ITS-90, deg C]
# name 2 = cond0S/m: Conductivity [S/m]
# name 3 = prdM: Pressure [db]
# name 4 = sal00: Salinity, Practical [PSU]
# name 5 = flag:  0.000e+00
# interval = seconds: 10
# start_time = Mar 07 2019 10:00:01 [Instrument's time stamp, header]
*END*
      0.000     -1.5000   2.500000   1.000   30.0000  0.000e+00
     10.000     -1.5100  -9.990e-29   1.010   30.0100  0.000e+00
     20.000     -1.5200   2.520000   1.020   30.0200  0.000e+00
";

    #[test]
    fn test_read_seabird() {
        let file = write_log(SEABIRD);
        let table = read_ctd(file.path(), &CtdConfig::default()).unwrap();

        assert_eq!(
            table.names(),
            vec!["Conductivity", "Pressure", "Salinity_Practical", "Temperature"]
        );
        assert_eq!(table.time, vec![ts(10, 0, 0), ts(10, 0, 10), ts(10, 0, 20)]);
        assert_eq!(
            table.column("Conductivity").unwrap().values,
            vec![Some(2.5), None, Some(2.52)]
        );
        assert_eq!(table.units().get("Temperature"), Some(&"ITS-90, deg C"));
    }

    #[test]
    fn test_read_seabird_missing_interval() {
        let content = SEABIRD.replace("# interval = seconds: 10\n", "");
        let file = write_log(&content);
        assert!(matches!(
            read_seabird(file.path(), -9.990e-29),
            Err(InstrumentError::Header { .. })
        ));
    }

    const RBR: &str = "\
RBR XR-620  6.11 050 018123
Host time      19/03/07 10:05:00
Logger time    19/03/07 10:05:01
Logging start  19/03/07 10:00:00
Logging end    19/03/07 10:00:20
Sample period  00:00:10
Number of channels = 5

     Cond      Temp      Pres       Sal  DensAnom
07-Mar-2019 10:00:00.000   30.100   -1.500   10.100   33.000   26.500
07-Mar-2019 10:00:10.000   30.200 -1000.000   10.200   33.100   26.600
07-Mar-2019 10:00:20.000   30.300   -1.520   10.300   33.200   26.700
07-Mar-2019 10:00:30.000   30.400   -1.530   10.400   33.300   26.800
";

    #[test]
    fn test_read_rbr() {
        let file = write_log(RBR);
        let table = read_ctd(file.path(), &CtdConfig::default()).unwrap();

        assert_eq!(
            table.names(),
            vec!["Conductivity", "Density_Anomaly", "Pressure", "Salinity", "Temperature"]
        );
        // The fourth row lies after "Logging end".
        assert_eq!(table.time, vec![ts(10, 0, 0), ts(10, 0, 10), ts(10, 0, 20)]);
        assert_eq!(
            table.column("Temperature").unwrap().values,
            vec![Some(-1.5), None, Some(-1.52)]
        );
    }

    #[test]
    fn test_read_rbr_requires_sample_period() {
        let content = RBR.replace("Sample period  00:00:10\n", "");
        let file = write_log(&content);
        assert!(matches!(
            read_rbr(file.path(), -1000.0),
            Err(InstrumentError::Header { .. })
        ));
    }

    #[test]
    fn test_read_seabird_serial_log() {
        let file = write_log(
            "# 20.1234,  0.00012,    0.123, 07 Mar 2019, 10:00:01\n\
             \n\
             # 20.1200,  0.00013,    0.124, 07 Mar 2019, 10:00:02\n\
             # 20.1100,  0.00014,    0.125, garbage\n",
        );
        let table = read_ctd(file.path(), &CtdConfig::default()).unwrap();

        assert_eq!(table.names(), vec!["Conductivity", "Pressure", "Temperature"]);
        assert_eq!(table.time, vec![ts(10, 0, 1), ts(10, 0, 2)]);
        assert_eq!(
            table.column("Temperature").unwrap().values,
            vec![Some(20.1234), Some(20.12)]
        );
        assert_eq!(table.units().get("Conductivity"), Some(&"S/m"));
    }

    #[test]
    fn test_read_seabird_serial_log_with_salinity() {
        let file = write_log("# -1.8000,  2.71000,    0.500,  33.5120, 07 Mar 2019, 10:00:01\n");
        let table = read_seabird_serial_log(file.path()).unwrap();

        assert_eq!(table.column("Salinity").unwrap().values, vec![Some(33.512)]);
    }

    #[test]
    fn test_unknown_format() {
        let file = write_log("\n\nsome other instrument\n1 2 3\n");
        match read_ctd(file.path(), &CtdConfig::default()) {
            Err(InstrumentError::UnknownFormat { first_line, .. }) => {
                assert_eq!(first_line, "some other instrument")
            }
            other => panic!("expected unknown format, got {:?}", other.map(|t| t.len())),
        }
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("00:00:10"), Some(Duration::seconds(10)));
        assert_eq!(parse_duration("01:30:00.5"), Some(Duration::milliseconds(5_400_500)));
        assert_eq!(parse_duration("10"), None);
        assert_eq!(parse_duration("9223372036854775807:00:00"), None);
    }

    #[test]
    fn test_read_seabird_interval_out_of_range() {
        let huge = SEABIRD.replace("# interval = seconds: 10", "# interval = hours: 9223372036854775807");
        let file = write_log(&huge);
        assert!(matches!(
            read_ctd(file.path(), &CtdConfig::default()),
            Err(InstrumentError::Header { .. })
        ));

        // Representable interval, but the index runs past the last valid date.
        let far = SEABIRD.replace("# interval = seconds: 10", "# interval = hours: 2000000000");
        let file = write_log(&far);
        match read_ctd(file.path(), &CtdConfig::default()) {
            Err(InstrumentError::Header { reason, .. }) => assert!(reason.contains("date range")),
            other => panic!("expected header error, got {:?}", other.map(|t| t.len())),
        }
    }
}
