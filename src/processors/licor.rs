//! Reader for LI-COR gas analyser logs recorded by a Campbell datalogger.

use std::fs;
use std::io::Cursor;
use std::path::Path;

use csv::{ReaderBuilder, Trim};
use log::{info, warn};
use regex::Regex;

use crate::core::series::{coerce_numeric, parse_timestamp, InstrumentError, InstrumentTable};

/// Result type for LI-COR reading.
pub type Result<T> = std::result::Result<T, InstrumentError>;

/// Column names assumed when the file carries no `"TIMESTAMP"` header line.
const DEFAULT_NAMES: [&str; 12] = [
    "TIMESTAMP",
    "RECORD",
    "Licor_T",
    "Licor_P",
    "Licor_CO2",
    "Licor_H2O",
    "Licor_DewPt",
    "Licor_Batt",
    "LoggerBatt",
    "LoggerTemp",
    "PAR",
    "SoilT107",
];

/// Units assumed when the file carries no `"TS"` units line.
const DEFAULT_UNITS: [&str; 12] = [
    "TS",
    "RN",
    "°C",
    "kPa",
    "ppm",
    "ppt",
    "°C",
    "Volt",
    "Volt",
    "°C",
    "µmol/m^2/s",
    "°C",
];

fn split_quoted(line: &str) -> Vec<String> {
    line.split(',').map(|f| f.trim().trim_matches('"').to_string()).collect()
}

/// Read a LI-COR log.
///
/// Lines before the first line that starts with a (possibly quoted) digit
/// are header. A `"TIMESTAMP",...` line names the columns and a `"TS",...`
/// line gives their units; the `Licor_` prefix is removed from names.
/// `TIMESTAMP` becomes the time index, rows without a parseable timestamp
/// are dropped.
pub fn read_licor<P: AsRef<Path>>(path: P) -> Result<InstrumentTable> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;

    let data_re = Regex::new(r#"^"?\d+"#).expect("static regex");
    let deg_re = Regex::new(r"[Dd]eg.*C").expect("static regex");

    let mut names: Vec<String> = DEFAULT_NAMES.iter().map(|s| s.to_string()).collect();
    let mut units: Vec<String> = DEFAULT_UNITS.iter().map(|s| s.to_string()).collect();

    let mut lines = content.lines().peekable();
    while let Some(line) = lines.next_if(|line| !data_re.is_match(line.trim_end())) {
        if line.starts_with("\"TIMESTAMP\",") {
            names = split_quoted(line);
        } else if line.starts_with("\"TS\",") {
            units = split_quoted(line);
        }
    }

    let names: Vec<String> = names.iter().map(|n| n.replace("Licor_", "")).collect();
    let units: Vec<String> = units
        .iter()
        .map(|u| deg_re.replace_all(u, "°C").into_owned())
        .collect();

    let stamp_idx = names
        .iter()
        .position(|n| n == "TIMESTAMP")
        .ok_or_else(|| InstrumentError::header(path, "no TIMESTAMP column"))?;

    let body = lines.collect::<Vec<_>>().join("\n");
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(Cursor::new(body));

    let mut time = Vec::new();
    let mut columns: Vec<Vec<Option<f64>>> = vec![Vec::new(); names.len()];
    let mut skipped = 0usize;
    for record in reader.records() {
        let record = record.map_err(|e| InstrumentError::csv(path, e))?;
        if record.len() > names.len() {
            skipped += 1;
            continue;
        }
        let Some(t) = record.get(stamp_idx).and_then(parse_timestamp) else {
            skipped += 1;
            continue;
        };
        time.push(t);
        for (i, column) in columns.iter_mut().enumerate() {
            column.push(record.get(i).and_then(coerce_numeric));
        }
    }
    if skipped > 0 {
        warn!("{}: skipped {} rows without a valid timestamp", path.display(), skipped);
    }
    if time.is_empty() {
        return Err(InstrumentError::NoData {
            path: path.to_path_buf(),
        });
    }

    let mut table = InstrumentTable::new(time);
    for (i, (name, values)) in names.iter().zip(columns).enumerate() {
        if i == stamp_idx {
            continue;
        }
        let unit = if name == "RECORD" {
            None
        } else {
            units.get(i).filter(|u| !u.is_empty()).cloned()
        };
        table.push_column(name.clone(), unit, values);
    }
    table.source = Some(path.to_path_buf());

    info!("Read {} LI-COR records from {}", table.len(), path.display());

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

    #[test]
    fn test_read_licor_with_header() {
        let file = write_log(
            "\"TOA5\",\"CR1000\",\"1234\"\n\
             \"TIMESTAMP\",\"RECORD\",\"Licor_T\",\"Licor_CO2\"\n\
             \"TS\",\"RN\",\"Deg C\",\"ppm\"\n\
             \"\",\"\",\"Smp\",\"Smp\"\n\
             \"2019-03-28 10:00:00\",1,-2.5,410.2\n\
             \"not a time\",2,-2.4,410.3\n\
             \"2019-03-28 10:00:10\",3,-2.3,NAN\n",
        );
        let table = read_licor(file.path()).unwrap();

        assert_eq!(table.names(), vec!["RECORD", "T", "CO2"]);
        let t0 = NaiveDate::from_ymd_opt(2019, 3, 28)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        assert_eq!(table.time, vec![t0, t0 + chrono::Duration::seconds(10)]);
        assert_eq!(table.column("CO2").unwrap().values, vec![Some(410.2), None]);
        assert_eq!(table.column("RECORD").unwrap().values, vec![Some(1.0), Some(3.0)]);

        let units = table.units();
        assert_eq!(units.get("T"), Some(&"°C"));
        assert_eq!(units.get("RECORD"), None);
    }

    #[test]
    fn test_read_licor_default_header() {
        let file = write_log("\"2019-03-28 10:00:00\",1,-2.5,99.1,410.2,3.1,-20.0,12.1,12.9,5.0,0.0,-1.0\n");
        let table = read_licor(file.path()).unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(table.column("CO2").unwrap().values, vec![Some(410.2)]);
        assert_eq!(table.units().get("P"), Some(&"kPa"));
    }

    #[test]
    fn test_read_licor_without_rows() {
        let file = write_log("\"TIMESTAMP\",\"RECORD\"\n");
        assert!(matches!(
            read_licor(file.path()),
            Err(InstrumentError::NoData { .. })
        ));
    }
}
