//! Harp model engine.
//!
//! Builds a [`HarpDataset`] for one module of a [`RawChannelTable`]: the raw
//! resistance and temperature channels are reshaped onto a `(time x segment)`
//! grid, and brine salinity, bulk salinity, liquid fraction and solid
//! fraction are derived cell by cell.
//!
//! Numeric trouble never aborts a build. The affected cells become missing
//! and a [`Diagnostic`] is recorded on the dataset.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::NaiveDateTime;
use log::{debug, info, warn};
use thiserror::Error;

use crate::config::ConfigError;
use crate::core::loaders::{RawChannelTable, Sensor};
use crate::core::transforms::{reshape, Grid};
use crate::processors::salinity::{conductivity_from_resistance, practical_salinity, DerivationMethod};

/// Errors that abort a dataset build.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("module {module} not found (available modules: 0..{module_count})")]
    Lookup { module: usize, module_count: usize },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for model operations.
pub type Result<T> = std::result::Result<T, ModelError>;

/// Per-call settings of the model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelOptions {
    /// Resistance channel used for conductivity (`R2` or `R16`)
    pub resistance_channel: Sensor,
    /// Cell constant [1/m]
    pub cell_constant: f64,
    /// Pressure at the harp [dbar]
    pub pressure_dbar: f64,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            resistance_channel: Sensor::R16,
            cell_constant: 1.0,
            pressure_dbar: 0.0,
        }
    }
}

/// Variables of a [`HarpDataset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Variable {
    Resistance,
    Conductivity,
    Temperature,
    BrineSalinity,
    BulkSalinity,
    LiquidFraction,
    SolidFraction,
}

impl Variable {
    pub const ALL: [Variable; 7] = [
        Variable::Resistance,
        Variable::Conductivity,
        Variable::Temperature,
        Variable::BrineSalinity,
        Variable::BulkSalinity,
        Variable::LiquidFraction,
        Variable::SolidFraction,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Variable::Resistance => "resistance",
            Variable::Conductivity => "conductivity",
            Variable::Temperature => "temperature",
            Variable::BrineSalinity => "brine_salinity",
            Variable::BulkSalinity => "bulk_salinity",
            Variable::LiquidFraction => "liquid_fraction",
            Variable::SolidFraction => "solid_fraction",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Variable::Resistance => "Ohm",
            Variable::Conductivity => "S/m",
            Variable::Temperature => "°C",
            Variable::BrineSalinity => "g/kg",
            Variable::BulkSalinity => "PSU",
            Variable::LiquidFraction | Variable::SolidFraction => "1",
        }
    }

    /// True for variables computed by the model rather than measured.
    pub fn is_derived(self) -> bool {
        !matches!(self, Variable::Resistance | Variable::Temperature)
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Variable {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Variable::ALL
            .into_iter()
            .find(|v| v.name() == wanted)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "variable",
                reason: format!("unknown harp variable '{}'", s),
            })
    }
}

/// Category of a [`Diagnostic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticKind {
    SegmentDropped,
    InvalidResistance,
    BulkOutOfRange,
    TemperatureOutOfRange,
    NonPositiveBrine,
    FractionClamped,
}

impl DiagnosticKind {
    pub fn name(self) -> &'static str {
        match self {
            DiagnosticKind::SegmentDropped => "segment_dropped",
            DiagnosticKind::InvalidResistance => "invalid_resistance",
            DiagnosticKind::BulkOutOfRange => "bulk_out_of_range",
            DiagnosticKind::TemperatureOutOfRange => "temperature_out_of_range",
            DiagnosticKind::NonPositiveBrine => "non_positive_brine",
            DiagnosticKind::FractionClamped => "fraction_clamped",
        }
    }
}

/// A recovered numeric issue. `time` and `segment` are grid indices.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// A segment lacks a whole input series; all its cells are missing.
    SegmentDropped { segment: usize, missing: Vec<Sensor> },
    InvalidResistance { time: usize, segment: usize, resistance: f64 },
    /// Conductivity and temperature outside the domain of the bulk
    /// conversion; bulk salinity and both fractions are missing.
    BulkOutOfRange { time: usize, segment: usize, conductivity: f64, temperature: f64 },
    TemperatureOutOfRange { time: usize, segment: usize, temperature: f64 },
    NonPositiveBrine { time: usize, segment: usize, brine_salinity: f64 },
    /// Liquid fraction outside [0, 1] before clamping.
    FractionClamped { time: usize, segment: usize, value: f64 },
}

impl Diagnostic {
    pub fn kind(&self) -> DiagnosticKind {
        match self {
            Diagnostic::SegmentDropped { .. } => DiagnosticKind::SegmentDropped,
            Diagnostic::InvalidResistance { .. } => DiagnosticKind::InvalidResistance,
            Diagnostic::BulkOutOfRange { .. } => DiagnosticKind::BulkOutOfRange,
            Diagnostic::TemperatureOutOfRange { .. } => DiagnosticKind::TemperatureOutOfRange,
            Diagnostic::NonPositiveBrine { .. } => DiagnosticKind::NonPositiveBrine,
            Diagnostic::FractionClamped { .. } => DiagnosticKind::FractionClamped,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::SegmentDropped { segment, missing } => {
                let names: Vec<&str> = missing.iter().map(|s| s.name()).collect();
                write!(f, "segment {} dropped: no {} data", segment, names.join(" or "))
            }
            Diagnostic::InvalidResistance { time, segment, resistance } => {
                write!(f, "t={} segment {}: resistance {} Ohm is not positive", time, segment, resistance)
            }
            Diagnostic::BulkOutOfRange {
                time,
                segment,
                conductivity,
                temperature,
            } => write!(
                f,
                "t={} segment {}: no bulk salinity for {} S/m at {} °C",
                time, segment, conductivity, temperature
            ),
            Diagnostic::TemperatureOutOfRange { time, segment, temperature } => write!(
                f,
                "t={} segment {}: temperature {} °C outside method range",
                time, segment, temperature
            ),
            Diagnostic::NonPositiveBrine { time, segment, brine_salinity } => write!(
                f,
                "t={} segment {}: brine salinity {} is not positive",
                time, segment, brine_salinity
            ),
            Diagnostic::FractionClamped { time, segment, value } => {
                write!(f, "t={} segment {}: liquid fraction {:.4} clamped", time, segment, value)
            }
        }
    }
}

/// Diagnostic counts by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticSummary {
    counts: BTreeMap<DiagnosticKind, usize>,
}

impl DiagnosticSummary {
    pub fn from_diagnostics(diagnostics: &[Diagnostic]) -> Self {
        let mut summary = Self::default();
        for d in diagnostics {
            summary.add(d.kind(), 1);
        }
        summary
    }

    pub fn add(&mut self, kind: DiagnosticKind, count: usize) {
        if count > 0 {
            *self.counts.entry(kind).or_default() += count;
        }
    }

    /// Folds another summary into this one.
    pub fn merge(&mut self, other: &DiagnosticSummary) {
        for (&kind, &count) in &other.counts {
            self.add(kind, count);
        }
    }

    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DiagnosticKind, usize)> + '_ {
        self.counts.iter().map(|(&k, &v)| (k, v))
    }
}

impl fmt::Display for DiagnosticSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let parts: Vec<String> = self
            .iter()
            .map(|(kind, count)| format!("{}={}", kind.name(), count))
            .collect();
        f.write_str(&parts.join(", "))
    }
}

/// Raw and derived harp variables of one module on a `(time x segment)` grid.
#[derive(Debug, Clone, PartialEq)]
pub struct HarpDataset {
    module: usize,
    method: DerivationMethod,
    options: ModelOptions,
    time: Vec<NaiveDateTime>,
    segments: Vec<usize>,
    variables: BTreeMap<Variable, Grid>,
    diagnostics: Vec<Diagnostic>,
    source: Option<PathBuf>,
}

impl HarpDataset {
    /// Selected module (scalar coordinate).
    pub fn module(&self) -> usize {
        self.module
    }

    pub fn method(&self) -> DerivationMethod {
        self.method
    }

    pub fn options(&self) -> &ModelOptions {
        &self.options
    }

    pub fn time(&self) -> &[NaiveDateTime] {
        &self.time
    }

    pub fn segments(&self) -> &[usize] {
        &self.segments
    }

    pub fn variable(&self, variable: Variable) -> &Grid {
        // Every variable is inserted by the builder.
        &self.variables[&variable]
    }

    /// Value of `variable` at grid position `(t, s)`.
    pub fn get(&self, variable: Variable, t: usize, s: usize) -> Option<f64> {
        self.variable(variable).get(t, s)
    }

    /// Units of every variable plus the method metadata.
    pub fn attributes(&self) -> Vec<(String, String)> {
        let mut attrs: Vec<(String, String)> = Variable::ALL
            .iter()
            .map(|v| (format!("{}_unit", v.name()), v.unit().to_string()))
            .collect();
        attrs.push(("derivation_method".to_string(), self.method.name().to_string()));
        attrs.push((
            "resistance_channel".to_string(),
            self.options.resistance_channel.name().to_string(),
        ));
        attrs
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn summary(&self) -> DiagnosticSummary {
        DiagnosticSummary::from_diagnostics(&self.diagnostics)
    }

    /// Source file of the raw table, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

/// Build the dataset of `module_id` with default [`ModelOptions`].
pub fn build_dataset(
    table: &RawChannelTable,
    module_id: usize,
    method: DerivationMethod,
) -> Result<HarpDataset> {
    build_dataset_with(table, module_id, method, &ModelOptions::default())
}

/// Build the dataset of `module_id`.
///
/// # Errors
///
/// [`ModelError::Lookup`] if the module is not part of the table,
/// [`ModelError::Config`] if `options` names a non-resistance channel.
pub fn build_dataset_with(
    table: &RawChannelTable,
    module_id: usize,
    method: DerivationMethod,
    options: &ModelOptions,
) -> Result<HarpDataset> {
    if !options.resistance_channel.is_resistance() {
        return Err(ConfigError::NotAResistanceChannel(options.resistance_channel.name().to_string()).into());
    }

    let frame = reshape(table, module_id).ok_or(ModelError::Lookup {
        module: module_id,
        module_count: table.module_count(),
    })?;

    let rows = frame.time.len();
    let cols = frame.segments.len();
    let mut resistance = frame
        .grid(options.resistance_channel)
        .cloned()
        .unwrap_or_else(|| Grid::missing(rows, cols));
    let mut temperature = frame
        .grid(Sensor::Temperature)
        .cloned()
        .unwrap_or_else(|| Grid::missing(rows, cols));

    let mut diagnostics = Vec::new();

    // Step A: segments without a usable series.
    let mut dropped = vec![false; cols];
    for (s, &segment) in frame.segments.iter().enumerate() {
        let mut missing = Vec::new();
        if resistance.column_is_missing(s) {
            missing.push(options.resistance_channel);
        }
        if temperature.column_is_missing(s) {
            missing.push(Sensor::Temperature);
        }
        if !missing.is_empty() {
            let diagnostic = Diagnostic::SegmentDropped { segment, missing };
            warn!("Module {}: {}", module_id, diagnostic);
            diagnostics.push(diagnostic);
            resistance.clear_column(s);
            temperature.clear_column(s);
            dropped[s] = true;
        }
    }

    // Step B: per-cell derivation.
    let mut conductivity = Grid::missing(rows, cols);
    let mut brine = Grid::missing(rows, cols);
    let mut bulk = Grid::missing(rows, cols);
    let mut liquid = Grid::missing(rows, cols);
    let mut solid = Grid::missing(rows, cols);

    for t in 0..rows {
        for s in (0..cols).filter(|&s| !dropped[s]) {
            let (Some(r), Some(temp)) = (resistance.get(t, s), temperature.get(t, s)) else {
                continue;
            };
            let segment = frame.segments[s];

            let Some(c) = conductivity_from_resistance(r, options.cell_constant) else {
                let diagnostic = Diagnostic::InvalidResistance { time: t, segment, resistance: r };
                debug!("Module {}: {}", module_id, diagnostic);
                diagnostics.push(diagnostic);
                continue;
            };
            conductivity.set(t, s, Some(c));

            let s_bulk = match practical_salinity(c, temp, options.pressure_dbar) {
                Ok(value) => Some(value),
                Err(err) => {
                    debug!("Module {}, t={} segment {}: {}", module_id, t, segment, err);
                    diagnostics.push(Diagnostic::BulkOutOfRange {
                        time: t,
                        segment,
                        conductivity: c,
                        temperature: temp,
                    });
                    None
                }
            };
            bulk.set(t, s, s_bulk);

            let s_brine = match method.brine_salinity(temp, options.pressure_dbar) {
                Ok(value) if value > 0.0 => value,
                Ok(value) => {
                    let diagnostic = Diagnostic::NonPositiveBrine {
                        time: t,
                        segment,
                        brine_salinity: value,
                    };
                    debug!("Module {}: {}", module_id, diagnostic);
                    diagnostics.push(diagnostic);
                    continue;
                }
                Err(err) => {
                    debug!("Module {}, t={} segment {}: {}", module_id, t, segment, err);
                    diagnostics.push(Diagnostic::TemperatureOutOfRange {
                        time: t,
                        segment,
                        temperature: temp,
                    });
                    continue;
                }
            };
            brine.set(t, s, Some(s_brine));

            let Some(s_bulk) = s_bulk else { continue };
            let fraction = s_bulk / s_brine;
            let clamped = fraction.clamp(0.0, 1.0);
            if clamped != fraction {
                let diagnostic = Diagnostic::FractionClamped { time: t, segment, value: fraction };
                debug!("Module {}: {}", module_id, diagnostic);
                diagnostics.push(diagnostic);
            }
            liquid.set(t, s, Some(clamped));
            solid.set(t, s, Some(1.0 - clamped));
        }
    }

    let dataset = HarpDataset {
        module: module_id,
        method,
        options: *options,
        time: frame.time,
        segments: frame.segments,
        variables: BTreeMap::from([
            (Variable::Resistance, resistance),
            (Variable::Conductivity, conductivity),
            (Variable::Temperature, temperature),
            (Variable::BrineSalinity, brine),
            (Variable::BulkSalinity, bulk),
            (Variable::LiquidFraction, liquid),
            (Variable::SolidFraction, solid),
        ]),
        diagnostics,
        source: table.source().map(Path::to_path_buf),
    };

    let summary = dataset.summary();
    if summary.is_empty() {
        info!(
            "Module {}: derived {} x {} cells with {}",
            module_id, rows, cols, method
        );
    } else {
        warn!(
            "Module {}: derived {} x {} cells with {}; diagnostics: {}",
            module_id, rows, cols, method, summary
        );
    }

    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::loaders::{parse, ChannelKey};
    use crate::core::series::parse_timestamp;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn times(n: usize) -> Vec<NaiveDateTime> {
        let t0 = parse_timestamp("2019-01-24T12:00:00").unwrap();
        (0..n).map(|i| t0 + chrono::Duration::minutes(i as i64)).collect()
    }

    /// One module, one segment, with the given R16 and temperature series.
    fn single_segment(r16: Vec<Option<f64>>, temperature: Vec<Option<f64>>) -> RawChannelTable {
        let n = r16.len();
        RawChannelTable::from_columns(
            times(n),
            vec![
                (ChannelKey::new(0, 0, Sensor::R16), r16),
                (ChannelKey::new(0, 0, Sensor::Temperature), temperature),
            ],
            1,
            1,
        )
        .unwrap()
    }

    #[test]
    fn test_dropped_segment_scenario() {
        let mut file = NamedTempFile::new().unwrap();
        for (i, minute) in ["00", "01", "02"].iter().enumerate() {
            let r = 0.5 + i as f64 * 0.1;
            writeln!(file, "0:0: 2019-01-24T12:{}:00 900 1 {} 1 -5.0 20.0", minute, r).unwrap();
            writeln!(file, "0:1: 2019-01-24T12:{}:01 900 1 {} 1 nan 20.0", minute, r).unwrap();
        }
        file.flush().unwrap();

        let table = parse(file.path(), 1, 2).unwrap();
        assert_eq!(table.len(), 3);

        let dataset = build_dataset(&table, 0, DerivationMethod::Vancoppenolle).unwrap();
        assert_eq!(dataset.segments(), &[0, 1]);

        for t in 0..3 {
            for variable in Variable::ALL {
                assert!(dataset.get(variable, t, 0).is_some(), "{} at t={}", variable, t);
                if variable.is_derived() {
                    assert!(dataset.get(variable, t, 1).is_none(), "{} at t={}", variable, t);
                }
            }
        }

        let dropped: Vec<&Diagnostic> = dataset
            .diagnostics()
            .iter()
            .filter(|d| d.kind() == DiagnosticKind::SegmentDropped)
            .collect();
        assert_eq!(dropped.len(), 1);
        assert_eq!(
            dropped[0],
            &Diagnostic::SegmentDropped {
                segment: 1,
                missing: vec![Sensor::Temperature]
            }
        );
        assert_eq!(dataset.diagnostics().len(), 1);
    }

    #[test]
    fn test_fractions_are_complementary() {
        let table = single_segment(
            vec![Some(0.5), Some(2.0), Some(100.0), Some(0.1)],
            vec![Some(-5.0), Some(-8.0), Some(-2.0), Some(-5.0)],
        );

        for method in DerivationMethod::ALL {
            let dataset = build_dataset(&table, 0, method).unwrap();
            for t in 0..4 {
                if let (Some(liquid), Some(solid)) = (
                    dataset.get(Variable::LiquidFraction, t, 0),
                    dataset.get(Variable::SolidFraction, t, 0),
                ) {
                    assert!((liquid + solid - 1.0).abs() < 1e-12);
                    assert!((0.0..=1.0).contains(&liquid));
                }
            }
        }
    }

    #[test]
    fn test_derived_values() {
        let table = single_segment(vec![Some(0.5)], vec![Some(-5.0)]);
        let dataset = build_dataset(&table, 0, DerivationMethod::Vancoppenolle).unwrap();

        let conductivity = dataset.get(Variable::Conductivity, 0, 0).unwrap();
        let brine = dataset.get(Variable::BrineSalinity, 0, 0).unwrap();
        let bulk = dataset.get(Variable::BulkSalinity, 0, 0).unwrap();
        let liquid = dataset.get(Variable::LiquidFraction, 0, 0).unwrap();

        assert!((conductivity - 2.0).abs() < 1e-12);
        assert!((brine - 81.19375).abs() < 1e-9);
        assert!((bulk - 27.602).abs() < 1e-2);
        assert!((liquid - bulk / brine).abs() < 1e-12);
    }

    #[test]
    fn test_out_of_range_temperature() {
        let table = single_segment(vec![Some(0.5), Some(0.5)], vec![Some(-30.0), Some(1.0)]);
        let dataset = build_dataset(&table, 0, DerivationMethod::Assur).unwrap();

        for t in 0..2 {
            assert_eq!(dataset.get(Variable::BrineSalinity, t, 0), None);
            assert_eq!(dataset.get(Variable::LiquidFraction, t, 0), None);
            assert_eq!(dataset.get(Variable::SolidFraction, t, 0), None);
        }
        assert_eq!(dataset.summary().count(DiagnosticKind::TemperatureOutOfRange), 2);
    }

    #[test]
    fn test_clamped_fraction_is_flagged() {
        let table = single_segment(vec![Some(0.1)], vec![Some(-5.0)]);
        let dataset = build_dataset(&table, 0, DerivationMethod::Vancoppenolle).unwrap();

        assert_eq!(dataset.get(Variable::LiquidFraction, 0, 0), Some(1.0));
        assert_eq!(dataset.get(Variable::SolidFraction, 0, 0), Some(0.0));
        match &dataset.diagnostics()[..] {
            [Diagnostic::FractionClamped { value, .. }] => assert!(*value > 1.0),
            other => panic!("unexpected diagnostics {:?}", other),
        }
    }

    #[test]
    fn test_bulk_outside_conversion_domain() {
        // Vancoppenolle accepts these temperatures, the bulk conversion does not.
        let table = single_segment(
            vec![Some(0.05), Some(0.05), Some(0.01)],
            vec![Some(-47.0), Some(-46.717182937823324), Some(-5.0)],
        );
        let dataset = build_dataset(&table, 0, DerivationMethod::Vancoppenolle).unwrap();

        for t in 0..3 {
            assert!(dataset.get(Variable::BrineSalinity, t, 0).is_some());
            assert_eq!(dataset.get(Variable::BulkSalinity, t, 0), None);
            assert_eq!(dataset.get(Variable::LiquidFraction, t, 0), None);
            assert_eq!(dataset.get(Variable::SolidFraction, t, 0), None);
        }
        let summary = dataset.summary();
        assert_eq!(summary.count(DiagnosticKind::BulkOutOfRange), 3);
        assert_eq!(summary.count(DiagnosticKind::FractionClamped), 0);
        assert_eq!(summary.total(), 3);
        assert!(matches!(
            dataset.diagnostics()[0],
            Diagnostic::BulkOutOfRange { time: 0, segment: 0, .. }
        ));
    }

    #[test]
    fn test_non_positive_inputs() {
        // Assur gives negative brine salinity just below zero.
        let table = single_segment(vec![Some(0.0), Some(0.5)], vec![Some(-5.0), Some(-0.01)]);
        let dataset = build_dataset(&table, 0, DerivationMethod::Assur).unwrap();

        assert_eq!(dataset.get(Variable::Conductivity, 0, 0), None);
        assert_eq!(dataset.get(Variable::BrineSalinity, 0, 0), None);
        assert_eq!(dataset.get(Variable::BrineSalinity, 1, 0), None);
        assert_eq!(dataset.get(Variable::LiquidFraction, 1, 0), None);

        let summary = dataset.summary();
        assert_eq!(summary.count(DiagnosticKind::InvalidResistance), 1);
        assert_eq!(summary.count(DiagnosticKind::NonPositiveBrine), 1);
        assert_eq!(summary.total(), 2);
    }

    #[test]
    fn test_missing_input_cell_has_no_derived_values() {
        let table = single_segment(vec![Some(0.5), None], vec![None, Some(-5.0)]);
        let dataset = build_dataset(&table, 0, DerivationMethod::Vancoppenolle).unwrap();

        for t in 0..2 {
            for variable in Variable::ALL.into_iter().filter(|v| v.is_derived()) {
                assert_eq!(dataset.get(variable, t, 0), None);
            }
        }
        assert!(dataset.diagnostics().is_empty());
    }

    #[test]
    fn test_build_is_idempotent() {
        let table = single_segment(
            vec![Some(0.5), Some(0.1), None],
            vec![Some(-5.0), Some(-6.0), Some(-7.0)],
        );
        let first = build_dataset(&table, 0, DerivationMethod::NotzWorster).unwrap();
        let second = build_dataset(&table, 0, DerivationMethod::NotzWorster).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_unknown_module_is_lookup_error() {
        let table = single_segment(vec![Some(0.5)], vec![Some(-5.0)]);
        assert_eq!(
            build_dataset(&table, 3, DerivationMethod::Assur),
            Err(ModelError::Lookup {
                module: 3,
                module_count: 1
            })
        );
    }

    #[test]
    fn test_r2_channel_selection() {
        let table = RawChannelTable::from_columns(
            times(1),
            vec![
                (ChannelKey::new(0, 0, Sensor::R2), vec![Some(0.25)]),
                (ChannelKey::new(0, 0, Sensor::Temperature), vec![Some(-5.0)]),
            ],
            1,
            1,
        )
        .unwrap();
        let options = ModelOptions {
            resistance_channel: Sensor::R2,
            cell_constant: 0.5,
            ..ModelOptions::default()
        };

        let dataset = build_dataset_with(&table, 0, DerivationMethod::Vancoppenolle, &options).unwrap();
        assert_eq!(dataset.get(Variable::Conductivity, 0, 0), Some(2.0));

        let bad = ModelOptions {
            resistance_channel: Sensor::D16,
            ..ModelOptions::default()
        };
        assert!(matches!(
            build_dataset_with(&table, 0, DerivationMethod::Vancoppenolle, &bad),
            Err(ModelError::Config(ConfigError::NotAResistanceChannel(_)))
        ));
    }

    #[test]
    fn test_variable_names_and_summary_display() {
        assert_eq!("Liquid_Fraction".parse::<Variable>(), Ok(Variable::LiquidFraction));
        assert!("porosity".parse::<Variable>().is_err());

        let mut summary = DiagnosticSummary::default();
        assert_eq!(summary.to_string(), "none");
        summary.add(DiagnosticKind::FractionClamped, 2);
        summary.add(DiagnosticKind::SegmentDropped, 1);
        assert_eq!(summary.to_string(), "segment_dropped=1, fraction_clamped=2");
    }
}
