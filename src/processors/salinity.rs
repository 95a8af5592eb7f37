//! Salinity relations for sea ice.
//!
//! Brine salinity is a function of the in-situ temperature alone (pressure
//! for the freezing point inversion) and comes in several empirical flavours,
//! selected through [`DerivationMethod`]. Bulk salinity is always derived
//! from conductivity with the Practical Salinity Scale 1978.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::config::ConfigError;

/// Errors from evaluating a salinity relation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SalinityError {
    #[error("temperature {temperature} °C outside valid range {range} of the {method} relation")]
    OutOfRange {
        method: DerivationMethod,
        temperature: f64,
        range: TemperatureRange,
    },

    #[error("conductivity {0} S/m is negative or not finite")]
    InvalidConductivity(f64),

    #[error("temperature {temperature} °C outside bulk salinity range {range}")]
    BulkTemperatureOutOfRange { temperature: f64, range: TemperatureRange },

    #[error("conductivity ratio {ratio:.3} above bulk salinity limit {max}")]
    RatioOutOfRange { ratio: f64, max: f64 },
}

/// Valid temperature interval of a relation [°C].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureRange {
    pub min: f64,
    pub max: f64,
    /// Whether `max` itself is part of the range.
    pub max_inclusive: bool,
}

impl TemperatureRange {
    pub fn contains(&self, temperature: f64) -> bool {
        temperature >= self.min
            && if self.max_inclusive {
                temperature <= self.max
            } else {
                temperature < self.max
            }
    }
}

impl fmt::Display for TemperatureRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let close = if self.max_inclusive { ']' } else { ')' };
        write!(f, "[{:.3}, {:.3}{}", self.min, self.max, close)
    }
}

/// Cubic brine salinity fit `S = a + bT + cT^2 + dT^3` [g/kg].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CubicFit {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub min_temperature: f64,
}

impl CubicFit {
    #[inline]
    pub fn eval(&self, t: f64) -> f64 {
        self.a + t * (self.b + t * (self.c + t * self.d))
    }
}

/// Assur (1958), as tabulated by Notz (2005).
pub const ASSUR: CubicFit = CubicFit {
    a: -1.20,
    b: -21.8,
    c: -0.919,
    d: -0.0178,
    min_temperature: -22.9,
};

/// Notz and Worster (2009).
pub const NOTZ_WORSTER: CubicFit = CubicFit {
    a: 0.0,
    b: -21.4,
    c: -0.886,
    d: -0.0170,
    min_temperature: -22.9,
};

/// Vancoppenolle et al. (2019).
pub const VANCOPPENOLLE: CubicFit = CubicFit {
    a: 0.0,
    b: -18.7,
    c: -0.519,
    d: -0.00535,
    min_temperature: -54.0,
};

/// Salinity interval in which the UNESCO freezing point equation holds [g/kg].
pub const FREEZING_POINT_SALINITY: (f64, f64) = (4.0, 40.0);

/// Closed set of brine salinity relations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DerivationMethod {
    Assur,
    NotzWorster,
    Vancoppenolle,
    /// Inversion of the UNESCO (1983) seawater freezing point.
    FreezingPoint,
}

impl DerivationMethod {
    pub const ALL: [DerivationMethod; 4] = [
        DerivationMethod::Assur,
        DerivationMethod::NotzWorster,
        DerivationMethod::Vancoppenolle,
        DerivationMethod::FreezingPoint,
    ];

    /// Canonical configuration name.
    pub fn name(self) -> &'static str {
        match self {
            DerivationMethod::Assur => "assur",
            DerivationMethod::NotzWorster => "notz_worster",
            DerivationMethod::Vancoppenolle => "vancoppenolle",
            DerivationMethod::FreezingPoint => "freezing_point",
        }
    }

    fn fit(self) -> Option<&'static CubicFit> {
        match self {
            DerivationMethod::Assur => Some(&ASSUR),
            DerivationMethod::NotzWorster => Some(&NOTZ_WORSTER),
            DerivationMethod::Vancoppenolle => Some(&VANCOPPENOLLE),
            DerivationMethod::FreezingPoint => None,
        }
    }

    /// Temperatures for which the relation is defined at `pressure_dbar`.
    pub fn valid_range(self, pressure_dbar: f64) -> TemperatureRange {
        match self.fit() {
            Some(fit) => TemperatureRange {
                min: fit.min_temperature,
                max: 0.0,
                max_inclusive: false,
            },
            None => {
                let (s_min, s_max) = FREEZING_POINT_SALINITY;
                TemperatureRange {
                    min: freezing_point(s_max, pressure_dbar),
                    max: freezing_point(s_min, pressure_dbar),
                    max_inclusive: true,
                }
            }
        }
    }

    /// Brine salinity [g/kg] at `temperature` [°C] and `pressure_dbar`.
    ///
    /// # Errors
    ///
    /// [`SalinityError::OutOfRange`] when the temperature lies outside
    /// [`valid_range`](Self::valid_range) or is not finite.
    pub fn brine_salinity(self, temperature: f64, pressure_dbar: f64) -> Result<f64, SalinityError> {
        let range = self.valid_range(pressure_dbar);
        if !range.contains(temperature) {
            return Err(SalinityError::OutOfRange {
                method: self,
                temperature,
                range,
            });
        }

        Ok(match self.fit() {
            Some(fit) => fit.eval(temperature),
            None => invert_freezing_point(temperature, pressure_dbar),
        })
    }
}

impl fmt::Display for DerivationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DerivationMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" => Err(ConfigError::MissingMethod),
            "assur" => Ok(DerivationMethod::Assur),
            "notz_worster" | "n&w09" | "nw09" => Ok(DerivationMethod::NotzWorster),
            "vancoppenolle" => Ok(DerivationMethod::Vancoppenolle),
            "freezing_point" | "unesco" => Ok(DerivationMethod::FreezingPoint),
            _ => Err(ConfigError::UnknownMethod(s.to_string())),
        }
    }
}

/// UNESCO (1983) freezing point of seawater [°C].
pub fn freezing_point(salinity: f64, pressure_dbar: f64) -> f64 {
    -0.0575 * salinity + 1.710523e-3 * salinity.powf(1.5) - 2.154996e-4 * salinity * salinity
        - 7.53e-4 * pressure_dbar
}

fn freezing_point_slope(salinity: f64) -> f64 {
    -0.0575 + 1.5 * 1.710523e-3 * salinity.sqrt() - 2.0 * 2.154996e-4 * salinity
}

/// Salinity whose freezing point is `temperature`, by Newton iteration.
fn invert_freezing_point(temperature: f64, pressure_dbar: f64) -> f64 {
    let (s_min, s_max) = FREEZING_POINT_SALINITY;
    // Linear term alone is a close first guess.
    let mut s = (-(temperature + 7.53e-4 * pressure_dbar) / 0.0575).clamp(s_min, s_max);
    for _ in 0..50 {
        let step = (freezing_point(s, pressure_dbar) - temperature) / freezing_point_slope(s);
        s = (s - step).clamp(0.0, 2.0 * s_max);
        if step.abs() < 1e-12 {
            break;
        }
    }
    s
}

/// Conductivity of standard seawater (S = 35, T68 = 15 °C, p = 0) [S/m].
pub const C_35_15_0: f64 = 4.2914;

const PSS_A: [f64; 6] = [0.0080, -0.1692, 25.3851, 14.0941, -7.0261, 2.7081];
const PSS_B: [f64; 6] = [0.0005, -0.0056, -0.0066, -0.0375, 0.0636, -0.0144];
const PSS_K: f64 = 0.0162;
const PSS_C: [f64; 5] = [6.766097e-1, 2.00564e-2, 1.104259e-4, -6.9698e-7, 1.0031e-9];
const PSS_D: [f64; 4] = [3.426e-2, 4.464e-4, 4.215e-1, -3.107e-3];
const PSS_E: [f64; 3] = [2.070e-5, -6.370e-10, 3.989e-15];

fn poly(coefs: &[f64], x: f64) -> f64 {
    coefs.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

/// Temperature interval over which bulk salinity is evaluated [°C, ITS-90].
///
/// PSS-78 is fitted for -2 to 35 °C. Below about -35 °C its temperature
/// polynomial `rt` approaches zero and the `dt / (1 + k dt)` term has a pole
/// near -46.7 °C, so colder cells get no bulk salinity.
pub const BULK_TEMPERATURE_RANGE: TemperatureRange = TemperatureRange {
    min: -30.0,
    max: 35.0,
    max_inclusive: true,
};

/// Largest temperature compensated conductivity ratio `Rt` accepted for bulk
/// salinity (about 260 at 15 °C).
pub const BULK_MAX_RATIO: f64 = 5.0;

/// Temperature compensated ratio `Rt` of PSS-78 for `r = C / C(35,15,0)`.
fn reduced_ratio(r: f64, t68: f64, pressure_dbar: f64) -> f64 {
    let p = pressure_dbar;
    let rt_lc = poly(&PSS_C, t68);
    let rp = 1.0
        + p * (PSS_E[0] + PSS_E[1] * p + PSS_E[2] * p * p)
            / (1.0 + PSS_D[0] * t68 + PSS_D[1] * t68 * t68 + (PSS_D[2] + PSS_D[3] * t68) * r);
    r / (rp * rt_lc)
}

/// PSS-78 from `Rt` at `t68` [°C, IPTS-68].
fn pss78_from_reduced(rt: f64, t68: f64) -> f64 {
    let x = rt.sqrt();
    let dt = t68 - 15.0;
    poly(&PSS_A, x) + dt / (1.0 + PSS_K * dt) * poly(&PSS_B, x)
}

/// Practical salinity (PSS-78) from conductivity [S/m], temperature [°C,
/// ITS-90] and pressure [dbar].
///
/// Evaluated beyond the nominal 2 to 42 PSU range, which is what sea-ice
/// brine conductivities need, but only inside [`BULK_TEMPERATURE_RANGE`] and
/// up to [`BULK_MAX_RATIO`].
///
/// # Errors
///
/// [`SalinityError::InvalidConductivity`] for negative or non-finite
/// conductivity, [`SalinityError::BulkTemperatureOutOfRange`] and
/// [`SalinityError::RatioOutOfRange`] outside the evaluated domain.
pub fn practical_salinity(
    conductivity: f64,
    temperature: f64,
    pressure_dbar: f64,
) -> Result<f64, SalinityError> {
    if !(conductivity.is_finite() && conductivity >= 0.0) {
        return Err(SalinityError::InvalidConductivity(conductivity));
    }
    if !BULK_TEMPERATURE_RANGE.contains(temperature) {
        return Err(SalinityError::BulkTemperatureOutOfRange {
            temperature,
            range: BULK_TEMPERATURE_RANGE,
        });
    }
    let t68 = 1.00024 * temperature;
    let rt = reduced_ratio(conductivity / C_35_15_0, t68, pressure_dbar);
    if !(rt.is_finite() && (0.0..=BULK_MAX_RATIO).contains(&rt)) {
        return Err(SalinityError::RatioOutOfRange {
            ratio: rt,
            max: BULK_MAX_RATIO,
        });
    }
    Ok(pss78_from_reduced(rt, t68))
}

/// Conductivity [S/m] of a wire pair with the given resistance [Ohm].
///
/// `None` for non-positive or non-finite resistance.
pub fn conductivity_from_resistance(resistance: f64, cell_constant: f64) -> Option<f64> {
    if resistance.is_finite() && resistance > 0.0 {
        Some(cell_constant / resistance)
    } else {
        None
    }
}
