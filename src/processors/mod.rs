//! Instrument readers and the harp derivation model.

pub mod arduino;
pub mod ctd;
pub mod harp_model;
pub mod licor;
pub mod light_harp;
pub mod salinity;

// Re-export key types for convenience
pub use arduino::read_arduino;
pub use ctd::{read_ctd, read_rbr, read_seabird, read_seabird_serial_log};
pub use harp_model::{
    build_dataset, build_dataset_with, Diagnostic, DiagnosticKind, DiagnosticSummary, HarpDataset,
    ModelError, ModelOptions, Variable,
};
pub use licor::read_licor;
pub use light_harp::{read_light_harp, LightKey};
pub use salinity::{
    conductivity_from_resistance, freezing_point, practical_salinity, DerivationMethod, SalinityError,
};
