//! Read-out and derivation routines for sea-ice lab instruments.
//!
//! This crate provides tools for:
//! - Reading salinity harp logs into a time-indexed channel table
//! - Deriving brine salinity, bulk salinity and phase fractions per segment
//! - Reading CTD (Sea-Bird, RBR), Arduino, LI-COR and light harp logs
//! - Writing results to CSV and plotting harp variables
//!
//! # Example
//!
//! ```no_run
//! use icelab_routines::{build_dataset, core::loaders::parse, DerivationMethod, Variable};
//!
//! let table = parse("harp.txt", 1, 16).unwrap();
//! let dataset = build_dataset(&table, 0, DerivationMethod::Vancoppenolle).unwrap();
//! let liquid = dataset.variable(Variable::LiquidFraction);
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod processors;
pub mod visualization;

pub use config::{ArduinoConfig, ConfigError, CtdConfig, HarpConfig, PipelineConfig};
pub use core::loaders::{ChannelKey, RawChannelTable, Sensor};
pub use processors::harp_model::{build_dataset, build_dataset_with, HarpDataset, Variable};
pub use processors::salinity::DerivationMethod;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
