//! Core data types and I/O operations.

pub mod loaders;
pub mod series;
pub mod transforms;
pub mod writers;

pub use loaders::{load_harp_log, parse, ChannelKey, LoaderError, RawChannelTable, ReadDiagnostic, Sensor};
pub use series::{InstrumentError, InstrumentTable};
pub use transforms::{flatten, reshape, Grid, ModuleFrame};
pub use writers::{write_dataset_csv, write_raw_table_csv, write_table_csv, WriteError};
