//! eps2grib Library
//!
//! Converts Unified Model ensemble forecast output into WMO GRIB2 files.
//!
//! This library provides tools for:
//! - Reading fields from PP member files by STASH code and forecast hour
//! - Regridding onto a regular latitude/longitude grid
//! - Stacking ensemble members along a realization axis
//! - Encoding one GRIB2 message per member and pressure level
//! - Naming outputs from a file name template and detecting stale outputs
//! - Scheduling the conversion over a two-level worker pool

pub mod config;
pub mod constants;
pub mod context;
pub mod ensemble;
pub mod error;
pub mod grib;
pub mod models;
pub mod naming;
pub mod output_status;
pub mod processor;
pub mod regrid;
pub mod store;

// CLI modules
pub mod cli {
    pub mod args;
    pub mod commands;
}

// Re-export commonly used types
pub use config::{ConversionConfig, DateRange};
pub use context::RunContext;
pub use error::{ConversionError, Result};
pub use models::{RunSummary, VariableSpec};
pub use processor::ConversionScheduler;
pub use store::{FieldStore, MemoryFieldStore, PpFieldStore};
