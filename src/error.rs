//! Error handling for ensemble conversion operations.
//!
//! Configuration and missing-input-directory errors are fatal for a run.
//! Every other variant is raised inside a single job or forecast-hour-file
//! and is logged at that boundary without affecting sibling work.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Input data path does not exist: {path}")]
    InputDirectoryNotFound { path: PathBuf },

    #[error("Input file does not exist: {path}")]
    MissingInput { path: PathBuf },

    #[error("No field matching {variable} (STASH {stash}) at forecast hour {forecast_hour} in {path}")]
    FieldNotFound {
        path: PathBuf,
        variable: String,
        stash: String,
        forecast_hour: f64,
    },

    #[error("Invalid PP file {path}: {reason}")]
    InvalidPpFile { path: PathBuf, reason: String },

    #[error("Invalid STASH code '{code}', expected form mXXsYYiZZZ")]
    InvalidStash { code: String },

    #[error("Inconsistent field {variable}: {reason}")]
    InvalidField { variable: String, reason: String },

    #[error("Regrid failed for {variable}: {reason}")]
    Regrid { variable: String, reason: String },

    #[error("Ensemble member {member} of {variable} does not match the control run: {reason}")]
    EnsembleMismatch {
        variable: String,
        member: usize,
        reason: String,
    },

    #[error("Encoding failed for {variable}: {reason}")]
    Encoding { variable: String, reason: String },

    #[error("Unknown GRIB2 key '{key}'")]
    UnknownKey { key: String },

    #[error("Value {value} out of range for GRIB2 key '{key}'")]
    KeyValueOutOfRange { key: String, value: i64 },

    #[error("Worker pool '{pool}' cannot be created inside a restricted worker")]
    NestedPool { pool: String },

    #[error("Worker task '{task}' did not complete: {reason}")]
    WorkerFailed { task: String, reason: String },

    #[error("Side-car generation failed for {path}: {reason}")]
    SideCar { path: PathBuf, reason: String },

    #[error("Callback script failed: {reason}")]
    Callback { reason: String },
}

impl ConversionError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an inconsistent field error
    pub fn invalid_field(variable: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            variable: variable.into(),
            reason: reason.into(),
        }
    }

    /// Create a regrid error
    pub fn regrid(variable: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Regrid {
            variable: variable.into(),
            reason: reason.into(),
        }
    }

    /// Create an encoding error
    pub fn encoding(variable: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Encoding {
            variable: variable.into(),
            reason: reason.into(),
        }
    }

    /// Create a PP format error
    pub fn invalid_pp(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidPpFile {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error must abort the whole run rather than a single job
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. } | Self::InputDirectoryNotFound { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ConversionError>;
