//! Input discovery for a conversion run.
//!
//! Enumerates the forecast-hour-files of a date, checks that every
//! ensemble member file exists and selects the variables to convert
//! from each file.

use crate::constants::FORECAST_FILE_STEP_HOURS;
use crate::models::{FileKind, VariableSpec};
use crate::store::FieldStore;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One forecast-hour-file and its member inputs
#[derive(Debug, Clone)]
pub struct ForecastHourFile {
    /// Three digit hour label, e.g. `"024"`
    pub hour: String,
    pub kind: FileKind,
    pub member_files: Vec<PathBuf>,
}

impl ForecastHourFile {
    pub fn hour_number(&self) -> u32 {
        self.hour.parse().unwrap_or_default()
    }

    /// Forecast hours extracted from this file
    pub fn forecast_hours(&self) -> Vec<u32> {
        self.kind.forecast_hours(self.hour_number())
    }
}

/// Hour labels of the forecast-hour-files below `max_long_fcst_hours`.
///
/// The file starting at hour `h` holds forecasts up to `h + 24`, so the
/// last file starts one step before the maximum.
pub fn forecast_hour_labels(max_long_fcst_hours: u32) -> Vec<String> {
    (0..max_long_fcst_hours)
        .step_by(FORECAST_FILE_STEP_HOURS as usize)
        .map(|hour| format!("{:03}", hour))
        .collect()
}

/// Every forecast-hour-file of a run with its member paths
pub fn forecast_hour_files(
    kind: FileKind,
    in_dir: &Path,
    max_long_fcst_hours: u32,
    member_count: usize,
) -> Vec<ForecastHourFile> {
    forecast_hour_labels(max_long_fcst_hours)
        .into_iter()
        .map(|hour| ForecastHourFile {
            member_files: kind.member_files(in_dir, &hour, member_count),
            hour,
            kind,
        })
        .collect()
}

/// Member files the store cannot find
pub fn missing_members(store: &dyn FieldStore, files: &[PathBuf]) -> Vec<PathBuf> {
    files
        .iter()
        .filter(|path| !store.exists(path))
        .cloned()
        .collect()
}

/// Variables to convert from a file of `kind`.
///
/// With no requested variables every variable of the file kind is used;
/// otherwise the requested ones the file provides, in requested order.
pub fn applicable_variables(kind: FileKind, requested: &[VariableSpec]) -> Vec<VariableSpec> {
    let available = kind.variables();
    if requested.is_empty() {
        return available;
    }
    let selected: Vec<VariableSpec> = requested
        .iter()
        .filter(|variable| available.contains(variable))
        .cloned()
        .collect();
    debug!(
        "{} of {} requested variables available in {:?} files",
        selected.len(),
        requested.len(),
        kind
    );
    selected
}
