//! Configuration management and validation.
//!
//! Every recognised option of a conversion run lives in [`ConversionConfig`]
//! together with its default. The configuration is validated once, before
//! any work is scheduled, and then shared read-only with every worker.

use crate::constants::{
    DEFAULT_G2CTL, DEFAULT_GRIBMAP, DEFAULT_LOCAL_TABLE_VARS, DEFAULT_MAX_LONG_FCST_HOURS,
    DEFAULT_MEMBER_COUNT, DEFAULT_PRE_EXTENSION, DEFAULT_START_STEP_LONG_FCST_HOUR,
    DEFAULT_TARGET_GRID_RESOLUTION, DEFAULT_UTC, MAX_MEMBER_COUNT,
};
use crate::error::{ConversionError, Result};
use crate::models::{FileKind, VariableSpec};
use crate::naming::FileNameTemplate;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// Prerequisite variables pulled in automatically for requested variables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyPolicy {
    /// Variable -> variables it depends on
    pub prerequisites: Vec<(VariableSpec, Vec<VariableSpec>)>,

    /// Drop auto-added prerequisites from the output
    pub strip_prerequisites: bool,
}

impl Default for DependencyPolicy {
    fn default() -> Self {
        Self {
            prerequisites: Vec::new(),
            strip_prerequisites: true,
        }
    }
}

impl DependencyPolicy {
    /// Expand a requested variable list with missing prerequisites.
    ///
    /// Returns the variables to schedule; auto-added prerequisites are
    /// included only when they are not stripped.
    pub fn resolve(&self, requested: &[VariableSpec]) -> Vec<VariableSpec> {
        let mut resolved = requested.to_vec();
        for (variable, dependencies) in &self.prerequisites {
            if !requested.contains(variable) {
                continue;
            }
            for dependency in dependencies {
                if resolved.contains(dependency) {
                    continue;
                }
                if self.strip_prerequisites {
                    debug!(
                        "Prerequisite {} of {} will not be written to the output",
                        dependency, variable
                    );
                } else {
                    resolved.push(dependency.clone());
                }
            }
        }
        resolved
    }
}

/// Configuration for an ensemble conversion run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionConfig {
    /// Root of the model output; dated subdirectories hold member files
    pub in_path: PathBuf,

    /// Root of the converted output; dated subdirectories are created
    pub out_path: PathBuf,

    /// Target grid resolution in degrees (None disables regridding)
    pub target_grid_resolution: Option<f64>,

    /// Latitude restriction (south, north)
    pub latitude: Option<(f64, f64)>,

    /// Longitude restriction (west, east)
    pub longitude: Option<(f64, f64)>,

    /// Pressure levels to keep, in hPa
    pub pressure_levels: Option<Vec<u32>>,

    /// Model UTC cycle as two digits
    pub utc: String,

    /// First forecast hour and step of long forecast files
    pub start_step_long_fcst_hour: u32,

    /// Maximum long forecast hours produced by the model
    pub max_long_fcst_hours: u32,

    /// Number of ensemble members, control run included
    pub member_count: usize,

    /// Remove and regenerate existing outputs
    pub overwrite: bool,

    /// Variables to convert, in output order (empty converts everything)
    pub convert_vars: Vec<VariableSpec>,

    /// Prerequisite handling for requested variables
    pub dependencies: DependencyPolicy,

    /// Output file name structure for forecast files
    pub fcst_file_name_structure: FileNameTemplate,

    /// Marker identifying intermediate outputs
    pub pre_extension: String,

    /// Generate control and index side-car files
    pub create_ctl_idx_files: bool,

    /// Control file generator executable
    pub g2ctl_path: PathBuf,

    /// Index file generator executable
    pub gribmap_path: PathBuf,

    /// Script invoked after each converted date
    pub callback_script: Option<PathBuf>,

    /// GRIB2 key overrides applied after all built-in rules
    pub grib2_table_overrides: Vec<(String, i64)>,

    /// Variables encoded against the organisation's local table
    pub local_table_vars: Vec<String>,

    /// Concurrent forecast-hour-files
    pub outer_workers: usize,

    /// Concurrent jobs within one forecast-hour-file
    pub inner_workers: usize,

    /// Verbose diagnostics
    pub debug: bool,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        let cores = num_cpus::get().max(1);
        Self {
            in_path: PathBuf::new(),
            out_path: PathBuf::new(),
            target_grid_resolution: Some(DEFAULT_TARGET_GRID_RESOLUTION),
            latitude: None,
            longitude: None,
            pressure_levels: None,
            utc: DEFAULT_UTC.to_string(),
            start_step_long_fcst_hour: DEFAULT_START_STEP_LONG_FCST_HOUR,
            max_long_fcst_hours: DEFAULT_MAX_LONG_FCST_HOURS,
            member_count: DEFAULT_MEMBER_COUNT,
            overwrite: false,
            convert_vars: Vec::new(),
            dependencies: DependencyPolicy::default(),
            fcst_file_name_structure: FileNameTemplate::default(),
            pre_extension: DEFAULT_PRE_EXTENSION.to_string(),
            create_ctl_idx_files: true,
            g2ctl_path: PathBuf::from(DEFAULT_G2CTL),
            gribmap_path: PathBuf::from(DEFAULT_GRIBMAP),
            callback_script: None,
            grib2_table_overrides: Vec::new(),
            local_table_vars: DEFAULT_LOCAL_TABLE_VARS
                .iter()
                .map(|name| name.to_string())
                .collect(),
            outer_workers: cores,
            inner_workers: cores,
            debug: false,
        }
    }
}

impl ConversionConfig {
    /// Create a configuration for the given input and output roots
    pub fn new(in_path: PathBuf, out_path: PathBuf) -> Self {
        Self {
            in_path,
            out_path,
            ..Self::default()
        }
    }

    pub fn with_target_grid_resolution(mut self, resolution: Option<f64>) -> Self {
        self.target_grid_resolution = resolution;
        self
    }

    pub fn with_latitude(mut self, bounds: (f64, f64)) -> Self {
        self.latitude = Some(bounds);
        self
    }

    pub fn with_longitude(mut self, bounds: (f64, f64)) -> Self {
        self.longitude = Some(bounds);
        self
    }

    pub fn with_pressure_levels(mut self, levels: Vec<u32>) -> Self {
        self.pressure_levels = Some(levels);
        self
    }

    pub fn with_utc(mut self, utc: impl Into<String>) -> Self {
        self.utc = utc.into();
        self
    }

    pub fn with_start_step(mut self, start_step: u32) -> Self {
        self.start_step_long_fcst_hour = start_step;
        self
    }

    pub fn with_max_long_fcst_hours(mut self, hours: u32) -> Self {
        self.max_long_fcst_hours = hours;
        self
    }

    pub fn with_member_count(mut self, member_count: usize) -> Self {
        self.member_count = member_count;
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_convert_vars(mut self, vars: Vec<VariableSpec>) -> Self {
        self.convert_vars = vars;
        self
    }

    pub fn with_dependencies(mut self, policy: DependencyPolicy) -> Self {
        self.dependencies = policy;
        self
    }

    pub fn with_ctl_idx_files(mut self, enabled: bool) -> Self {
        self.create_ctl_idx_files = enabled;
        self
    }

    pub fn with_callback_script(mut self, script: PathBuf) -> Self {
        self.callback_script = Some(script);
        self
    }

    pub fn with_grib2_table_overrides(mut self, overrides: Vec<(String, i64)>) -> Self {
        self.grib2_table_overrides = overrides;
        self
    }

    pub fn with_workers(mut self, outer: usize, inner: usize) -> Self {
        self.outer_workers = outer;
        self.inner_workers = inner;
        self
    }

    /// Input file kind selected by the long forecast start step
    pub fn file_kind(&self) -> Result<FileKind> {
        FileKind::from_start_step(self.start_step_long_fcst_hour).ok_or_else(|| {
            ConversionError::configuration(format!(
                "start_step_long_fcst_hour must be 6 or 24, got {}",
                self.start_step_long_fcst_hour
            ))
        })
    }

    /// Variables to schedule once prerequisites are resolved
    pub fn resolved_convert_vars(&self) -> Vec<VariableSpec> {
        self.dependencies.resolve(&self.convert_vars)
    }

    /// Validate the configuration before any processing begins
    pub fn validate(&self) -> Result<()> {
        for (name, path) in [("in_path", &self.in_path), ("out_path", &self.out_path)] {
            if path.as_os_str().is_empty() {
                return Err(ConversionError::configuration(format!(
                    "'{}' path is not defined",
                    name
                )));
            }
            if !path.exists() {
                return Err(ConversionError::configuration(format!(
                    "'{} = {}' path does not exist",
                    name,
                    path.display()
                )));
            }
        }

        if let Some(resolution) = self.target_grid_resolution {
            if !resolution.is_finite() || resolution <= 0.0 {
                return Err(ConversionError::configuration(format!(
                    "targetGridResolution must be a positive number, got {}",
                    resolution
                )));
            }
        }

        for (name, bounds) in [("latitude", self.latitude), ("longitude", self.longitude)] {
            if let Some((first, last)) = bounds {
                if first > last {
                    return Err(ConversionError::configuration(format!(
                        "First {} must be less than second {}",
                        name, name
                    )));
                }
            }
        }

        if self.utc.len() != 2 || self.utc.parse::<u32>().map_or(true, |utc| utc > 23) {
            return Err(ConversionError::configuration(format!(
                "utc must be a two digit hour, got '{}'",
                self.utc
            )));
        }

        self.file_kind()?;

        if self.member_count == 0 {
            return Err(ConversionError::configuration(
                "member_count must include at least the control run",
            ));
        }
        if self.member_count > MAX_MEMBER_COUNT {
            return Err(ConversionError::configuration(format!(
                "member_count {} exceeds the GRIB2 limit of {} members",
                self.member_count, MAX_MEMBER_COUNT
            )));
        }
        if self.outer_workers == 0 || self.inner_workers == 0 {
            return Err(ConversionError::configuration(
                "worker counts must be at least 1",
            ));
        }

        for variable in &self.convert_vars {
            variable.stash_code()?;
        }

        self.fcst_file_name_structure.validate()?;

        Ok(())
    }
}

/// One date or an inclusive range of dates to convert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateRange {
    Single(NaiveDate),
    Range(NaiveDate, NaiveDate),
}

impl DateRange {
    /// Parse `YYYYMMDD` start and optional end dates
    pub fn parse(start: &str, end: Option<&str>) -> Result<Self> {
        let parse = |value: &str| {
            NaiveDate::parse_from_str(value, "%Y%m%d").map_err(|e| {
                ConversionError::configuration(format!("invalid date '{}': {}", value, e))
            })
        };

        let start_date = parse(start)?;
        match end {
            None => Ok(DateRange::Single(start_date)),
            Some(end) => {
                let end_date = parse(end)?;
                if start_date > end_date {
                    return Err(ConversionError::configuration(
                        "Start date must be earlier than end date",
                    ));
                }
                if start_date == end_date {
                    return Err(ConversionError::configuration(
                        "Both start date and end date are same",
                    ));
                }
                Ok(DateRange::Range(start_date, end_date))
            }
        }
    }

    /// Dates in order, one per day
    pub fn days(&self) -> Vec<NaiveDate> {
        match *self {
            DateRange::Single(date) => vec![date],
            DateRange::Range(start, end) => {
                let mut days = Vec::new();
                let mut day = start;
                while day <= end {
                    days.push(day);
                    day += Duration::days(1);
                }
                days
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn valid_config(temp_dir: &TempDir) -> ConversionConfig {
        let input = temp_dir.path().join("input");
        let output = temp_dir.path().join("output");
        std::fs::create_dir_all(&input).unwrap();
        std::fs::create_dir_all(&output).unwrap();
        ConversionConfig::new(input, output)
    }

    #[test]
    fn test_defaults() {
        let config = ConversionConfig::default();
        assert_eq!(config.target_grid_resolution, Some(0.25));
        assert_eq!(config.utc, "00");
        assert_eq!(config.max_long_fcst_hours, 240);
        assert_eq!(config.member_count, 45);
        assert!(!config.overwrite);
        assert!(config.create_ctl_idx_files);
        assert_eq!(config.local_table_vars.len(), 4);
    }

    #[test]
    fn test_validate_accepts_valid_config() {
        let temp_dir = TempDir::new().unwrap();
        assert!(valid_config(&temp_dir).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_paths() {
        let err = ConversionConfig::default().validate().unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("in_path"));

        let temp_dir = TempDir::new().unwrap();
        let config = ConversionConfig::new(
            temp_dir.path().join("missing"),
            temp_dir.path().to_path_buf(),
        );
        assert!(config.validate().unwrap_err().to_string().contains("does not exist"));
    }

    #[test]
    fn test_validate_rejects_bad_numbers() {
        let temp_dir = TempDir::new().unwrap();

        let config = valid_config(&temp_dir).with_target_grid_resolution(Some(-1.0));
        assert!(config.validate().is_err());

        let config = valid_config(&temp_dir).with_latitude((10.0, -10.0));
        assert!(config.validate().is_err());

        let config = valid_config(&temp_dir).with_utc("7");
        assert!(config.validate().is_err());

        let config = valid_config(&temp_dir).with_start_step(12);
        assert!(config.validate().is_err());

        let config = valid_config(&temp_dir).with_member_count(MAX_MEMBER_COUNT + 1);
        assert!(config.validate().is_err());
        let config = valid_config(&temp_dir).with_member_count(MAX_MEMBER_COUNT);
        config.validate().unwrap();

        let config = valid_config(&temp_dir).with_convert_vars(vec![VariableSpec::new(
            "x_wind", "bogus",
        )]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_dependency_resolution() {
        let cape = VariableSpec::new("cape", "m01s05i233");
        let temp = VariableSpec::new("air_temperature", "m01s03i236");
        let policy = DependencyPolicy {
            prerequisites: vec![(cape.clone(), vec![temp.clone()])],
            strip_prerequisites: false,
        };
        assert_eq!(policy.resolve(&[cape.clone()]), vec![cape.clone(), temp.clone()]);

        let stripping = DependencyPolicy {
            strip_prerequisites: true,
            ..policy
        };
        assert_eq!(stripping.resolve(&[cape.clone()]), vec![cape.clone()]);

        let config = ConversionConfig::default()
            .with_convert_vars(vec![cape.clone()])
            .with_dependencies(policy_with(false, &cape, &temp));
        assert_eq!(config.resolved_convert_vars(), vec![cape, temp]);
    }

    fn policy_with(strip: bool, variable: &VariableSpec, dependency: &VariableSpec) -> DependencyPolicy {
        DependencyPolicy {
            prerequisites: vec![(variable.clone(), vec![dependency.clone()])],
            strip_prerequisites: strip,
        }
    }

    #[test]
    fn test_date_range_parsing() {
        let single = DateRange::parse("20160315", None).unwrap();
        assert_eq!(single.days().len(), 1);

        let range = DateRange::parse("20160315", Some("20160318")).unwrap();
        let days = range.days();
        assert_eq!(days.len(), 4);
        assert_eq!(days[3].format("%Y%m%d").to_string(), "20160318");

        assert!(DateRange::parse("20160318", Some("20160315")).is_err());
        assert!(DateRange::parse("20160315", Some("20160315")).is_err());
        assert!(DateRange::parse("2016-03-15", None).is_err());
    }
}
