//! Command-line argument definitions for eps2grib
//!
//! This module defines the CLI interface using the clap derive API and maps
//! the parsed flags onto a [`ConversionConfig`].

use crate::config::{ConversionConfig, DateRange, DependencyPolicy};
use crate::constants::{
    DEFAULT_G2CTL, DEFAULT_GRIBMAP, DEFAULT_MAX_LONG_FCST_HOURS, DEFAULT_MEMBER_COUNT,
    DEFAULT_START_STEP_LONG_FCST_HOUR, DEFAULT_TARGET_GRID_RESOLUTION, DEFAULT_UTC,
};
use crate::error::{ConversionError, Result};
use crate::models::VariableSpec;
use clap::Parser;
use std::path::PathBuf;
use std::str::FromStr;

/// CLI arguments for the ensemble GRIB2 converter
///
/// Converts Unified Model ensemble member files for one date, or an
/// inclusive range of dates, into hourly GRIB2 files holding every member.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "eps2grib",
    version,
    about = "Convert Unified Model ensemble forecasts into ensemble GRIB2 files",
    long_about = "Reads the PP files of every ensemble member, optionally regrids them onto a \
                  regular latitude/longitude grid, stacks the members along a realization axis \
                  and appends one GRIB2 message per member to a file per forecast hour. GrADS \
                  control and index files are created next to every output."
)]
pub struct Args {
    /// First (or only) date to convert, YYYYMMDD
    #[arg(value_name = "DATE")]
    pub date: String,

    /// Last date to convert, YYYYMMDD (inclusive)
    #[arg(short = 'e', long = "end-date", value_name = "DATE")]
    pub end_date: Option<String>,

    /// Root of the input tree
    ///
    /// Member files are read from <PATH>/<YYYYMMDD>/.
    #[arg(short = 'i', long = "input", value_name = "PATH")]
    pub input_path: PathBuf,

    /// Root of the output tree
    ///
    /// GRIB2 files are written to <PATH>/<YYYYMMDD>/.
    #[arg(short = 'o', long = "output", value_name = "PATH")]
    pub output_path: PathBuf,

    /// Target grid spacing in degrees
    #[arg(
        short = 'r',
        long = "resolution",
        value_name = "DEGREES",
        default_value_t = DEFAULT_TARGET_GRID_RESOLUTION,
        conflicts_with = "no_regrid"
    )]
    pub resolution: f64,

    /// Keep the native model grid
    #[arg(long = "no-regrid")]
    pub no_regrid: bool,

    /// Latitude bounds as FIRST,LAST
    #[arg(long = "latitude", value_name = "FIRST,LAST", allow_hyphen_values = true)]
    pub latitude: Option<Bounds>,

    /// Longitude bounds as FIRST,LAST
    #[arg(long = "longitude", value_name = "FIRST,LAST", allow_hyphen_values = true)]
    pub longitude: Option<Bounds>,

    /// Pressure levels to extract (hPa, comma-separated)
    #[arg(long = "pressure-levels", value_name = "LIST", value_delimiter = ',')]
    pub pressure_levels: Vec<u32>,

    /// Model cycle, two digit hour
    #[arg(long = "utc", value_name = "HH", default_value = DEFAULT_UTC)]
    pub utc: String,

    /// Long forecast start step in hours (6 reads pb files, 24 reads xbfti files)
    #[arg(
        long = "start-step",
        value_name = "HOURS",
        default_value_t = DEFAULT_START_STEP_LONG_FCST_HOUR
    )]
    pub start_step: u32,

    /// Longest forecast hour to convert
    #[arg(
        long = "max-hours",
        value_name = "HOURS",
        default_value_t = DEFAULT_MAX_LONG_FCST_HOURS
    )]
    pub max_hours: u32,

    /// Ensemble size including the control run
    #[arg(
        short = 'n',
        long = "members",
        value_name = "COUNT",
        default_value_t = DEFAULT_MEMBER_COUNT
    )]
    pub members: usize,

    /// Variables to convert as NAME:STASH (comma-separated)
    ///
    /// Defaults to every variable of the selected file kind.
    #[arg(long = "vars", value_name = "LIST")]
    pub vars: Option<VariableList>,

    /// Variables another one needs, as NAME:STASH=NAME:STASH[,NAME:STASH]
    ///
    /// Repeat for each variable with prerequisites. Missing prerequisites
    /// of a requested variable are only written with --keep-prerequisites.
    #[arg(long = "prerequisite", value_name = "VAR=LIST")]
    pub prerequisites: Vec<Prerequisite>,

    /// Also convert prerequisites that were not requested
    #[arg(long = "keep-prerequisites")]
    pub keep_prerequisites: bool,

    /// GRIB2 keys to set on every message as KEY=VALUE (comma-separated)
    #[arg(long = "grib2-override", value_name = "LIST")]
    pub grib2_overrides: Option<OverrideList>,

    /// Remove and regenerate existing outputs
    #[arg(long = "overwrite")]
    pub overwrite: bool,

    /// Skip GrADS control and index file generation
    #[arg(long = "no-ctl-idx")]
    pub no_ctl_idx: bool,

    /// g2ctl executable
    #[arg(long = "g2ctl", value_name = "PATH", default_value = DEFAULT_G2CTL)]
    pub g2ctl: PathBuf,

    /// gribmap executable
    #[arg(long = "gribmap", value_name = "PATH", default_value = DEFAULT_GRIBMAP)]
    pub gribmap: PathBuf,

    /// Script run after each date with --date, --outpath, --oftype and --utc
    #[arg(long = "callback", value_name = "SCRIPT")]
    pub callback: Option<PathBuf>,

    /// Forecast-hour-files converted concurrently
    #[arg(short = 'j', long = "workers", value_name = "COUNT")]
    pub workers: Option<usize>,

    /// Forecast hours converted concurrently within one variable
    #[arg(long = "inner-workers", value_name = "COUNT")]
    pub inner_workers: Option<usize>,

    /// Logging verbosity level
    #[arg(
        short = 'v',
        long = "verbose",
        action = clap::ArgAction::Count,
        help = "Increase logging verbosity (-v: info, -vv: debug, -vvv: trace)"
    )]
    pub verbose: u8,

    /// Only show warnings and errors. Overrides verbose settings.
    #[arg(short = 'q', long = "quiet", conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Args {
    /// Dates selected on the command line
    pub fn date_range(&self) -> Result<DateRange> {
        DateRange::parse(&self.date, self.end_date.as_deref())
    }

    /// Build the conversion configuration from the parsed flags
    pub fn to_config(&self) -> ConversionConfig {
        let defaults = ConversionConfig::default();
        let mut config = ConversionConfig::new(self.input_path.clone(), self.output_path.clone())
            .with_target_grid_resolution((!self.no_regrid).then_some(self.resolution))
            .with_utc(self.utc.clone())
            .with_start_step(self.start_step)
            .with_max_long_fcst_hours(self.max_hours)
            .with_member_count(self.members)
            .with_overwrite(self.overwrite)
            .with_ctl_idx_files(!self.no_ctl_idx)
            .with_workers(
                self.workers.unwrap_or(defaults.outer_workers),
                self.inner_workers.unwrap_or(defaults.inner_workers),
            );

        if let Some(Bounds(first, last)) = self.latitude {
            config = config.with_latitude((first, last));
        }
        if let Some(Bounds(first, last)) = self.longitude {
            config = config.with_longitude((first, last));
        }
        if !self.pressure_levels.is_empty() {
            config = config.with_pressure_levels(self.pressure_levels.clone());
        }
        if let Some(vars) = &self.vars {
            config = config.with_convert_vars(vars.0.clone());
        }
        config = config.with_dependencies(DependencyPolicy {
            prerequisites: self
                .prerequisites
                .iter()
                .map(|p| (p.variable.clone(), p.dependencies.clone()))
                .collect(),
            strip_prerequisites: !self.keep_prerequisites,
        });
        if let Some(overrides) = &self.grib2_overrides {
            config = config.with_grib2_table_overrides(overrides.0.clone());
        }
        if let Some(script) = &self.callback {
            config = config.with_callback_script(script.clone());
        }
        config.g2ctl_path = self.g2ctl.clone();
        config.gribmap_path = self.gribmap.clone();
        config.debug = self.verbose >= 2;
        config
    }

    /// Determine the appropriate log level based on verbosity flags
    pub fn get_log_level(&self) -> &'static str {
        if self.quiet {
            "warn"
        } else {
            match self.verbose {
                0 => "info",
                1 => "debug",
                _ => "trace",
            }
        }
    }

    /// Check if we should show progress bars (not in quiet mode)
    pub fn show_progress(&self) -> bool {
        !self.quiet
    }
}

/// Inclusive coordinate bounds parsed from `FIRST,LAST`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds(pub f64, pub f64);

impl FromStr for Bounds {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let [first, last] = parts.as_slice() else {
            return Err(ConversionError::configuration(format!(
                "Bounds must be in format FIRST,LAST, got '{}'",
                s
            )));
        };
        let parse = |value: &str| {
            value.parse::<f64>().map_err(|_| {
                ConversionError::configuration(format!("Invalid coordinate '{}'", value))
            })
        };
        Ok(Bounds(parse(first)?, parse(last)?))
    }
}

/// Comma-separated `NAME:STASH` variable list
#[derive(Debug, Clone, PartialEq)]
pub struct VariableList(pub Vec<VariableSpec>);

impl FromStr for VariableList {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self> {
        let variables = s
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let (name, stash) = entry.split_once(':').ok_or_else(|| {
                    ConversionError::configuration(format!(
                        "Variable '{}' must be in format NAME:STASH",
                        entry
                    ))
                })?;
                let variable = VariableSpec::new(name.trim(), stash.trim());
                variable.stash_code()?;
                Ok(variable)
            })
            .collect::<Result<Vec<_>>>()?;

        if variables.is_empty() {
            return Err(ConversionError::configuration("Variable list cannot be empty"));
        }
        Ok(VariableList(variables))
    }
}

/// One `NAME:STASH=NAME:STASH[,NAME:STASH]` prerequisite entry
#[derive(Debug, Clone, PartialEq)]
pub struct Prerequisite {
    pub variable: VariableSpec,
    pub dependencies: Vec<VariableSpec>,
}

impl FromStr for Prerequisite {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self> {
        let (variable, dependencies) = s.split_once('=').ok_or_else(|| {
            ConversionError::configuration(format!(
                "Prerequisite '{}' must be in format VAR=LIST",
                s
            ))
        })?;
        let VariableList(mut variable) = variable.parse()?;
        if variable.len() != 1 {
            return Err(ConversionError::configuration(format!(
                "Prerequisite '{}' must name exactly one variable before '='",
                s
            )));
        }
        let VariableList(dependencies) = dependencies.parse()?;
        Ok(Prerequisite {
            variable: variable.remove(0),
            dependencies,
        })
    }
}

/// Comma-separated `KEY=VALUE` GRIB2 overrides
#[derive(Debug, Clone, PartialEq)]
pub struct OverrideList(pub Vec<(String, i64)>);

impl FromStr for OverrideList {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self> {
        s.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let (key, value) = entry.split_once('=').ok_or_else(|| {
                    ConversionError::configuration(format!(
                        "Override '{}' must be in format KEY=VALUE",
                        entry
                    ))
                })?;
                let value = value.trim().parse::<i64>().map_err(|_| {
                    ConversionError::configuration(format!(
                        "Override value for '{}' must be an integer",
                        key
                    ))
                })?;
                Ok((key.trim().to_string(), value))
            })
            .collect::<Result<Vec<_>>>()
            .map(OverrideList)
    }
}
