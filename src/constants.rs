//! Application constants for the ensemble GRIB2 converter
//!
//! This module contains the GRIB2 code values written into every message,
//! default configuration values, file naming structures and the variable
//! tables of each ensemble input file kind.

// =============================================================================
// Originating Centre and Ensemble Metadata
// =============================================================================

/// Originating centre id (RSMC New Delhi / NCMRWF)
pub const CENTRE_ID: i64 = 29;

/// No sub-centre
pub const SUB_CENTRE_ID: i64 = 0;

/// Code table 4.3: ensemble forecast
pub const GENERATING_PROCESS_ENSEMBLE: i64 = 4;

/// Code table 4.0: individual ensemble forecast at a point in time
pub const TEMPLATE_POINT_ENSEMBLE: i64 = 1;

/// Code table 4.0: individual ensemble forecast over a time interval
pub const TEMPLATE_INTERVAL_ENSEMBLE: i64 = 11;

/// Code table 4.11: successive times processed have same start time of
/// forecast, forecast time is incremented
pub const TIME_INCREMENT_ACCUMULATION: i64 = 2;

/// Code table 4.6: perturbed forecasts from different initial conditions
pub const ENSEMBLE_FORECAST_PERTURBED: i64 = 3;

/// Code table 4.5: mean sea level
pub const SURFACE_MEAN_SEA_LEVEL: i64 = 101;

/// Master table version value that enables the local table
pub const LOCAL_TABLES_SENTINEL: i64 = 255;

/// Version of the organisation's local GRIB2 table
pub const LOCAL_TABLE_VERSION: i64 = 1;

/// Octet value GRIB2 uses for "missing"
pub const MISSING_OCTET: u8 = 255;

/// Missing value declared for packed ensemble data
pub const FILL_VALUE: f64 = 9.999e20;

/// Standard name of variables whose surface type is forced to mean sea level
pub const MEAN_SEA_LEVEL_PREFIX: &str = "air_pressure_at_sea_level";

/// Ensemble dimension coordinate name
pub const REALIZATION_COORD: &str = "realization";

/// Long name of the ensemble dimension coordinate
pub const REALIZATION_LONG_NAME: &str = "ensemble_member";

// =============================================================================
// Output File Naming
// =============================================================================

/// Forecast hour placeholder (3 digits)
pub const HOUR_TOKEN: &str = "*HHH*";

/// Date placeholder (YYYYMMDD)
pub const DATE_TOKEN: &str = "*YYYYMMDD*";

/// UTC cycle placeholder (2 digits)
pub const UTC_TOKEN: &str = "*ZZ*";

/// Default forecast output file name structure
pub const DEFAULT_FCST_FILE_NAME_STRUCTURE: &[&str] = &[
    "um_prg", "_", HOUR_TOKEN, "hr", "_", DATE_TOKEN, "_", UTC_TOKEN, "Z", ".grib2",
];

/// Control file suffix appended to a primary output
pub const CTL_EXTENSION: &str = ".ctl";

/// Index file suffix appended to a primary output
pub const IDX_EXTENSION: &str = ".idx";

/// Sibling suffixes inspected for every primary output
pub const SIBLING_EXTENSIONS: &[&str] = &["", CTL_EXTENSION, IDX_EXTENSION];

/// Extension of intermediate exchange-format artifacts
pub const INTERMEDIATE_EXTENSION: &str = ".nc";

/// Default marker inserted before the extension of intermediate outputs
pub const DEFAULT_PRE_EXTENSION: &str = "_tmp";

// =============================================================================
// Processing Configuration Defaults
// =============================================================================

/// Default target grid resolution in degrees
pub const DEFAULT_TARGET_GRID_RESOLUTION: f64 = 0.25;

/// Default global latitude extent
pub const GLOBAL_LATITUDE: (f64, f64) = (-90.0, 90.0);

/// Default global longitude extent
pub const GLOBAL_LONGITUDE: (f64, f64) = (0.0, 360.0);

/// Number of ensemble members including the control run
pub const DEFAULT_MEMBER_COUNT: usize = 45;

/// Members are numbered 0..member_count in the one-octet perturbationNumber
pub const MAX_MEMBER_COUNT: usize = 255;

/// First forecast hour and step of long forecast files
pub const DEFAULT_START_STEP_LONG_FCST_HOUR: u32 = 6;

/// Maximum long forecast hours produced by the model
pub const DEFAULT_MAX_LONG_FCST_HOURS: u32 = 240;

/// Spacing of forecast-hour-files in hours
pub const FORECAST_FILE_STEP_HOURS: u32 = 24;

/// Default UTC cycle
pub const DEFAULT_UTC: &str = "00";

/// Default side-car control file generator
pub const DEFAULT_G2CTL: &str = "g2ctl.pl";

/// Default side-car index file generator
pub const DEFAULT_GRIBMAP: &str = "gribmap";

/// Variables stored in the organisation's local GRIB2 table
pub const DEFAULT_LOCAL_TABLE_VARS: &[&str] = &[
    "fog_area_fraction",
    "toa_outgoing_longwave_flux_assuming_clear_sky",
    "toa_outgoing_shortwave_flux_assuming_clear_sky",
    "atmosphere_optical_thickness_due_to_dust_ambient_aerosol",
];

/// Accumulated variables and the hours subtracted before retrieval; the
/// forecast period point of an accumulation sits at the middle of its
/// six hour window
pub const ACCUMULATION_WINDOWS: &[(&str, &str, u32)] =
    &[("precipitation_amount", "m01s05i226", 3)];

/// Canonical units of the variables read from member files
pub const VARIABLE_UNITS: &[(&str, &str)] = &[
    ("air_pressure_at_sea_level", "Pa"),
    ("air_temperature", "K"),
    ("relative_humidity", "%"),
    ("specific_humidity", "kg kg-1"),
    ("precipitation_amount", "kg m-2"),
    ("x_wind", "m s-1"),
    ("y_wind", "m s-1"),
    ("upward_air_velocity", "m s-1"),
    ("geopotential_height", "m"),
];

pub fn units_for(name: &str) -> &'static str {
    VARIABLE_UNITS
        .iter()
        .find(|(variable, _)| *variable == name)
        .map(|(_, units)| *units)
        .unwrap_or("1")
}

// =============================================================================
// Ensemble Input File Kinds
// =============================================================================

pub mod file_kinds {
    /// Base name of six-hourly single-level member files (`NNN_pbHHH`)
    pub const PB_BASE: &str = "pb";

    /// Base name of daily pressure-level member files (`xbfti_NNN.pp0`)
    pub const XBFTI_BASE: &str = "xbfti";

    pub const PB_HOUR_OFFSETS: &[u32] = &[6, 12, 18, 24];

    pub const XBFTI_HOUR_OFFSETS: &[u32] = &[24];

    pub const PB_VARIABLES: &[(&str, &str)] = &[
        ("air_pressure_at_sea_level", "m01s16i222"),
        ("air_temperature", "m01s03i236"),
        ("relative_humidity", "m01s03i245"),
        ("specific_humidity", "m01s03i237"),
        ("precipitation_amount", "m01s05i226"),
        ("x_wind", "m01s03i209"),
        ("y_wind", "m01s03i210"),
    ];

    pub const XBFTI_VARIABLES: &[(&str, &str)] = &[
        ("geopotential_height", "m01s16i202"),
        ("air_temperature", "m01s16i203"),
        ("specific_humidity", "m01s30i205"),
        ("relative_humidity", "m01s16i256"),
        ("x_wind", "m01s15i243"),
        ("y_wind", "m01s15i244"),
        ("upward_air_velocity", "m01s15i242"),
    ];
}

// =============================================================================
// GRIB2 Parameter Table
// =============================================================================

pub mod grib2_params {
    /// CF standard name -> (discipline, parameter category, parameter number)
    pub const PARAMETERS: &[(&str, u8, u8, u8)] = &[
        ("air_temperature", 0, 0, 0),
        ("specific_humidity", 0, 1, 0),
        ("relative_humidity", 0, 1, 1),
        ("precipitation_amount", 0, 1, 8),
        ("x_wind", 0, 2, 2),
        ("y_wind", 0, 2, 3),
        ("upward_air_velocity", 0, 2, 9),
        ("surface_air_pressure", 0, 3, 0),
        ("air_pressure_at_sea_level", 0, 3, 1),
        ("geopotential_height", 0, 3, 5),
        // local table entries
        ("toa_outgoing_shortwave_flux_assuming_clear_sky", 0, 4, 192),
        ("toa_outgoing_longwave_flux_assuming_clear_sky", 0, 5, 192),
        ("fog_area_fraction", 0, 6, 192),
        ("atmosphere_optical_thickness_due_to_dust_ambient_aerosol", 0, 20, 192),
    ];

    pub fn lookup(name: &str) -> Option<(u8, u8, u8)> {
        PARAMETERS
            .iter()
            .find(|(param, ..)| *param == name)
            .map(|(_, d, c, n)| (*d, *c, *n))
    }

    /// Code table 4.5: ground or water surface
    pub const SURFACE_GROUND: u8 = 1;
    /// Code table 4.5: isobaric surface (Pa)
    pub const SURFACE_ISOBARIC: u8 = 100;
    /// Code table 4.5: specified height above ground (m)
    pub const SURFACE_HEIGHT_ABOVE_GROUND: u8 = 103;

    /// Code table 4.10: accumulation
    pub const STAT_ACCUMULATION: u8 = 1;
    /// Code table 4.10: average
    pub const STAT_AVERAGE: u8 = 0;

    /// Code table 3.2: spherical earth with radius 6,371,229 m
    pub const EARTH_SHAPE_SPHERICAL: u8 = 6;

    /// Bits per packed value for simple packing
    pub const BITS_PER_VALUE: u8 = 16;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_file_kind_variable_has_a_parameter() {
        for (name, _) in file_kinds::PB_VARIABLES
            .iter()
            .chain(file_kinds::XBFTI_VARIABLES)
        {
            assert!(
                grib2_params::lookup(name).is_some(),
                "missing GRIB2 parameter for {}",
                name
            );
        }
    }

    #[test]
    fn test_local_table_vars_have_local_parameters() {
        for name in DEFAULT_LOCAL_TABLE_VARS {
            let (_, _, number) = grib2_params::lookup(name).unwrap();
            assert!(number >= 192, "{} should use a local parameter number", name);
        }
    }

    #[test]
    fn test_default_structure_ends_with_extension() {
        assert_eq!(DEFAULT_FCST_FILE_NAME_STRUCTURE.last(), Some(&".grib2"));
    }
}
