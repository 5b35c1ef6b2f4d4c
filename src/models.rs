//! Core data structures for ensemble conversion.
//!
//! Defines variable identifiers, field queries, gridded fields with their
//! coordinate metadata, ensemble bundles, conversion jobs, output states
//! and run statistics used throughout the library.

use crate::constants::{self, file_kinds};
use crate::error::{ConversionError, Result};
use chrono::NaiveDateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// A variable to convert: CF standard name plus UM STASH code
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariableSpec {
    pub name: String,
    pub stash: String,
}

impl VariableSpec {
    pub fn new(name: impl Into<String>, stash: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stash: stash.into(),
        }
    }

    /// Parse the STASH code of this variable
    pub fn stash_code(&self) -> Result<StashCode> {
        StashCode::parse(&self.stash)
    }
}

impl fmt::Display for VariableSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.stash)
    }
}

/// Parsed `mXXsYYiZZZ` STASH code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StashCode {
    pub model: i32,
    pub section: i32,
    pub item: i32,
}

impl StashCode {
    pub fn parse(code: &str) -> Result<Self> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let pattern = PATTERN.get_or_init(|| {
            Regex::new(r"^m(\d{2})s(\d{2})i(\d{3})$").expect("static STASH pattern")
        });

        let invalid = || ConversionError::InvalidStash {
            code: code.to_string(),
        };
        let caps = pattern.captures(code).ok_or_else(invalid)?;
        let number = |i: usize| caps[i].parse::<i32>().map_err(|_| invalid());

        Ok(Self {
            model: number(1)?,
            section: number(2)?,
            item: number(3)?,
        })
    }

    /// Value stored in the PP header word LBUSER4
    pub fn lbuser4(&self) -> i32 {
        self.section * 1000 + self.item
    }
}

/// Constraint-based retrieval request handed to a field store
#[derive(Debug, Clone, PartialEq)]
pub struct FieldQuery {
    pub variable: VariableSpec,
    pub forecast_hour: f64,
    pub latitude: Option<(f64, f64)>,
    pub longitude: Option<(f64, f64)>,
    pub pressure_levels: Option<Vec<u32>>,
}

impl FieldQuery {
    pub fn new(variable: VariableSpec, forecast_hour: f64) -> Self {
        Self {
            variable,
            forecast_hour,
            latitude: None,
            longitude: None,
            pressure_levels: None,
        }
    }

    pub fn with_latitude(mut self, bounds: Option<(f64, f64)>) -> Self {
        self.latitude = bounds;
        self
    }

    pub fn with_longitude(mut self, bounds: Option<(f64, f64)>) -> Self {
        self.longitude = bounds;
        self
    }

    pub fn with_pressure_levels(mut self, levels: Option<Vec<u32>>) -> Self {
        self.pressure_levels = levels;
        self
    }
}

/// A one-dimensional coordinate spanning one data dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimCoord {
    pub name: String,
    pub long_name: Option<String>,
    pub units: String,
    pub points: Vec<f64>,
}

impl DimCoord {
    pub fn new(name: impl Into<String>, units: impl Into<String>, points: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            long_name: None,
            units: units.into(),
            points,
        }
    }

    pub fn with_long_name(mut self, long_name: impl Into<String>) -> Self {
        self.long_name = Some(long_name.into());
        self
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Forecast period in hours; bounded for time-processed fields
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPeriod {
    pub point: f64,
    pub bounds: Option<(f64, f64)>,
}

impl ForecastPeriod {
    pub fn instant(point: f64) -> Self {
        Self {
            point,
            bounds: None,
        }
    }

    /// Bounded period with its point at the midpoint of the bounds
    pub fn interval(start: f64, end: f64) -> Self {
        Self {
            point: (start + end) / 2.0,
            bounds: Some((start, end)),
        }
    }

    /// Hour used to label output files: the bounds' end for intervals
    pub fn label_hour(&self) -> u32 {
        match self.bounds {
            Some((_, end)) => end.round() as u32,
            None => self.point.round() as u32,
        }
    }
}

/// Scalar time coordinates attached to every field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeCoords {
    pub forecast_period: ForecastPeriod,
    pub forecast_reference_time: NaiveDateTime,
    pub time: NaiveDateTime,
}

/// CF cell method entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellMethod {
    pub method: String,
    pub coords: Vec<String>,
    pub intervals: Vec<String>,
    pub comments: Vec<String>,
}

impl CellMethod {
    pub fn new(method: impl Into<String>, coord: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            coords: vec![coord.into()],
            intervals: Vec::new(),
            comments: Vec::new(),
        }
    }

    /// The cell method recorded on every packed ensemble
    pub fn ensemble() -> Self {
        Self {
            method: constants::REALIZATION_COORD.to_string(),
            coords: vec![constants::REALIZATION_COORD.to_string()],
            intervals: vec!["1".to_string()],
            comments: vec![" ENS".to_string()],
        }
    }
}

/// A gridded field with its coordinate metadata.
///
/// Data is stored row-major with `shape` matching `dim_coords`; the two
/// trailing dimensions are always latitude then longitude.
#[derive(Debug, Clone, PartialEq)]
pub struct GriddedField {
    pub data: Vec<f32>,
    pub shape: Vec<usize>,
    pub standard_name: String,
    pub long_name: Option<String>,
    pub units: String,
    pub attributes: BTreeMap<String, String>,
    pub cell_methods: Vec<CellMethod>,
    pub dim_coords: Vec<DimCoord>,
    pub time: TimeCoords,
}

impl GriddedField {
    /// Build a field, checking that data, shape and coordinates agree
    pub fn new(
        standard_name: impl Into<String>,
        units: impl Into<String>,
        data: Vec<f32>,
        dim_coords: Vec<DimCoord>,
        time: TimeCoords,
    ) -> Result<Self> {
        let standard_name = standard_name.into();
        let shape: Vec<usize> = dim_coords.iter().map(DimCoord::len).collect();
        let field = Self {
            data,
            shape,
            standard_name,
            long_name: None,
            units: units.into(),
            attributes: BTreeMap::new(),
            cell_methods: Vec::new(),
            dim_coords,
            time,
        };
        field.check_consistency()?;
        Ok(field)
    }

    pub fn with_long_name(mut self, long_name: impl Into<String>) -> Self {
        self.long_name = Some(long_name.into());
        self
    }

    pub fn with_cell_method(mut self, cell_method: CellMethod) -> Self {
        self.cell_methods.push(cell_method);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn check_consistency(&self) -> Result<()> {
        let fail = |reason: String| ConversionError::invalid_field(&self.standard_name, reason);

        if self.dim_coords.len() < 2 {
            return Err(fail(format!(
                "expected at least latitude and longitude dimensions, found {}",
                self.dim_coords.len()
            )));
        }
        if self.shape.len() != self.dim_coords.len()
            || self
                .shape
                .iter()
                .zip(&self.dim_coords)
                .any(|(n, coord)| *n != coord.len())
        {
            return Err(fail(format!(
                "shape {:?} does not match dimension coordinates",
                self.shape
            )));
        }
        let expected: usize = self.shape.iter().product();
        if expected != self.data.len() {
            return Err(fail(format!(
                "shape {:?} needs {} values, found {}",
                self.shape,
                expected,
                self.data.len()
            )));
        }
        Ok(())
    }

    pub fn latitude(&self) -> &DimCoord {
        &self.dim_coords[self.dim_coords.len() - 2]
    }

    pub fn longitude(&self) -> &DimCoord {
        &self.dim_coords[self.dim_coords.len() - 1]
    }

    pub fn coord(&self, name: &str) -> Option<&DimCoord> {
        self.dim_coords.iter().find(|c| c.name == name)
    }

    /// Number of values in one horizontal slice
    pub fn slice_len(&self) -> usize {
        self.latitude().len() * self.longitude().len()
    }

    /// Number of horizontal slices (product of all leading dimensions)
    pub fn slice_count(&self) -> usize {
        self.shape[..self.shape.len() - 2].iter().product()
    }

    pub fn has_nan(&self) -> bool {
        self.data.iter().any(|v| v.is_nan())
    }
}

/// Ensemble-packed field whose leading dimension is the realization axis
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleBundle {
    field: GriddedField,
}

impl EnsembleBundle {
    /// Wrap a field, checking the leading realization axis
    pub fn from_field(field: GriddedField) -> Result<Self> {
        match field.dim_coords.first() {
            Some(coord) if coord.name == constants::REALIZATION_COORD => Ok(Self { field }),
            _ => Err(ConversionError::encoding(
                &field.standard_name,
                "leading dimension is not a realization coordinate",
            )),
        }
    }

    pub fn field(&self) -> &GriddedField {
        &self.field
    }

    pub fn into_field(self) -> GriddedField {
        self.field
    }

    pub fn member_count(&self) -> usize {
        self.field.shape[0]
    }

    pub fn realization(&self) -> &DimCoord {
        &self.field.dim_coords[0]
    }

    /// Data of a single member, all remaining dimensions included
    pub fn member_data(&self, member: usize) -> &[f32] {
        let stride = self.field.data.len() / self.member_count().max(1);
        &self.field.data[member * stride..(member + 1) * stride]
    }
}

/// Unit of work: one variable at one forecast hour across all members
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub variable: VariableSpec,
    pub forecast_hour: u32,
    pub member_files: Arc<[PathBuf]>,
}

impl ConversionJob {
    pub fn label(&self) -> String {
        format!("{} @ {:03}h", self.variable, self.forecast_hour)
    }
}

/// Two ensemble input file families produced by the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileKind {
    /// Six-hourly single-level fields, one file per member per 24h block
    Pb,
    /// Daily pressure-level fields, one file per member
    Xbfti,
}

impl FileKind {
    /// Select the file kind from the long forecast start step
    pub fn from_start_step(start_step: u32) -> Option<Self> {
        match start_step {
            6 => Some(FileKind::Pb),
            24 => Some(FileKind::Xbfti),
            _ => None,
        }
    }

    pub fn base_name(&self) -> &'static str {
        match self {
            FileKind::Pb => file_kinds::PB_BASE,
            FileKind::Xbfti => file_kinds::XBFTI_BASE,
        }
    }

    /// Input file name of one ensemble member for a forecast-hour-file
    pub fn member_file_name(&self, member: usize, hour: &str) -> String {
        match self {
            FileKind::Pb => format!("{:03}_{}{}", member, self.base_name(), hour),
            FileKind::Xbfti => format!("{}_{:03}.pp0", self.base_name(), member),
        }
    }

    pub fn member_files(&self, dir: &Path, hour: &str, member_count: usize) -> Vec<PathBuf> {
        (0..member_count)
            .map(|member| dir.join(self.member_file_name(member, hour)))
            .collect()
    }

    /// Variables available in this file kind, in output order
    pub fn variables(&self) -> Vec<VariableSpec> {
        let table = match self {
            FileKind::Pb => file_kinds::PB_VARIABLES,
            FileKind::Xbfti => file_kinds::XBFTI_VARIABLES,
        };
        table
            .iter()
            .map(|(name, stash)| VariableSpec::new(*name, *stash))
            .collect()
    }

    /// Forecast hours extracted from the forecast-hour-file starting at `hour`
    pub fn forecast_hours(&self, hour: u32) -> Vec<u32> {
        let offsets = match self {
            FileKind::Pb => file_kinds::PB_HOUR_OFFSETS,
            FileKind::Xbfti => file_kinds::XBFTI_HOUR_OFFSETS,
        };
        offsets.iter().map(|offset| hour + offset).collect()
    }
}

/// State of an output hour set as seen on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputState {
    DoesNotExist,
    Exists,
    PartialExists,
    IntermediateExists,
    Removed,
}

impl OutputState {
    /// States that force a second, overwriting inspection
    pub fn requires_forced_overwrite(&self) -> bool {
        matches!(self, OutputState::PartialExists | OutputState::IntermediateExists)
    }
}

/// Terminal decision handed to the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputDecision {
    ProceedSkip,
    ProceedFresh,
}

/// Encoding of an output artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    Grib2,
    Intermediate,
}

/// Resolved output path with its encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDescriptor {
    pub path: PathBuf,
    pub codec: CodecKind,
}

/// Run statistics reported after a date has been converted
#[derive(Debug, Default, Clone)]
pub struct RunSummary {
    pub date: String,
    pub skipped: bool,
    pub files_attempted: usize,
    pub files_abandoned: usize,
    pub jobs_succeeded: usize,
    pub jobs_failed: usize,
    pub outputs_written: Vec<PathBuf>,
    pub sidecars_failed: usize,
    pub elapsed: Duration,
}

impl RunSummary {
    /// Calculate job success rate percentage
    pub fn success_rate(&self) -> f64 {
        let total = self.jobs_succeeded + self.jobs_failed;
        if total > 0 {
            (self.jobs_succeeded as f64 / total as f64) * 100.0
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn time_coords() -> TimeCoords {
        let reference = NaiveDate::from_ymd_opt(2016, 3, 15)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        TimeCoords {
            forecast_period: ForecastPeriod::instant(6.0),
            forecast_reference_time: reference,
            time: reference + chrono::Duration::hours(6),
        }
    }

    #[test]
    fn test_stash_parsing() {
        let code = StashCode::parse("m01s05i226").unwrap();
        assert_eq!(code.model, 1);
        assert_eq!(code.section, 5);
        assert_eq!(code.item, 226);
        assert_eq!(code.lbuser4(), 5226);

        assert!(StashCode::parse("m1s5i226").is_err());
        assert!(StashCode::parse("precipitation").is_err());
    }

    #[test]
    fn test_field_consistency_checks() {
        let coords = vec![
            DimCoord::new("latitude", "degrees", vec![0.0, 1.0]),
            DimCoord::new("longitude", "degrees", vec![0.0, 1.0, 2.0]),
        ];
        let field =
            GriddedField::new("air_temperature", "K", vec![0.0; 6], coords.clone(), time_coords())
                .unwrap();
        assert_eq!(field.shape, vec![2, 3]);
        assert_eq!(field.slice_len(), 6);
        assert_eq!(field.slice_count(), 1);

        let bad = GriddedField::new("air_temperature", "K", vec![0.0; 5], coords, time_coords());
        assert!(bad.is_err());
    }

    #[test]
    fn test_forecast_period_label_hour() {
        assert_eq!(ForecastPeriod::instant(6.0).label_hour(), 6);
        let accumulated = ForecastPeriod::interval(6.0, 12.0);
        assert_eq!(accumulated.point, 9.0);
        assert_eq!(accumulated.label_hour(), 12);
    }

    #[test]
    fn test_file_kind_naming() {
        assert_eq!(FileKind::Pb.member_file_name(0, "000"), "000_pb000");
        assert_eq!(FileKind::Pb.member_file_name(44, "120"), "044_pb120");
        assert_eq!(FileKind::Xbfti.member_file_name(7, "024"), "xbfti_007.pp0");
        assert_eq!(FileKind::Pb.forecast_hours(24), vec![30, 36, 42, 48]);
        assert_eq!(FileKind::Xbfti.forecast_hours(0), vec![24]);
        assert_eq!(FileKind::from_start_step(6), Some(FileKind::Pb));
        assert_eq!(FileKind::from_start_step(12), None);
    }

    #[test]
    fn test_output_state_forcing() {
        assert!(OutputState::PartialExists.requires_forced_overwrite());
        assert!(OutputState::IntermediateExists.requires_forced_overwrite());
        assert!(!OutputState::Exists.requires_forced_overwrite());
        assert!(!OutputState::Removed.requires_forced_overwrite());
    }
}
