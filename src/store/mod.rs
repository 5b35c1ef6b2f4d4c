//! Field retrieval from ensemble member files.
//!
//! A [`FieldStore`] answers constraint-based [`FieldQuery`] requests against
//! one input file. Stores decode their files into [`StoredField`] slices and
//! share the matching rules implemented by [`select_field`].

pub mod memory;
pub mod pp;

pub use memory::MemoryFieldStore;
pub use pp::{PpFieldStore, PpRecord};

use crate::error::{ConversionError, Result};
use crate::models::{DimCoord, FieldQuery, GriddedField, StashCode};
use std::path::Path;
use tracing::debug;

/// Forecast periods closer than this are treated as equal (hours)
const FORECAST_PERIOD_TOLERANCE: f64 = 1e-3;

/// Retrieval interface over ensemble member files
pub trait FieldStore: Send + Sync {
    /// Load the single field in `path` matching `query`
    fn retrieve(&self, path: &Path, query: &FieldQuery) -> Result<GriddedField>;

    /// Whether `path` names an input this store can read
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }
}

/// One horizontal slice held by a store, tagged with its retrieval keys
#[derive(Debug, Clone)]
pub struct StoredField {
    pub stash: StashCode,
    /// Pressure level in hPa, for pressure-level fields
    pub pressure_level: Option<f64>,
    /// Two-dimensional latitude/longitude field
    pub field: GriddedField,
}

impl StoredField {
    pub fn new(stash: StashCode, field: GriddedField) -> Self {
        Self {
            stash,
            pressure_level: None,
            field,
        }
    }

    pub fn with_pressure_level(mut self, level: f64) -> Self {
        self.pressure_level = Some(level);
        self
    }
}

/// Apply the query constraints to the slices of one file.
///
/// Slices of the same variable on several pressure levels are stacked
/// into a leading `pressure` axis, in file order.
pub fn select_field<'a>(
    path: &Path,
    slices: impl IntoIterator<Item = &'a StoredField>,
    query: &FieldQuery,
) -> Result<GriddedField> {
    let stash = query.variable.stash_code()?;

    let mut matches: Vec<&StoredField> = slices
        .into_iter()
        .filter(|slice| slice.stash == stash)
        .filter(|slice| {
            (slice.field.time.forecast_period.point - query.forecast_hour).abs()
                < FORECAST_PERIOD_TOLERANCE
        })
        .collect();

    if let Some(levels) = &query.pressure_levels {
        if matches.iter().any(|slice| slice.pressure_level.is_some()) {
            matches.retain(|slice| {
                slice
                    .pressure_level
                    .is_some_and(|level| levels.contains(&(level as u32)))
            });
        }
    }

    if matches.is_empty() {
        return Err(ConversionError::FieldNotFound {
            path: path.to_path_buf(),
            variable: query.variable.name.clone(),
            stash: query.variable.stash.clone(),
            forecast_hour: query.forecast_hour,
        });
    }
    debug!(
        "Matched {} slice(s) of {} in {}",
        matches.len(),
        query.variable,
        path.display()
    );

    let mut subsets = matches
        .iter()
        .map(|slice| subset(&slice.field, query))
        .collect::<Result<Vec<_>>>()?;

    if subsets.len() == 1 {
        return Ok(subsets.remove(0));
    }

    let levels: Vec<f64> = matches
        .iter()
        .map(|slice| slice.pressure_level.unwrap_or(f64::NAN))
        .collect();
    stack_levels(subsets, levels)
}

/// Restrict a 2D field to the query's latitude/longitude bounds (inclusive)
fn subset(field: &GriddedField, query: &FieldQuery) -> Result<GriddedField> {
    if query.latitude.is_none() && query.longitude.is_none() {
        return Ok(field.clone());
    }

    let keep = |coord: &DimCoord, bounds: Option<(f64, f64)>| -> Vec<usize> {
        match bounds {
            Some((lo, hi)) => coord
                .points
                .iter()
                .enumerate()
                .filter(|(_, v)| lo <= **v && **v <= hi)
                .map(|(i, _)| i)
                .collect(),
            None => (0..coord.len()).collect(),
        }
    };
    let rows = keep(field.latitude(), query.latitude);
    let cols = keep(field.longitude(), query.longitude);
    if rows.is_empty() || cols.is_empty() {
        return Err(ConversionError::invalid_field(
            &field.standard_name,
            "no grid points inside the requested latitude/longitude bounds",
        ));
    }

    let nx = field.longitude().len();
    let mut data = Vec::with_capacity(rows.len() * cols.len());
    for &j in &rows {
        data.extend(cols.iter().map(|&i| field.data[j * nx + i]));
    }

    let pick = |coord: &DimCoord, idx: &[usize]| DimCoord {
        points: idx.iter().map(|&i| coord.points[i]).collect(),
        ..coord.clone()
    };
    let dim_coords = vec![pick(field.latitude(), &rows), pick(field.longitude(), &cols)];

    Ok(GriddedField {
        shape: vec![rows.len(), cols.len()],
        data,
        dim_coords,
        ..field.clone()
    })
}

fn stack_levels(slices: Vec<GriddedField>, levels: Vec<f64>) -> Result<GriddedField> {
    let mut slices = slices.into_iter();
    let Some(first) = slices.next() else {
        return Err(ConversionError::invalid_field("", "no slices to stack"));
    };

    let mut data = first.data.clone();
    for slice in slices {
        if slice.shape != first.shape {
            return Err(ConversionError::invalid_field(
                &first.standard_name,
                format!(
                    "pressure level slices differ in shape: {:?} vs {:?}",
                    first.shape, slice.shape
                ),
            ));
        }
        data.extend_from_slice(&slice.data);
    }

    let mut dim_coords = vec![DimCoord::new("pressure", "hPa", levels)];
    dim_coords.extend(first.dim_coords.iter().cloned());
    let shape = dim_coords.iter().map(DimCoord::len).collect();

    let field = GriddedField {
        data,
        shape,
        dim_coords,
        ..first
    };
    field.check_consistency()?;
    Ok(field)
}
