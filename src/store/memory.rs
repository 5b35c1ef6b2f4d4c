//! In-memory field store keyed by member file path.

use super::{FieldStore, StoredField, select_field};
use crate::error::{ConversionError, Result};
use crate::models::{FieldQuery, GriddedField, StashCode};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Field store over fields already held in memory.
///
/// Applies the same matching rules as the PP store and records every
/// query it receives.
#[derive(Debug, Default)]
pub struct MemoryFieldStore {
    files: HashMap<PathBuf, Vec<StoredField>>,
    queries: Mutex<Vec<(PathBuf, FieldQuery)>>,
}

impl MemoryFieldStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a slice under `path`, creating the file entry if needed
    pub fn insert(&mut self, path: impl Into<PathBuf>, stash: StashCode, field: GriddedField) {
        self.insert_slice(path, StoredField::new(stash, field));
    }

    pub fn insert_slice(&mut self, path: impl Into<PathBuf>, slice: StoredField) {
        self.files.entry(path.into()).or_default().push(slice);
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    /// Queries received so far, in arrival order
    pub fn recorded_queries(&self) -> Vec<(PathBuf, FieldQuery)> {
        self.queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl FieldStore for MemoryFieldStore {
    fn retrieve(&self, path: &Path, query: &FieldQuery) -> Result<GriddedField> {
        self.queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((path.to_path_buf(), query.clone()));

        let slices = self
            .files
            .get(path)
            .ok_or_else(|| ConversionError::MissingInput {
                path: path.to_path_buf(),
            })?;
        select_field(path, slices, query)
    }

    fn exists(&self, path: &Path) -> bool {
        self.contains(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DimCoord, ForecastPeriod, TimeCoords, VariableSpec};
    use chrono::NaiveDate;

    fn field() -> GriddedField {
        let reference = NaiveDate::from_ymd_opt(2016, 3, 15)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        GriddedField::new(
            "x_wind",
            "m s-1",
            vec![1.0, 2.0, 3.0, 4.0],
            vec![
                DimCoord::new("latitude", "degrees", vec![0.0, 1.0]),
                DimCoord::new("longitude", "degrees", vec![0.0, 1.0]),
            ],
            TimeCoords {
                forecast_period: ForecastPeriod::instant(6.0),
                forecast_reference_time: reference,
                time: reference + chrono::Duration::hours(6),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_retrieve_and_record_queries() {
        let stash = StashCode::parse("m01s03i209").unwrap();
        let mut store = MemoryFieldStore::new();
        store.insert("/in/000_pb000", stash, field());
        assert!(store.contains(Path::new("/in/000_pb000")));

        let query = FieldQuery::new(VariableSpec::new("x_wind", "m01s03i209"), 6.0);
        let retrieved = store.retrieve(Path::new("/in/000_pb000"), &query).unwrap();
        assert_eq!(retrieved, field());

        let recorded = store.recorded_queries();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].1.forecast_hour, 6.0);
    }

    #[test]
    fn test_unknown_path_is_missing_input() {
        let store = MemoryFieldStore::new();
        let query = FieldQuery::new(VariableSpec::new("x_wind", "m01s03i209"), 6.0);
        let err = store.retrieve(Path::new("/in/001_pb000"), &query).unwrap_err();
        assert!(matches!(err, ConversionError::MissingInput { .. }));
        assert_eq!(store.recorded_queries().len(), 1);
    }
}
