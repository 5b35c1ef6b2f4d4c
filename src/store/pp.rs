//! UM PP file reader.
//!
//! A PP file is a sequence of big-endian Fortran unformatted records,
//! alternating a 64-word lookup header (45 integers then 19 reals) with an
//! unpacked 32-bit float data record. Only unpacked fields on regular
//! latitude/longitude grids are supported.

use super::{FieldStore, StoredField, select_field};
use crate::constants::units_for;
use crate::error::{ConversionError, Result};
use crate::models::{
    CellMethod, DimCoord, FieldQuery, ForecastPeriod, GriddedField, StashCode, TimeCoords,
};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::io::Write;
use std::path::Path;
use tracing::debug;

const INT_WORDS: usize = 45;
const REAL_WORDS: usize = 19;
const HEADER_BYTES: usize = (INT_WORDS + REAL_WORDS) * 4;

/// Zero-based lookup header word positions
mod word {
    pub const LBYR: usize = 0;
    pub const LBYRD: usize = 6;
    pub const LBTIM: usize = 12;
    pub const LBFT: usize = 13;
    pub const LBLREC: usize = 14;
    pub const LBCODE: usize = 15;
    pub const LBROW: usize = 17;
    pub const LBNPT: usize = 18;
    pub const LBPACK: usize = 20;
    pub const LBPROC: usize = 24;
    pub const LBVC: usize = 25;
    pub const LBUSER4: usize = 41;
    pub const LBUSER7: usize = 44;

    // offsets into the real block
    pub const BLEV: usize = 6;
    pub const BZY: usize = 13;
    pub const BDY: usize = 14;
    pub const BZX: usize = 15;
    pub const BDX: usize = 16;
    pub const BMDI: usize = 17;
}

/// LBCODE of a regular latitude/longitude grid
const LBCODE_REGULAR: i32 = 1;
/// LBVC of pressure levels
const LBVC_PRESSURE: i32 = 8;
/// LBPROC bit marking a time mean
const LBPROC_TIME_MEAN: i32 = 128;
/// Missing data indicator written by the model
const DEFAULT_BMDI: f32 = -1.0e30;

/// One lookup header with its data
#[derive(Debug, Clone, PartialEq)]
pub struct PpRecord {
    pub ints: [i32; INT_WORDS],
    pub reals: [f32; REAL_WORDS],
    pub data: Vec<f32>,
}

impl PpRecord {
    /// Start a record for a regular grid of `rows` x `columns` points
    pub fn new(stash: StashCode, rows: usize, columns: usize) -> Self {
        let mut ints = [0; INT_WORDS];
        ints[word::LBCODE] = LBCODE_REGULAR;
        ints[word::LBROW] = rows as i32;
        ints[word::LBNPT] = columns as i32;
        ints[word::LBLREC] = (rows * columns) as i32;
        ints[word::LBUSER4] = stash.lbuser4();
        ints[word::LBUSER7] = stash.model;

        let mut reals = [0.0; REAL_WORDS];
        reals[word::BMDI] = DEFAULT_BMDI;

        Self {
            ints,
            reals,
            data: vec![0.0; rows * columns],
        }
    }

    /// Grid origin and spacing; the first row lies at `first_lat`
    pub fn with_grid(mut self, first_lat: f32, dlat: f32, first_lon: f32, dlon: f32) -> Self {
        self.reals[word::BZY] = first_lat - dlat;
        self.reals[word::BDY] = dlat;
        self.reals[word::BZX] = first_lon - dlon;
        self.reals[word::BDX] = dlon;
        self
    }

    /// Instantaneous field valid `hour` hours after `reference`
    pub fn with_validity(mut self, reference: NaiveDateTime, hour: i32) -> Self {
        self.ints[word::LBTIM] = 1;
        self.ints[word::LBFT] = hour;
        set_time(&mut self.ints[word::LBYR..], reference + Duration::hours(hour as i64));
        set_time(&mut self.ints[word::LBYRD..], reference);
        self
    }

    /// Field processed over the `window` hours ending `hour` hours after
    /// `reference`
    pub fn with_processing_window(
        mut self,
        reference: NaiveDateTime,
        hour: i32,
        window: i32,
    ) -> Self {
        self.ints[word::LBTIM] = 21;
        self.ints[word::LBFT] = hour;
        self.ints[word::LBPROC] |= LBPROC_TIME_MEAN;
        let end = reference + Duration::hours(hour as i64);
        set_time(&mut self.ints[word::LBYR..], end - Duration::hours(window as i64));
        set_time(&mut self.ints[word::LBYRD..], end);
        self
    }

    pub fn with_pressure_level(mut self, hpa: f32) -> Self {
        self.ints[word::LBVC] = LBVC_PRESSURE;
        self.reals[word::BLEV] = hpa;
        self
    }

    pub fn with_data(mut self, data: Vec<f32>) -> Self {
        self.ints[word::LBLREC] = data.len() as i32;
        self.data = data;
        self
    }

    pub fn lbuser4(&self) -> i32 {
        self.ints[word::LBUSER4]
    }

    /// Append this record as two Fortran records
    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        let mut header = Vec::with_capacity(HEADER_BYTES);
        for value in &self.ints {
            header.extend_from_slice(&value.to_be_bytes());
        }
        for value in &self.reals {
            header.extend_from_slice(&value.to_be_bytes());
        }
        write_fortran_record(writer, &header)?;

        let mut payload = Vec::with_capacity(self.data.len() * 4);
        for value in &self.data {
            payload.extend_from_slice(&value.to_be_bytes());
        }
        write_fortran_record(writer, &payload)
    }

    /// Read every record of a PP file
    pub fn read_all(path: &Path) -> Result<Vec<PpRecord>> {
        let bytes = std::fs::read(path)?;
        let mut offset = 0;
        let mut records = Vec::new();

        while offset < bytes.len() {
            let header = next_fortran_record(path, &bytes, &mut offset)?;
            if header.len() != HEADER_BYTES {
                return Err(ConversionError::invalid_pp(
                    path,
                    format!("lookup header of {} bytes, expected {}", header.len(), HEADER_BYTES),
                ));
            }
            let mut ints = [0; INT_WORDS];
            let mut reals = [0.0; REAL_WORDS];
            for (i, chunk) in header.chunks_exact(4).enumerate() {
                let raw = [chunk[0], chunk[1], chunk[2], chunk[3]];
                if i < INT_WORDS {
                    ints[i] = i32::from_be_bytes(raw);
                } else {
                    reals[i - INT_WORDS] = f32::from_be_bytes(raw);
                }
            }

            let payload = next_fortran_record(path, &bytes, &mut offset)?;
            let data = payload
                .chunks_exact(4)
                .map(|c| f32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                .collect();

            records.push(PpRecord { ints, reals, data });
        }

        Ok(records)
    }

    /// Convert into a named horizontal slice
    fn to_stored_field(&self, path: &Path, stash: StashCode, name: &str) -> Result<StoredField> {
        if self.ints[word::LBPACK] != 0 {
            return Err(ConversionError::invalid_pp(
                path,
                format!("packed data (LBPACK={}) is not supported", self.ints[word::LBPACK]),
            ));
        }
        let rows = self.ints[word::LBROW].max(0) as usize;
        let columns = self.ints[word::LBNPT].max(0) as usize;
        if rows * columns == 0 || self.data.len() < rows * columns {
            return Err(ConversionError::invalid_pp(
                path,
                format!(
                    "{} data values cannot fill a {}x{} grid",
                    self.data.len(),
                    rows,
                    columns
                ),
            ));
        }

        let axis = |zero: f32, step: f32, n: usize| -> Vec<f64> {
            (1..=n).map(|k| zero as f64 + k as f64 * step as f64).collect()
        };
        let mut latitudes = axis(self.reals[word::BZY], self.reals[word::BDY], rows);
        let longitudes = axis(self.reals[word::BZX], self.reals[word::BDX], columns);

        let bmdi = self.reals[word::BMDI];
        let mut data: Vec<f32> = self.data[..rows * columns]
            .iter()
            .map(|&v| if v == bmdi { f32::NAN } else { v })
            .collect();

        // north-to-south grids are flipped so latitudes ascend
        if self.reals[word::BDY] < 0.0 {
            latitudes.reverse();
            data = data
                .chunks_exact(columns)
                .rev()
                .flatten()
                .copied()
                .collect();
        }

        let time = self.time_coords(path)?;
        let mut field = GriddedField::new(
            name,
            units_for(name),
            data,
            vec![
                DimCoord::new("latitude", "degrees", latitudes),
                DimCoord::new("longitude", "degrees", longitudes),
            ],
            time,
        )?
        .with_attribute(
            "STASH",
            format!("m{:02}s{:02}i{:03}", stash.model, stash.section, stash.item),
        )
        .with_attribute("source", "Data from Met Office Unified Model");

        if self.ints[word::LBPROC] & LBPROC_TIME_MEAN != 0 {
            field = field.with_cell_method(CellMethod::new("mean", "time"));
        }

        let slice = StoredField::new(stash, field);
        Ok(if self.ints[word::LBVC] == LBVC_PRESSURE {
            slice.with_pressure_level(self.reals[word::BLEV] as f64)
        } else {
            slice
        })
    }

    fn time_coords(&self, path: &Path) -> Result<TimeCoords> {
        let t1 = get_time(path, &self.ints[word::LBYR..])?;
        let t2 = get_time(path, &self.ints[word::LBYRD..])?;
        let lbft = self.ints[word::LBFT] as f64;
        let ib = (self.ints[word::LBTIM] / 10) % 10;

        let (forecast_period, reference) = if ib == 2 {
            let window = (t2 - t1).num_minutes() as f64 / 60.0;
            (
                ForecastPeriod::interval(lbft - window, lbft),
                t2 - Duration::hours(self.ints[word::LBFT] as i64),
            )
        } else {
            (
                ForecastPeriod::instant(lbft),
                t1 - Duration::hours(self.ints[word::LBFT] as i64),
            )
        };

        Ok(TimeCoords {
            forecast_period,
            forecast_reference_time: reference,
            time: reference + Duration::minutes((forecast_period.point * 60.0).round() as i64),
        })
    }
}

fn set_time(words: &mut [i32], time: NaiveDateTime) {
    use chrono::{Datelike, Timelike};
    words[0] = time.year();
    words[1] = time.month() as i32;
    words[2] = time.day() as i32;
    words[3] = time.hour() as i32;
    words[4] = time.minute() as i32;
}

fn get_time(path: &Path, words: &[i32]) -> Result<NaiveDateTime> {
    NaiveDate::from_ymd_opt(words[0], words[1] as u32, words[2] as u32)
        .and_then(|date| date.and_hms_opt(words[3] as u32, words[4] as u32, 0))
        .ok_or_else(|| {
            ConversionError::invalid_pp(path, format!("invalid header time {:?}", &words[..5]))
        })
}

fn write_fortran_record<W: Write>(writer: &mut W, payload: &[u8]) -> std::io::Result<()> {
    let marker = (payload.len() as u32).to_be_bytes();
    writer.write_all(&marker)?;
    writer.write_all(payload)?;
    writer.write_all(&marker)
}

fn next_fortran_record<'a>(path: &Path, bytes: &'a [u8], offset: &mut usize) -> Result<&'a [u8]> {
    let truncated = || ConversionError::invalid_pp(path, format!("truncated record at byte {}", offset));

    let marker = |at: usize| -> Option<usize> {
        bytes
            .get(at..at + 4)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as usize)
    };

    let length = marker(*offset).ok_or_else(truncated)?;
    let start = *offset + 4;
    let end = start + length;
    let trailer = marker(end).ok_or_else(truncated)?;
    if trailer != length {
        return Err(ConversionError::invalid_pp(
            path,
            format!("record markers disagree ({} vs {})", length, trailer),
        ));
    }
    *offset = end + 4;
    Ok(&bytes[start..end])
}

/// Field store over UM PP member files
#[derive(Debug, Default, Clone, Copy)]
pub struct PpFieldStore;

impl PpFieldStore {
    pub fn new() -> Self {
        Self
    }
}

impl FieldStore for PpFieldStore {
    fn retrieve(&self, path: &Path, query: &FieldQuery) -> Result<GriddedField> {
        if !path.is_file() {
            return Err(ConversionError::MissingInput {
                path: path.to_path_buf(),
            });
        }

        let stash = query.variable.stash_code()?;
        let records = PpRecord::read_all(path)?;
        debug!("Read {} PP records from {}", records.len(), path.display());

        let slices = records
            .iter()
            .filter(|record| record.lbuser4() == stash.lbuser4())
            .filter(|record| {
                let model = record.ints[word::LBUSER7];
                model == 0 || model == stash.model
            })
            .map(|record| record.to_stored_field(path, stash, &query.variable.name))
            .collect::<Result<Vec<_>>>()?;

        select_field(path, &slices, query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VariableSpec;
    use std::fs::File;
    use tempfile::TempDir;

    fn reference() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2016, 3, 15)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn write_records(path: &Path, records: &[PpRecord]) {
        let mut file = File::create(path).unwrap();
        for record in records {
            record.write_to(&mut file).unwrap();
        }
    }

    #[test]
    fn test_read_instantaneous_field() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("000_pb000");
        let stash = StashCode::parse("m01s03i236").unwrap();

        let record = PpRecord::new(stash, 2, 3)
            .with_grid(10.0, -10.0, 0.0, 120.0)
            .with_validity(reference(), 6)
            .with_data(vec![1.0, 2.0, 3.0, 4.0, -1.0e30, 6.0]);
        write_records(&path, &[record]);

        let query = FieldQuery::new(VariableSpec::new("air_temperature", "m01s03i236"), 6.0);
        let field = PpFieldStore::new().retrieve(&path, &query).unwrap();

        assert_eq!(field.shape, vec![2, 3]);
        assert_eq!(field.units, "K");
        // flipped to ascending latitude
        assert_eq!(field.latitude().points, vec![0.0, 10.0]);
        assert_eq!(field.longitude().points, vec![0.0, 120.0, 240.0]);
        assert_eq!(field.data[0], 4.0);
        assert!(field.data[1].is_nan());
        assert_eq!(field.data[2], 6.0);
        assert_eq!(field.data[3..], [1.0, 2.0, 3.0]);
        assert_eq!(field.time.forecast_period, ForecastPeriod::instant(6.0));
        assert_eq!(field.time.forecast_reference_time, reference());
    }

    #[test]
    fn test_read_processed_field_has_bounds() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("000_pb000");
        let stash = StashCode::parse("m01s05i226").unwrap();

        let record = PpRecord::new(stash, 2, 2)
            .with_grid(0.0, 10.0, 0.0, 10.0)
            .with_processing_window(reference(), 12, 6)
            .with_data(vec![0.5; 4]);
        write_records(&path, &[record]);

        let query = FieldQuery::new(VariableSpec::new("precipitation_amount", "m01s05i226"), 9.0);
        let field = PpFieldStore::new().retrieve(&path, &query).unwrap();

        assert_eq!(field.time.forecast_period.bounds, Some((6.0, 12.0)));
        assert_eq!(field.time.forecast_period.label_hour(), 12);
        assert_eq!(field.time.forecast_reference_time, reference());
        assert_eq!(field.cell_methods, vec![CellMethod::new("mean", "time")]);
    }

    #[test]
    fn test_missing_file_is_missing_input() {
        let temp_dir = TempDir::new().unwrap();
        let query = FieldQuery::new(VariableSpec::new("x_wind", "m01s03i209"), 6.0);
        let err = PpFieldStore::new()
            .retrieve(&temp_dir.path().join("001_pb000"), &query)
            .unwrap_err();
        assert!(matches!(err, ConversionError::MissingInput { .. }));
    }

    #[test]
    fn test_corrupt_record_markers_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.pp");
        std::fs::write(&path, [0, 0, 1, 0, 1, 2, 3]).unwrap();
        assert!(matches!(
            PpRecord::read_all(&path),
            Err(ConversionError::InvalidPpFile { .. })
        ));
    }

    #[test]
    fn test_packed_data_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("packed.pp");
        let stash = StashCode::parse("m01s03i209").unwrap();
        let mut record = PpRecord::new(stash, 1, 2)
            .with_grid(0.0, 1.0, 0.0, 1.0)
            .with_validity(reference(), 6);
        record.ints[word::LBPACK] = 1;
        write_records(&path, &[record]);

        let query = FieldQuery::new(VariableSpec::new("x_wind", "m01s03i209"), 6.0);
        assert!(PpFieldStore::new().retrieve(&path, &query).is_err());
    }
}
