//! Scenario tests for the conversion scheduler
//!
//! Member files live in a `MemoryFieldStore`; outputs are written to a
//! temporary directory and decoded with a minimal GRIB2 section walker.

pub mod output_recovery;

use crate::config::ConversionConfig;
use crate::context::RunContext;
use crate::models::{DimCoord, ForecastPeriod, GriddedField, StashCode, TimeCoords, VariableSpec};
use crate::store::MemoryFieldStore;
use chrono::{Duration, NaiveDate};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2016, 3, 15).unwrap()
}

pub fn precipitation() -> VariableSpec {
    VariableSpec::new("precipitation_amount", "m01s05i226")
}

pub fn temperature() -> VariableSpec {
    VariableSpec::new("air_temperature", "m01s03i236")
}

/// Single forecast-hour-file ("000") of three members, no regridding
pub fn config(temp_dir: &TempDir) -> ConversionConfig {
    let in_path = temp_dir.path().join("in");
    let out_path = temp_dir.path().join("out");
    fs::create_dir_all(in_path.join("20160315")).unwrap();
    fs::create_dir_all(&out_path).unwrap();

    ConversionConfig::new(in_path, out_path)
        .with_target_grid_resolution(None)
        .with_max_long_fcst_hours(24)
        .with_member_count(3)
        .with_ctl_idx_files(false)
        .with_workers(2, 2)
}

/// Member field on a 2x3 grid; accumulations are bounded over six hours
pub fn member_field(variable: &VariableSpec, hour: u32, value: f32) -> GriddedField {
    let reference = date().and_hms_opt(0, 0, 0).unwrap();
    let period = if variable.name == "precipitation_amount" {
        ForecastPeriod::interval(hour as f64 - 6.0, hour as f64)
    } else {
        ForecastPeriod::instant(hour as f64)
    };
    GriddedField::new(
        variable.name.as_str(),
        crate::constants::units_for(&variable.name),
        (0..6).map(|i| value + i as f32 * 0.25).collect(),
        vec![
            DimCoord::new("latitude", "degrees", vec![0.0, 1.0]),
            DimCoord::new("longitude", "degrees", vec![0.0, 1.0, 2.0]),
        ],
        TimeCoords {
            forecast_period: period,
            forecast_reference_time: reference,
            time: reference + Duration::hours(hour as i64),
        },
    )
    .unwrap()
    .with_attribute("STASH", variable.stash.as_str())
}

/// Store holding `members` member files of forecast-hour-file "000"
pub fn store(config: &ConversionConfig, variables: &[VariableSpec], members: usize) -> MemoryFieldStore {
    let mut store = MemoryFieldStore::new();
    for member in 0..members {
        let path = member_path(config, member);
        for variable in variables {
            let stash = StashCode::parse(&variable.stash).unwrap();
            for hour in [6, 12, 18, 24] {
                let value = member as f32 * 10.0 + hour as f32;
                store.insert(&path, stash, member_field(variable, hour, value));
            }
        }
    }
    store
}

pub fn member_path(config: &ConversionConfig, member: usize) -> PathBuf {
    config
        .in_path
        .join("20160315")
        .join(format!("{:03}_pb000", member))
}

pub fn context(config: ConversionConfig, store: Arc<MemoryFieldStore>) -> RunContext {
    RunContext::new(config, date(), store).unwrap()
}

/// Header values of one encoded message
#[derive(Debug, Clone, PartialEq)]
pub struct MessageSummary {
    pub centre: u16,
    pub template: u16,
    pub category: u8,
    pub number: u8,
    pub forecast_time: u32,
    pub perturbation: u8,
    pub points: u32,
}

/// Walk every message in a GRIB2 file
pub fn read_messages(path: &Path) -> Vec<MessageSummary> {
    let bytes = fs::read(path).unwrap();
    let mut messages = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        assert_eq!(&bytes[offset..offset + 4], b"GRIB");
        let total = u64::from_be_bytes(bytes[offset + 8..offset + 16].try_into().unwrap()) as usize;
        let message = &bytes[offset..offset + total];
        assert_eq!(&message[total - 4..], b"7777");

        let mut summary = MessageSummary {
            centre: 0,
            template: 0,
            category: 0,
            number: 0,
            forecast_time: 0,
            perturbation: 0,
            points: 0,
        };
        let mut s = 16;
        while s < total - 4 {
            let len = u32::from_be_bytes(message[s..s + 4].try_into().unwrap()) as usize;
            match message[s + 4] {
                1 => summary.centre = u16::from_be_bytes([message[s + 5], message[s + 6]]),
                3 => {
                    summary.points = u32::from_be_bytes(message[s + 6..s + 10].try_into().unwrap())
                }
                4 => {
                    summary.template = u16::from_be_bytes([message[s + 7], message[s + 8]]);
                    summary.category = message[s + 9];
                    summary.number = message[s + 10];
                    summary.forecast_time =
                        u32::from_be_bytes(message[s + 18..s + 22].try_into().unwrap());
                    summary.perturbation = message[s + 35];
                }
                _ => {}
            }
            s += len;
        }
        messages.push(summary);
        offset += total;
    }
    messages
}
