//! End-to-end conversion of PP member files into ensemble GRIB2 files

use chrono::{NaiveDate, NaiveDateTime};
use eps2grib::models::{StashCode, VariableSpec};
use eps2grib::{ConversionConfig, ConversionScheduler, PpFieldStore, RunContext};
use eps2grib::store::PpRecord;
use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const MEMBERS: usize = 3;

fn reference() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2016, 3, 15)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn temperature() -> VariableSpec {
    VariableSpec::new("air_temperature", "m01s03i236")
}

fn precipitation() -> VariableSpec {
    VariableSpec::new("precipitation_amount", "m01s05i226")
}

/// Member file "000" on a 3x4 one-degree grid; every field is constant
fn write_member(dir: &Path, member: usize) {
    let temperature = StashCode::parse("m01s03i236").unwrap();
    let precipitation = StashCode::parse("m01s05i226").unwrap();
    let mut file = File::create(dir.join(format!("{:03}_pb000", member))).unwrap();

    for hour in [6, 12, 18, 24] {
        PpRecord::new(temperature, 3, 4)
            .with_grid(0.0, 1.0, 0.0, 1.0)
            .with_validity(reference(), hour)
            .with_data(vec![280.0 + member as f32; 12])
            .write_to(&mut file)
            .unwrap();
        PpRecord::new(precipitation, 3, 4)
            .with_grid(0.0, 1.0, 0.0, 1.0)
            .with_processing_window(reference(), hour, 6)
            .with_data(vec![0.5 * member as f32; 12])
            .write_to(&mut file)
            .unwrap();
    }
}

/// Fields of interest from one encoded message
#[derive(Debug)]
struct Decoded {
    discipline: u8,
    template: u16,
    category: u8,
    number: u8,
    forecast_time: u32,
    perturbation: u8,
    points: u32,
    reference_value: f32,
}

fn decode(path: &Path) -> Vec<Decoded> {
    let bytes = fs::read(path).unwrap();
    let mut messages = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let message = &bytes[offset..];
        assert_eq!(&message[..4], b"GRIB");
        assert_eq!(message[7], 2);
        let total = u64::from_be_bytes(message[8..16].try_into().unwrap()) as usize;
        assert_eq!(&message[total - 4..total], b"7777");

        let mut decoded = Decoded {
            discipline: message[6],
            template: 0,
            category: 0,
            number: 0,
            forecast_time: 0,
            perturbation: 0,
            points: 0,
            reference_value: f32::NAN,
        };
        let mut s = 16;
        while s < total - 4 {
            let len = u32::from_be_bytes(message[s..s + 4].try_into().unwrap()) as usize;
            match message[s + 4] {
                3 => decoded.points = u32::from_be_bytes(message[s + 6..s + 10].try_into().unwrap()),
                4 => {
                    decoded.template = u16::from_be_bytes([message[s + 7], message[s + 8]]);
                    decoded.category = message[s + 9];
                    decoded.number = message[s + 10];
                    decoded.forecast_time =
                        u32::from_be_bytes(message[s + 18..s + 22].try_into().unwrap());
                    decoded.perturbation = message[s + 35];
                }
                5 => {
                    decoded.reference_value =
                        f32::from_be_bytes(message[s + 11..s + 15].try_into().unwrap())
                }
                _ => {}
            }
            s += len;
        }
        messages.push(decoded);
        offset += total;
    }
    messages
}

#[tokio::test]
async fn test_pp_members_become_ensemble_grib2_files() {
    let temp_dir = TempDir::new().unwrap();
    let in_path = temp_dir.path().join("in");
    let out_path = temp_dir.path().join("out");
    let day_dir = in_path.join("20160315");
    fs::create_dir_all(&day_dir).unwrap();
    fs::create_dir_all(&out_path).unwrap();
    for member in 0..MEMBERS {
        write_member(&day_dir, member);
    }

    let config = ConversionConfig::new(in_path, out_path)
        .with_target_grid_resolution(Some(0.5))
        .with_latitude((0.0, 2.0))
        .with_longitude((0.0, 3.0))
        .with_max_long_fcst_hours(24)
        .with_member_count(MEMBERS)
        .with_convert_vars(vec![temperature(), precipitation()])
        .with_ctl_idx_files(false)
        .with_workers(2, 4);
    config.validate().unwrap();

    let date = NaiveDate::from_ymd_opt(2016, 3, 15).unwrap();
    let ctx = RunContext::new(config, date, Arc::new(PpFieldStore::new())).unwrap();
    let out_dir = ctx.out_dir.clone();
    let summary = ConversionScheduler::new(ctx).run().await.unwrap();

    assert_eq!(summary.jobs_failed, 0);
    assert_eq!(summary.jobs_succeeded, 8);
    assert_eq!(summary.outputs_written.len(), 4);

    let messages = decode(&out_dir.join("um_prg_018hr_20160315_00Z.grib2"));
    assert_eq!(messages.len(), 2 * MEMBERS);

    let (temps, precips) = messages.split_at(MEMBERS);
    for (member, message) in temps.iter().enumerate() {
        assert_eq!(message.discipline, 0);
        assert_eq!(message.template, 1);
        assert_eq!((message.category, message.number), (0, 0));
        assert_eq!(message.forecast_time, 18);
        assert_eq!(message.perturbation as usize, member);
        // 5 latitudes x 7 longitudes
        assert_eq!(message.points, 35);
        assert!((message.reference_value - (280.0 + member as f32)).abs() < 1e-3);
    }
    for (member, message) in precips.iter().enumerate() {
        assert_eq!(message.template, 11);
        assert_eq!((message.category, message.number), (1, 8));
        // accumulation over (12, 18]
        assert_eq!(message.forecast_time, 12);
        assert!((message.reference_value - 0.5 * member as f32).abs() < 1e-3);
    }

    let names: Vec<String> = summary
        .outputs_written
        .iter()
        .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        names,
        vec![
            "um_prg_006hr_20160315_00Z.grib2",
            "um_prg_012hr_20160315_00Z.grib2",
            "um_prg_018hr_20160315_00Z.grib2",
            "um_prg_024hr_20160315_00Z.grib2",
        ]
    );
}
