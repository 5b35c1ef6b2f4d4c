//! Re-running a date over existing, partial or stale outputs

use super::*;
use crate::processor::ConversionScheduler;

fn outputs(out_dir: &Path) -> Vec<(String, Vec<u8>)> {
    let mut files: Vec<(String, Vec<u8>)> = fs::read_dir(out_dir)
        .unwrap()
        .map(|entry| {
            let entry = entry.unwrap();
            (
                entry.file_name().to_string_lossy().into_owned(),
                fs::read(entry.path()).unwrap(),
            )
        })
        .collect();
    files.sort();
    files
}

fn scheduler(temp_dir: &TempDir, overwrite: bool) -> ConversionScheduler {
    let config = config(temp_dir)
        .with_overwrite(overwrite)
        .with_convert_vars(vec![temperature(), precipitation()]);
    let store = Arc::new(store(&config, &[temperature(), precipitation()], 3));
    ConversionScheduler::new(context(config, store))
}

#[tokio::test]
async fn test_second_run_skips_and_leaves_outputs_untouched() {
    let temp_dir = TempDir::new().unwrap();
    let scheduler = scheduler(&temp_dir, false);
    let out_dir = scheduler.context().out_dir.clone();

    let first = scheduler.run().await.unwrap();
    assert_eq!(first.outputs_written.len(), 4);
    let before = outputs(&out_dir);
    assert_eq!(before.len(), 4);

    let second = scheduler.run().await.unwrap();
    assert!(second.skipped);
    assert_eq!(second.jobs_succeeded, 0);
    assert_eq!(outputs(&out_dir), before);
}

#[tokio::test]
async fn test_overwrite_regenerates_identical_outputs() {
    let temp_dir = TempDir::new().unwrap();
    let first = scheduler(&temp_dir, false);
    let out_dir = first.context().out_dir.clone();
    first.run().await.unwrap();
    let before = outputs(&out_dir);

    let summary = scheduler(&temp_dir, true).run().await.unwrap();
    assert!(!summary.skipped);
    assert_eq!(summary.jobs_succeeded, 8);
    // messages are not appended twice
    assert_eq!(outputs(&out_dir), before);
}

#[tokio::test]
async fn test_stale_intermediate_forces_regeneration() {
    let temp_dir = TempDir::new().unwrap();
    let scheduler = scheduler(&temp_dir, false);
    let ctx = scheduler.context().clone();
    scheduler.run().await.unwrap();
    let before = outputs(&ctx.out_dir);

    // an interrupted run leaves a pending file behind
    let pending = ctx.pending_path(18);
    fs::write(&pending, b"GRIB partial").unwrap();

    let summary = scheduler.run().await.unwrap();
    assert!(!summary.skipped);
    assert_eq!(summary.jobs_succeeded, 8);
    assert!(!pending.exists());
    assert_eq!(outputs(&ctx.out_dir), before);
}

#[tokio::test]
async fn test_partial_outputs_force_regeneration() {
    let temp_dir = TempDir::new().unwrap();
    let scheduler = scheduler(&temp_dir, false);
    let ctx = scheduler.context().clone();
    scheduler.run().await.unwrap();
    let before = outputs(&ctx.out_dir);

    fs::remove_file(ctx.primary_path(6)).unwrap();
    fs::write(ctx.primary_path(24), b"truncated").unwrap();

    let summary = scheduler.run().await.unwrap();
    assert!(!summary.skipped);
    assert_eq!(outputs(&ctx.out_dir), before);
}

#[tokio::test]
async fn test_overwrite_over_partial_outputs() {
    let temp_dir = TempDir::new().unwrap();
    let first = scheduler(&temp_dir, false);
    let ctx = first.context().clone();
    first.run().await.unwrap();
    let before = outputs(&ctx.out_dir);

    fs::remove_file(ctx.primary_path(12)).unwrap();

    let summary = scheduler(&temp_dir, true).run().await.unwrap();
    assert!(!summary.skipped);
    assert_eq!(summary.jobs_succeeded, 8);
    assert_eq!(outputs(&ctx.out_dir), before);
}

#[tokio::test]
async fn test_overwrite_over_stale_intermediate() {
    let temp_dir = TempDir::new().unwrap();
    let first = scheduler(&temp_dir, false);
    let ctx = first.context().clone();
    first.run().await.unwrap();
    let before = outputs(&ctx.out_dir);

    let pending = ctx.pending_path(6);
    fs::write(&pending, b"GRIB partial").unwrap();

    let summary = scheduler(&temp_dir, true).run().await.unwrap();
    assert!(!summary.skipped);
    assert_eq!(summary.jobs_succeeded, 8);
    assert!(!pending.exists());
    assert_eq!(outputs(&ctx.out_dir), before);
}
