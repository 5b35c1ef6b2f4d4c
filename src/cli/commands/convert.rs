//! Convert command: every selected date in order

use super::shared::{ConversionStats, print_date_summary, print_report, setup_logging};
use crate::cli::args::Args;
use crate::config::ConversionConfig;
use crate::context::RunContext;
use crate::processor::ConversionScheduler;
use crate::processor::sidecar::G2CtlGenerator;
use crate::store::PpFieldStore;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use colored::*;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Validate the configuration, then convert each date of the range.
pub async fn run_convert(args: Args) -> Result<ConversionStats> {
    setup_logging(&args);
    let start_time = Instant::now();

    let config = args.to_config();
    config.validate().context("Invalid configuration")?;
    let days = args
        .date_range()
        .context("Invalid date selection")?
        .days();

    println!(
        "{}",
        "Starting ensemble GRIB2 conversion".bright_green().bold()
    );
    println!("  {} {}", "Input:".bright_cyan(), config.in_path.display());
    println!("  {} {}", "Output:".bright_cyan(), config.out_path.display());
    println!("  {} {}", "Dates:".bright_cyan(), days.len());

    let mut stats = convert_dates(&config, &days, args.show_progress()).await?;

    stats.processing_time = start_time.elapsed();
    info!(
        "Converted {} dates, {} outputs written",
        stats.dates_converted, stats.outputs_written
    );
    print_report(&stats);
    Ok(stats)
}

/// Convert the dates in order.
///
/// A failed date is counted and the next date is attempted, unless the
/// error is fatal, which stops the run.
pub async fn convert_dates(
    config: &ConversionConfig,
    days: &[NaiveDate],
    show_progress: bool,
) -> Result<ConversionStats> {
    let store = Arc::new(PpFieldStore::new());
    let sidecar = Arc::new(G2CtlGenerator::from_config(config));
    let mut stats = ConversionStats::default();

    for &date in days {
        let mut ctx = RunContext::new(config.clone(), date, store.clone())
            .with_context(|| format!("Cannot prepare conversion of {}", date))?;
        if config.create_ctl_idx_files {
            ctx = ctx.with_sidecar(sidecar.clone());
        }

        let scheduler = ConversionScheduler::new(ctx).with_progress(show_progress);
        match scheduler.run().await {
            Ok(summary) => {
                print_date_summary(&summary);
                stats.record(&summary);
            }
            Err(e) if e.is_fatal() => {
                return Err(e)
                    .with_context(|| format!("Conversion of {} failed", date.format("%Y%m%d")));
            }
            Err(e) => {
                error!("Conversion of {} failed: {}", date.format("%Y%m%d"), e);
                stats.dates_failed += 1;
            }
        }
    }

    Ok(stats)
}
