//! Shared components for CLI commands
//!
//! Logging setup and the run report printed after a conversion.

use crate::cli::args::Args;
use crate::models::RunSummary;
use colored::*;
use indicatif::HumanDuration;
use std::time::Duration;
use tracing::debug;

/// Totals over every date of one invocation
#[derive(Debug, Clone, Default)]
pub struct ConversionStats {
    pub dates_converted: usize,
    pub dates_skipped: usize,
    pub dates_failed: usize,
    pub files_abandoned: usize,
    pub jobs_succeeded: usize,
    pub jobs_failed: usize,
    pub outputs_written: usize,
    pub sidecars_failed: usize,
    pub processing_time: Duration,
}

impl ConversionStats {
    /// Fold one date's summary into the totals
    pub fn record(&mut self, summary: &RunSummary) {
        if summary.skipped {
            self.dates_skipped += 1;
        } else {
            self.dates_converted += 1;
        }
        self.files_abandoned += summary.files_abandoned;
        self.jobs_succeeded += summary.jobs_succeeded;
        self.jobs_failed += summary.jobs_failed;
        self.outputs_written += summary.outputs_written.len();
        self.sidecars_failed += summary.sidecars_failed;
    }

    pub fn has_failures(&self) -> bool {
        self.dates_failed > 0 || self.jobs_failed > 0 || self.files_abandoned > 0
    }
}

/// Set up structured logging on stderr
pub fn setup_logging(args: &Args) {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let log_level = args.get_log_level();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("eps2grib={}", log_level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_level(true)
                .with_timer(fmt::time::uptime())
                .with_writer(std::io::stderr),
        )
        .init();

    debug!("Logging initialized at level: {}", log_level);
}

/// Print the coloured summary of one date
pub fn print_date_summary(summary: &RunSummary) {
    if summary.skipped {
        println!(
            "  {} {}",
            summary.date.bright_white(),
            "complete, skipped".bright_yellow()
        );
        return;
    }
    println!(
        "  {} {} outputs, {} jobs ({:.1}% succeeded) in {}",
        summary.date.bright_white(),
        summary.outputs_written.len().to_string().bright_white(),
        (summary.jobs_succeeded + summary.jobs_failed).to_string(),
        summary.success_rate(),
        HumanDuration(summary.elapsed)
    );
}

/// Print the final report over all dates
pub fn print_report(stats: &ConversionStats) {
    println!("\n{}", "Conversion Summary".bright_green().bold());
    println!(
        "  {} {}",
        "Time elapsed:".bright_cyan(),
        HumanDuration(stats.processing_time).to_string().bright_white()
    );
    println!(
        "  {} {}",
        "Dates converted:".bright_cyan(),
        stats.dates_converted.to_string().bright_white()
    );
    if stats.dates_skipped > 0 {
        println!(
            "  {} {}",
            "Dates skipped:".bright_cyan(),
            stats.dates_skipped.to_string().bright_white()
        );
    }
    println!(
        "  {} {}",
        "Outputs written:".bright_cyan(),
        stats.outputs_written.to_string().bright_white().bold()
    );
    println!(
        "  {} {}",
        "Jobs succeeded:".bright_cyan(),
        stats.jobs_succeeded.to_string().bright_white()
    );
    for (label, count) in [
        ("Dates failed:", stats.dates_failed),
        ("Jobs failed:", stats.jobs_failed),
        ("Files abandoned:", stats.files_abandoned),
        ("Side-cars failed:", stats.sidecars_failed),
    ] {
        if count > 0 {
            println!(
                "  {} {}",
                label.bright_red(),
                count.to_string().bright_red().bold()
            );
        }
    }
}
