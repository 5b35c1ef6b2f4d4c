//! Conversion scheduler.
//!
//! Converts one date: pre-flight checks, output status inspection, then
//! an outer pool over forecast-hour-files. Each forecast-hour-file opens
//! one inner pool per variable over that variable's forecast hours.
//! Messages are appended to pending outputs that are renamed into place
//! once every variable of the file is done, after which side-car files
//! are generated.

pub mod discovery;
pub mod pool;
pub mod sidecar;

#[cfg(test)]
mod tests;

use self::discovery::ForecastHourFile;
use self::pool::{Nesting, WorkerPool, run_blocking};
use self::sidecar::run_callback;

use crate::context::RunContext;
use crate::ensemble::EnsemblePacker;
use crate::error::{ConversionError, Result};
use crate::grib::{MessageEncoder, MessageWriter};
use crate::models::{ConversionJob, OutputDecision, RunSummary};
use crate::output_status::OutputStatusManager;

use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::fs;
use tracing::{debug, error, info, warn};

/// Drives the conversion of one date
#[derive(Debug)]
pub struct ConversionScheduler {
    ctx: Arc<RunContext>,
    show_progress: bool,
}

/// What happened to one forecast-hour-file
#[derive(Debug, Default)]
struct FileOutcome {
    abandoned: bool,
    jobs_succeeded: usize,
    jobs_failed: usize,
    outputs: Vec<PathBuf>,
    sidecars_failed: usize,
}

impl ConversionScheduler {
    pub fn new(ctx: RunContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            show_progress: false,
        }
    }

    /// Show a progress bar over forecast-hour-files
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Convert every forecast-hour-file of the date
    pub async fn run(&self) -> Result<RunSummary> {
        let start_time = Instant::now();
        let ctx = &self.ctx;
        let mut summary = RunSummary {
            date: ctx.date_string(),
            ..RunSummary::default()
        };

        if !ctx.in_dir.is_dir() {
            return Err(ConversionError::InputDirectoryNotFound {
                path: ctx.in_dir.clone(),
            });
        }
        // other dates may create the same tree concurrently
        fs::create_dir_all(&ctx.out_dir).await?;

        let report = OutputStatusManager::new(ctx).check()?;
        if report.decision == OutputDecision::ProceedSkip {
            info!(
                "All outputs for {} already exist in {}, skipping",
                summary.date,
                ctx.out_dir.display()
            );
            summary.skipped = true;
            summary.elapsed = start_time.elapsed();
            return Ok(summary);
        }

        let kind = ctx.config.file_kind()?;
        let files = discovery::forecast_hour_files(
            kind,
            &ctx.in_dir,
            ctx.config.max_long_fcst_hours,
            ctx.config.member_count,
        );
        summary.files_attempted = files.len();
        info!(
            "Converting {} forecast-hour-files of {:?} kind for {}",
            files.len(),
            kind,
            summary.date
        );

        let pb = self.progress_bar(files.len());
        let outer = WorkerPool::new(
            "forecast-hour-files",
            ctx.config.outer_workers,
            Nesting::NonRestricted,
        )?;
        let outcomes = outer
            .run(files, |file| {
                let ctx = Arc::clone(&self.ctx);
                let pb = pb.clone();
                async move {
                    let hour = file.hour.clone();
                    pb.set_message(format!("file {}", hour));
                    let outcome = convert_file(ctx, file).await;
                    pb.inc(1);
                    if let Err(e) = &outcome {
                        error!("Forecast-hour-file {} failed: {}", hour, e);
                    }
                    outcome
                }
            })
            .await;
        pb.finish_with_message("done");

        for outcome in outcomes {
            match outcome {
                Ok(outcome) => {
                    summary.files_abandoned += usize::from(outcome.abandoned);
                    summary.jobs_succeeded += outcome.jobs_succeeded;
                    summary.jobs_failed += outcome.jobs_failed;
                    summary.sidecars_failed += outcome.sidecars_failed;
                    summary.outputs_written.extend(outcome.outputs);
                }
                Err(_) => summary.files_abandoned += 1,
            }
        }
        summary.outputs_written.sort();

        if let Some(script) = ctx.config.callback_script.clone() {
            let (date, out_dir, utc) = (summary.date.clone(), ctx.out_dir.clone(), ctx.utc.clone());
            let callback = run_blocking("callback".to_string(), move || {
                run_callback(&script, &date, &out_dir, &utc)
            })
            .await;
            if let Err(e) = callback {
                warn!("Callback for {} failed: {}", summary.date, e);
            }
        }

        summary.elapsed = start_time.elapsed();
        info!(
            "Finished {}: {} jobs succeeded, {} failed, {} outputs",
            summary.date,
            summary.jobs_succeeded,
            summary.jobs_failed,
            summary.outputs_written.len()
        );
        Ok(summary)
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::default_bar().template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        ) {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    }
}

/// Convert all variables of one forecast-hour-file, then finalise its outputs
async fn convert_file(ctx: Arc<RunContext>, file: ForecastHourFile) -> Result<FileOutcome> {
    let mut outcome = FileOutcome::default();

    let missing = discovery::missing_members(ctx.store.as_ref(), &file.member_files);
    if let Some(first) = missing.first() {
        warn!(
            "Skipping forecast-hour-file {}: {} member files missing, e.g. {}",
            file.hour,
            missing.len(),
            first.display()
        );
        outcome.abandoned = true;
        return Ok(outcome);
    }

    let variables =
        discovery::applicable_variables(file.kind, &ctx.config.resolved_convert_vars());
    if variables.is_empty() {
        warn!("No variable selected from forecast-hour-file {}", file.hour);
        return Ok(outcome);
    }
    info!(
        "Forecast-hour-file {}: converting {}",
        file.hour,
        variables
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let hours = file.forecast_hours();
    let member_files: Arc<[PathBuf]> = file.member_files.clone().into();
    let mut written_hours = BTreeSet::new();

    // variables run one after another, so no two jobs share an output
    for variable in variables {
        let jobs: Vec<ConversionJob> = hours
            .iter()
            .map(|&forecast_hour| ConversionJob {
                variable: variable.clone(),
                forecast_hour,
                member_files: Arc::clone(&member_files),
            })
            .collect();

        let inner = WorkerPool::new(
            format!("{} {}", file.hour, variable.name),
            ctx.config.inner_workers,
            Nesting::Restricted,
        )?;
        let results = inner
            .run(jobs, |job| {
                let ctx = Arc::clone(&ctx);
                async move {
                    let label = job.label();
                    let result = run_blocking(label.clone(), move || convert_job(&ctx, &job)).await;
                    if let Err(e) = &result {
                        error!("Job {} failed: {}", label, e);
                    }
                    result
                }
            })
            .await;

        for result in results {
            match result {
                Ok(hour) => {
                    outcome.jobs_succeeded += 1;
                    written_hours.insert(hour);
                }
                Err(_) => outcome.jobs_failed += 1,
            }
        }
    }

    for hour in written_hours {
        let pending = ctx.pending_path(hour);
        let primary = ctx.primary_path(hour);
        if pending != primary {
            fs::rename(&pending, &primary).await?;
        }
        debug!("Completed {}", primary.display());
        outcome.outputs.push(primary);
    }

    outcome.sidecars_failed = generate_sidecars(&ctx, &outcome.outputs).await?;
    info!(
        "Forecast-hour-file {} done: {} jobs succeeded, {} failed",
        file.hour, outcome.jobs_succeeded, outcome.jobs_failed
    );
    Ok(outcome)
}

/// Pack, encode and append one job; returns the output hour written
fn convert_job(ctx: &RunContext, job: &ConversionJob) -> Result<u32> {
    debug!("Starting {}", job.label());
    let bundle = EnsemblePacker::new(ctx).pack(job)?;
    let hour = bundle.field().time.forecast_period.label_hour();
    let path = ctx.pending_path(hour);

    let messages = MessageEncoder::new(ctx).encode(bundle);
    let written = MessageWriter::append(&path, messages)?;
    info!(
        "{}: {} messages appended to {}",
        job.label(),
        written,
        path.display()
    );
    Ok(hour)
}

/// Generate side-cars for every completed output; returns the failure count
async fn generate_sidecars(ctx: &Arc<RunContext>, outputs: &[PathBuf]) -> Result<usize> {
    let Some(generator) = ctx.sidecar.clone() else {
        return Ok(0);
    };
    if !ctx.config.create_ctl_idx_files || outputs.is_empty() {
        return Ok(0);
    }

    let pool = WorkerPool::new("side-cars", ctx.config.inner_workers, Nesting::Restricted)?;
    let results = pool
        .run(outputs.to_vec(), |primary| {
            let generator = Arc::clone(&generator);
            async move {
                let label = format!("side-car {}", primary.display());
                let result = run_blocking(label, move || generator.generate(&primary)).await;
                if let Err(e) = &result {
                    warn!("{}", e);
                }
                result
            }
        })
        .await;

    Ok(results.iter().filter(|r| r.is_err()).count())
}
