//! Output status inspection.
//!
//! Before a date is converted the expected outputs of every forecast hour
//! (the primary GRIB2 file plus its control and index siblings) are
//! inspected. Leftovers of an interrupted run, either a partial output set
//! or stray intermediate files, force a second pass that removes
//! everything so the date is regenerated from scratch.

use crate::constants::SIBLING_EXTENSIONS;
use crate::context::RunContext;
use crate::error::{ConversionError, Result};
use crate::models::{CodecKind, OutputDecision, OutputDescriptor, OutputState};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Outcome of an output inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputStatusReport {
    /// State found by the first pass
    pub initial: OutputState,
    /// State after any forced overwrite
    pub final_state: OutputState,
    pub decision: OutputDecision,
}

/// State of one inspection pass and how many files it deleted
struct Inspection {
    state: OutputState,
    removed: usize,
}

pub struct OutputStatusManager<'a> {
    ctx: &'a RunContext,
}

impl<'a> OutputStatusManager<'a> {
    pub fn new(ctx: &'a RunContext) -> Self {
        Self { ctx }
    }

    /// Forecast hours covered by one date's outputs
    pub fn forecast_hours(&self) -> Vec<u32> {
        let step = self.ctx.config.start_step_long_fcst_hour.max(1);
        (step..=self.ctx.config.max_long_fcst_hours)
            .step_by(step as usize)
            .collect()
    }

    /// Every file a complete run leaves behind
    pub fn expected_outputs(&self) -> Vec<PathBuf> {
        let siblings: &[&str] = if self.ctx.config.create_ctl_idx_files {
            SIBLING_EXTENSIONS
        } else {
            &SIBLING_EXTENSIONS[..1]
        };
        self.forecast_hours()
            .into_iter()
            .flat_map(|hour| {
                let primary = self.ctx.primary_name(hour);
                siblings
                    .iter()
                    .map(move |ext| self.ctx.out_dir.join(format!("{}{}", primary, ext)))
            })
            .collect()
    }

    /// Inspect the output directory and decide whether to convert the date
    pub fn check(&self) -> Result<OutputStatusReport> {
        let first = self.inspect(self.ctx.config.overwrite)?;
        let initial = first.state;
        let mut final_state = initial;

        // the forced pass removes everything, so it never needs repeating
        if initial.requires_forced_overwrite() {
            warn!(
                "{:?} in {}, removing all outputs of this date",
                initial,
                self.ctx.out_dir.display()
            );
            let second = self.inspect(true)?;
            final_state = second.state;
            if final_state == OutputState::DoesNotExist && first.removed > 0 {
                final_state = OutputState::Removed;
            }
        }

        let decision = match final_state {
            OutputState::Exists => OutputDecision::ProceedSkip,
            _ => OutputDecision::ProceedFresh,
        };
        info!(
            "Output status for {}: {:?} -> {:?} ({:?})",
            self.ctx.date_string(),
            initial,
            final_state,
            decision
        );

        Ok(OutputStatusReport {
            initial,
            final_state,
            decision,
        })
    }

    fn inspect(&self, overwrite: bool) -> Result<Inspection> {
        if !self.ctx.out_dir.is_dir() {
            return Ok(Inspection {
                state: OutputState::DoesNotExist,
                removed: 0,
            });
        }

        let expected = self.expected_outputs();
        let present: Vec<&PathBuf> = expected.iter().filter(|path| path.is_file()).collect();

        let mut state = if present.is_empty() {
            OutputState::DoesNotExist
        } else if present.len() < expected.len() {
            debug!(
                "{} of {} expected outputs present",
                present.len(),
                expected.len()
            );
            OutputState::PartialExists
        } else if overwrite {
            OutputState::Removed
        } else {
            OutputState::Exists
        };

        let mut removed = 0;
        if overwrite {
            for path in &present {
                fs::remove_file(path)?;
                debug!("Removed {}", path.display());
                removed += 1;
            }
            if state == OutputState::PartialExists {
                state = OutputState::Removed;
            }
        }

        let swept = self.sweep_intermediates()?;
        if swept > 0 {
            state = OutputState::IntermediateExists;
            removed += swept;
        }
        Ok(Inspection { state, removed })
    }

    /// Leftovers of an interrupted run of this date and cycle: pending
    /// GRIB2 files and intermediate exchange-format artifacts
    pub fn find_intermediates(&self) -> Result<Vec<OutputDescriptor>> {
        let template = &self.ctx.template;
        let date = self.ctx.date_string();
        let out_dir = glob::Pattern::escape(&self.ctx.out_dir.to_string_lossy());

        let mut patterns = vec![(
            template.intermediate_pattern(&self.ctx.indices, &date, &self.ctx.utc),
            CodecKind::Intermediate,
        )];
        // without a pre-extension pending and primary names coincide
        if !self.ctx.config.pre_extension.is_empty() {
            patterns.push((
                template.hour_pattern(
                    &self.ctx.indices,
                    &date,
                    &self.ctx.utc,
                    &self.ctx.config.pre_extension,
                ),
                CodecKind::Grib2,
            ));
        }

        let mut found = Vec::new();
        for (name_pattern, codec) in patterns {
            let pattern = format!("{}/{}", out_dir, name_pattern);
            let paths = glob::glob(&pattern).map_err(|e| {
                ConversionError::configuration(format!(
                    "invalid output pattern '{}': {}",
                    pattern, e
                ))
            })?;
            for path in paths {
                let path = path.map_err(|e| e.into_error())?;
                if path.is_file() {
                    found.push(OutputDescriptor { path, codec });
                }
            }
        }
        Ok(found)
    }

    /// Remove leftover intermediate files, returning how many were found
    fn sweep_intermediates(&self) -> Result<usize> {
        let intermediates = self.find_intermediates()?;
        for output in &intermediates {
            fs::remove_file(&output.path)?;
            debug!("Removed {:?} leftover {}", output.codec, output.path.display());
        }
        Ok(intermediates.len())
    }
}
