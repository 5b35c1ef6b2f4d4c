//! Ensemble packing.
//!
//! Member fields are retrieved (and regridded when configured) one at a
//! time and appended to a growing buffer with a leading realization axis.
//! Member 0 is the control run and supplies the bundle's metadata.

use crate::constants::{ACCUMULATION_WINDOWS, REALIZATION_COORD, REALIZATION_LONG_NAME};
use crate::context::RunContext;
use crate::error::{ConversionError, Result};
use crate::models::{
    CellMethod, ConversionJob, DimCoord, EnsembleBundle, FieldQuery, GriddedField, VariableSpec,
};
use crate::regrid::regrid;
use tracing::{debug, info};

/// Forecast hour used to retrieve `variable` for a requested hour.
///
/// Accumulated variables are matched on the midpoint of their
/// accumulation period rather than on its end.
pub fn corrected_forecast_hour(variable: &VariableSpec, hour: u32) -> f64 {
    let window = ACCUMULATION_WINDOWS
        .iter()
        .find(|(name, stash, _)| *name == variable.name && *stash == variable.stash)
        .map_or(0, |(_, _, window)| *window);
    hour as f64 - window as f64
}

/// Packs the members of one conversion job into an ensemble bundle
pub struct EnsemblePacker<'a> {
    ctx: &'a RunContext,
}

impl<'a> EnsemblePacker<'a> {
    pub fn new(ctx: &'a RunContext) -> Self {
        Self { ctx }
    }

    /// Retrieve, regrid and stack every member of `job`.
    ///
    /// A missing member file or a failing member aborts the whole job.
    pub fn pack(&self, job: &ConversionJob) -> Result<EnsembleBundle> {
        let config = &self.ctx.config;
        let hour = corrected_forecast_hour(&job.variable, job.forecast_hour);
        if hour != job.forecast_hour as f64 {
            debug!(
                "{} retrieved at corrected forecast hour {}",
                job.variable, hour
            );
        }

        let query = FieldQuery::new(job.variable.clone(), hour)
            .with_latitude(config.latitude)
            .with_longitude(config.longitude)
            .with_pressure_levels(config.pressure_levels.clone());

        let mut stacker = EnsembleStacker::new(job.member_files.len());
        for (member, path) in job.member_files.iter().enumerate() {
            debug!("Extracting member {} of {} from {}", member, job.variable, path.display());
            let field = self.ctx.store.retrieve(path, &query)?;
            let field = match &self.ctx.target_grid {
                Some(grid) => regrid(&field, grid)?,
                None => field,
            };
            if config.debug {
                info!(
                    "Member {} of {}: shape {:?}, forecast period {:?}",
                    member, job.variable, field.shape, field.time.forecast_period
                );
            }
            stacker.push(field)?;
        }

        stacker.finish(&job.variable.name)
    }
}

/// Stack already retrieved member fields, member 0 being the control run
pub fn stack(members: impl IntoIterator<Item = GriddedField>) -> Result<EnsembleBundle> {
    let members = members.into_iter();
    let mut stacker = EnsembleStacker::new(members.size_hint().0);
    let mut name = String::new();
    for field in members {
        if name.is_empty() {
            name = field.standard_name.clone();
        }
        stacker.push(field)?;
    }
    stacker.finish(&name)
}

/// Incremental stacking; each member is dropped once its data is copied
struct EnsembleStacker {
    expected: usize,
    control: Option<GriddedField>,
    data: Vec<f32>,
    members: usize,
}

impl EnsembleStacker {
    fn new(expected: usize) -> Self {
        Self {
            expected,
            control: None,
            data: Vec::new(),
            members: 0,
        }
    }

    fn push(&mut self, field: GriddedField) -> Result<()> {
        match &self.control {
            None => {
                self.data.reserve(field.data.len() * self.expected.max(1));
                self.data.extend_from_slice(&field.data);
                // keep the control's metadata, not its data
                self.control = Some(GriddedField {
                    data: Vec::new(),
                    ..field
                });
            }
            Some(control) => {
                check_member(control, &field, self.members)?;
                self.data.extend_from_slice(&field.data);
            }
        }
        self.members += 1;
        Ok(())
    }

    fn finish(self, variable: &str) -> Result<EnsembleBundle> {
        let Some(control) = self.control else {
            return Err(ConversionError::EnsembleMismatch {
                variable: variable.to_string(),
                member: 0,
                reason: "no ensemble members to pack".to_string(),
            });
        };

        let realization = DimCoord::new(
            REALIZATION_COORD,
            "1",
            (0..self.members).map(|m| m as f64).collect(),
        )
        .with_long_name(REALIZATION_LONG_NAME);

        let mut dim_coords = Vec::with_capacity(control.dim_coords.len() + 1);
        dim_coords.push(realization);
        dim_coords.extend(control.dim_coords.iter().cloned());

        let mut cell_methods = vec![CellMethod::ensemble()];
        cell_methods.extend(control.cell_methods.first().cloned());

        let field = GriddedField {
            data: self.data,
            shape: dim_coords.iter().map(DimCoord::len).collect(),
            dim_coords,
            cell_methods,
            ..control
        };
        field.check_consistency()?;
        debug!("Packed {} members of {} into {:?}", self.members, variable, field.shape);

        EnsembleBundle::from_field(field)
    }
}

fn check_member(control: &GriddedField, member: &GriddedField, index: usize) -> Result<()> {
    let mismatch = |reason: String| ConversionError::EnsembleMismatch {
        variable: control.standard_name.clone(),
        member: index,
        reason,
    };

    if member.shape != control.shape {
        return Err(mismatch(format!(
            "shape {:?} differs from control shape {:?}",
            member.shape, control.shape
        )));
    }
    if member.units != control.units {
        return Err(mismatch(format!(
            "units '{}' differ from control units '{}'",
            member.units, control.units
        )));
    }
    let same_coords = member
        .dim_coords
        .iter()
        .zip(&control.dim_coords)
        .all(|(a, b)| a.name == b.name && a.points == b.points);
    if !same_coords {
        return Err(mismatch(
            "dimension coordinates differ from the control run".to_string(),
        ));
    }
    Ok(())
}
