//! GRIB2 encoding of packed ensembles.
//!
//! [`MessageEncoder`] turns an [`EnsembleBundle`] into one keyed
//! [`GribMessage`] per (member, level) slice and applies the ensemble
//! metadata rules; [`MessageWriter`] appends the serialised messages to
//! an output file.

pub mod message;
pub mod packing;

pub use message::GribMessage;
pub use packing::SimplePacking;

use crate::constants::grib2_params::{
    self, STAT_ACCUMULATION, STAT_AVERAGE, SURFACE_GROUND, SURFACE_HEIGHT_ABOVE_GROUND,
    SURFACE_ISOBARIC,
};
use crate::constants::{
    ACCUMULATION_WINDOWS, CENTRE_ID, ENSEMBLE_FORECAST_PERTURBED, GENERATING_PROCESS_ENSEMBLE,
    LOCAL_TABLE_VERSION, LOCAL_TABLES_SENTINEL, MEAN_SEA_LEVEL_PREFIX, MISSING_OCTET,
    SUB_CENTRE_ID, TEMPLATE_INTERVAL_ENSEMBLE, TEMPLATE_POINT_ENSEMBLE,
    TIME_INCREMENT_ACCUMULATION,
};
use crate::context::RunContext;
use crate::error::{ConversionError, Result};
use crate::models::{EnsembleBundle, GriddedField};
use chrono::Duration;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, trace};

/// Screen-level heights: STASH item -> (scale factor, scaled value) in metres
const HEIGHT_ABOVE_GROUND: &[(&str, i64, i64)] = &[
    ("s03i236", 1, 15),
    ("s03i237", 1, 15),
    ("s03i245", 1, 15),
    ("s03i209", 0, 10),
    ("s03i210", 0, 10),
];

/// Encodes ensemble bundles with the run's metadata rules
pub struct MessageEncoder<'a> {
    ctx: &'a RunContext,
}

impl<'a> MessageEncoder<'a> {
    pub fn new(ctx: &'a RunContext) -> Self {
        Self { ctx }
    }

    /// Lazily encode every slice of `bundle`; the bundle is consumed
    pub fn encode(&self, bundle: EnsembleBundle) -> EncodedMessages<'a> {
        let field = bundle.into_field();
        let levels = field.coord("pressure").map_or(1, |c| c.len().max(1));
        EncodedMessages {
            ctx: self.ctx,
            slices: field.slice_count(),
            levels,
            next: 0,
            field,
        }
    }
}

/// Finite, single-pass sequence of encoded messages
pub struct EncodedMessages<'a> {
    ctx: &'a RunContext,
    field: GriddedField,
    slices: usize,
    levels: usize,
    next: usize,
}

impl Iterator for EncodedMessages<'_> {
    type Item = Result<GribMessage>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.slices {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(self.encode_slice(index))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.slices - self.next;
        (remaining, Some(remaining))
    }
}

impl EncodedMessages<'_> {
    fn encode_slice(&self, index: usize) -> Result<GribMessage> {
        let field = &self.field;
        let member = index / self.levels;
        let level = field
            .coord("pressure")
            .and_then(|c| c.points.get(index % self.levels))
            .copied();
        let realization = field.dim_coords[0].points[member];

        let len = field.slice_len();
        let values = field.data[index * len..(index + 1) * len].to_vec();
        let mut msg = GribMessage::new(
            field.latitude().points.clone(),
            field.longitude().points.clone(),
            values,
        )?;

        let name = field.standard_name.as_str();
        let fail = |e: ConversionError| match e {
            ConversionError::Encoding { .. } => e,
            other => ConversionError::encoding(name, other.to_string()),
        };

        let (discipline, category, number) = grib2_params::lookup(name).ok_or_else(|| {
            ConversionError::encoding(name, "no GRIB2 parameter code for this variable")
        })?;

        if self.uses_local_table() {
            msg.set_long("tablesVersion", LOCAL_TABLES_SENTINEL).map_err(fail)?;
            msg.set_long("localTablesVersion", LOCAL_TABLE_VERSION).map_err(fail)?;
        }

        msg.set_long("discipline", discipline as i64).map_err(fail)?;
        msg.set_long("parameterCategory", category as i64).map_err(fail)?;
        msg.set_long("parameterNumber", number as i64).map_err(fail)?;
        self.set_generic(&mut msg, realization, level).map_err(fail)?;

        let bounded = field.time.forecast_period.bounds.is_some();
        let ensemble_rules = [
            ("centre", CENTRE_ID),
            ("subCentre", SUB_CENTRE_ID),
            ("typeOfGeneratingProcess", GENERATING_PROCESS_ENSEMBLE),
            (
                "productDefinitionTemplateNumber",
                if bounded {
                    TEMPLATE_INTERVAL_ENSEMBLE
                } else {
                    TEMPLATE_POINT_ENSEMBLE
                },
            ),
        ];
        for (key, value) in ensemble_rules {
            msg.set_long(key, value).map_err(fail)?;
        }
        if bounded {
            msg.set_long("typeOfTimeIncrement", TIME_INCREMENT_ACCUMULATION)
                .map_err(fail)?;
        }
        msg.set_long("perturbationNumber", realization.round() as i64)
            .map_err(fail)?;
        msg.set_long("numberOfForecastsInEnsemble", MISSING_OCTET as i64)
            .map_err(fail)?;
        msg.set_long("typeOfEnsembleForecast", ENSEMBLE_FORECAST_PERTURBED)
            .map_err(fail)?;

        if name.starts_with(MEAN_SEA_LEVEL_PREFIX) {
            msg.set_long("typeOfFirstFixedSurface", crate::constants::SURFACE_MEAN_SEA_LEVEL)
                .map_err(fail)?;
        }

        for (key, value) in &self.ctx.config.grib2_table_overrides {
            trace!("Applying user GRIB2 key {} = {}", key, value);
            msg.set_long(key, *value).map_err(fail)?;
        }

        debug!(
            "Encoded {} member {} level {:?}",
            name, realization, level
        );
        Ok(msg)
    }

    fn uses_local_table(&self) -> bool {
        let local = &self.ctx.config.local_table_vars;
        local.iter().any(|var| *var == self.field.standard_name)
            || self
                .field
                .long_name
                .as_deref()
                .is_some_and(|long_name| local.iter().any(|var| long_name.starts_with(var.as_str())))
    }

    /// Time, surface and statistical keys derived from the field itself
    fn set_generic(&self, msg: &mut GribMessage, realization: f64, level: Option<f64>) -> Result<()> {
        let field = &self.field;
        let time = &field.time;
        msg.set_reference_time(time.forecast_reference_time)?;
        msg.set_long(
            "typeOfProcessedData",
            if realization == 0.0 { 3 } else { 4 },
        )?;
        msg.set_long("productDefinitionTemplateNumber", 0)?;

        match level {
            Some(hpa) => {
                msg.set_long("typeOfFirstFixedSurface", SURFACE_ISOBARIC as i64)?;
                msg.set_long("scaleFactorOfFirstFixedSurface", 0)?;
                msg.set_long("scaledValueOfFirstFixedSurface", (hpa * 100.0).round() as i64)?;
            }
            None => match self.screen_height() {
                Some((scale, value)) => {
                    msg.set_long("typeOfFirstFixedSurface", SURFACE_HEIGHT_ABOVE_GROUND as i64)?;
                    msg.set_long("scaleFactorOfFirstFixedSurface", scale)?;
                    msg.set_long("scaledValueOfFirstFixedSurface", value)?;
                }
                None => msg.set_long("typeOfFirstFixedSurface", SURFACE_GROUND as i64)?,
            },
        }

        match time.forecast_period.bounds {
            None => msg.set_long("forecastTime", time.forecast_period.point.round() as i64)?,
            Some((start, end)) => {
                msg.set_long("productDefinitionTemplateNumber", 8)?;
                msg.set_long("forecastTime", start.round() as i64)?;
                let end_time = time.forecast_reference_time
                    + Duration::minutes((end * 60.0).round() as i64);
                msg.set_end_of_interval(end_time)?;
                msg.set_long("typeOfStatisticalProcessing", self.statistic() as i64)?;
                msg.set_long("indicatorOfUnitForTimeRange", 1)?;
                msg.set_long("lengthOfTimeRange", (end - start).round() as i64)?;
            }
        }
        Ok(())
    }

    fn screen_height(&self) -> Option<(i64, i64)> {
        let stash = self.field.attributes.get("STASH")?;
        HEIGHT_ABOVE_GROUND
            .iter()
            .find(|(item, ..)| stash.ends_with(item))
            .map(|(_, scale, value)| (*scale, *value))
    }

    fn statistic(&self) -> u8 {
        let field = &self.field;
        let accumulated = ACCUMULATION_WINDOWS
            .iter()
            .any(|(name, ..)| *name == field.standard_name)
            || field.cell_methods.iter().any(|m| m.method == "sum");
        if accumulated {
            STAT_ACCUMULATION
        } else {
            STAT_AVERAGE
        }
    }
}

/// Appends encoded messages to GRIB2 files
pub struct MessageWriter;

impl MessageWriter {
    /// Append every message to `path`, creating the file if needed.
    ///
    /// Returns the number of messages written. Messages are encoded in
    /// full before the file is touched, so an encoding failure leaves the
    /// file unchanged.
    pub fn append<I>(path: &Path, messages: I) -> Result<usize>
    where
        I: IntoIterator<Item = Result<GribMessage>>,
    {
        let mut buffer = Vec::new();
        let mut written = 0;
        for message in messages {
            buffer.extend_from_slice(&message?.to_bytes()?);
            written += 1;
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(&buffer)?;
        file.flush()?;
        debug!("Appended {} messages to {}", written, path.display());
        Ok(written)
    }
}
