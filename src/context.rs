//! Immutable per-date run context shared by every worker.

use crate::config::ConversionConfig;
use crate::error::{ConversionError, Result};
use crate::naming::{FileNameTemplate, TemplateIndices};
use crate::processor::sidecar::SideCarGenerator;
use crate::regrid::TargetGrid;
use crate::store::FieldStore;
use chrono::NaiveDate;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Everything a job needs to know about the run it belongs to
#[derive(Clone)]
pub struct RunContext {
    pub config: ConversionConfig,
    pub date: NaiveDate,
    pub utc: String,
    /// Dated input directory holding the member files
    pub in_dir: PathBuf,
    /// Dated output directory
    pub out_dir: PathBuf,
    pub template: FileNameTemplate,
    pub indices: TemplateIndices,
    pub target_grid: Option<TargetGrid>,
    pub store: Arc<dyn FieldStore>,
    pub sidecar: Option<Arc<dyn SideCarGenerator>>,
}

impl RunContext {
    pub fn new(
        config: ConversionConfig,
        date: NaiveDate,
        store: Arc<dyn FieldStore>,
    ) -> Result<Self> {
        let day = date.format("%Y%m%d").to_string();
        let target_grid = config
            .target_grid_resolution
            .map(|res| TargetGrid::from_resolution(res, config.latitude, config.longitude))
            .transpose()?;
        let template = config.fcst_file_name_structure.clone();
        template.validate()?;
        if config.utc.is_empty() {
            return Err(ConversionError::configuration("utc cycle is empty"));
        }

        Ok(Self {
            utc: config.utc.clone(),
            in_dir: config.in_path.join(&day),
            out_dir: config.out_path.join(&day),
            indices: template.indices(),
            template,
            target_grid,
            store,
            sidecar: None,
            date,
            config,
        })
    }

    pub fn with_sidecar(mut self, sidecar: Arc<dyn SideCarGenerator>) -> Self {
        self.sidecar = Some(sidecar);
        self
    }

    /// Date as `YYYYMMDD`
    pub fn date_string(&self) -> String {
        self.date.format("%Y%m%d").to_string()
    }

    /// Final primary output file name for a forecast hour
    pub fn primary_name(&self, hour: u32) -> String {
        self.template
            .name(&self.indices, &self.date_string(), hour, &self.utc, "")
    }

    /// Output path while a forecast hour is still being written
    pub fn pending_path(&self, hour: u32) -> PathBuf {
        self.out_dir.join(self.template.name(
            &self.indices,
            &self.date_string(),
            hour,
            &self.utc,
            &self.config.pre_extension,
        ))
    }

    pub fn primary_path(&self, hour: u32) -> PathBuf {
        self.out_dir.join(self.primary_name(hour))
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("date", &self.date)
            .field("utc", &self.utc)
            .field("in_dir", &self.in_dir)
            .field("out_dir", &self.out_dir)
            .field("template", &self.template)
            .field("regrid", &self.target_grid.as_ref().map(TargetGrid::shape))
            .field("sidecar", &self.sidecar.is_some())
            .finish()
    }
}
