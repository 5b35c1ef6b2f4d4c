//! Side-car files and the post-run callback.
//!
//! GrADS needs a control file and an index file next to every GRIB2
//! output; both are produced by external tools once a primary file is
//! complete.

use crate::config::ConversionConfig;
use crate::constants::CTL_EXTENSION;
use crate::error::{ConversionError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::{debug, info, warn};

/// Produces companion files for a finished primary output
pub trait SideCarGenerator: Send + Sync {
    fn generate(&self, primary: &Path) -> Result<()>;
}

/// Runs `g2ctl` and `gribmap` to build the `.ctl` and `.idx` side-cars
#[derive(Debug, Clone)]
pub struct G2CtlGenerator {
    g2ctl: PathBuf,
    gribmap: PathBuf,
}

impl G2CtlGenerator {
    pub fn new(g2ctl: impl Into<PathBuf>, gribmap: impl Into<PathBuf>) -> Self {
        Self {
            g2ctl: g2ctl.into(),
            gribmap: gribmap.into(),
        }
    }

    pub fn from_config(config: &ConversionConfig) -> Self {
        Self::new(&config.g2ctl_path, &config.gribmap_path)
    }
}

impl SideCarGenerator for G2CtlGenerator {
    fn generate(&self, primary: &Path) -> Result<()> {
        let mut ctl = primary.as_os_str().to_owned();
        ctl.push(CTL_EXTENSION);
        let ctl = PathBuf::from(ctl);
        let workdir = primary.parent().unwrap_or_else(|| Path::new("."));

        // -verf: forecast verification time is the end of the bounds
        let output = run_tool(
            primary,
            Command::new(&self.g2ctl)
                .arg("-ts6hr")
                .arg("-verf")
                .arg(primary)
                .current_dir(workdir),
        )?;
        fs::write(&ctl, &output.stdout)?;
        debug!("Wrote control file {}", ctl.display());

        run_tool(
            primary,
            Command::new(&self.gribmap)
                .arg("-i")
                .arg(&ctl)
                .current_dir(workdir),
        )?;
        info!("Created control and index files for {}", primary.display());
        Ok(())
    }
}

fn run_tool(primary: &Path, command: &mut Command) -> Result<Output> {
    let program = command.get_program().to_string_lossy().into_owned();
    let output = command.output().map_err(|e| ConversionError::SideCar {
        path: primary.to_path_buf(),
        reason: format!("cannot run {}: {}", program, e),
    })?;
    if !output.status.success() {
        return Err(ConversionError::SideCar {
            path: primary.to_path_buf(),
            reason: format!(
                "{} exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(output)
}

/// Invoke the user callback once a date has been converted
pub fn run_callback(script: &Path, date: &str, out_dir: &Path, utc: &str) -> Result<()> {
    let script = fs::canonicalize(script).map_err(|e| ConversionError::Callback {
        reason: format!("callback script '{}' not found: {}", script.display(), e),
    })?;

    info!("Running callback script {}", script.display());
    let status = Command::new(&script)
        .arg(format!("--date={}", date))
        .arg(format!("--outpath={}", out_dir.display()))
        .arg("--oftype=forecast")
        .arg(format!("--utc={}", utc))
        .status()
        .map_err(|e| ConversionError::Callback {
            reason: format!("cannot run {}: {}", script.display(), e),
        })?;

    if !status.success() {
        warn!("Callback script {} exited with {}", script.display(), status);
        return Err(ConversionError::Callback {
            reason: format!("{} exited with {}", script.display(), status),
        });
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_g2ctl_generator_writes_side_cars() {
        let temp_dir = TempDir::new().unwrap();
        let tools = temp_dir.path().join("tools");
        let out = temp_dir.path().join("out");
        fs::create_dir_all(&tools).unwrap();
        fs::create_dir_all(&out).unwrap();

        let g2ctl = script(&tools, "g2ctl", r#"echo "dset $3""#);
        let gribmap = script(&tools, "gribmap", r#"touch "${2%.ctl}.idx""#);
        let primary = out.join("um_prg_006hr_20160315_00Z.grib2");
        fs::write(&primary, b"GRIB").unwrap();

        G2CtlGenerator::new(g2ctl, gribmap).generate(&primary).unwrap();

        let ctl = fs::read_to_string(out.join("um_prg_006hr_20160315_00Z.grib2.ctl")).unwrap();
        assert_eq!(ctl.trim(), format!("dset {}", primary.display()));
        assert!(out.join("um_prg_006hr_20160315_00Z.grib2.idx").exists());
    }

    #[test]
    fn test_missing_tool_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let primary = temp_dir.path().join("out.grib2");
        fs::write(&primary, b"GRIB").unwrap();

        let generator = G2CtlGenerator::new(temp_dir.path().join("no-g2ctl"), "gribmap");
        assert!(matches!(
            generator.generate(&primary),
            Err(ConversionError::SideCar { .. })
        ));
    }

    #[test]
    fn test_callback_receives_run_arguments() {
        let temp_dir = TempDir::new().unwrap();
        let record = temp_dir.path().join("args.txt");
        let callback = script(
            temp_dir.path(),
            "callback.sh",
            &format!(r#"echo "$@" > "{}""#, record.display()),
        );

        run_callback(&callback, "20160315", Path::new("/data/out/20160315"), "00").unwrap();

        let args = fs::read_to_string(&record).unwrap();
        assert_eq!(
            args.trim(),
            "--date=20160315 --outpath=/data/out/20160315 --oftype=forecast --utc=00"
        );
    }

    #[test]
    fn test_missing_callback_script() {
        let temp_dir = TempDir::new().unwrap();
        let result = run_callback(
            &temp_dir.path().join("absent.sh"),
            "20160315",
            temp_dir.path(),
            "00",
        );
        assert!(matches!(result, Err(ConversionError::Callback { .. })));
    }

    #[test]
    fn test_failing_callback() {
        let temp_dir = TempDir::new().unwrap();
        let callback = script(temp_dir.path(), "fail.sh", "exit 3");
        let result = run_callback(&callback, "20160315", temp_dir.path(), "00");
        assert!(matches!(result, Err(ConversionError::Callback { .. })));
    }
}
