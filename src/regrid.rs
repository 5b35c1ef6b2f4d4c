//! Bilinear regridding onto a regular latitude/longitude target grid.
//!
//! Target points outside the source extent are linearly extrapolated from
//! the edge cells and never masked. Sources spanning the full circle in
//! longitude are treated as periodic.

use crate::constants::{GLOBAL_LATITUDE, GLOBAL_LONGITUDE};
use crate::error::{ConversionError, Result};
use crate::models::{DimCoord, GriddedField};
use tracing::debug;

/// Ordered sample points for the two horizontal axes
#[derive(Debug, Clone, PartialEq)]
pub struct TargetGrid {
    pub latitudes: Vec<f64>,
    pub longitudes: Vec<f64>,
}

impl TargetGrid {
    /// Build the grid `start, start + res, ...` up to and including `end`
    /// on each axis, defaulting to the global extent.
    pub fn from_resolution(
        resolution: f64,
        latitude: Option<(f64, f64)>,
        longitude: Option<(f64, f64)>,
    ) -> Result<Self> {
        if !resolution.is_finite() || resolution <= 0.0 {
            return Err(ConversionError::configuration(format!(
                "target grid resolution must be positive, got {}",
                resolution
            )));
        }
        let (slat, elat) = latitude.unwrap_or(GLOBAL_LATITUDE);
        let (slon, elon) = longitude.unwrap_or(GLOBAL_LONGITUDE);

        Ok(Self {
            latitudes: arange(slat, elat + resolution, resolution),
            longitudes: arange(slon, elon + resolution, resolution),
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.latitudes.len(), self.longitudes.len())
    }
}

/// Half-open range `[start, stop)` sampled every `step`
fn arange(start: f64, stop: f64, step: f64) -> Vec<f64> {
    let count = ((stop - start) / step - 1e-9).ceil().max(0.0) as usize;
    (0..count).map(|k| start + k as f64 * step).collect()
}

/// Interpolation stencil for one target point on one axis
#[derive(Debug, Clone, Copy, PartialEq)]
struct Stencil {
    lower: usize,
    upper: usize,
    weight: f64,
}

/// Interpolate `field` onto `grid` over its two trailing axes
pub fn regrid(field: &GriddedField, grid: &TargetGrid) -> Result<GriddedField> {
    let name = field.standard_name.as_str();
    field
        .check_consistency()
        .map_err(|e| ConversionError::regrid(name, e.to_string()))?;

    let src_lat = field.latitude();
    let src_lon = field.longitude();
    let rows = axis_stencils(name, &src_lat.points, &grid.latitudes, false)?;
    let cols = axis_stencils(name, &src_lon.points, &grid.longitudes, true)?;

    let src_nx = src_lon.len();
    let src_len = field.slice_len();
    let dst_len = rows.len() * cols.len();
    let mut data = Vec::with_capacity(field.slice_count() * dst_len);

    for slice in field.data.chunks_exact(src_len) {
        for row in &rows {
            let lower = &slice[row.lower * src_nx..(row.lower + 1) * src_nx];
            let upper = &slice[row.upper * src_nx..(row.upper + 1) * src_nx];
            for col in &cols {
                let bottom = lerp(lower[col.lower], lower[col.upper], col.weight);
                let top = lerp(upper[col.lower], upper[col.upper], col.weight);
                data.push(lerp(bottom, top, row.weight) as f32);
            }
        }
    }

    if !data.is_empty() && data.iter().all(|v| v.is_nan()) {
        return Err(ConversionError::regrid(
            name,
            "interpolated field contains no valid values",
        ));
    }

    let mut dim_coords = field.dim_coords.clone();
    let n = dim_coords.len();
    dim_coords[n - 2] = DimCoord {
        points: grid.latitudes.clone(),
        ..src_lat.clone()
    };
    dim_coords[n - 1] = DimCoord {
        points: grid.longitudes.clone(),
        ..src_lon.clone()
    };
    let shape: Vec<usize> = dim_coords.iter().map(DimCoord::len).collect();

    debug!("Regridded {} from {:?} to {:?}", name, field.shape, shape);

    Ok(GriddedField {
        data,
        shape,
        dim_coords,
        ..field.clone()
    })
}

fn lerp(a: impl Into<f64>, b: impl Into<f64>, weight: f64) -> f64 {
    let (a, b) = (a.into(), b.into());
    a + (b - a) * weight
}

/// Locate every target point on a monotonic source axis
fn axis_stencils(
    name: &str,
    source: &[f64],
    targets: &[f64],
    may_wrap: bool,
) -> Result<Vec<Stencil>> {
    let n = source.len();
    if n < 2 {
        return Err(ConversionError::regrid(
            name,
            format!("source axis has {} point(s), at least 2 are needed", n),
        ));
    }
    if targets.is_empty() {
        return Err(ConversionError::regrid(name, "target axis is empty"));
    }

    let ascending = source[1] > source[0];
    let monotonic = source
        .windows(2)
        .all(|w| if ascending { w[1] > w[0] } else { w[1] < w[0] });
    if !monotonic {
        return Err(ConversionError::regrid(
            name,
            "source coordinate is not strictly monotonic",
        ));
    }

    let points: Vec<f64> = if ascending {
        source.to_vec()
    } else {
        source.iter().rev().copied().collect()
    };
    let step = points[1] - points[0];
    let circular = may_wrap && points[n - 1] - points[0] >= 360.0 - step - 1e-6;

    let flip = |i: usize| if ascending { i } else { n - 1 - i };
    Ok(targets
        .iter()
        .map(|&t| {
            let stencil = if circular {
                circular_stencil(&points, t)
            } else {
                linear_stencil(&points, t)
            };
            Stencil {
                lower: flip(stencil.lower),
                upper: flip(stencil.upper),
                weight: stencil.weight,
            }
        })
        .collect())
}

/// Bracketing cell of `t`, extrapolating from the edge cells
fn linear_stencil(points: &[f64], t: f64) -> Stencil {
    let n = points.len();
    let upper = points.partition_point(|&p| p < t).clamp(1, n - 1);
    let lower = upper - 1;
    Stencil {
        lower,
        upper,
        weight: (t - points[lower]) / (points[upper] - points[lower]),
    }
}

/// Bracketing cell of `t` on a periodic axis
fn circular_stencil(points: &[f64], t: f64) -> Stencil {
    let n = points.len();
    let first = points[0];
    let wrapped = first + (t - first).rem_euclid(360.0);
    if wrapped <= points[n - 1] {
        return linear_stencil(points, wrapped);
    }
    Stencil {
        lower: n - 1,
        upper: 0,
        weight: (wrapped - points[n - 1]) / (first + 360.0 - points[n - 1]),
    }
}
