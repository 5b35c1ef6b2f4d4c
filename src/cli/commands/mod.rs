//! Command implementations for the eps2grib CLI

pub mod convert;
pub mod shared;

pub use shared::ConversionStats;

use crate::cli::args::Args;

/// Main command runner
pub async fn run(args: Args) -> anyhow::Result<ConversionStats> {
    convert::run_convert(args).await
}
