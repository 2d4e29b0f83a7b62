//! Digest a downloaded raster export: mosaic the `prefix*.tif` pieces into
//! `{prefix}_tmp.tif`, then crop to the AOI into the final LZW product.
//! Pieces and the temporary mosaic are removed.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use clearcut_core::geometry::aoi_from_geojson;
use clearcut_core::jobs::{cut_to_aoi, digest_tiles};
use clearcut_core::telemetry::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "merge_tiles", about = "Mosaic downloaded export tiles and cut them to an area of interest")]
struct Args {
    /// Directory holding the downloaded pieces.
    #[arg(short, long)]
    dir: PathBuf,

    /// File name prefix shared by the pieces, e.g. `aoi_2021-01-01_2021-12-31_RADD_map-`.
    #[arg(short, long)]
    prefix: String,

    /// Area of interest as GeoJSON.
    #[arg(short, long)]
    aoi: PathBuf,

    /// Final product; defaults to `<dir>/<prefix without trailing '-'>.tif`.
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long)]
    json_logs: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let text = fs::read_to_string(&args.aoi).with_context(|| format!("cannot read {}", args.aoi.display()))?;
    let doc: geojson::GeoJson = text.parse().with_context(|| format!("{} is not GeoJSON", args.aoi.display()))?;
    let aoi = aoi_from_geojson(&doc).context("no usable polygon in the AOI")?;

    let stem = args.prefix.trim_end_matches(['-', '_']);
    let tmp = args.dir.join(format!("{stem}_tmp.tif"));
    let dst = args.output.unwrap_or_else(|| args.dir.join(format!("{stem}.tif")));

    digest_tiles(&args.prefix, &args.dir, &tmp)
        .with_context(|| format!("cannot merge `{}*.tif` in {}", args.prefix, args.dir.display()))?;
    cut_to_aoi(&tmp, &aoi, &dst).with_context(|| format!("cannot cut {}", tmp.display()))?;
    info!(dst = %dst.display(), "merged");
    println!("{}", dst.display());
    Ok(())
}
