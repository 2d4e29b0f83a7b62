//! Offline front end: run alert queries against local asset directories,
//! export the table, and inspect tiles, year splits, dates and patch sizes.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use clearcut_core::config::{DriverParams, PipelineConfig};
use clearcut_core::date;
use clearcut_core::export::{self, ExportFormat};
use clearcut_core::geometry::{aoi_from_geojson, surface_ha, MultiPolygon};
use clearcut_core::geotiff;
use clearcut_core::jobs::{LocalJobRunner, SystemClock};
use clearcut_core::source::{GeoJsonDirSource, GeoTiffSource};
use clearcut_core::stats::{self, Distribution};
use clearcut_core::telemetry::init_tracing;
use clearcut_core::temporal::{split, DateRange};
use clearcut_core::tiler::tile;
use clearcut_core::{AlertQuery, AlertSession, Pipeline};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "clearcut", about = "Harmonize forest-disturbance alerts and clump them into patches")]
struct Args {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    /// Pipeline configuration (TOML). Missing file = defaults.
    #[arg(short, long, global = true, default_value = "clearcut.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

/// Inputs shared by every command that runs a driver.
#[derive(clap::Args, Debug)]
struct QueryArgs {
    /// Driver identifier (GLAD-L, GLAD-S, RADD, NRT, CUSUM, GEE, LOCAL, JJ-FAST, SINGLE-DATE, RECOVER).
    #[arg(short, long)]
    driver: String,

    /// Area of interest as a GeoJSON file.
    #[arg(short, long)]
    aoi: PathBuf,

    /// First day of the window, YYYY-MM-DD.
    #[arg(long)]
    start: String,

    /// Last day of the window (inclusive), YYYY-MM-DD.
    #[arg(long)]
    end: String,

    /// Minimum patch surface in hectares.
    #[arg(long, default_value_t = 0.0)]
    min_size: f64,

    /// Driver parameter `key=value`; repeatable.
    #[arg(short, long = "param")]
    params: Vec<String>,

    /// Root of the band rasters, laid out as `<asset>/<band>.tif`.
    #[arg(long, default_value = "data/assets")]
    assets: PathBuf,

    /// Directory of vector datasets, `<dataset>.geojson`.
    #[arg(long, default_value = "data/vectors")]
    vectors: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a query and export the resulting alert table.
    Query {
        #[command(flatten)]
        query: QueryArgs,

        /// Output file; the format follows the extension (csv, gpkg, kml, geojson).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Directory for the default `{aoi}_{start}_{end}_{min_size}.gpkg` name.
        #[arg(long, default_value = "results")]
        out_dir: PathBuf,
    },
    /// Export the harmonized alert and date rasters of a query.
    Rasters {
        #[command(flatten)]
        query: QueryArgs,

        #[arg(long, default_value = "results")]
        out_dir: PathBuf,

        /// Rows per downloaded piece.
        #[arg(long, default_value_t = 512)]
        strip_rows: usize,
    },
    /// Print the tiles of an area of interest.
    Tiles {
        #[arg(short, long)]
        aoi: PathBuf,

        #[arg(long)]
        cell: Option<f64>,
    },
    /// Print the single-year pieces of a window.
    Split {
        start: String,
        end: String,
    },
    /// Convert between ISO dates and canonical `YYYY.DDD` values.
    Date {
        /// `YYYY-MM-DD` or a canonical value.
        value: String,
    },
    /// Patch-size statistics of an alert map GeoTIFF.
    Stats {
        map: PathBuf,

        /// Per-class distribution CSV.
        #[arg(long)]
        distribution: Option<PathBuf>,

        /// Per-patch `patchId,nb_pixel,value` CSV.
        #[arg(long)]
        patches: Option<PathBuf>,
    },
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn parse_day(s: &str) -> Result<NaiveDate> {
    date::parse_iso(s).with_context(|| format!("bad date `{s}`, expected YYYY-MM-DD"))
}

fn read_aoi(path: &Path) -> Result<MultiPolygon> {
    let text = fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    let doc: geojson::GeoJson = text.parse().with_context(|| format!("{} is not GeoJSON", path.display()))?;
    aoi_from_geojson(&doc).with_context(|| format!("{} holds no usable polygon", path.display()))
}

fn aoi_name(path: &Path) -> String {
    path.file_stem().and_then(|s| s.to_str()).unwrap_or("aoi").to_string()
}

fn parse_params(raw: &[String]) -> Result<DriverParams> {
    let mut params = DriverParams::new();
    for kv in raw {
        let Some((k, v)) = kv.split_once('=') else {
            bail!("driver parameter `{kv}` is not key=value");
        };
        params = params.with(k.trim(), v.trim());
    }
    Ok(params)
}

fn build(args: &QueryArgs, config: PipelineConfig) -> Result<(Pipeline, AlertQuery)> {
    let query = AlertQuery::new(
        &args.driver,
        read_aoi(&args.aoi)?,
        parse_day(&args.start)?,
        parse_day(&args.end)?,
        args.min_size,
    )
    .with_params(parse_params(&args.params)?);
    let pipeline = Pipeline::with_sources(
        Arc::new(GeoTiffSource::new(&args.assets)),
        Arc::new(GeoJsonDirSource::new(&args.vectors)),
        config,
    );
    Ok((pipeline, query))
}

#[derive(Serialize)]
struct TileLine<'a> {
    id: &'a str,
    surface_ha: f64,
    parts: usize,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);
    let config = PipelineConfig::load(&args.config)
        .with_context(|| format!("cannot load {}", args.config.display()))?;

    match args.command {
        Command::Query { query, output, out_dir } => {
            let (pipeline, q) = build(&query, config)?;
            let output = match output {
                Some(p) => p,
                None => {
                    fs::create_dir_all(&out_dir)
                        .with_context(|| format!("cannot create {}", out_dir.display()))?;
                    let stem = export::default_basename(&aoi_name(&query.aoi), q.start, q.end, q.min_size);
                    out_dir.join(format!("{stem}.{}", ExportFormat::Gpkg.extension()))
                }
            };
            let format = ExportFormat::from_path(&output)
                .with_context(|| format!("unknown export format for {}", output.display()))?;

            let mut session = AlertSession::new();
            let rows = session.query(&pipeline, q).context("query failed")?.len();
            session
                .export(format, &output)
                .with_context(|| format!("cannot export to {}", output.display()))?;
            info!(rows, output = %output.display(), "done");
            println!("{rows} patches → {}", output.display());
        }
        Command::Rasters { query, out_dir, strip_rows } => {
            let (pipeline, q) = build(&query, config)?;
            fs::create_dir_all(&out_dir).with_context(|| format!("cannot create {}", out_dir.display()))?;
            let runner = LocalJobRunner::new(strip_rows);
            let out = pipeline
                .export_rasters(&q, &aoi_name(&query.aoi), &runner, &out_dir, &SystemClock)
                .context("raster export failed")?;
            println!("{}\n{}", out.map.display(), out.date.display());
        }
        Command::Tiles { aoi, cell } => {
            let aoi = read_aoi(&aoi)?;
            let cell = cell.unwrap_or(config.tiling.cell_size_deg);
            for t in tile(&aoi, cell)? {
                let line = TileLine {
                    id: &t.id,
                    surface_ha: surface_ha(&t.geometry, config.aggregation.area_projection),
                    parts: t.geometry.0.len(),
                };
                println!("{}", serde_json::to_string(&line)?);
            }
        }
        Command::Split { start, end } => {
            let range = DateRange::new(parse_day(&start)?, parse_day(&end)?)?;
            for piece in split(range) {
                println!("{} {} ({} days)", piece.start, piece.end, piece.days());
            }
        }
        Command::Date { value } => match value.parse::<f64>() {
            Ok(v) if !value.contains('-') => println!("{}", date::decode(v)?),
            _ => println!("{:.3}", date::encode(date::parse_any(&value)?)),
        },
        Command::Stats { map, distribution, patches } => {
            let grid = geotiff::read_band(&map).with_context(|| format!("cannot read {}", map.display()))?;
            let alert = grid.map(|v| if v.is_finite() { v.round().clamp(0.0, 255.0) as u8 } else { 0 });
            let stats = stats::patch_stats(&alert, config.aggregation.max_patch_pixels);
            let dist = Distribution::from_stats(&stats);
            for class in [1u8, 2] {
                println!("class {class}: {} patches", dist.total(class));
            }
            if let Some(path) = distribution {
                dist.write_csv(&path).with_context(|| format!("cannot write {}", path.display()))?;
            }
            if let Some(path) = patches {
                stats::write_patch_stats(&stats, &path).with_context(|| format!("cannot write {}", path.display()))?;
            }
        }
    }
    Ok(())
}
