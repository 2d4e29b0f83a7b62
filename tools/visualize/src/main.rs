//! Render an alert map GeoTIFF to a PNG preview.
//! Confirmed alerts red, potential alerts yellow, everything else transparent.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use clearcut_core::geotiff;
use clearcut_core::telemetry::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "visualize", about = "Render an alert map to PNG")]
struct Args {
    /// Alert map (`*_map.tif`).
    input: PathBuf,

    /// PNG path; defaults to the input with a `.png` extension.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Integer upscaling factor.
    #[arg(short, long, default_value_t = 1)]
    scale: u32,
}

// ── Colour helpers ────────────────────────────────────────────────────────────

const CONFIRMED: [u8; 4] = [0xd3, 0x2f, 0x2f, 0xff];
const POTENTIAL: [u8; 4] = [0xff, 0xff, 0x00, 0xff];
const CLEAR: [u8; 4] = [0, 0, 0, 0];

/// Alert class → RGBA.
fn alert_color(v: f64) -> [u8; 4] {
    match v.round() as i64 {
        1 => CONFIRMED,
        2 => POTENTIAL,
        _ => CLEAR,
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(false);

    let grid = geotiff::read_band(&args.input).with_context(|| format!("cannot read {}", args.input.display()))?;
    let scale = args.scale.max(1);
    let (w, h) = (grid.width as u32 * scale, grid.height as u32 * scale);

    let mut img = image::RgbaImage::new(w, h);
    for (x, y, px) in img.enumerate_pixels_mut() {
        let col = (x / scale) as usize;
        // PNG rows run north to south, grid rows south to north.
        let row = grid.height - 1 - (y / scale) as usize;
        *px = image::Rgba(alert_color(grid.get(row, col)));
    }

    let output = args.output.unwrap_or_else(|| args.input.with_extension("png"));
    img.save(&output).with_context(|| format!("cannot write {}", output.display()))?;
    info!(output = %output.display(), width = w, height = h, "rendered alert map");
    println!("{}", output.display());
    Ok(())
}
