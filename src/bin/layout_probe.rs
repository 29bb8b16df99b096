//! layout_probe - print the geometry the overlay would use
//!
//! For a source size and viewport, prints the canvas layout (fit policy,
//! scales, offsets, detection band, mask bands) and the letterbox geometry
//! of the detector input as JSON. Optionally maps one model-square box all
//! the way to canvas pixels.

use anyhow::{anyhow, Result};
use clap::Parser;
use serde::Serialize;
use std::io::IsTerminal;

use live_detect_overlay::layout::Aspect;
use live_detect_overlay::{
    BoxPolicy, FitMode, LayoutEngine, LayoutGeometry, LetterboxGeometry, Point, Rect, RegionMode,
};

#[path = "../ui.rs"]
#[allow(dead_code)]
mod ui;

#[derive(Parser, Debug)]
#[command(
    name = "layout_probe",
    about = "Print layout and letterbox geometry for a source/viewport pair"
)]
struct Args {
    /// Source frame size, WxH
    #[arg(long, default_value = "1280x720", value_name = "WxH")]
    source: String,

    /// Viewport size, WxH
    #[arg(long, default_value = "1080x1920", value_name = "WxH")]
    viewport: String,

    /// Fit policy (cover|stretch|letterbox)
    #[arg(long, default_value = "cover")]
    fit: FitMode,

    /// Preview aspect for the letterbox fit
    #[arg(long, value_name = "W:H")]
    aspect: Option<Aspect>,

    /// Detection region (centered-square|full)
    #[arg(long, default_value = "centered-square")]
    region: RegionMode,

    /// Detector input size
    #[arg(long, default_value_t = 640)]
    input_size: u32,

    /// Box in model-square coordinates, x1,y1,x2,y2
    #[arg(long, value_name = "X1,Y1,X2,Y2")]
    map_box: Option<String>,

    /// Box policy at the region boundary (drop-whole-box|clip)
    #[arg(long, default_value = "drop-whole-box")]
    box_policy: BoxPolicy,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

#[derive(Serialize)]
struct Probe {
    layout: LayoutGeometry,
    letterbox: LetterboxGeometry,
    #[serde(skip_serializing_if = "Option::is_none")]
    mapped_box: Option<MappedBox>,
}

#[derive(Serialize)]
struct MappedBox {
    source: Rect,
    canvas: Rect,
    /// `None` when the box policy rejects it.
    drawn: Option<Rect>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let (src_w, src_h) = parse_size(&args.source)?;
    let (view_w, view_h) = parse_size(&args.viewport)?;

    let probe = {
        let _stage = ui.stage("Compute geometry");
        let engine = LayoutEngine::new(
            args.fit.policy(args.aspect),
            args.region,
            args.box_policy,
        );
        let layout = engine.compute(src_w, src_h, view_w, view_h)?;
        layout.verify()?;
        let letterbox = LetterboxGeometry::forward(src_w, src_h, args.input_size)?;
        let mapped_box = match &args.map_box {
            Some(spec) => Some(map_box(spec, &letterbox, &layout, args.box_policy)?),
            None => None,
        };
        Probe {
            layout,
            letterbox,
            mapped_box,
        }
    };

    println!("{}", serde_json::to_string_pretty(&probe)?);
    Ok(())
}

fn parse_size(value: &str) -> Result<(u32, u32)> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("size '{}' must look like WxH", value))?;
    let w = w
        .trim()
        .parse()
        .map_err(|_| anyhow!("size '{}' has a non-numeric width", value))?;
    let h = h
        .trim()
        .parse()
        .map_err(|_| anyhow!("size '{}' has a non-numeric height", value))?;
    Ok((w, h))
}

fn map_box(
    spec: &str,
    letterbox: &LetterboxGeometry,
    layout: &LayoutGeometry,
    policy: BoxPolicy,
) -> Result<MappedBox> {
    let coords: Vec<f32> = spec
        .split(',')
        .map(|v| v.trim().parse::<f32>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| anyhow!("box '{}' must be four numbers", spec))?;
    let [x1, y1, x2, y2] = coords[..] else {
        return Err(anyhow!("box '{}' must be four numbers", spec));
    };
    let a = letterbox.inverse(Point::new(x1, y1));
    let b = letterbox.inverse(Point::new(x2, y2));
    let source = Rect::from_corners(a, b);
    let canvas = Rect::from_corners(layout.to_canvas(a), layout.to_canvas(b));
    Ok(MappedBox {
        source,
        canvas,
        drawn: layout.admit(canvas, policy),
    })
}
