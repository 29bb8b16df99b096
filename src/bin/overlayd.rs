//! overlayd - live detection overlay
//!
//! Opens the configured camera, loads the detector behind its fallback
//! chain, and runs the render loop: video every tick, boxes from the latest
//! finished inference. Composited frames can be written out as PNG.
//!
//! `--model stub://bright --device stub://camera` runs without hardware.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use live_detect_overlay::{
    build_chain, CaptureProvider, ImageSurface, OverlayConfig, OverlaySession, RunOptions,
    TickOutcome,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(name = "overlayd", about = "Live object-detection overlay")]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension)
    #[arg(long, env = "OVERLAY_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Model file, or stub://… for the scripted detector
    #[arg(long, value_name = "PATH")]
    model: Option<String>,

    /// Capture device (e.g. /dev/video0 or stub://camera)
    #[arg(long, value_name = "ID")]
    device: Option<String>,

    /// Minimum score for a box to be drawn
    #[arg(long, value_name = "0..1")]
    threshold: Option<f32>,

    /// Fit policy (cover|stretch|letterbox)
    #[arg(long, value_name = "POLICY")]
    fit: Option<String>,

    /// Preview aspect for the letterbox fit, e.g. 4:3
    #[arg(long, value_name = "W:H")]
    aspect: Option<String>,

    /// Stop after this many ticks (default: run until Ctrl-C)
    #[arg(long, value_name = "N")]
    frames: Option<u64>,

    /// Write every Nth rendered canvas as PNG (0 = never)
    #[arg(long, default_value_t = 0, value_name = "N")]
    snapshot_every: u64,

    /// Snapshot directory
    #[arg(long, default_value = "snapshots", value_name = "DIR")]
    out: PathBuf,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let cfg = {
        let _stage = ui.stage("Load configuration");
        load_config(&args)?
    };

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
            .map_err(|e| anyhow!("failed to install Ctrl-C handler: {}", e))?;
    }

    let mut session = OverlaySession::new(
        Box::new(CaptureProvider),
        cfg.layout_engine()?,
        cfg.detection_buffer()?,
        cfg.session_config(),
    )?;
    let status_line = Arc::new(Mutex::new(ui.status_line()));
    {
        let status_line = status_line.clone();
        session.on_status(Box::new(move |status| {
            if let Ok(mut line) = status_line.lock() {
                line.show(&status.to_string());
            }
        }));
    }

    {
        let _stage = ui.stage("Load model");
        let model = cfg.model_location();
        let chain = build_chain(&model, &cfg.model.backends);
        log::info!("backend chain for {}: {:?}", model, chain.list());
        if let Err(err) = session.load_model(&model, chain, cfg.channel_config()) {
            // Video still runs; the status line carries the reason.
            log::warn!("continuing without detections: {:#}", err);
        }
    }

    {
        let _stage = ui.stage("Open camera");
        session
            .setup_camera(cfg.device_request())
            .context("camera unavailable")?;
    }

    if args.snapshot_every > 0 {
        std::fs::create_dir_all(&args.out)
            .with_context(|| format!("failed to create {}", args.out.display()))?;
    }

    let options = RunOptions {
        target_fps: cfg.camera.target_fps,
        max_ticks: args.frames,
        stop,
    };
    let mut surface = ImageSurface::new(cfg.display.viewport_width, cfg.display.viewport_height);
    let mut rendered = 0u64;
    let mut snapshots = 0u64;
    let started = Instant::now();
    let summary = session.run_loop(&mut surface, &options, |report, surface| {
        if report.outcome != TickOutcome::Rendered {
            return Ok(());
        }
        rendered += 1;
        if args.snapshot_every > 0 && rendered % args.snapshot_every == 0 {
            let path = args.out.join(format!("overlay_{:06}.png", rendered));
            surface.save_png(&path)?;
            snapshots += 1;
            log::debug!("snapshot {} ({} boxes)", path.display(), report.boxes_drawn);
        }
        Ok(())
    })?;

    let stats = session.stats();
    if let Some(channel) = &stats.channel {
        log::info!(
            "inference: submitted={} dropped={} completed={} failed={}",
            channel.submitted,
            channel.dropped,
            channel.completed,
            channel.failed
        );
    }
    session.shutdown()?;

    let line = format!(
        "overlayd: {} ticks ({} rendered, {} skipped, {} halted), {} snapshots in {}",
        summary.ticks,
        summary.rendered,
        summary.skipped,
        summary.halted,
        snapshots,
        ui::format_duration(started.elapsed())
    );
    if let Ok(status_line) = status_line.lock() {
        status_line.finish(&line);
    }
    Ok(())
}

fn load_config(args: &Args) -> Result<OverlayConfig> {
    let mut cfg = match &args.config {
        Some(path) => OverlayConfig::from_path(path)?,
        None => OverlayConfig::load()?,
    };
    if let Some(model) = &args.model {
        cfg.model.path = model.clone();
    }
    if let Some(device) = &args.device {
        cfg.camera.device = Some(device.clone());
    }
    if let Some(threshold) = args.threshold {
        cfg.detection.threshold = threshold;
    }
    if let Some(fit) = &args.fit {
        cfg.display.fit = fit.parse()?;
    }
    if let Some(aspect) = &args.aspect {
        cfg.display.aspect = Some(aspect.clone());
    }
    cfg.validate()?;
    Ok(cfg)
}
