use anyhow::Result;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use live_detect_overlay::detect::{BackendChain, ModelLocation, StubLoader, StubScript};
use live_detect_overlay::error::{ErrorKind, OverlayError};
use live_detect_overlay::ingest::{
    CaptureProvider, DeviceRequest, FrameSource, SourceProvider, SourceStats, SyntheticConfig,
    SyntheticSource,
};
use live_detect_overlay::layout::{BoxPolicy, FitMode, LayoutEngine, Rect, RegionMode};
use live_detect_overlay::render::{
    DrawCommand, OverlaySession, RecordingSurface, RunOptions, SessionConfig, Status,
    TickOutcome,
};
use live_detect_overlay::{
    ChannelConfig, DetectionBuffer, Frame, PixelBuffer, PixelFormat, SubmitOutcome,
};

const CAMERA_W: u32 = 64;
const CAMERA_H: u32 = 48;
/// 64x48 letterboxed into 64x64: scale 1, 8px bars top and bottom.
const INPUT: u32 = 64;
const WAIT: Duration = Duration::from_secs(5);

/// Synthetic cameras keyed by device id; anything else goes to the default
/// provider.
struct TestCameras {
    cameras: Vec<SyntheticConfig>,
    acquired: Arc<Mutex<Vec<String>>>,
}

impl TestCameras {
    fn new(cameras: Vec<SyntheticConfig>) -> Self {
        Self {
            cameras,
            acquired: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl SourceProvider for TestCameras {
    fn acquire(&mut self, request: &DeviceRequest) -> Result<Box<dyn FrameSource>> {
        let id = request.device_id.clone().unwrap_or_default();
        if let Ok(mut acquired) = self.acquired.lock() {
            acquired.push(id.clone());
        }
        match self.cameras.iter().find(|c| c.device == id) {
            Some(config) => Ok(Box::new(SyntheticSource::new(config.clone()))),
            None => CaptureProvider.acquire(request),
        }
    }
}

fn camera(device: &str) -> SyntheticConfig {
    SyntheticConfig {
        device: device.to_string(),
        width: CAMERA_W,
        height: CAMERA_H,
        ..SyntheticConfig::default()
    }
}

fn request(device: &str) -> DeviceRequest {
    DeviceRequest {
        device_id: Some(device.to_string()),
        width: CAMERA_W,
        height: CAMERA_H,
        ..DeviceRequest::default()
    }
}

fn session_with(
    provider: TestCameras,
    fit: FitMode,
    region: RegionMode,
    viewport: (u32, u32),
    threshold: f32,
) -> OverlaySession {
    let layout = LayoutEngine::new(fit.policy(None), region, BoxPolicy::DropWholeBox);
    let config = SessionConfig {
        viewport_width: viewport.0,
        viewport_height: viewport.1,
        threshold,
        labels: vec!["tooth".to_string()],
        strict_geometry: true,
    };
    match OverlaySession::new(Box::new(provider), layout, DetectionBuffer::default(), config) {
        Ok(session) => session,
        Err(err) => panic!("session: {:#}", err),
    }
}

/// Camera-sized canvas: canvas pixels equal source pixels.
fn flat_session(threshold: f32) -> OverlaySession {
    session_with(
        TestCameras::new(vec![camera("stub://front")]),
        FitMode::Cover,
        RegionMode::Full,
        (CAMERA_W, CAMERA_H),
        threshold,
    )
}

fn load_stub(session: &mut OverlaySession, script: &StubScript) {
    let chain = BackendChain::new().with(StubLoader::new("stub", script.clone()));
    let config = ChannelConfig {
        input_size: INPUT,
        ..ChannelConfig::default()
    };
    if let Err(err) = session.load_model(&ModelLocation::new("stub://test"), chain, config) {
        panic!("model: {:#}", err);
    }
}

fn row(x1: f32, y1: f32, x2: f32, y2: f32, score: f32) -> Vec<f32> {
    vec![x1, y1, x2, y2, score, 0.0]
}

#[test]
fn boxes_below_the_threshold_are_not_drawn() -> Result<()> {
    let script = StubScript::new();
    let mut output = row(10.0, 20.0, 30.0, 40.0, 0.9);
    output.extend(row(5.0, 20.0, 20.0, 40.0, 0.5));
    output.extend(row(40.0, 20.0, 60.0, 40.0, 0.2));
    script.set_fallback(output);

    let mut session = flat_session(0.6);
    load_stub(&mut session, &script);
    session.setup_camera(request("stub://front"))?;
    let mut surface = RecordingSurface::new();

    let first = session.tick(&mut surface)?;
    assert_eq!(first.outcome, TickOutcome::Rendered);
    assert_eq!(first.submission, Some(SubmitOutcome::Accepted(1)));
    assert_eq!(first.boxes_drawn, 0);
    assert_eq!(session.status(), Some(&Status::Ready));

    assert!(session.wait_for_inference(WAIT));
    let second = session.tick(&mut surface)?;
    assert_eq!(second.boxes_drawn, 1);
    assert_eq!(surface.boxes(), vec![Rect::new(10.0, 12.0, 20.0, 20.0)]);
    assert_eq!(surface.labels(), vec!["tooth 0.90".to_string()]);
    assert_eq!(session.status(), Some(&Status::Detecting(1)));

    session.threshold().set(0.4)?;
    let third = session.tick(&mut surface)?;
    assert_eq!(third.boxes_drawn, 2);
    session.shutdown()
}

#[test]
fn boxes_outside_the_detection_region_are_not_drawn() -> Result<()> {
    // Portrait 48x96 canvas, cover: scale 2, offset_x -40; the live band is
    // the centred square, canvas y 24..72.
    let script = StubScript::new();
    let mut output = row(30.0, 10.0, 34.0, 14.0, 0.9);
    output.extend(row(30.0, 23.0, 34.0, 28.0, 0.9));
    script.set_fallback(output);

    let mut session = session_with(
        TestCameras::new(vec![camera("stub://front")]),
        FitMode::Cover,
        RegionMode::CenteredSquare,
        (48, 96),
        0.3,
    );
    load_stub(&mut session, &script);
    session.setup_camera(request("stub://front"))?;
    let mut surface = RecordingSurface::new();

    session.tick(&mut surface)?;
    let layout = session.layout().cloned();
    let layout = layout.ok_or_else(|| anyhow::anyhow!("layout missing"))?;
    assert!((layout.detect_region_top - 24.0).abs() < 1e-4);
    assert!((layout.detect_region_height - 48.0).abs() < 1e-4);

    assert!(session.wait_for_inference(WAIT));
    let report = session.tick(&mut surface)?;
    assert_eq!(report.boxes_drawn, 1);
    assert_eq!(surface.boxes(), vec![Rect::new(20.0, 30.0, 8.0, 10.0)]);

    let dims = surface
        .commands()
        .iter()
        .rev()
        .take_while(|c| **c != DrawCommand::Clear)
        .filter(|c| matches!(c, DrawCommand::Dim(_)))
        .count();
    assert_eq!(dims, 2);
    session.shutdown()
}

#[test]
fn inference_errors_leave_previous_boxes_on_screen() -> Result<()> {
    let script = StubScript::new();
    script.push_output(row(10.0, 20.0, 30.0, 40.0, 0.9));
    script.push_failure("runtime hiccup");

    let mut session = flat_session(0.3);
    load_stub(&mut session, &script);
    session.setup_camera(request("stub://front"))?;
    let mut surface = RecordingSurface::new();

    session.tick(&mut surface)?;
    assert!(session.wait_for_inference(WAIT));
    let shown = session.tick(&mut surface)?;
    assert_eq!(shown.boxes_drawn, 1);
    assert_eq!(shown.submission, Some(SubmitOutcome::Accepted(2)));

    assert!(session.wait_for_inference(WAIT));
    let after_error = session.tick(&mut surface)?;
    assert_eq!(after_error.outcome, TickOutcome::Rendered);
    assert_eq!(after_error.boxes_drawn, 1);
    assert_eq!(surface.boxes(), vec![Rect::new(10.0, 12.0, 20.0, 20.0)]);
    assert_eq!(session.stats().channel.map(|c| c.failed), Some(1));
    session.shutdown()
}

#[test]
fn camera_switch_discards_results_from_the_old_stream() -> Result<()> {
    let script = StubScript::new();
    let gate = script.gated();
    script.set_fallback(row(10.0, 20.0, 30.0, 40.0, 0.9));

    let cameras = TestCameras::new(vec![camera("stub://front"), camera("stub://rear")]);
    let acquired = cameras.acquired.clone();
    let mut session = session_with(
        cameras,
        FitMode::Cover,
        RegionMode::Full,
        (CAMERA_W, CAMERA_H),
        0.3,
    );
    load_stub(&mut session, &script);
    session.setup_camera(request("stub://front"))?;
    let mut surface = RecordingSurface::new();

    let first = session.tick(&mut surface)?;
    assert_eq!(first.generation, 1);
    assert_eq!(first.submission, Some(SubmitOutcome::Accepted(1)));

    session.device_selector().select(request("stub://rear"));
    let switched = session.tick(&mut surface)?;
    assert_eq!(switched.generation, 2);
    assert_eq!(switched.submission, None);
    assert_eq!(session.generation(), 2);

    // The old stream's result lands after the switch.
    gate.release();
    assert!(session.wait_for_inference(WAIT));
    assert!(session.detections().get_raw().is_empty());

    let next = session.tick(&mut surface)?;
    assert_eq!(next.boxes_drawn, 0);
    assert_eq!(next.submission, Some(SubmitOutcome::Accepted(2)));

    let acquired = acquired.lock().map(|a| a.clone()).unwrap_or_default();
    assert_eq!(acquired, vec!["stub://front", "stub://rear"]);
    gate.release();
    session.shutdown()
}

#[test]
fn zero_dimension_frames_skip_the_tick() -> Result<()> {
    let warm = SyntheticConfig {
        ready_after: 2,
        ..camera("stub://warm")
    };
    let script = StubScript::new();
    let mut session = session_with(
        TestCameras::new(vec![warm]),
        FitMode::Cover,
        RegionMode::Full,
        (CAMERA_W, CAMERA_H),
        0.3,
    );
    load_stub(&mut session, &script);
    session.setup_camera(request("stub://warm"))?;
    let mut surface = RecordingSurface::new();

    for _ in 0..2 {
        let report = session.tick(&mut surface)?;
        assert_eq!(
            report.outcome,
            TickOutcome::Skipped(ErrorKind::ZeroDimensionFrame)
        );
        assert_eq!(report.submission, None);
    }
    assert_eq!(surface.frames_drawn(), 0);
    assert!(session.layout().is_none());

    let ready = session.tick(&mut surface)?;
    assert_eq!(ready.outcome, TickOutcome::Rendered);
    assert_eq!(surface.frames_drawn(), 1);
    session.shutdown()
}

#[test]
fn denied_camera_halts_until_a_device_is_selected() -> Result<()> {
    let mut session = session_with(
        TestCameras::new(vec![camera("stub://front")]),
        FitMode::Cover,
        RegionMode::Full,
        (CAMERA_W, CAMERA_H),
        0.3,
    );
    let err = session.setup_camera(request("stub://denied")).err();
    let kind = err.as_ref().and_then(OverlayError::kind_of);
    assert_eq!(kind, Some(ErrorKind::DeviceUnavailable));
    assert!(matches!(
        session.status(),
        Some(Status::CameraUnavailable(_))
    ));

    let mut surface = RecordingSurface::new();
    assert_eq!(session.tick(&mut surface)?.outcome, TickOutcome::Halted);
    assert_eq!(surface.frames_drawn(), 0);

    session.device_selector().select(request("stub://front"));
    let report = session.tick(&mut surface)?;
    assert_eq!(report.outcome, TickOutcome::Rendered);
    assert!(session.has_camera());
    assert_eq!(session.status(), Some(&Status::Ready));
    session.shutdown()
}

#[test]
fn lost_stream_halts_the_loop_but_not_the_session() -> Result<()> {
    let flaky = SyntheticConfig {
        fail_after: Some(2),
        ..camera("stub://flaky")
    };
    let mut session = session_with(
        TestCameras::new(vec![flaky]),
        FitMode::Cover,
        RegionMode::Full,
        (CAMERA_W, CAMERA_H),
        0.3,
    );
    session.setup_camera(request("stub://flaky"))?;
    let mut surface = RecordingSurface::new();

    assert_eq!(session.tick(&mut surface)?.outcome, TickOutcome::Rendered);
    assert_eq!(session.tick(&mut surface)?.outcome, TickOutcome::Rendered);
    let err = session.tick(&mut surface).err();
    let kind = err.as_ref().and_then(OverlayError::kind_of);
    assert_eq!(kind, Some(ErrorKind::DeviceUnavailable));
    assert!(!session.has_camera());
    assert_eq!(session.tick(&mut surface)?.outcome, TickOutcome::Halted);

    session.retry_camera()?;
    assert_eq!(session.tick(&mut surface)?.outcome, TickOutcome::Rendered);
    session.shutdown()
}

#[test]
fn missing_model_keeps_video_running() -> Result<()> {
    let mut session = flat_session(0.3);
    let chain = BackendChain::new().with(StubLoader::failing("optimized", "no accelerator"));
    let loaded = session.load_model(
        &ModelLocation::new("stub://test"),
        chain,
        ChannelConfig::default(),
    );
    assert!(loaded.is_err());
    assert!(!session.has_detector());

    session.setup_camera(request("stub://front"))?;
    let mut surface = RecordingSurface::new();
    let report = session.tick(&mut surface)?;
    assert_eq!(report.outcome, TickOutcome::Rendered);
    assert_eq!(report.submission, None);
    assert_eq!(surface.frames_drawn(), 1);
    assert!(matches!(
        session.status(),
        Some(Status::ModelUnavailable(_))
    ));
    session.shutdown()
}

/// Alternates between landscape and portrait frames.
struct RotatingSource {
    count: u64,
}

impl FrameSource for RotatingSource {
    fn describe(&self) -> String {
        "rotating".to_string()
    }

    fn next_frame(&mut self) -> Result<Frame> {
        self.count += 1;
        let (w, h) = if self.count % 2 == 1 { (8, 6) } else { (6, 8) };
        let pixels = PixelBuffer::new(vec![0; (w * h * 3) as usize], w, h, PixelFormat::Rgb24)?;
        Ok(Frame::new(pixels, self.count))
    }

    fn stop(&mut self) {}

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.count,
            device: self.describe(),
            width: 0,
            height: 0,
        }
    }
}

struct RotatingProvider;

impl SourceProvider for RotatingProvider {
    fn acquire(&mut self, _request: &DeviceRequest) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(RotatingSource { count: 0 }))
    }
}

#[test]
fn source_resize_starts_a_new_generation() -> Result<()> {
    let layout = LayoutEngine::new(
        FitMode::Stretch.policy(None),
        RegionMode::Full,
        BoxPolicy::DropWholeBox,
    );
    let config = SessionConfig {
        viewport_width: 32,
        viewport_height: 32,
        ..SessionConfig::default()
    };
    let mut session = OverlaySession::new(
        Box::new(RotatingProvider),
        layout,
        DetectionBuffer::default(),
        config,
    )?;
    session.setup_camera(DeviceRequest::default())?;
    let mut surface = RecordingSurface::new();

    let first = session.tick(&mut surface)?;
    assert_eq!(first.generation, 1);
    assert!(first.layout_changed);
    let second = session.tick(&mut surface)?;
    assert_eq!(second.generation, 2);
    assert!(second.layout_changed);
    session.shutdown()
}

#[test]
fn run_loop_stops_after_max_ticks() -> Result<()> {
    let mut session = flat_session(0.3);
    session.setup_camera(request("stub://front"))?;
    let mut surface = RecordingSurface::new();
    let options = RunOptions {
        target_fps: 1000,
        max_ticks: Some(5),
        stop: Arc::new(AtomicBool::new(false)),
    };
    let mut seen = 0;
    let summary = session.run_loop(&mut surface, &options, |report, _surface| {
        assert_eq!(report.outcome, TickOutcome::Rendered);
        seen += 1;
        Ok(())
    })?;
    assert_eq!(summary.ticks, 5);
    assert_eq!(summary.rendered, 5);
    assert_eq!(seen, 5);
    assert_eq!(surface.frames_drawn(), 5);
    session.shutdown()
}
