use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::buffer::DetectionBuffer;
use crate::detect::{BackendChain, Detection, ModelLocation};
use crate::error::{ErrorKind, OverlayError};
use crate::frame::Frame;
use crate::inference::{
    ChannelConfig, ChannelEvent, ChannelStats, InferenceChannel, SubmitOutcome,
};
use crate::ingest::{DeviceRequest, FrameSource, SourceProvider, SourceStats};
use crate::layout::{FitPolicy, LayoutEngine, LayoutGeometry, Rect};
use crate::letterbox::{LetterboxGeometry, Point};

use super::status::{Status, StatusCallback, StatusReporter};
use super::surface::{Surface, BOX_COLOR, BOX_THICKNESS};

pub const DEFAULT_THRESHOLD: f32 = 0.3;

/// Score threshold shared between the UI control and the render loop.
///
/// Single writer, lock-free reads; the loop reads it once per tick.
#[derive(Clone, Debug)]
pub struct ThresholdControl {
    bits: Arc<AtomicU32>,
}

impl ThresholdControl {
    pub fn new(threshold: f32) -> Result<Self> {
        let control = Self {
            bits: Arc::new(AtomicU32::new(0)),
        };
        control.set(threshold)?;
        Ok(control)
    }

    /// Values outside [0, 1] are clamped; NaN is rejected.
    pub fn set(&self, threshold: f32) -> Result<()> {
        if threshold.is_nan() {
            return Err(anyhow!("threshold must be a number"));
        }
        self.bits
            .store(threshold.clamp(0.0, 1.0).to_bits(), Ordering::Release);
        Ok(())
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Acquire))
    }
}

/// Pending camera switch written by the device picker.
#[derive(Clone, Debug, Default)]
pub struct DeviceSelector {
    pending: Arc<Mutex<Option<DeviceRequest>>>,
}

impl DeviceSelector {
    pub fn select(&self, request: DeviceRequest) {
        if let Ok(mut pending) = self.pending.lock() {
            *pending = Some(request);
        }
    }

    fn take(&self) -> Option<DeviceRequest> {
        self.pending.lock().ok().and_then(|mut pending| pending.take())
    }
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub threshold: f32,
    /// Class id -> display name.
    pub labels: Vec<String>,
    /// Return geometry violations from `tick` instead of skipping the tick.
    pub strict_geometry: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            viewport_width: 1080,
            viewport_height: 1920,
            threshold: DEFAULT_THRESHOLD,
            labels: vec!["object".to_string()],
            strict_geometry: cfg!(debug_assertions),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Rendered,
    /// Transient condition; steps 3 to 5 were skipped.
    Skipped(ErrorKind),
    /// No camera; nothing was drawn.
    Halted,
}

#[derive(Clone, Debug)]
pub struct TickReport {
    pub outcome: TickOutcome,
    pub generation: u64,
    pub submission: Option<SubmitOutcome>,
    pub layout_changed: bool,
    pub boxes_drawn: usize,
    /// Inference results applied at the top of the tick.
    pub results_applied: usize,
}

impl TickReport {
    fn new(outcome: TickOutcome, generation: u64) -> Self {
        Self {
            outcome,
            generation,
            submission: None,
            layout_changed: false,
            boxes_drawn: 0,
            results_applied: 0,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SessionStats {
    pub generation: u64,
    pub ticks: u64,
    pub channel: Option<ChannelStats>,
    pub source: Option<SourceStats>,
}

/// Pacing for `run_loop`.
#[derive(Clone, Debug)]
pub struct RunOptions {
    pub target_fps: u32,
    pub max_ticks: Option<u64>,
    pub stop: Arc<AtomicBool>,
}

#[derive(Clone, Debug, Default)]
pub struct RunSummary {
    pub ticks: u64,
    pub rendered: u64,
    pub skipped: u64,
    pub halted: u64,
}

/// Everything one live overlay needs: camera, inference channel, detection
/// buffer, layout, UI-written controls and status. Owned by the render loop.
pub struct OverlaySession {
    provider: Box<dyn SourceProvider>,
    source: Option<Box<dyn FrameSource>>,
    request: DeviceRequest,
    channel: Option<InferenceChannel>,
    buffer: DetectionBuffer,
    layout: LayoutEngine,
    viewport: (u32, u32),
    threshold: ThresholdControl,
    devices: DeviceSelector,
    labels: Vec<String>,
    status: StatusReporter,
    model_fault: Option<String>,
    generation: u64,
    last_source_size: Option<(u32, u32)>,
    strict_geometry: bool,
    ticks: u64,
}

impl OverlaySession {
    pub fn new(
        provider: Box<dyn SourceProvider>,
        layout: LayoutEngine,
        buffer: DetectionBuffer,
        config: SessionConfig,
    ) -> Result<Self> {
        Ok(Self {
            provider,
            source: None,
            request: DeviceRequest::default(),
            channel: None,
            buffer,
            layout,
            viewport: (config.viewport_width, config.viewport_height),
            threshold: ThresholdControl::new(config.threshold)?,
            devices: DeviceSelector::default(),
            labels: config.labels,
            status: StatusReporter::new(),
            model_fault: None,
            generation: 0,
            last_source_size: None,
            strict_geometry: config.strict_geometry,
            ticks: 0,
        })
    }

    pub fn on_status(&mut self, callback: StatusCallback) {
        self.status.set_callback(callback);
    }

    pub fn status(&self) -> Option<&Status> {
        self.status.current()
    }

    /// Handle for the threshold control.
    pub fn threshold(&self) -> ThresholdControl {
        self.threshold.clone()
    }

    /// Handle for the device picker.
    pub fn device_selector(&self) -> DeviceSelector {
        self.devices.clone()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn layout(&self) -> Option<&LayoutGeometry> {
        self.layout.current()
    }

    pub fn detections(&self) -> &DetectionBuffer {
        &self.buffer
    }

    pub fn has_camera(&self) -> bool {
        self.source.is_some()
    }

    pub fn has_detector(&self) -> bool {
        self.channel.as_ref().is_some_and(|c| c.is_available())
    }

    /// Load the detector. On failure video keeps running without boxes and
    /// the status shows why.
    pub fn load_model(
        &mut self,
        model: &ModelLocation,
        chain: BackendChain,
        config: ChannelConfig,
    ) -> Result<()> {
        self.status.report(Status::LoadingModel);
        self.channel = None;
        match InferenceChannel::initialize(model, chain, config) {
            Ok(channel) => {
                self.channel = Some(channel);
                self.model_fault = None;
                self.status.report(Status::Ready);
                Ok(())
            }
            Err(err) => {
                log::error!("model unavailable: {:#}", err);
                let reason = format!("{:#}", err);
                self.model_fault = Some(reason.clone());
                self.status.report(Status::ModelUnavailable(reason));
                Err(err)
            }
        }
    }

    /// Switch to (or retry) a camera. The active stream is released before
    /// the new one is requested, even if the request then fails.
    pub fn setup_camera(&mut self, request: DeviceRequest) -> Result<()> {
        if let Some(mut old) = self.source.take() {
            log::info!("releasing camera {}", old.describe());
            old.stop();
        }
        self.generation += 1;
        self.buffer.begin_generation(self.generation);
        self.last_source_size = None;
        self.request = request.clone();

        match self.provider.acquire(&request) {
            Ok(source) => {
                log::info!(
                    "camera {} acquired (generation {})",
                    source.describe(),
                    self.generation
                );
                self.source = Some(source);
                if matches!(self.status.current(), Some(Status::CameraUnavailable(_))) {
                    self.report_idle_status();
                }
                Ok(())
            }
            Err(err) => {
                log::warn!("camera acquisition failed: {:#}", err);
                self.status
                    .report(Status::CameraUnavailable(format!("{:#}", err)));
                match OverlayError::kind_of(&err) {
                    Some(ErrorKind::DeviceUnavailable) => Err(err),
                    _ => Err(OverlayError::device_unavailable(format!("{:#}", err)).into()),
                }
            }
        }
    }

    /// Retry the last requested camera.
    pub fn retry_camera(&mut self) -> Result<()> {
        let request = self.request.clone();
        self.setup_camera(request)
    }

    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
    }

    pub fn set_fit_policy(&mut self, policy: Box<dyn FitPolicy>) {
        self.layout.set_policy(policy);
    }

    /// Block up to `timeout` for one inference event and apply it.
    pub fn wait_for_inference(&mut self, timeout: Duration) -> bool {
        let event = match self.channel.as_mut() {
            Some(channel) => channel.wait_event(timeout),
            None => None,
        };
        match event {
            Some(event) => {
                self.apply_event(event);
                true
            }
            None => false,
        }
    }

    /// One render tick.
    pub fn tick(&mut self, surface: &mut dyn Surface) -> Result<TickReport> {
        self.ticks += 1;
        let results_applied = self.drain_events();

        // 1. frame readiness
        if self.source.is_none() {
            match self.devices.take() {
                Some(request) => self.setup_camera(request)?,
                None => {
                    let mut report = TickReport::new(TickOutcome::Halted, self.generation);
                    report.results_applied = results_applied;
                    return Ok(report);
                }
            }
        }
        let frame = match self.source.as_mut().map(|s| s.next_frame()) {
            Some(Ok(frame)) => frame,
            Some(Err(err)) => return Err(self.camera_lost(err)),
            None => return Ok(TickReport::new(TickOutcome::Halted, self.generation)),
        };
        if !frame.is_ready() {
            log::debug!("frame {} not ready (0x0), skipping tick", frame.sequence);
            self.apply_pending_device()?;
            let mut report = TickReport::new(
                TickOutcome::Skipped(ErrorKind::ZeroDimensionFrame),
                self.generation,
            );
            report.results_applied = results_applied;
            return Ok(report);
        }

        // 2. layout
        let size = (frame.width(), frame.height());
        if self.last_source_size.is_some_and(|prev| prev != size) {
            self.generation += 1;
            log::info!(
                "source resized to {}x{}; generation {}",
                size.0,
                size.1,
                self.generation
            );
            self.buffer.begin_generation(self.generation);
        }
        self.last_source_size = Some(size);

        let (vw, vh) = self.viewport;
        let layout_changed = match self.layout.update(size.0, size.1, vw, vh) {
            Ok(changed) => changed,
            Err(err) => return self.skip_for(err, results_applied),
        };
        let layout = match self.layout.current() {
            Some(layout) => layout.clone(),
            None => return Err(OverlayError::geometry("layout missing after update").into()),
        };
        if layout_changed || surface.size() != (layout.canvas_w, layout.canvas_h) {
            surface.resize(layout.canvas_w, layout.canvas_h);
        }

        let mut report = TickReport::new(TickOutcome::Rendered, self.generation);
        report.layout_changed = layout_changed;
        report.results_applied = results_applied;

        // 3. device switch, then feed the detector
        if self.apply_pending_device()? {
            report.generation = self.generation;
        } else {
            report.submission = self.submit(&frame);
        }

        // 4. composite
        surface.clear();
        surface.draw_frame(frame.pixels(), layout.content_rect());
        for mask in &layout.masks {
            surface.dim(*mask);
        }

        // 5. boxes
        let threshold = self.threshold.get();
        report.boxes_drawn = self.draw_detections(surface, &layout, threshold);
        self.report_idle_status();
        Ok(report)
    }

    /// Tick at `target_fps` until stopped or `max_ticks` is reached. A lost
    /// camera halts ticks until a device is selected; geometry errors in
    /// strict mode and unexpected failures end the loop.
    pub fn run_loop<S, F>(
        &mut self,
        surface: &mut S,
        options: &RunOptions,
        mut after_tick: F,
    ) -> Result<RunSummary>
    where
        S: Surface,
        F: FnMut(&TickReport, &S) -> Result<()>,
    {
        let period = Duration::from_secs(1) / options.target_fps.max(1);
        let mut summary = RunSummary::default();
        while !options.stop.load(Ordering::SeqCst) {
            if options.max_ticks.is_some_and(|max| summary.ticks >= max) {
                break;
            }
            let started = Instant::now();
            summary.ticks += 1;
            match self.tick(surface) {
                Ok(report) => {
                    match report.outcome {
                        TickOutcome::Rendered => summary.rendered += 1,
                        TickOutcome::Skipped(_) => summary.skipped += 1,
                        TickOutcome::Halted => summary.halted += 1,
                    }
                    after_tick(&report, surface)?;
                }
                Err(err) if OverlayError::kind_of(&err) == Some(ErrorKind::DeviceUnavailable) => {
                    summary.halted += 1;
                    log::warn!("camera loop halted: {:#}", err);
                }
                Err(err) => return Err(err),
            }
            if let Some(rest) = period.checked_sub(started.elapsed()) {
                std::thread::sleep(rest);
            }
        }
        Ok(summary)
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            generation: self.generation,
            ticks: self.ticks,
            channel: self.channel.as_ref().map(|c| c.stats()),
            source: self.source.as_ref().map(|s| s.stats()),
        }
    }

    /// Release the camera and stop the inference worker.
    pub fn shutdown(mut self) -> Result<()> {
        if let Some(mut source) = self.source.take() {
            source.stop();
        }
        match self.channel.take() {
            Some(channel) => channel.shutdown(),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------------

    fn drain_events(&mut self) -> usize {
        let mut events = Vec::new();
        if let Some(channel) = self.channel.as_mut() {
            while let Some(event) = channel.poll() {
                events.push(event);
            }
        }
        let mut applied = 0;
        for event in events {
            if self.apply_event(event) {
                applied += 1;
            }
        }
        if applied == 0 {
            self.buffer.advance();
        }
        applied
    }

    /// Returns `true` when fresh detections were stored.
    fn apply_event(&mut self, event: ChannelEvent) -> bool {
        match event {
            ChannelEvent::Detections(output) => {
                log::debug!(
                    "request {}: {} detection(s) in {:?}",
                    output.request_id,
                    output.detections.len(),
                    output.latency
                );
                self.buffer
                    .accept(output.generation, output.detections, output.geometry)
            }
            // Logged by the channel; the previous boxes stay on screen.
            ChannelEvent::Failed { .. } => false,
            ChannelEvent::WorkerLost => {
                let reason = "inference worker stopped".to_string();
                self.model_fault = Some(reason.clone());
                self.status.report(Status::ModelUnavailable(reason));
                false
            }
        }
    }

    fn submit(&mut self, frame: &Frame) -> Option<SubmitOutcome> {
        let channel = self.channel.as_mut()?;
        if !channel.is_idle() {
            return None;
        }
        Some(channel.submit_frame(frame.to_submission(), self.generation))
    }

    fn apply_pending_device(&mut self) -> Result<bool> {
        match self.devices.take() {
            Some(request) => {
                self.setup_camera(request)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn camera_lost(&mut self, err: anyhow::Error) -> anyhow::Error {
        if let Some(mut source) = self.source.take() {
            source.stop();
        }
        self.last_source_size = None;
        self.status
            .report(Status::CameraUnavailable(format!("{:#}", err)));
        match OverlayError::kind_of(&err) {
            Some(ErrorKind::DeviceUnavailable) => err,
            _ => OverlayError::device_unavailable(format!("{:#}", err)).into(),
        }
    }

    fn skip_for(&mut self, err: anyhow::Error, results_applied: usize) -> Result<TickReport> {
        let kind = OverlayError::kind_of(&err);
        match kind {
            Some(ErrorKind::GeometryInvariant) if self.strict_geometry => Err(err),
            Some(ErrorKind::GeometryInvariant) => {
                log::error!("skipping tick: {:#}", err);
                let mut report = TickReport::new(
                    TickOutcome::Skipped(ErrorKind::GeometryInvariant),
                    self.generation,
                );
                report.results_applied = results_applied;
                Ok(report)
            }
            Some(ErrorKind::ZeroDimensionFrame) => {
                let mut report = TickReport::new(
                    TickOutcome::Skipped(ErrorKind::ZeroDimensionFrame),
                    self.generation,
                );
                report.results_applied = results_applied;
                Ok(report)
            }
            _ => Err(err),
        }
    }

    fn draw_detections(
        &self,
        surface: &mut dyn Surface,
        layout: &LayoutGeometry,
        threshold: f32,
    ) -> usize {
        let Some(geometry) = self.buffer.geometry() else {
            return 0;
        };
        let policy = self.layout.box_policy();
        let mut drawn = 0;
        for det in self.buffer.get_smoothed() {
            if det.score < threshold {
                continue;
            }
            let Some(rect) = to_canvas_rect(det, geometry, layout) else {
                continue;
            };
            let Some(rect) = layout.admit(rect, policy) else {
                continue;
            };
            surface.stroke_rect(rect, BOX_COLOR, BOX_THICKNESS);
            surface.draw_label(
                Point::new(rect.x, rect.y),
                &format!("{} {:.2}", self.label_for(det.class_id), det.score),
                BOX_COLOR,
            );
            drawn += 1;
        }
        drawn
    }

    fn label_for(&self, class_id: u32) -> String {
        self.labels
            .get(class_id as usize)
            .cloned()
            .unwrap_or_else(|| format!("class {}", class_id))
    }

    fn report_idle_status(&mut self) {
        if !self.has_detector() {
            match self.model_fault.clone() {
                Some(reason) => {
                    self.status.report(Status::ModelUnavailable(reason));
                }
                None if self.status.current().is_some_and(Status::is_fault) => {
                    self.status.report(Status::Ready);
                }
                None => {}
            }
            return;
        }
        let threshold = self.threshold.get();
        let count = self
            .buffer
            .get_smoothed()
            .iter()
            .filter(|d| d.score >= threshold)
            .count();
        let status = if self.buffer.geometry().is_none() {
            Status::Ready
        } else if count > 0 {
            Status::Detecting(count)
        } else {
            Status::NoDetections
        };
        self.status.report(status);
    }
}

/// Model square -> source (letterbox inverse) -> canvas (layout).
fn to_canvas_rect(
    det: &Detection,
    geometry: &LetterboxGeometry,
    layout: &LayoutGeometry,
) -> Option<Rect> {
    let p1 = geometry.inverse(Point::new(det.x1, det.y1));
    let p2 = geometry.inverse(Point::new(det.x2, det.y2));
    let rect = Rect::from_corners(layout.to_canvas(p1), layout.to_canvas(p2));
    let finite = [rect.x, rect.y, rect.w, rect.h].iter().all(|v| v.is_finite());
    finite.then_some(rect)
}
