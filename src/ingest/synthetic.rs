//! Synthetic camera for tests and demos (`stub://` devices).
//!
//! Produces a dark, lightly noisy scene with one bright square marker that
//! sweeps left to right, so a detector has something to follow. The source
//! can pretend to warm up (0x0 frames) and to die after a number of frames.

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{FrameSource, SourceStats};
use crate::error::OverlayError;
use crate::frame::{Frame, PixelBuffer, PixelFormat};

const BACKGROUND: u8 = 32;
const NOISE: u8 = 8;
const MARKER: u8 = 240;

#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub device: String,
    pub width: u32,
    pub height: u32,
    /// Frames reported as 0x0 before the stream is "ready".
    pub ready_after: u64,
    /// Capture fails once this many frames were produced.
    pub fail_after: Option<u64>,
    /// Marker travel per frame, in pixels.
    pub marker_step: u32,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            device: "stub://camera".to_string(),
            width: 1280,
            height: 720,
            ready_after: 0,
            fail_after: None,
            marker_step: 8,
            seed: 7,
        }
    }
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    rng: StdRng,
    frame_count: u64,
    stopped: bool,
    failed: bool,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        log::info!(
            "synthetic camera {} started ({}x{})",
            config.device,
            config.width,
            config.height
        );
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            frame_count: 0,
            stopped: false,
            failed: false,
        }
    }

    /// Marker square for frame `n`, as (x, y, side).
    pub fn marker_at(&self, n: u64) -> (u32, u32, u32) {
        let side = (self.config.width.min(self.config.height) / 6).max(1);
        let travel = self.config.width.saturating_sub(side).max(1) as u64;
        let x = (n * self.config.marker_step as u64 % travel) as u32;
        let y = (self.config.height - side.min(self.config.height)) / 2;
        (x, y, side)
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let (w, h) = (self.config.width, self.config.height);
        let (mx, my, side) = self.marker_at(self.frame_count);
        let mut pixels = vec![0u8; (w * h * 3) as usize];
        for (idx, px) in pixels.chunks_exact_mut(3).enumerate() {
            let x = idx as u32 % w;
            let y = idx as u32 / w;
            let in_marker = x >= mx && x < mx + side && y >= my && y < my + side;
            let value = if in_marker {
                MARKER
            } else {
                BACKGROUND + self.rng.gen_range(0..=NOISE)
            };
            px.fill(value);
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn describe(&self) -> String {
        format!("{} (synthetic)", self.config.device)
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if self.stopped {
            return Err(OverlayError::device_unavailable(format!(
                "{} was stopped",
                self.config.device
            ))
            .into());
        }
        if let Some(limit) = self.config.fail_after {
            if self.frame_count >= limit {
                self.failed = true;
                return Err(OverlayError::device_unavailable(format!(
                    "{} stream ended after {} frames",
                    self.config.device, limit
                ))
                .into());
            }
        }

        self.frame_count += 1;
        if self.frame_count <= self.config.ready_after {
            return Ok(Frame::new(PixelBuffer::empty(), self.frame_count));
        }
        let pixels = self.generate_pixels();
        let buffer = PixelBuffer::new(
            pixels,
            self.config.width,
            self.config.height,
            PixelFormat::Rgb24,
        )?;
        Ok(Frame::new(buffer, self.frame_count))
    }

    fn stop(&mut self) {
        if !self.stopped {
            log::info!("synthetic camera {} released", self.config.device);
        }
        self.stopped = true;
    }

    fn is_healthy(&self) -> bool {
        !self.stopped && !self.failed
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            device: self.config.device.clone(),
            width: self.config.width,
            height: self.config.height,
        }
    }
}
