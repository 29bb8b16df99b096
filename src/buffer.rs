//! Latest detection set plus its exponentially smoothed presentation copy.
//!
//! Smoothing is positional: row `i` of the new raw set blends into row `i` of
//! the previous smoothed set. Whenever the number of rows changes the
//! smoothed set is reset to a hard copy of the raw set; no identity matching
//! is attempted across frames.

use anyhow::{anyhow, Result};

use crate::detect::Detection;
use crate::letterbox::LetterboxGeometry;

pub const DEFAULT_SMOOTHING_ALPHA: f32 = 0.25;

pub struct DetectionBuffer {
    alpha: f32,
    raw: Vec<Detection>,
    smoothed: Vec<Detection>,
    geometry: Option<LetterboxGeometry>,
    generation: u64,
    primed: bool,
}

impl DetectionBuffer {
    /// `alpha` must lie in (0, 1]; 1 disables smoothing.
    pub fn new(alpha: f32) -> Result<Self> {
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(anyhow!("smoothing alpha must be in (0, 1], got {}", alpha));
        }
        Ok(Self {
            alpha,
            raw: Vec::new(),
            smoothed: Vec::new(),
            geometry: None,
            generation: 0,
            primed: false,
        })
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// Replace the raw set and advance smoothing one step.
    pub fn update(&mut self, raw: Vec<Detection>) {
        self.raw = raw;
        self.advance();
    }

    /// Blend the smoothed set one step toward the held raw set. Called on
    /// ticks without a fresh result so boxes keep settling.
    pub fn advance(&mut self) {
        if !self.primed || self.raw.len() != self.smoothed.len() {
            self.smoothed = self.raw.clone();
            self.primed = true;
            return;
        }
        let alpha = self.alpha;
        for (s, r) in self.smoothed.iter_mut().zip(&self.raw) {
            s.x1 = alpha.mul_add(r.x1 - s.x1, s.x1);
            s.y1 = alpha.mul_add(r.y1 - s.y1, s.y1);
            s.x2 = alpha.mul_add(r.x2 - s.x2, s.x2);
            s.y2 = alpha.mul_add(r.y2 - s.y2, s.y2);
            s.score = alpha.mul_add(r.score - s.score, s.score);
            // categorical
            s.class_id = r.class_id;
        }
    }

    /// Store an inference result. Results from an older generation are
    /// discarded and `false` is returned.
    pub fn accept(
        &mut self,
        generation: u64,
        raw: Vec<Detection>,
        geometry: LetterboxGeometry,
    ) -> bool {
        if generation != self.generation {
            log::warn!(
                "discarding stale detections (generation {}, current {})",
                generation,
                self.generation
            );
            return false;
        }
        if self.geometry != Some(geometry) {
            // A new letterbox means the old boxes live in another space.
            self.primed = false;
        }
        self.geometry = Some(geometry);
        self.update(raw);
        true
    }

    /// Start a new source generation and forget everything from the last one.
    pub fn begin_generation(&mut self, generation: u64) {
        self.generation = generation;
        self.clear();
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn clear(&mut self) {
        self.raw.clear();
        self.smoothed.clear();
        self.geometry = None;
        self.primed = false;
    }

    pub fn get_smoothed(&self) -> &[Detection] {
        &self.smoothed
    }

    pub fn get_raw(&self) -> &[Detection] {
        &self.raw
    }

    /// Letterbox of the frame the current detections came from.
    pub fn geometry(&self) -> Option<&LetterboxGeometry> {
        self.geometry.as_ref()
    }
}

impl Default for DetectionBuffer {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_SMOOTHING_ALPHA,
            raw: Vec::new(),
            smoothed: Vec::new(),
            geometry: None,
            generation: 0,
            primed: false,
        }
    }
}
