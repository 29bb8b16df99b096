//! Captured frames and the pixel buffers handed to the inference worker.
//!
//! - `PixelBuffer`: owned, packed pixels. Not `Clone`; submitting one to the
//!   inference channel moves it, so the sender cannot touch it afterwards.
//! - `Frame`: one captured image, alive for a single render tick.

use anyhow::{anyhow, Result};
use std::time::Instant;

/// Packed pixel layouts accepted by the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    Rgba32,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => 3,
            PixelFormat::Rgba32 => 4,
        }
    }
}

/// Owned pixel storage for one image.
///
/// Ownership moves into the inference channel on submit:
///
/// ```compile_fail
/// use live_detect_overlay::{PixelBuffer, PixelFormat};
///
/// fn submit(_buffer: PixelBuffer) {}
///
/// let buffer = PixelBuffer::new(vec![0u8; 12], 2, 2, PixelFormat::Rgb24).unwrap();
/// submit(buffer);
/// let _ = buffer.width(); // moved
/// ```
#[derive(Debug)]
pub struct PixelBuffer {
    data: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl PixelBuffer {
    /// Wrap packed pixels. A 0x0 buffer with no data is allowed and marks a
    /// stream that has not produced real frames yet.
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(format.bytes_per_pixel()))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "{:?} buffer length mismatch for {}x{}: expected {}, got {}",
                format,
                width,
                height,
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            format,
        })
    }

    /// A buffer with no pixels, as reported by a stream that is not ready.
    pub fn empty() -> Self {
        Self {
            data: Vec::new(),
            width: 0,
            height: 0,
            format: PixelFormat::Rgb24,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// RGB value at (x, y). Caller keeps coordinates in bounds.
    pub fn rgb_at(&self, x: u32, y: u32) -> [u8; 3] {
        let bpp = self.format.bytes_per_pixel();
        let idx = (y as usize * self.width as usize + x as usize) * bpp;
        let px = &self.data[idx..idx + bpp];
        match self.format {
            PixelFormat::Rgb24 | PixelFormat::Rgba32 => [px[0], px[1], px[2]],
            PixelFormat::Bgr24 => [px[2], px[1], px[0]],
        }
    }

    /// Repack as tightly packed RGB24.
    pub fn to_rgb_vec(&self) -> Vec<u8> {
        match self.format {
            PixelFormat::Rgb24 => self.data.clone(),
            PixelFormat::Bgr24 => self
                .data
                .chunks_exact(3)
                .flat_map(|px| [px[2], px[1], px[0]])
                .collect(),
            PixelFormat::Rgba32 => self
                .data
                .chunks_exact(4)
                .flat_map(|px| [px[0], px[1], px[2]])
                .collect(),
        }
    }

    /// Copy for handoff. The copy is the one that crosses into the worker;
    /// the original stays with the render tick for compositing.
    pub fn duplicate(&self) -> Self {
        Self {
            data: self.data.clone(),
            width: self.width,
            height: self.height,
            format: self.format,
        }
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

/// One captured image. Never kept beyond the tick that pulled it.
#[derive(Debug)]
pub struct Frame {
    pixels: PixelBuffer,
    /// Per-source capture counter.
    pub sequence: u64,
    captured_at: Instant,
}

impl Frame {
    pub fn new(pixels: PixelBuffer, sequence: u64) -> Self {
        Self {
            pixels,
            sequence,
            captured_at: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &PixelBuffer {
        &self.pixels
    }

    /// True once the source delivers non-zero dimensions.
    pub fn is_ready(&self) -> bool {
        !self.pixels.is_empty()
    }

    pub fn age_ms(&self) -> u128 {
        self.captured_at.elapsed().as_millis()
    }

    /// Pixel copy for the inference channel.
    pub fn to_submission(&self) -> PixelBuffer {
        self.pixels.duplicate()
    }
}
