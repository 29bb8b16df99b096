//! Letterbox resize and tensor packing for the detector input.
//!
//! The tensor contract is fixed by the deployed model: values normalised to
//! [0, 1], planar (channel-major) `1 x 3 x S x S`, channel order configured
//! per model.

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::frame::PixelBuffer;
use crate::letterbox::LetterboxGeometry;

/// Fill used for the letterbox bars.
const PAD_VALUE: u8 = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

impl std::str::FromStr for ChannelOrder {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rgb" => Ok(Self::Rgb),
            "bgr" => Ok(Self::Bgr),
            other => Err(anyhow!("unknown channel order '{}'", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TensorSpec {
    pub order: ChannelOrder,
    /// Divide by 255.
    pub normalize: bool,
}

impl Default for TensorSpec {
    fn default() -> Self {
        Self {
            order: ChannelOrder::Bgr,
            normalize: true,
        }
    }
}

/// Scratch canvas and tensor, sized once for the model input.
pub struct Letterboxer {
    target_size: u32,
    spec: TensorSpec,
    canvas: RgbImage,
    tensor: Vec<f32>,
}

impl Letterboxer {
    pub fn new(target_size: u32, spec: TensorSpec) -> Self {
        let plane = (target_size as usize) * (target_size as usize);
        Self {
            target_size,
            spec,
            canvas: RgbImage::from_pixel(target_size, target_size, Rgb([PAD_VALUE; 3])),
            tensor: vec![0.0; 3 * plane],
        }
    }

    pub fn target_size(&self) -> u32 {
        self.target_size
    }

    /// Letterbox `pixels` into the square and pack the tensor.
    pub fn prepare(&mut self, pixels: &PixelBuffer) -> Result<(&[f32], LetterboxGeometry)> {
        let geometry =
            LetterboxGeometry::forward(pixels.width(), pixels.height(), self.target_size)?;

        let source = RgbImage::from_raw(pixels.width(), pixels.height(), pixels.to_rgb_vec())
            .ok_or_else(|| anyhow!("pixel buffer does not match its dimensions"))?;
        let scaled_w = (geometry.scaled_width().round() as u32).clamp(1, self.target_size);
        let scaled_h = (geometry.scaled_height().round() as u32).clamp(1, self.target_size);
        let resized = if (scaled_w, scaled_h) == source.dimensions() {
            source
        } else {
            imageops::resize(&source, scaled_w, scaled_h, FilterType::Triangle)
        };

        for px in self.canvas.pixels_mut() {
            *px = Rgb([PAD_VALUE; 3]);
        }
        let off_x = (self.target_size - scaled_w) / 2;
        let off_y = (self.target_size - scaled_h) / 2;
        imageops::replace(&mut self.canvas, &resized, off_x as i64, off_y as i64);

        self.pack();
        Ok((&self.tensor, geometry))
    }

    fn pack(&mut self) {
        let plane = (self.target_size as usize) * (self.target_size as usize);
        let k = if self.spec.normalize { 1.0 / 255.0 } else { 1.0 };
        let (first, rest) = self.tensor.split_at_mut(plane);
        let (second, third) = rest.split_at_mut(plane);
        for (idx, px) in self.canvas.pixels().enumerate() {
            let [r, g, b] = px.0;
            let (c0, c1, c2) = match self.spec.order {
                ChannelOrder::Rgb => (r, g, b),
                ChannelOrder::Bgr => (b, g, r),
            };
            first[idx] = c0 as f32 * k;
            second[idx] = c1 as f32 * k;
            third[idx] = c2 as f32 * k;
        }
    }
}
