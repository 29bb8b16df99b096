//! Letterbox transform between source-frame space and the square model input.
//!
//! `forward` embeds a `src_w x src_h` rectangle into a `target x target`
//! square with a uniform scale and centred padding; `inverse` maps a point
//! from the square back to source pixels:
//!
//! ```text
//! scale = min(target / src_w, target / src_h)
//! pad_x = (target - src_w * scale) / 2
//! src   = (square - pad) / scale
//! ```

use anyhow::Result;
use serde::Serialize;

use crate::error::OverlayError;

/// Allowed drift between `src * scale + 2 * pad` and the target size.
pub const GEOMETRY_TOLERANCE: f32 = 1e-3;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Scale and padding for one (src_w, src_h, target_size) triple.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct LetterboxGeometry {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub target_size: u32,
    pub src_width: u32,
    pub src_height: u32,
}

impl LetterboxGeometry {
    /// Compute the geometry. Zero source dimensions mean the stream is not
    /// ready and fail with `ZeroDimensionFrame` instead of producing NaN.
    pub fn forward(src_width: u32, src_height: u32, target_size: u32) -> Result<Self> {
        if src_width == 0 || src_height == 0 {
            return Err(OverlayError::zero_dimension(src_width, src_height).into());
        }
        if target_size == 0 {
            return Err(OverlayError::geometry("letterbox target size must be positive").into());
        }
        let target = target_size as f32;
        let scale = (target / src_width as f32).min(target / src_height as f32);
        let geometry = Self {
            scale,
            pad_x: (target - src_width as f32 * scale) / 2.0,
            pad_y: (target - src_height as f32 * scale) / 2.0,
            target_size,
            src_width,
            src_height,
        };
        geometry.check_invariants()?;
        Ok(geometry)
    }

    /// Width of the scaled source inside the square.
    pub fn scaled_width(&self) -> f32 {
        self.src_width as f32 * self.scale
    }

    pub fn scaled_height(&self) -> f32 {
        self.src_height as f32 * self.scale
    }

    /// Source point -> model-square point.
    pub fn forward_point(&self, p: Point) -> Point {
        Point {
            x: p.x.mul_add(self.scale, self.pad_x),
            y: p.y.mul_add(self.scale, self.pad_y),
        }
    }

    /// Model-square point -> source point.
    pub fn inverse(&self, p: Point) -> Point {
        Point {
            x: (p.x - self.pad_x) / self.scale,
            y: (p.y - self.pad_y) / self.scale,
        }
    }

    pub fn check_invariants(&self) -> Result<()> {
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(OverlayError::geometry(format!(
                "letterbox scale must be positive, got {}",
                self.scale
            ))
            .into());
        }
        if self.pad_x < -GEOMETRY_TOLERANCE || self.pad_y < -GEOMETRY_TOLERANCE {
            return Err(OverlayError::geometry(format!(
                "letterbox padding must be non-negative, got ({}, {})",
                self.pad_x, self.pad_y
            ))
            .into());
        }
        let target = self.target_size as f32;
        let tolerance = GEOMETRY_TOLERANCE * target.max(1.0);
        let width_drift = (self.scaled_width() + 2.0 * self.pad_x - target).abs();
        let height_drift = (self.scaled_height() + 2.0 * self.pad_y - target).abs();
        if width_drift > tolerance || height_drift > tolerance {
            return Err(OverlayError::geometry(format!(
                "letterbox does not fill the {}px square (drift {:.4}, {:.4})",
                self.target_size, width_drift, height_drift
            ))
            .into());
        }
        Ok(())
    }
}

pub fn forward(src_width: u32, src_height: u32, target_size: u32) -> Result<LetterboxGeometry> {
    LetterboxGeometry::forward(src_width, src_height, target_size)
}

pub fn inverse(point_in_square: Point, geometry: &LetterboxGeometry) -> Point {
    geometry.inverse(point_in_square)
}
