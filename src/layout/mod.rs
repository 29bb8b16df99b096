//! Layout Engine: maps source-video space onto the display canvas and
//! decides which vertical band of the canvas is live for detections.

mod fit;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, OverlayError};
use crate::letterbox::Point;

pub use fit::{Aspect, Containment, Cover, FitMode, FitPolicy, FixedAspect, Placement, Stretch};

/// Allowed drift, in canvas pixels, when checking placement invariants.
const PLACEMENT_TOLERANCE: f32 = 0.5;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    /// Rectangle spanning two corners.
    pub fn from_corners(a: Point, b: Point) -> Self {
        Self {
            x: a.x.min(b.x),
            y: a.y.min(b.y),
            w: (a.x - b.x).abs(),
            h: (a.y - b.y).abs(),
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.w
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.h
    }
}

/// Which part of the canvas is live for detections.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegionMode {
    /// A centred square band on portrait canvases; the whole height otherwise.
    CenteredSquare,
    Full,
}

impl std::str::FromStr for RegionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "centered-square" | "square" => Ok(Self::CenteredSquare),
            "full" => Ok(Self::Full),
            other => Err(anyhow!("unknown detection region '{}'", other)),
        }
    }
}

/// Treatment of boxes crossing the detection-region boundary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BoxPolicy {
    /// Any part outside the band drops the whole box.
    #[default]
    DropWholeBox,
    /// Trim the box to the band; drop it only if nothing is left.
    Clip,
}

impl std::str::FromStr for BoxPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop-whole-box" | "drop" => Ok(Self::DropWholeBox),
            "clip" => Ok(Self::Clip),
            other => Err(anyhow!("unknown box policy '{}'", other)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LayoutGeometry {
    pub policy: &'static str,
    #[serde(skip)]
    pub containment: Containment,
    pub source_w: u32,
    pub source_h: u32,
    pub canvas_w: u32,
    pub canvas_h: u32,
    pub scale_x: f32,
    pub scale_y: f32,
    pub offset_x: f32,
    pub offset_y: f32,
    pub detect_region_top: f32,
    pub detect_region_height: f32,
    /// Canvas areas outside the detection region; dimmed when compositing.
    pub masks: Vec<Rect>,
}

impl LayoutGeometry {
    /// Uniform scale. Stretch layouts report the horizontal one.
    pub fn scale(&self) -> f32 {
        self.scale_x
    }

    pub fn detect_region_bottom(&self) -> f32 {
        self.detect_region_top + self.detect_region_height
    }

    /// Source pixel -> canvas pixel.
    pub fn to_canvas(&self, p: Point) -> Point {
        Point {
            x: p.x.mul_add(self.scale_x, self.offset_x),
            y: p.y.mul_add(self.scale_y, self.offset_y),
        }
    }

    /// Where the whole source frame lands on the canvas.
    pub fn content_rect(&self) -> Rect {
        Rect::new(
            self.offset_x,
            self.offset_y,
            self.source_w as f32 * self.scale_x,
            self.source_h as f32 * self.scale_y,
        )
    }

    /// Apply the region policy to a canvas-space box.
    pub fn admit(&self, rect: Rect, policy: BoxPolicy) -> Option<Rect> {
        let top = self.detect_region_top;
        let bottom = self.detect_region_bottom();
        match policy {
            BoxPolicy::DropWholeBox => {
                if rect.y < top || rect.bottom() > bottom {
                    None
                } else {
                    Some(rect)
                }
            }
            BoxPolicy::Clip => {
                let y1 = rect.y.max(top);
                let y2 = rect.bottom().min(bottom);
                if y2 <= y1 {
                    None
                } else {
                    Some(Rect::new(rect.x, y1, rect.w, y2 - y1))
                }
            }
        }
    }

    /// Check the placement against the policy's containment rule.
    pub fn verify(&self) -> Result<()> {
        let scales_ok = self.scale_x.is_finite()
            && self.scale_y.is_finite()
            && self.scale_x > 0.0
            && self.scale_y > 0.0;
        if !scales_ok {
            return Err(OverlayError::geometry(format!(
                "{} layout produced scale ({}, {})",
                self.policy, self.scale_x, self.scale_y
            ))
            .into());
        }

        let content = self.content_rect();
        let (cw, ch) = (self.canvas_w as f32, self.canvas_h as f32);
        let t = PLACEMENT_TOLERANCE;
        let ok = match self.containment {
            // The video must leave no gap on the canvas.
            Containment::Covers => {
                content.x <= t
                    && content.y <= t
                    && content.right() >= cw - t
                    && content.bottom() >= ch - t
            }
            Containment::Fills => {
                content.x.abs() <= t
                    && content.y.abs() <= t
                    && (content.right() - cw).abs() <= t
                    && (content.bottom() - ch).abs() <= t
            }
            Containment::Inside => {
                content.x >= -t
                    && content.y >= -t
                    && content.right() <= cw + t
                    && content.bottom() <= ch + t
            }
        };
        if !ok {
            return Err(OverlayError::geometry(format!(
                "{} layout places source at {:?} on a {}x{} canvas",
                self.policy, content, self.canvas_w, self.canvas_h
            ))
            .into());
        }
        if self.detect_region_height < 0.0 || self.detect_region_top < -t {
            return Err(OverlayError::geometry(format!(
                "detection region [{}, +{}] is invalid",
                self.detect_region_top, self.detect_region_height
            ))
            .into());
        }
        Ok(())
    }
}

/// Recomputes `LayoutGeometry` whenever the source or viewport changes.
pub struct LayoutEngine {
    policy: Box<dyn FitPolicy>,
    region: RegionMode,
    box_policy: BoxPolicy,
    inputs: Option<(u32, u32, u32, u32)>,
    current: Option<LayoutGeometry>,
}

impl LayoutEngine {
    pub fn new(policy: Box<dyn FitPolicy>, region: RegionMode, box_policy: BoxPolicy) -> Self {
        Self {
            policy,
            region,
            box_policy,
            inputs: None,
            current: None,
        }
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    pub fn box_policy(&self) -> BoxPolicy {
        self.box_policy
    }

    pub fn set_policy(&mut self, policy: Box<dyn FitPolicy>) {
        log::info!("fit policy {} -> {}", self.policy.name(), policy.name());
        self.policy = policy;
        self.invalidate();
    }

    pub fn set_region(&mut self, region: RegionMode) {
        self.region = region;
        self.invalidate();
    }

    pub fn invalidate(&mut self) {
        self.inputs = None;
        self.current = None;
    }

    pub fn current(&self) -> Option<&LayoutGeometry> {
        self.current.as_ref()
    }

    /// Bring the layout up to date. Returns `true` when it was recomputed.
    pub fn update(&mut self, src_w: u32, src_h: u32, viewport_w: u32, viewport_h: u32) -> Result<bool> {
        let inputs = (src_w, src_h, viewport_w, viewport_h);
        if self.inputs == Some(inputs) && self.current.is_some() {
            return Ok(false);
        }
        let geometry = self.compute(src_w, src_h, viewport_w, viewport_h)?;
        log::debug!(
            "layout {}: {}x{} -> {}x{} canvas, scale ({:.4}, {:.4}), region [{:.1}, +{:.1}]",
            geometry.policy,
            src_w,
            src_h,
            geometry.canvas_w,
            geometry.canvas_h,
            geometry.scale_x,
            geometry.scale_y,
            geometry.detect_region_top,
            geometry.detect_region_height
        );
        self.current = Some(geometry);
        self.inputs = Some(inputs);
        Ok(true)
    }

    pub fn compute(
        &self,
        src_w: u32,
        src_h: u32,
        viewport_w: u32,
        viewport_h: u32,
    ) -> Result<LayoutGeometry> {
        if src_w == 0 || src_h == 0 {
            return Err(OverlayError::zero_dimension(src_w, src_h).into());
        }
        if viewport_w == 0 || viewport_h == 0 {
            return Err(OverlayError::new(
                ErrorKind::ZeroDimensionFrame,
                format!("viewport is {}x{}", viewport_w, viewport_h),
            )
            .into());
        }

        let p = self.policy.place(src_w, src_h, viewport_w, viewport_h);
        let (cw, ch) = (p.canvas_w as f32, p.canvas_h as f32);

        let (band_top, band_height) = match self.region {
            RegionMode::CenteredSquare if ch > cw => ((ch - cw) / 2.0, cw),
            _ => (0.0, ch),
        };
        // Only where there is video. Edges within tolerance of the canvas
        // border sit on it exactly.
        let content_top = snap(p.offset_y.max(0.0), 0.0);
        let content_bottom = snap((p.offset_y + src_h as f32 * p.scale_y).min(ch), ch);
        let top = band_top.max(content_top);
        let bottom = (band_top + band_height).min(content_bottom).max(top);

        let mut masks = Vec::new();
        if top >= PLACEMENT_TOLERANCE {
            masks.push(Rect::new(0.0, 0.0, cw, top));
        }
        if ch - bottom >= PLACEMENT_TOLERANCE {
            masks.push(Rect::new(0.0, bottom, cw, ch - bottom));
        }
        let content_left = snap(p.offset_x.max(0.0), 0.0);
        let content_right = snap((p.offset_x + src_w as f32 * p.scale_x).min(cw), cw);
        if content_left >= PLACEMENT_TOLERANCE {
            masks.push(Rect::new(0.0, top, content_left, bottom - top));
        }
        if cw - content_right >= PLACEMENT_TOLERANCE {
            masks.push(Rect::new(content_right, top, cw - content_right, bottom - top));
        }

        let geometry = LayoutGeometry {
            policy: self.policy.name(),
            containment: self.policy.containment(),
            source_w: src_w,
            source_h: src_h,
            canvas_w: p.canvas_w,
            canvas_h: p.canvas_h,
            scale_x: p.scale_x,
            scale_y: p.scale_y,
            offset_x: p.offset_x,
            offset_y: p.offset_y,
            detect_region_top: top,
            detect_region_height: bottom - top,
            masks,
        };
        geometry.verify()?;
        Ok(geometry)
    }
}

fn snap(value: f32, edge: f32) -> f32 {
    if (value - edge).abs() < PLACEMENT_TOLERANCE {
        edge
    } else {
        value
    }
}
