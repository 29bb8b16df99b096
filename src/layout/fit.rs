use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How the source maps onto the canvas, before region masking.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Placement {
    pub canvas_w: u32,
    pub canvas_h: u32,
    pub scale_x: f32,
    pub scale_y: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

/// How the placed source must relate to the canvas bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Containment {
    /// Source covers the whole canvas.
    Covers,
    /// Source corners sit exactly on the canvas corners.
    Fills,
    /// Source lies inside the canvas.
    Inside,
}

/// "Compute layout" capability shared by all fit modes.
pub trait FitPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn containment(&self) -> Containment {
        Containment::Inside
    }

    /// Callers guarantee all four dimensions are non-zero.
    fn place(&self, src_w: u32, src_h: u32, viewport_w: u32, viewport_h: u32) -> Placement;
}

/// Fill the viewport, cropping overflow symmetrically.
pub struct Cover;

impl FitPolicy for Cover {
    fn name(&self) -> &'static str {
        "cover"
    }

    fn containment(&self) -> Containment {
        Containment::Covers
    }

    fn place(&self, src_w: u32, src_h: u32, viewport_w: u32, viewport_h: u32) -> Placement {
        let (sw, sh) = (src_w as f32, src_h as f32);
        let (cw, ch) = (viewport_w as f32, viewport_h as f32);
        let scale = (cw / sw).max(ch / sh);
        Placement {
            canvas_w: viewport_w,
            canvas_h: viewport_h,
            scale_x: scale,
            scale_y: scale,
            offset_x: (cw - sw * scale) / 2.0,
            offset_y: (ch - sh * scale) / 2.0,
        }
    }
}

/// Independent horizontal and vertical scales; aspect is not preserved.
pub struct Stretch;

impl FitPolicy for Stretch {
    fn name(&self) -> &'static str {
        "stretch"
    }

    fn containment(&self) -> Containment {
        Containment::Fills
    }

    fn place(&self, src_w: u32, src_h: u32, viewport_w: u32, viewport_h: u32) -> Placement {
        Placement {
            canvas_w: viewport_w,
            canvas_h: viewport_h,
            scale_x: viewport_w as f32 / src_w as f32,
            scale_y: viewport_h as f32 / src_h as f32,
            offset_x: 0.0,
            offset_y: 0.0,
        }
    }
}

/// Constrain the canvas to an aspect ratio, then fit the source inside it.
pub struct FixedAspect {
    /// `None` keeps the source's own aspect.
    pub aspect: Option<Aspect>,
}

impl FitPolicy for FixedAspect {
    fn name(&self) -> &'static str {
        "letterbox"
    }

    fn place(&self, src_w: u32, src_h: u32, viewport_w: u32, viewport_h: u32) -> Placement {
        let ratio = match self.aspect {
            Some(aspect) => aspect.ratio(),
            None => src_w as f32 / src_h as f32,
        };
        let (vw, vh) = (viewport_w as f32, viewport_h as f32);
        let (canvas_w, canvas_h) = if vw / vh > ratio {
            (((vh * ratio).round() as u32).clamp(1, viewport_w), viewport_h)
        } else {
            (viewport_w, ((vw / ratio).round() as u32).clamp(1, viewport_h))
        };

        let (sw, sh) = (src_w as f32, src_h as f32);
        let (cw, ch) = (canvas_w as f32, canvas_h as f32);
        let scale = (cw / sw).min(ch / sh);
        Placement {
            canvas_w,
            canvas_h,
            scale_x: scale,
            scale_y: scale,
            offset_x: (cw - sw * scale) / 2.0,
            offset_y: (ch - sh * scale) / 2.0,
        }
    }
}

/// Display aspect ratio written as `W:H`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Aspect {
    pub width: u32,
    pub height: u32,
}

impl Aspect {
    pub fn ratio(&self) -> f32 {
        self.width as f32 / self.height as f32
    }
}

impl std::str::FromStr for Aspect {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (w, h) = s
            .split_once(':')
            .ok_or_else(|| anyhow!("aspect '{}' must look like W:H", s))?;
        let width: u32 = w
            .trim()
            .parse()
            .map_err(|_| anyhow!("aspect '{}' has a non-numeric width", s))?;
        let height: u32 = h
            .trim()
            .parse()
            .map_err(|_| anyhow!("aspect '{}' has a non-numeric height", s))?;
        if width == 0 || height == 0 {
            return Err(anyhow!("aspect '{}' must have positive parts", s));
        }
        Ok(Self { width, height })
    }
}

impl fmt::Display for Aspect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.width, self.height)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FitMode {
    Cover,
    Stretch,
    Letterbox,
}

impl FitMode {
    pub fn policy(self, aspect: Option<Aspect>) -> Box<dyn FitPolicy> {
        match self {
            FitMode::Cover => Box::new(Cover),
            FitMode::Stretch => Box::new(Stretch),
            FitMode::Letterbox => Box::new(FixedAspect { aspect }),
        }
    }
}

impl std::str::FromStr for FitMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cover" => Ok(Self::Cover),
            "stretch" => Ok(Self::Stretch),
            "letterbox" | "fixed-aspect" => Ok(Self::Letterbox),
            other => Err(anyhow!("unknown fit policy '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cover_uses_the_larger_scale() {
        let p = Cover.place(1280, 720, 1080, 1920);
        assert!((p.scale_x - 1920.0 / 720.0).abs() < 1e-4);
        assert_eq!(p.scale_x, p.scale_y);
        assert!(p.offset_x < 0.0);
        assert!(p.offset_y.abs() < 1e-3);
    }

    #[test]
    fn stretch_scales_axes_independently() {
        let p = Stretch.place(1280, 720, 1080, 1920);
        assert!((p.scale_x - 0.84375).abs() < 1e-6);
        assert!((p.scale_y - 1920.0 / 720.0).abs() < 1e-4);
        assert_eq!((p.offset_x, p.offset_y), (0.0, 0.0));
    }

    #[test]
    fn four_by_three_canvas_in_portrait_viewport() -> Result<()> {
        let policy = FixedAspect {
            aspect: Some("4:3".parse()?),
        };
        let p = policy.place(1280, 720, 1080, 1920);
        assert_eq!((p.canvas_w, p.canvas_h), (1080, 810));
        assert!((p.scale_x - 0.84375).abs() < 1e-6);
        assert!((p.offset_y - 101.25).abs() < 1e-3);
        assert!(p.offset_x.abs() < 1e-3);
        Ok(())
    }

    #[test]
    fn source_aspect_when_unset() {
        let p = FixedAspect { aspect: None }.place(640, 480, 1920, 1080);
        assert_eq!((p.canvas_w, p.canvas_h), (1440, 1080));
        assert!(p.offset_x.abs() < 1e-3 && p.offset_y.abs() < 1e-3);
    }

    #[test]
    fn parses_aspect_and_fit() {
        assert_eq!(
            "16:9".parse::<Aspect>().ok(),
            Some(Aspect {
                width: 16,
                height: 9
            })
        );
        assert!("0:3".parse::<Aspect>().is_err());
        assert!("wide".parse::<Aspect>().is_err());
        assert_eq!("Cover".parse::<FitMode>().ok(), Some(FitMode::Cover));
        assert!("zoom".parse::<FitMode>().is_err());
    }
}
