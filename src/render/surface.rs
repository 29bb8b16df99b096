//! Drawing targets for the render loop.
//!
//! `Surface` is the seam between compositing and pixels. `ImageSurface`
//! rasterises into an in-memory RGB canvas (snapshots, headless runs);
//! `RecordingSurface` only records what was asked for, which is what the
//! render-loop tests assert on.

use anyhow::{Context, Result};
use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::imageops::{self, FilterType};
use image::{ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use std::path::Path;

use crate::frame::PixelBuffer;
use crate::layout::Rect;
use crate::letterbox::Point;

pub const BOX_COLOR: [u8; 3] = [255, 0, 0];
pub const BOX_THICKNESS: u32 = 3;
/// Brightness kept inside masked bands.
pub const DIM_FACTOR: f32 = 0.4;
pub const LABEL_TEXT_COLOR: [u8; 3] = [255, 255, 255];
/// Each 8x8 glyph cell is drawn at this many canvas pixels per dot.
const LABEL_SCALE: u32 = 2;
const LABEL_PAD: u32 = 2;
const GLYPH_SIDE: u32 = 8;

pub trait Surface {
    fn resize(&mut self, width: u32, height: u32);

    fn size(&self) -> (u32, u32);

    fn clear(&mut self);

    /// Draw the whole frame scaled into `dest` (canvas pixels, may overflow).
    fn draw_frame(&mut self, frame: &PixelBuffer, dest: Rect);

    /// Darken a band outside the detection region.
    fn dim(&mut self, area: Rect);

    fn stroke_rect(&mut self, rect: Rect, color: [u8; 3], thickness: u32);

    /// Label anchored at the top-left corner of its box.
    fn draw_label(&mut self, anchor: Point, text: &str, color: [u8; 3]);
}

#[derive(Clone, Debug, PartialEq)]
pub enum DrawCommand {
    Resize { width: u32, height: u32 },
    Clear,
    Frame { dest: Rect, width: u32, height: u32 },
    Dim(Rect),
    Box { rect: Rect, color: [u8; 3] },
    Label { anchor: Point, text: String },
}

#[derive(Debug, Default)]
pub struct RecordingSurface {
    width: u32,
    height: u32,
    commands: Vec<DrawCommand>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    /// Boxes drawn since the last `clear`.
    pub fn boxes(&self) -> Vec<Rect> {
        self.since_clear()
            .iter()
            .filter_map(|c| match c {
                DrawCommand::Box { rect, .. } => Some(*rect),
                _ => None,
            })
            .collect()
    }

    pub fn labels(&self) -> Vec<String> {
        self.since_clear()
            .iter()
            .filter_map(|c| match c {
                DrawCommand::Label { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn frames_drawn(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, DrawCommand::Frame { .. }))
            .count()
    }

    fn since_clear(&self) -> &[DrawCommand] {
        let start = self
            .commands
            .iter()
            .rposition(|c| *c == DrawCommand::Clear)
            .map(|i| i + 1)
            .unwrap_or(0);
        &self.commands[start..]
    }
}

impl Surface for RecordingSurface {
    fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.commands.push(DrawCommand::Resize { width, height });
    }

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn clear(&mut self) {
        self.commands.push(DrawCommand::Clear);
    }

    fn draw_frame(&mut self, frame: &PixelBuffer, dest: Rect) {
        self.commands.push(DrawCommand::Frame {
            dest,
            width: frame.width(),
            height: frame.height(),
        });
    }

    fn dim(&mut self, area: Rect) {
        self.commands.push(DrawCommand::Dim(area));
    }

    fn stroke_rect(&mut self, rect: Rect, color: [u8; 3], _thickness: u32) {
        self.commands.push(DrawCommand::Box { rect, color });
    }

    fn draw_label(&mut self, anchor: Point, text: &str, _color: [u8; 3]) {
        self.commands.push(DrawCommand::Label {
            anchor,
            text: text.to_string(),
        });
    }
}

/// Rasterising surface backed by an `RgbImage`.
pub struct ImageSurface {
    canvas: RgbImage,
}

impl ImageSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            canvas: RgbImage::new(width, height),
        }
    }

    pub fn image(&self) -> &RgbImage {
        &self.canvas
    }

    pub fn save_png(&self, path: &Path) -> Result<()> {
        self.canvas
            .save_with_format(path, ImageFormat::Png)
            .with_context(|| format!("failed to write snapshot {}", path.display()))
    }

    /// Integer pixel span of `rect` clipped to the canvas.
    fn clip(&self, rect: Rect) -> Option<(u32, u32, u32, u32)> {
        let (cw, ch) = self.canvas.dimensions();
        let x0 = rect.x.max(0.0).floor() as u32;
        let y0 = rect.y.max(0.0).floor() as u32;
        let x1 = (rect.right().min(cw as f32).ceil().max(0.0) as u32).min(cw);
        let y1 = (rect.bottom().min(ch as f32).ceil().max(0.0) as u32).min(ch);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0, y0, x1, y1))
    }
}

impl Surface for ImageSurface {
    fn resize(&mut self, width: u32, height: u32) {
        if self.canvas.dimensions() != (width, height) {
            self.canvas = RgbImage::new(width, height);
        }
    }

    fn size(&self) -> (u32, u32) {
        self.canvas.dimensions()
    }

    fn clear(&mut self) {
        for px in self.canvas.pixels_mut() {
            *px = Rgb([0, 0, 0]);
        }
    }

    fn draw_frame(&mut self, frame: &PixelBuffer, dest: Rect) {
        if frame.is_empty() || dest.w <= 0.0 || dest.h <= 0.0 {
            return;
        }
        let Some((x0, y0, x1, y1)) = self.clip(dest) else {
            return;
        };
        let (fw, fh) = (frame.width(), frame.height());
        let Some(source) = RgbImage::from_raw(fw, fh, frame.to_rgb_vec()) else {
            log::warn!("frame {}x{} does not match its pixel data", fw, fh);
            return;
        };

        // Only the part of the frame that lands on the canvas gets scaled.
        let kx = dest.w / fw as f32;
        let ky = dest.h / fh as f32;
        let sx0 = (((x0 as f32 - dest.x) / kx).floor().max(0.0) as u32).min(fw - 1);
        let sy0 = (((y0 as f32 - dest.y) / ky).floor().max(0.0) as u32).min(fh - 1);
        let sx1 = (((x1 as f32 - dest.x) / kx).ceil().max(0.0) as u32).clamp(sx0 + 1, fw);
        let sy1 = (((y1 as f32 - dest.y) / ky).ceil().max(0.0) as u32).clamp(sy0 + 1, fh);
        let visible = imageops::crop_imm(&source, sx0, sy0, sx1 - sx0, sy1 - sy0).to_image();

        let out_w = (((sx1 - sx0) as f32 * kx).round() as u32).max(1);
        let out_h = (((sy1 - sy0) as f32 * ky).round() as u32).max(1);
        let scaled = if (out_w, out_h) == visible.dimensions() {
            visible
        } else {
            imageops::resize(&visible, out_w, out_h, FilterType::Nearest)
        };
        let left = (dest.x + sx0 as f32 * kx).round() as i64;
        let top = (dest.y + sy0 as f32 * ky).round() as i64;
        imageops::replace(&mut self.canvas, &scaled, left, top);
    }

    fn dim(&mut self, area: Rect) {
        let Some((x0, y0, x1, y1)) = self.clip(area) else {
            return;
        };
        for y in y0..y1 {
            for x in x0..x1 {
                let px = self.canvas.get_pixel_mut(x, y);
                for c in px.0.iter_mut() {
                    *c = (*c as f32 * DIM_FACTOR) as u8;
                }
            }
        }
    }

    fn stroke_rect(&mut self, rect: Rect, color: [u8; 3], thickness: u32) {
        for t in 0..thickness.max(1) {
            let w = rect.w.round() as i64 + 2 * t as i64;
            let h = rect.h.round() as i64 + 2 * t as i64;
            if w < 1 || h < 1 {
                continue;
            }
            let x = rect.x.round() as i32 - t as i32;
            let y = rect.y.round() as i32 - t as i32;
            let r = imageproc::rect::Rect::at(x, y).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(&mut self.canvas, r, Rgb(color));
        }
    }

    fn draw_label(&mut self, anchor: Point, text: &str, color: [u8; 3]) {
        let cell = GLYPH_SIDE * LABEL_SCALE;
        let width = cell * text.chars().count() as u32 + 2 * LABEL_PAD;
        let height = cell + 2 * LABEL_PAD;
        let x = anchor.x.round() as i32;
        let mut y = anchor.y.round() as i32 - height as i32;
        if y < 0 {
            // No room above the box; tuck the tag inside its top edge.
            y = anchor.y.round() as i32;
        }
        let tag = imageproc::rect::Rect::at(x, y).of_size(width, height);
        draw_filled_rect_mut(&mut self.canvas, tag, Rgb(color));

        let origin_y = y + LABEL_PAD as i32;
        for (i, ch) in text.chars().enumerate() {
            let Some(glyph) = BASIC_FONTS.get(ch) else {
                continue;
            };
            let origin_x = x + (LABEL_PAD + i as u32 * cell) as i32;
            for (row, bits) in glyph.iter().enumerate() {
                for col in 0..GLYPH_SIDE {
                    if bits & (1 << col) == 0 {
                        continue;
                    }
                    let dot = imageproc::rect::Rect::at(
                        origin_x + (col * LABEL_SCALE) as i32,
                        origin_y + (row as u32 * LABEL_SCALE) as i32,
                    )
                    .of_size(LABEL_SCALE, LABEL_SCALE);
                    draw_filled_rect_mut(&mut self.canvas, dot, Rgb(LABEL_TEXT_COLOR));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;

    fn checker() -> PixelBuffer {
        // 2x1: white, black
        PixelBuffer::new(vec![255, 255, 255, 0, 0, 0], 2, 1, PixelFormat::Rgb24)
            .expect("valid buffer")
    }

    #[test]
    fn frame_is_scaled_into_destination() {
        let mut surface = ImageSurface::new(4, 2);
        surface.draw_frame(&checker(), Rect::new(0.0, 0.0, 4.0, 2.0));
        let img = surface.image();
        assert_eq!(img.get_pixel(0, 0), &Rgb([255, 255, 255]));
        assert_eq!(img.get_pixel(1, 1), &Rgb([255, 255, 255]));
        assert_eq!(img.get_pixel(2, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn overflowing_destination_is_cropped() {
        let mut surface = ImageSurface::new(2, 2);
        // Only the centre of a 4px-wide image lands on the canvas.
        surface.draw_frame(&checker(), Rect::new(-1.0, 0.0, 4.0, 2.0));
        let img = surface.image();
        assert_eq!(img.get_pixel(0, 0), &Rgb([255, 255, 255]));
        assert_eq!(img.get_pixel(1, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn dimming_and_boxes_touch_only_their_area() {
        let mut surface = ImageSurface::new(10, 10);
        let white = PixelBuffer::new(vec![200; 300], 10, 10, PixelFormat::Rgb24)
            .expect("valid buffer");
        surface.draw_frame(&white, Rect::new(0.0, 0.0, 10.0, 10.0));
        surface.dim(Rect::new(0.0, 0.0, 10.0, 2.0));
        surface.stroke_rect(Rect::new(4.0, 4.0, 3.0, 3.0), BOX_COLOR, 1);
        let img = surface.image();
        assert_eq!(img.get_pixel(5, 1), &Rgb([80, 80, 80]));
        assert_eq!(img.get_pixel(5, 3), &Rgb([200, 200, 200]));
        assert_eq!(img.get_pixel(4, 4), &Rgb(BOX_COLOR));
        assert_eq!(img.get_pixel(5, 5), &Rgb([200, 200, 200]));
    }

    #[test]
    fn cover_sized_destination_keeps_the_centre() {
        // 4x1: red, green, blue, white, drawn 3x wide; canvas sees pixels 3..9.
        let row = PixelBuffer::new(
            vec![255, 0, 0, 0, 255, 0, 0, 0, 255, 255, 255, 255],
            4,
            1,
            PixelFormat::Rgb24,
        )
        .expect("valid buffer");
        let mut surface = ImageSurface::new(6, 3);
        surface.draw_frame(&row, Rect::new(-3.0, 0.0, 12.0, 3.0));
        let img = surface.image();
        assert_eq!(img.get_pixel(0, 1), &Rgb([0, 255, 0]));
        assert_eq!(img.get_pixel(2, 2), &Rgb([0, 255, 0]));
        assert_eq!(img.get_pixel(3, 0), &Rgb([0, 0, 255]));
        assert_eq!(img.get_pixel(5, 2), &Rgb([0, 0, 255]));
    }

    #[test]
    fn label_text_is_rendered() {
        let anchor = Point::new(4.0, 40.0);
        let mut first = ImageSurface::new(200, 48);
        let mut second = ImageSurface::new(200, 48);
        first.draw_label(anchor, "tooth 0.90", BOX_COLOR);
        second.draw_label(anchor, "class 0.12", BOX_COLOR);
        assert_ne!(first.image().as_raw(), second.image().as_raw());

        let text_pixels = first
            .image()
            .pixels()
            .filter(|px| px.0 == LABEL_TEXT_COLOR)
            .count();
        assert!(text_pixels > 0);
        // Tag sits above the anchor.
        assert_eq!(first.image().get_pixel(5, 41), &Rgb([0, 0, 0]));
        assert_eq!(first.image().get_pixel(5, 38), &Rgb(BOX_COLOR));
    }

    #[test]
    fn label_near_the_top_moves_inside_the_box() {
        let mut surface = ImageSurface::new(100, 40);
        surface.draw_label(Point::new(0.0, 2.0), "a", BOX_COLOR);
        assert_eq!(surface.image().get_pixel(1, 3), &Rgb(BOX_COLOR));
    }

    #[test]
    fn recording_keeps_only_the_latest_tick() {
        let mut surface = RecordingSurface::new();
        surface.stroke_rect(Rect::new(0.0, 0.0, 1.0, 1.0), BOX_COLOR, 3);
        surface.clear();
        surface.stroke_rect(Rect::new(2.0, 2.0, 1.0, 1.0), BOX_COLOR, 3);
        surface.draw_label(Point::new(2.0, 2.0), "object 0.90", BOX_COLOR);
        assert_eq!(surface.boxes(), vec![Rect::new(2.0, 2.0, 1.0, 1.0)]);
        assert_eq!(surface.labels(), vec!["object 0.90".to_string()]);
    }
}
