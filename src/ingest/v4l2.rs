//! V4L2 capture devices (feature `ingest-v4l2`).
//!
//! Negotiates RGB24 and falls back to whatever the driver insists on, as long
//! as it is YUYV or NV12. Frames are normalised to RGB24 in memory; nothing
//! is written to disk.

use anyhow::{Context, Result};
use ouroboros::self_referencing;
use std::time::{Duration, Instant};

use super::normalize::{normalize_to_rgb, SourceFormat};
use super::{DeviceRequest, FrameSource, SourceStats};
use crate::error::OverlayError;
use crate::frame::{Frame, PixelBuffer, PixelFormat};

/// Used when no explicit device id is requested.
pub const DEFAULT_DEVICE: &str = "/dev/video0";

pub struct V4l2Source {
    device_path: String,
    target_fps: u32,
    state: Option<V4l2State>,
    format: SourceFormat,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    /// Open and start streaming. Open failures (missing node, permission
    /// denied) are `DeviceUnavailable`.
    pub fn open(request: &DeviceRequest) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device_path = request
            .device_id
            .clone()
            .unwrap_or_else(|| DEFAULT_DEVICE.to_string());

        let mut device = v4l::Device::with_path(&device_path).map_err(|err| {
            let reason = match err.kind() {
                std::io::ErrorKind::PermissionDenied => "permission denied",
                std::io::ErrorKind::NotFound => "no such device",
                _ => "open failed",
            };
            OverlayError::device_unavailable(format!("{}: {} ({})", device_path, reason, err))
        })?;

        let mut format = device.format().context("read v4l2 format")?;
        format.width = request.width;
        format.height = request.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");
        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("{}: failed to set RGB24 format: {}", device_path, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        let source_format = SourceFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            OverlayError::device_unavailable(format!(
                "{}: unsupported pixel format {}",
                device_path, format.fourcc
            ))
        })?;

        if request.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(request.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("{}: failed to set fps: {}", device_path, err);
            }
        }

        let state = V4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::info!(
            "camera {} acquired ({}x{} {:?})",
            device_path,
            format.width,
            format.height,
            source_format
        );
        Ok(Self {
            device_path,
            target_fps: request.target_fps,
            state: Some(state),
            format: source_format,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
            active_width: format.width,
            active_height: format.height,
        })
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.target_fps == 0 {
            2_000
        } else {
            (1000 / self.target_fps).saturating_mul(6)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }
}

impl FrameSource for V4l2Source {
    fn describe(&self) -> String {
        self.device_path.clone()
    }

    fn next_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let state = self
            .state
            .as_mut()
            .ok_or_else(|| {
                OverlayError::device_unavailable(format!("{} was stopped", self.device_path))
            })?;
        let (buf, _meta) = state
            .with_mut(|fields| fields.stream.next())
            .map_err(|err| {
                self.last_error = Some(err.to_string());
                anyhow::Error::new(OverlayError::device_unavailable(format!(
                    "{}: capture failed: {}",
                    self.device_path, err
                )))
            })?;

        let rgb = normalize_to_rgb(buf, self.active_width, self.active_height, self.format)?;
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());

        let pixels = PixelBuffer::new(
            rgb,
            self.active_width,
            self.active_height,
            PixelFormat::Rgb24,
        )?;
        Ok(Frame::new(pixels, self.frame_count))
    }

    fn stop(&mut self) {
        if self.state.take().is_some() {
            log::info!("camera {} released", self.device_path);
        }
    }

    fn is_healthy(&self) -> bool {
        if self.state.is_none() || self.last_error.is_some() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            device: self.device_path.clone(),
            width: self.active_width,
            height: self.active_height,
        }
    }
}

impl Drop for V4l2Source {
    fn drop(&mut self) {
        self.stop();
    }
}
