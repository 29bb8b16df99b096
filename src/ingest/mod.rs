//! Capture sources.
//!
//! - Synthetic camera for `stub://` device ids (tests, demos)
//! - V4L2 devices (feature: ingest-v4l2)
//!
//! Sources hand out one `Frame` per call and keep nothing once it is
//! returned. Pixel content is never logged.

#[cfg_attr(not(feature = "ingest-v4l2"), allow(dead_code))]
mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::Result;

use crate::error::OverlayError;
use crate::frame::Frame;

pub use normalize::{normalize_to_rgb, SourceFormat};
pub use synthetic::{SyntheticConfig, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

const STUB_SCHEME: &str = "stub://";

/// A live video stream.
pub trait FrameSource: Send {
    fn describe(&self) -> String;

    /// Next frame. A 0x0 frame means the stream is not ready yet; an error
    /// means the stream is gone.
    fn next_frame(&mut self) -> Result<Frame>;

    /// Release the device. Idempotent.
    fn stop(&mut self);

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub device: String,
    pub width: u32,
    pub height: u32,
}

/// What to open. Resolution and rate are hints; the device may differ.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceRequest {
    /// `None` picks the default (environment-facing) device.
    pub device_id: Option<String>,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

impl Default for DeviceRequest {
    fn default() -> Self {
        Self {
            device_id: None,
            width: 1280,
            height: 720,
            target_fps: 30,
        }
    }
}

/// Device acquisition.
pub trait SourceProvider: Send {
    /// Open a stream. Failures are `DeviceUnavailable`.
    fn acquire(&mut self, request: &DeviceRequest) -> Result<Box<dyn FrameSource>>;
}

/// Default provider: synthetic for `stub://…`, V4L2 otherwise.
///
/// `stub://denied` simulates a permission refusal.
#[derive(Clone, Debug, Default)]
pub struct CaptureProvider;

impl SourceProvider for CaptureProvider {
    fn acquire(&mut self, request: &DeviceRequest) -> Result<Box<dyn FrameSource>> {
        match request.device_id.as_deref() {
            Some("stub://denied") => Err(OverlayError::device_unavailable(
                "stub://denied: permission denied",
            )
            .into()),
            Some(id) if id.starts_with(STUB_SCHEME) => {
                Ok(Box::new(SyntheticSource::new(SyntheticConfig {
                    device: id.to_string(),
                    width: request.width,
                    height: request.height,
                    ..SyntheticConfig::default()
                })))
            }
            _ => open_device(request),
        }
    }
}

#[cfg(feature = "ingest-v4l2")]
fn open_device(request: &DeviceRequest) -> Result<Box<dyn FrameSource>> {
    let source = V4l2Source::open(request).map_err(|err| {
        match OverlayError::kind_of(&err) {
            Some(_) => err,
            None => OverlayError::device_unavailable(format!("{:#}", err)).into(),
        }
    })?;
    Ok(Box::new(source))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_device(request: &DeviceRequest) -> Result<Box<dyn FrameSource>> {
    Err(OverlayError::device_unavailable(format!(
        "{}: camera capture requires the ingest-v4l2 feature",
        request.device_id.as_deref().unwrap_or("default device")
    ))
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn stub_ids_get_a_synthetic_camera() -> Result<()> {
        let mut provider = CaptureProvider;
        let request = DeviceRequest {
            device_id: Some("stub://front".to_string()),
            width: 32,
            height: 24,
            ..DeviceRequest::default()
        };
        let mut source = provider.acquire(&request)?;
        let frame = source.next_frame()?;
        assert_eq!((frame.width(), frame.height()), (32, 24));
        assert!(source.describe().contains("stub://front"));
        Ok(())
    }

    #[test]
    fn denied_permission_is_device_unavailable() {
        let request = DeviceRequest {
            device_id: Some("stub://denied".to_string()),
            ..DeviceRequest::default()
        };
        let err = CaptureProvider.acquire(&request).err();
        let kind = err.as_ref().and_then(OverlayError::kind_of);
        assert_eq!(kind, Some(ErrorKind::DeviceUnavailable));
    }
}
