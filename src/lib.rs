//! Live Detect Overlay
//!
//! Runs an object detector over a live camera stream and draws its boxes on
//! top of the video, without ever blocking the video on the detector.
//!
//! # Architecture
//!
//! ```text
//! FrameSource ──frame──▶ OverlaySession (render loop)
//!                          │  ├─ LayoutEngine   source space → canvas
//!                          │  ├─ DetectionBuffer  smoothing, generations
//!                          │  └─ Surface        composite + boxes
//!                          ▼
//!                   InferenceChannel ──▶ worker thread
//!                     (one request in flight; letterbox → backend chain)
//! ```
//!
//! Coordinates pass through three spaces: the model square (letterboxed
//! `S x S` detector input), source pixels, and the display canvas.
//! `letterbox` maps between the first two, `layout` between the last two.
//!
//! # Module Structure
//!
//! - `frame`: pixel buffers and captured frames
//! - `ingest`: capture sources (synthetic `stub://` camera, V4L2)
//! - `letterbox`: square-canvas geometry and its inverse
//! - `detect`: detector backends, fallback chain, output decoding
//! - `inference`: preprocessing and the single-slot worker channel
//! - `buffer`: latest detections plus temporal smoothing
//! - `layout`: fit policies and the detection-region band
//! - `render`: the session, its per-tick sequence and drawing surfaces
//! - `config`: file + environment configuration
//! - `error`: failure taxonomy

pub mod buffer;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod inference;
pub mod ingest;
pub mod layout;
pub mod letterbox;
pub mod render;

pub use buffer::DetectionBuffer;
pub use config::OverlayConfig;
pub use detect::{build_chain, BackendChain, Detection, ExecutionStrategy, ModelLocation};
pub use error::{ErrorKind, OverlayError};
pub use frame::{Frame, PixelBuffer, PixelFormat};
pub use inference::{ChannelConfig, ChannelEvent, InferenceChannel, SubmitOutcome};
pub use ingest::{CaptureProvider, DeviceRequest, FrameSource, SourceProvider};
pub use layout::{BoxPolicy, FitMode, LayoutEngine, LayoutGeometry, Rect, RegionMode};
pub use letterbox::{LetterboxGeometry, Point};
pub use render::{
    ImageSurface, OverlaySession, RecordingSurface, RunOptions, SessionConfig, Status, Surface,
    TickOutcome, TickReport,
};
