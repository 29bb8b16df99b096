//! Render loop: the session object that owns the pipeline, the per-tick
//! compositing sequence, drawing surfaces and status reporting.

mod session;
mod status;
mod surface;

pub use session::{
    DeviceSelector, OverlaySession, RunOptions, RunSummary, SessionConfig, SessionStats,
    ThresholdControl, TickOutcome, TickReport, DEFAULT_THRESHOLD,
};
pub use status::{Status, StatusCallback, StatusReporter};
pub use surface::{
    DrawCommand, ImageSurface, RecordingSurface, Surface, BOX_COLOR, BOX_THICKNESS, DIM_FACTOR,
};
