//! Asynchronous detection: preprocessing plus the single-slot worker channel.

mod channel;
mod preprocess;

pub use channel::{
    ChannelConfig, ChannelEvent, ChannelStats, InferenceChannel, InferenceOutput, SubmitOutcome,
    DEFAULT_MAX_DETECTIONS,
};
pub use preprocess::{ChannelOrder, Letterboxer, TensorSpec};
