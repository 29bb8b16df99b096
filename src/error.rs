//! Failure taxonomy for the overlay pipeline.
//!
//! Errors travel as `anyhow::Error`; the pipeline-level kinds below are
//! attached as an `OverlayError` so callers can decide between skipping a
//! tick and halting a subsystem without string matching.

use std::fmt;

/// Classification of a pipeline failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No camera, permission denied, or the active stream died.
    DeviceUnavailable,
    /// Source reported a zero width or height (stream not ready yet).
    ZeroDimensionFrame,
    /// Every backend attempt failed to load the model.
    ModelLoad,
    /// The detector failed on a single frame.
    InferenceRuntime,
    /// A computed geometry broke one of its invariants.
    GeometryInvariant,
}

impl ErrorKind {
    /// Stable code used in logs and status lines.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::DeviceUnavailable => "DEVICE_UNAVAILABLE",
            ErrorKind::ZeroDimensionFrame => "ZERO_DIMENSION_FRAME",
            ErrorKind::ModelLoad => "MODEL_LOAD",
            ErrorKind::InferenceRuntime => "INFERENCE_RUNTIME",
            ErrorKind::GeometryInvariant => "GEOMETRY_INVARIANT",
        }
    }

    /// Fatal kinds halt their subsystem until an explicit retry.
    pub fn is_fatal(self) -> bool {
        matches!(self, ErrorKind::DeviceUnavailable | ErrorKind::ModelLoad)
    }
}

#[derive(Clone, Debug)]
pub struct OverlayError {
    pub kind: ErrorKind,
    pub message: String,
}

impl OverlayError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn device_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DeviceUnavailable, message)
    }

    pub fn zero_dimension(width: u32, height: u32) -> Self {
        Self::new(
            ErrorKind::ZeroDimensionFrame,
            format!("source reported {}x{}; stream not ready", width, height),
        )
    }

    pub fn model_load(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ModelLoad, message)
    }

    pub fn inference(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InferenceRuntime, message)
    }

    pub fn geometry(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::GeometryInvariant, message)
    }

    /// Find the overlay classification anywhere in an `anyhow` chain.
    pub fn kind_of(err: &anyhow::Error) -> Option<ErrorKind> {
        err.chain()
            .find_map(|cause| cause.downcast_ref::<OverlayError>())
            .map(|e| e.kind)
    }
}

impl fmt::Display for OverlayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.message)
    }
}

impl std::error::Error for OverlayError {}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn kind_survives_context_wrapping() {
        let err: anyhow::Result<()> = Err(OverlayError::zero_dimension(0, 720).into());
        let err = err.context("letterbox forward").unwrap_err();
        assert_eq!(
            OverlayError::kind_of(&err),
            Some(ErrorKind::ZeroDimensionFrame)
        );
    }

    #[test]
    fn plain_errors_have_no_kind() {
        let err = anyhow::anyhow!("unrelated");
        assert_eq!(OverlayError::kind_of(&err), None);
    }

    #[test]
    fn fatal_kinds() {
        assert!(ErrorKind::DeviceUnavailable.is_fatal());
        assert!(ErrorKind::ModelLoad.is_fatal());
        assert!(!ErrorKind::ZeroDimensionFrame.is_fatal());
        assert!(!ErrorKind::InferenceRuntime.is_fatal());
        assert!(!ErrorKind::GeometryInvariant.is_fatal());
    }

    #[test]
    fn display_includes_code() {
        let err = OverlayError::model_load("no backend");
        assert_eq!(err.to_string(), "MODEL_LOAD: no backend");
    }
}
