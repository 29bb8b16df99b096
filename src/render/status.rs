use std::fmt;

/// User-visible readiness of the overlay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Status {
    LoadingModel,
    Ready,
    Detecting(usize),
    NoDetections,
    CameraUnavailable(String),
    ModelUnavailable(String),
}

impl Status {
    /// Fatal statuses need an explicit retry to clear.
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            Status::CameraUnavailable(_) | Status::ModelUnavailable(_)
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::LoadingModel => write!(f, "Loading model…"),
            Status::Ready => write!(f, "Ready"),
            Status::Detecting(n) => write!(f, "Detecting… ({})", n),
            Status::NoDetections => write!(f, "No detections"),
            Status::CameraUnavailable(reason) => write!(f, "Camera unavailable: {}", reason),
            Status::ModelUnavailable(reason) => write!(f, "Model unavailable: {}", reason),
        }
    }
}

pub type StatusCallback = Box<dyn FnMut(&Status) + Send>;

/// Forwards status changes to an optional callback, dropping repeats.
#[derive(Default)]
pub struct StatusReporter {
    current: Option<Status>,
    callback: Option<StatusCallback>,
}

impl StatusReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the callback and replay the current status to it.
    pub fn set_callback(&mut self, mut callback: StatusCallback) {
        if let Some(status) = &self.current {
            callback(status);
        }
        self.callback = Some(callback);
    }

    /// Returns `true` if the status changed.
    pub fn report(&mut self, status: Status) -> bool {
        if self.current.as_ref() == Some(&status) {
            return false;
        }
        if status.is_fault() {
            log::warn!("status: {}", status);
        } else {
            log::debug!("status: {}", status);
        }
        if let Some(callback) = self.callback.as_mut() {
            callback(&status);
        }
        self.current = Some(status);
        true
    }

    pub fn current(&self) -> Option<&Status> {
        self.current.as_ref()
    }
}
