use anyhow::{anyhow, Result};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::detect::{decode_output, BackendChain, Detection, ModelLocation};
use crate::error::{ErrorKind, OverlayError};
use crate::frame::PixelBuffer;
use crate::letterbox::LetterboxGeometry;

use super::preprocess::{Letterboxer, TensorSpec};

/// Upper bound on decoded rows per frame.
pub const DEFAULT_MAX_DETECTIONS: usize = 300;

#[derive(Clone, Copy, Debug)]
pub struct ChannelConfig {
    pub input_size: u32,
    pub tensor: TensorSpec,
    pub max_detections: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            input_size: 640,
            tensor: TensorSpec::default(),
            max_detections: DEFAULT_MAX_DETECTIONS,
        }
    }
}

/// One completed inference, in model-square coordinates.
#[derive(Clone, Debug)]
pub struct InferenceOutput {
    pub request_id: u64,
    /// Source generation the frame was captured under.
    pub generation: u64,
    pub detections: Vec<Detection>,
    /// Letterbox of the frame that produced these detections.
    pub geometry: LetterboxGeometry,
    pub latency: Duration,
}

#[derive(Clone, Debug)]
pub enum ChannelEvent {
    Detections(InferenceOutput),
    /// Per-frame failure; the channel stays usable.
    Failed {
        request_id: u64,
        generation: u64,
        error: OverlayError,
    },
    /// The worker thread is gone. Reported once.
    WorkerLost,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted(u64),
    /// A request was already in flight; the frame was discarded.
    Dropped,
    /// The worker is gone.
    Unavailable,
}

#[derive(Clone, Debug, Default)]
pub struct ChannelStats {
    pub submitted: u64,
    pub dropped: u64,
    pub completed: u64,
    pub failed: u64,
    pub last_latency: Option<Duration>,
}

enum WorkerRequest {
    Frame {
        request_id: u64,
        generation: u64,
        pixels: PixelBuffer,
    },
    Shutdown,
}

enum WorkerReply {
    Ready { strategy: String, attempts: usize },
    LoadFailed(anyhow::Error),
    Event(ChannelEvent),
}

/// Owns the model runtime on a worker thread and enforces at most one
/// request in flight.
///
/// Frames offered while a request is pending are dropped, never queued, so
/// the overlay tracks the live scene instead of a growing backlog. Every
/// accepted frame yields exactly one `Detections` or `Failed` event.
pub struct InferenceChannel {
    requests: Sender<WorkerRequest>,
    replies: Receiver<WorkerReply>,
    join: Option<JoinHandle<()>>,
    in_flight: Option<u64>,
    next_request: u64,
    strategy: String,
    lost: bool,
    stats: ChannelStats,
}

impl InferenceChannel {
    /// Load the model through `chain` on a fresh worker and wait until it is
    /// ready. Exhausting the chain is a `ModelLoad` error.
    pub fn initialize(
        model: &ModelLocation,
        chain: BackendChain,
        config: ChannelConfig,
    ) -> Result<Self> {
        match model.fingerprint() {
            Ok(Some(digest)) => log::info!("model {} sha256={}", model, digest),
            Ok(None) => log::info!("model {} (stub)", model),
            Err(err) => {
                return Err(OverlayError::model_load(format!("{:#}", err)).into());
            }
        }

        let (req_tx, req_rx) = mpsc::channel::<WorkerRequest>();
        let (reply_tx, reply_rx) = mpsc::channel::<WorkerReply>();
        let worker_model = model.clone();
        let join = std::thread::Builder::new()
            .name("inference-worker".to_string())
            .spawn(move || run_worker(worker_model, chain, config, req_rx, reply_tx))
            .map_err(|err| OverlayError::model_load(format!("cannot spawn worker: {}", err)))?;

        match reply_rx.recv() {
            Ok(WorkerReply::Ready { strategy, attempts }) => {
                log::info!(
                    "inference channel ready: strategy={} after {} attempt(s), input={}",
                    strategy,
                    attempts,
                    config.input_size
                );
                Ok(Self {
                    requests: req_tx,
                    replies: reply_rx,
                    join: Some(join),
                    in_flight: None,
                    next_request: 1,
                    strategy,
                    lost: false,
                    stats: ChannelStats::default(),
                })
            }
            Ok(WorkerReply::LoadFailed(err)) => {
                let _ = join.join();
                Err(err)
            }
            Ok(WorkerReply::Event(_)) | Err(_) => {
                let _ = join.join();
                Err(OverlayError::model_load("inference worker exited during load").into())
            }
        }
    }

    /// Offer a frame. Takes ownership so the pixels can cross to the worker
    /// without sharing.
    pub fn submit_frame(&mut self, pixels: PixelBuffer, generation: u64) -> SubmitOutcome {
        if self.lost {
            return SubmitOutcome::Unavailable;
        }
        if self.in_flight.is_some() {
            self.stats.dropped += 1;
            return SubmitOutcome::Dropped;
        }
        let request_id = self.next_request;
        let request = WorkerRequest::Frame {
            request_id,
            generation,
            pixels,
        };
        if self.requests.send(request).is_err() {
            self.lost = true;
            return SubmitOutcome::Unavailable;
        }
        self.next_request += 1;
        self.in_flight = Some(request_id);
        self.stats.submitted += 1;
        log::debug!("submitted request {} (generation {})", request_id, generation);
        SubmitOutcome::Accepted(request_id)
    }

    /// Next completed event, without blocking.
    pub fn poll(&mut self) -> Option<ChannelEvent> {
        match self.replies.try_recv() {
            Ok(reply) => self.accept_reply(reply),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => self.mark_lost(),
        }
    }

    /// Block up to `timeout` for the next event.
    pub fn wait_event(&mut self, timeout: Duration) -> Option<ChannelEvent> {
        match self.replies.recv_timeout(timeout) {
            Ok(reply) => self.accept_reply(reply),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => self.mark_lost(),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none() && !self.lost
    }

    pub fn in_flight(&self) -> Option<u64> {
        self.in_flight
    }

    pub fn is_available(&self) -> bool {
        !self.lost
    }

    /// Loader name that won the fallback chain.
    pub fn strategy(&self) -> &str {
        &self.strategy
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats.clone()
    }

    /// Stop the worker and wait for it. A request in flight finishes first.
    pub fn shutdown(mut self) -> Result<()> {
        let _ = self.requests.send(WorkerRequest::Shutdown);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("inference worker panicked"))?;
        }
        Ok(())
    }

    fn accept_reply(&mut self, reply: WorkerReply) -> Option<ChannelEvent> {
        let event = match reply {
            WorkerReply::Event(event) => event,
            WorkerReply::Ready { .. } | WorkerReply::LoadFailed(_) => return None,
        };
        match &event {
            ChannelEvent::Detections(output) => {
                self.stats.completed += 1;
                self.stats.last_latency = Some(output.latency);
                if self.in_flight == Some(output.request_id) {
                    self.in_flight = None;
                }
            }
            ChannelEvent::Failed {
                request_id, error, ..
            } => {
                self.stats.failed += 1;
                log::warn!("inference request {} failed: {}", request_id, error);
                if self.in_flight == Some(*request_id) {
                    self.in_flight = None;
                }
            }
            ChannelEvent::WorkerLost => {}
        }
        Some(event)
    }

    fn mark_lost(&mut self) -> Option<ChannelEvent> {
        if self.lost {
            return None;
        }
        log::error!("inference worker exited; detections stop until restart");
        self.lost = true;
        self.in_flight = None;
        Some(ChannelEvent::WorkerLost)
    }
}

impl Drop for InferenceChannel {
    fn drop(&mut self) {
        // Detached: a gated or slow backend must not stall teardown.
        let _ = self.requests.send(WorkerRequest::Shutdown);
    }
}

fn run_worker(
    model: ModelLocation,
    chain: BackendChain,
    config: ChannelConfig,
    requests: Receiver<WorkerRequest>,
    replies: Sender<WorkerReply>,
) {
    let loaded = match chain.try_initialize(&model, config.input_size) {
        Ok(loaded) => loaded,
        Err(err) => {
            let _ = replies.send(WorkerReply::LoadFailed(err));
            return;
        }
    };
    let mut backend = loaded.backend;
    let mut letterboxer = Letterboxer::new(config.input_size, config.tensor);
    if replies
        .send(WorkerReply::Ready {
            strategy: loaded.strategy,
            attempts: loaded.attempts,
        })
        .is_err()
    {
        return;
    }

    while let Ok(request) = requests.recv() {
        let (request_id, generation, pixels) = match request {
            WorkerRequest::Frame {
                request_id,
                generation,
                pixels,
            } => (request_id, generation, pixels),
            WorkerRequest::Shutdown => break,
        };

        let started = Instant::now();
        let result = letterboxer.prepare(&pixels).and_then(|(tensor, geometry)| {
            let raw = backend.detect(tensor)?;
            let detections = decode_output(&raw, config.max_detections)?;
            Ok((detections, geometry))
        });
        drop(pixels);

        let event = match result {
            Ok((detections, geometry)) => ChannelEvent::Detections(InferenceOutput {
                request_id,
                generation,
                detections,
                geometry,
                latency: started.elapsed(),
            }),
            Err(err) => {
                let kind = OverlayError::kind_of(&err).unwrap_or(ErrorKind::InferenceRuntime);
                ChannelEvent::Failed {
                    request_id,
                    generation,
                    error: OverlayError::new(kind, format!("{:#}", err)),
                }
            }
        };
        if replies.send(WorkerReply::Event(event)).is_err() {
            break;
        }
    }
    log::debug!("inference worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{StubLoader, StubScript};
    use crate::frame::PixelFormat;

    const WAIT: Duration = Duration::from_secs(5);

    fn pixels() -> PixelBuffer {
        PixelBuffer::new(vec![40; 16 * 16 * 3], 16, 16, PixelFormat::Rgb24)
            .expect("valid buffer")
    }

    #[test]
    fn crashed_worker_is_reported_once() {
        let script = StubScript::new();
        script.push_crash();
        let chain = BackendChain::new().with(StubLoader::new("stub", script));
        let config = ChannelConfig {
            input_size: 32,
            ..ChannelConfig::default()
        };
        let mut channel =
            match InferenceChannel::initialize(&ModelLocation::new("stub://test"), chain, config) {
                Ok(channel) => channel,
                Err(err) => panic!("channel failed to start: {:#}", err),
            };

        assert_eq!(channel.submit_frame(pixels(), 1), SubmitOutcome::Accepted(1));
        assert!(matches!(
            channel.wait_event(WAIT),
            Some(ChannelEvent::WorkerLost)
        ));
        assert!(!channel.is_available());
        assert!(channel.poll().is_none());
        assert_eq!(channel.submit_frame(pixels(), 1), SubmitOutcome::Unavailable);
        assert!(channel.shutdown().is_err());
    }
}
