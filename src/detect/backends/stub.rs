//! Scripted detector for tests and demos.
//!
//! A `StubScript` is shared between the test (or demo) and the backend that
//! runs on the inference worker. It can queue canned outputs or failures,
//! hold each call behind a gate to simulate slow hardware, and count calls.
//! `stub://bright` models instead box the bright region of the input, which
//! is enough to follow the synthetic source's moving marker.

use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::detect::backend::{BackendLoader, DetectorBackend};
use crate::detect::model::ModelLocation;

/// Mean channel value above which a tensor pixel counts as "bright".
const BRIGHT_LEVEL: f32 = 0.85;

#[derive(Clone, Debug)]
enum StubResponse {
    Output(Vec<f32>),
    Fail(String),
    #[cfg(test)]
    Crash,
}

#[derive(Default)]
struct ScriptState {
    queued: VecDeque<StubResponse>,
    fallback: Vec<f32>,
    latency: Option<Duration>,
    last_tensor_len: usize,
}

/// Shared script driving one or more stub backends.
#[derive(Clone, Default)]
pub struct StubScript {
    state: Arc<Mutex<ScriptState>>,
    gate: Arc<Mutex<Option<Receiver<()>>>>,
    calls: Arc<AtomicU64>,
}

/// Releases gated stub calls, one per `release`.
pub struct StubGate {
    tx: Sender<()>,
}

impl StubGate {
    pub fn release(&self) {
        let _ = self.tx.send(());
    }
}

impl StubScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block every call until the returned gate releases it.
    pub fn gated(&self) -> StubGate {
        let (tx, rx) = channel();
        if let Ok(mut gate) = self.gate.lock() {
            *gate = Some(rx);
        }
        StubGate { tx }
    }

    /// Queue one output (flattened `[1, N, 6]`).
    pub fn push_output(&self, output: Vec<f32>) {
        if let Ok(mut state) = self.state.lock() {
            state.queued.push_back(StubResponse::Output(output));
        }
    }

    /// Queue one runtime failure.
    pub fn push_failure(&self, reason: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.queued.push_back(StubResponse::Fail(reason.to_string()));
        }
    }

    /// Queue a panic on the worker thread, as if the runtime crashed.
    #[cfg(test)]
    pub(crate) fn push_crash(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.queued.push_back(StubResponse::Crash);
        }
    }

    /// Output used once the queue is empty.
    pub fn set_fallback(&self, output: Vec<f32>) {
        if let Ok(mut state) = self.state.lock() {
            state.fallback = output;
        }
    }

    pub fn set_latency(&self, latency: Duration) {
        if let Ok(mut state) = self.state.lock() {
            state.latency = Some(latency);
        }
    }

    /// Completed and failed calls so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_tensor_len(&self) -> usize {
        self.state.lock().map(|s| s.last_tensor_len).unwrap_or(0)
    }

    fn wait_for_gate(&self) -> Result<()> {
        let gate = self
            .gate
            .lock()
            .map_err(|_| anyhow!("stub gate lock poisoned"))?;
        if let Some(rx) = gate.as_ref() {
            rx.recv().map_err(|_| anyhow!("stub gate closed"))?;
        }
        Ok(())
    }

    fn next_response(&self, tensor_len: usize) -> Result<(StubResponse, Option<Duration>)> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("stub script lock poisoned"))?;
        state.last_tensor_len = tensor_len;
        let response = match state.queued.pop_front() {
            Some(response) => response,
            None => StubResponse::Output(state.fallback.clone()),
        };
        Ok((response, state.latency))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StubMode {
    Scripted,
    Bright,
}

pub struct StubBackend {
    script: StubScript,
    input_size: u32,
    mode: StubMode,
}

impl StubBackend {
    pub fn new(script: StubScript, input_size: u32) -> Self {
        Self {
            script,
            input_size,
            mode: StubMode::Scripted,
        }
    }

    fn bright(input_size: u32) -> Self {
        Self {
            script: StubScript::new(),
            input_size,
            mode: StubMode::Bright,
        }
    }

    fn bright_box(&self, tensor: &[f32]) -> Vec<f32> {
        let side = self.input_size as usize;
        let plane = side * side;
        if tensor.len() < plane * 3 {
            return Vec::new();
        }
        let mut bounds: Option<(usize, usize, usize, usize)> = None;
        for y in 0..side {
            for x in 0..side {
                let idx = y * side + x;
                let level = (tensor[idx] + tensor[plane + idx] + tensor[2 * plane + idx]) / 3.0;
                if level < BRIGHT_LEVEL {
                    continue;
                }
                bounds = Some(match bounds {
                    None => (x, y, x, y),
                    Some((x1, y1, x2, y2)) => (x1.min(x), y1.min(y), x2.max(x), y2.max(y)),
                });
            }
        }
        match bounds {
            Some((x1, y1, x2, y2)) => vec![
                x1 as f32,
                y1 as f32,
                (x2 + 1) as f32,
                (y2 + 1) as f32,
                0.9,
                0.0,
            ],
            None => Vec::new(),
        }
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn detect(&mut self, tensor: &[f32]) -> Result<Vec<f32>> {
        if self.mode == StubMode::Bright {
            return Ok(self.bright_box(tensor));
        }

        self.script.wait_for_gate()?;
        let (response, latency) = self.script.next_response(tensor.len())?;
        if let Some(latency) = latency {
            std::thread::sleep(latency);
        }
        self.script.calls.fetch_add(1, Ordering::SeqCst);
        match response {
            StubResponse::Output(output) => Ok(output),
            StubResponse::Fail(reason) => Err(anyhow!("stub inference failure: {}", reason)),
            #[cfg(test)]
            StubResponse::Crash => panic!("stub runtime crashed"),
        }
    }
}

/// Loader for `stub://` models.
pub struct StubLoader {
    name: String,
    script: StubScript,
    failure: Option<String>,
}

impl StubLoader {
    pub fn new(name: &str, script: StubScript) -> Self {
        Self {
            name: name.to_string(),
            script,
            failure: None,
        }
    }

    /// A strategy that can never load, for exercising fallback.
    pub fn failing(name: &str, reason: &str) -> Self {
        Self {
            name: name.to_string(),
            script: StubScript::new(),
            failure: Some(reason.to_string()),
        }
    }
}

impl BackendLoader for StubLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&self, model: &ModelLocation, input_size: u32) -> Result<Box<dyn DetectorBackend>> {
        if let Some(reason) = &self.failure {
            return Err(anyhow!("{}", reason));
        }
        if !model.is_stub() {
            return Err(anyhow!("stub strategy cannot run {}", model));
        }
        if model.as_str() == "stub://bright" {
            return Ok(Box::new(StubBackend::bright(input_size)));
        }
        Ok(Box::new(StubBackend::new(self.script.clone(), input_size)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_outputs_then_fallback() -> Result<()> {
        let script = StubScript::new();
        script.push_output(vec![1.0, 2.0, 3.0, 4.0, 0.5, 0.0]);
        script.push_failure("boom");
        script.set_fallback(vec![]);
        let mut backend = StubBackend::new(script.clone(), 32);

        assert_eq!(backend.detect(&[0.0; 3])?.len(), 6);
        assert!(backend.detect(&[0.0; 3]).is_err());
        assert!(backend.detect(&[0.0; 3])?.is_empty());
        assert_eq!(script.calls(), 3);
        assert_eq!(script.last_tensor_len(), 3);
        Ok(())
    }

    #[test]
    fn bright_mode_boxes_the_bright_patch() -> Result<()> {
        let side = 8usize;
        let plane = side * side;
        let mut tensor = vec![0.0f32; plane * 3];
        for y in 2..4 {
            for x in 5..7 {
                for c in 0..3 {
                    tensor[c * plane + y * side + x] = 1.0;
                }
            }
        }
        let loader = StubLoader::new("bright", StubScript::new());
        let mut backend = loader.load(&ModelLocation::new("stub://bright"), side as u32)?;
        let out = backend.detect(&tensor)?;
        assert_eq!(out, vec![5.0, 2.0, 7.0, 4.0, 0.9, 0.0]);
        Ok(())
    }

    #[test]
    fn rejects_real_model_paths() {
        let loader = StubLoader::new("stub", StubScript::new());
        assert!(loader.load(&ModelLocation::new("best.onnx"), 640).is_err());
    }
}
