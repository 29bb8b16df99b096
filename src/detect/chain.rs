use anyhow::Result;

use crate::error::OverlayError;

use super::backend::{BackendLoader, DetectorBackend};
use super::model::ModelLocation;

/// A preferred strategy plus at most one fallback.
pub const MAX_STRATEGIES: usize = 2;

/// Ordered list of execution strategies. The first loader that succeeds wins;
/// exhausting the list is a `ModelLoad` failure carrying every attempt's error.
pub struct BackendChain {
    loaders: Vec<Box<dyn BackendLoader>>,
}

/// A backend that loaded, plus the loader that produced it.
pub struct LoadedBackend {
    pub backend: Box<dyn DetectorBackend>,
    pub strategy: String,
    pub attempts: usize,
}

impl BackendChain {
    pub fn new() -> Self {
        Self {
            loaders: Vec::new(),
        }
    }

    /// Append a strategy; earlier strategies are preferred.
    pub fn with<L: BackendLoader + 'static>(mut self, loader: L) -> Self {
        self.loaders.push(Box::new(loader));
        self
    }

    pub fn push(&mut self, loader: Box<dyn BackendLoader>) {
        self.loaders.push(loader);
    }

    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }

    /// Strategy names in attempt order.
    pub fn list(&self) -> Vec<String> {
        self.loaders.iter().map(|l| l.name().to_string()).collect()
    }

    pub fn try_initialize(&self, model: &ModelLocation, input_size: u32) -> Result<LoadedBackend> {
        if self.loaders.is_empty() {
            return Err(OverlayError::model_load(format!(
                "no execution strategy available for {}",
                model
            ))
            .into());
        }
        if self.loaders.len() > MAX_STRATEGIES {
            return Err(OverlayError::model_load(format!(
                "{} strategies configured for {} ({}), at most {} allowed",
                self.loaders.len(),
                model,
                self.list().join(", "),
                MAX_STRATEGIES
            ))
            .into());
        }

        let mut failures = Vec::new();
        for (idx, loader) in self.loaders.iter().enumerate() {
            let attempt = loader.load(model, input_size).and_then(|mut backend| {
                backend.warm_up()?;
                Ok(backend)
            });
            match attempt {
                Ok(backend) => {
                    log::info!(
                        "detector ready: strategy={} backend={} input={}",
                        loader.name(),
                        backend.name(),
                        input_size
                    );
                    return Ok(LoadedBackend {
                        backend,
                        strategy: loader.name().to_string(),
                        attempts: idx + 1,
                    });
                }
                Err(err) => {
                    log::warn!("strategy {} failed for {}: {:#}", loader.name(), model, err);
                    failures.push(format!("{}: {:#}", loader.name(), err));
                }
            }
        }

        Err(OverlayError::model_load(format!(
            "all strategies failed for {} ({})",
            model,
            failures.join("; ")
        ))
        .into())
    }
}

impl Default for BackendChain {
    fn default() -> Self {
        Self::new()
    }
}
