#![cfg(feature = "backend-tract")]

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::{BackendLoader, DetectorBackend};
use crate::detect::model::ModelLocation;
use crate::detect::result::OUTPUT_STRIDE;

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// How far tract may rewrite the graph before running it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TractStrategy {
    /// Fully optimised plan; fastest, but some exported graphs fail to optimise.
    Optimized,
    /// Decluttered typed plan without kernel-level optimisation.
    Portable,
}

/// Tract-based ONNX detector.
///
/// Loads a local model file; no network I/O.
pub struct TractBackend {
    plan: Plan,
    input_size: u32,
}

impl TractBackend {
    pub fn new<P: AsRef<std::path::Path>>(
        model_path: P,
        input_size: u32,
        strategy: TractStrategy,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?;

        let plan = match strategy {
            TractStrategy::Optimized => model
                .into_optimized()
                .context("failed to optimize ONNX model")?
                .into_runnable()
                .context("failed to build runnable ONNX model")?,
            TractStrategy::Portable => model
                .into_typed()
                .context("failed to type ONNX model")?
                .into_decluttered()
                .context("failed to declutter ONNX model")?
                .into_runnable()
                .context("failed to build runnable ONNX model")?,
        };

        Ok(Self { plan, input_size })
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn detect(&mut self, tensor: &[f32]) -> Result<Vec<f32>> {
        let side = self.input_size as usize;
        let input: Tensor = tract_ndarray::Array4::from_shape_vec((1, 3, side, side), tensor.to_vec())
            .context("input tensor does not match 1x3xSxS")?
            .into_tensor();
        let outputs = self
            .plan
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        if output.shape().last() != Some(&OUTPUT_STRIDE) {
            return Err(anyhow!(
                "expected [1, N, {}] output, got {:?}",
                OUTPUT_STRIDE,
                output.shape()
            ));
        }
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        Ok(view.iter().copied().collect())
    }

    fn warm_up(&mut self) -> Result<()> {
        let side = self.input_size as usize;
        self.detect(&vec![0.0; 3 * side * side]).map(|_| ())
    }
}

pub struct TractLoader {
    strategy: TractStrategy,
}

impl TractLoader {
    pub fn new(strategy: TractStrategy) -> Self {
        Self { strategy }
    }
}

impl BackendLoader for TractLoader {
    fn name(&self) -> &str {
        match self.strategy {
            TractStrategy::Optimized => "tract-optimized",
            TractStrategy::Portable => "tract-portable",
        }
    }

    fn load(&self, model: &ModelLocation, input_size: u32) -> Result<Box<dyn DetectorBackend>> {
        if model.is_stub() {
            return Err(anyhow!("tract cannot run stub model {}", model));
        }
        Ok(Box::new(TractBackend::new(
            model.path(),
            input_size,
            self.strategy,
        )?))
    }
}
