mod backend;
pub mod backends;
mod chain;
mod model;
mod result;

use serde::{Deserialize, Serialize};

pub use backend::{BackendLoader, DetectorBackend};
pub use backends::{StubBackend, StubGate, StubLoader, StubScript};
pub use chain::{BackendChain, LoadedBackend, MAX_STRATEGIES};
pub use model::ModelLocation;
pub use result::{decode_output, Detection, OUTPUT_STRIDE};

/// Configured execution strategies, in preference order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionStrategy {
    Optimized,
    Portable,
}

impl std::str::FromStr for ExecutionStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "optimized" => Ok(Self::Optimized),
            "portable" => Ok(Self::Portable),
            other => Err(anyhow::anyhow!("unknown execution strategy '{}'", other)),
        }
    }
}

/// Build the fallback chain for a model.
///
/// `stub://` models always use the stub backend. Real model files need the
/// `backend-tract` feature; without it the chain is empty and initialisation
/// fails with `ModelLoad`.
pub fn build_chain(model: &ModelLocation, strategies: &[ExecutionStrategy]) -> BackendChain {
    let mut chain = BackendChain::new();
    if model.is_stub() {
        chain.push(Box::new(StubLoader::new("stub", StubScript::new())));
        return chain;
    }

    for strategy in strategies {
        #[cfg(feature = "backend-tract")]
        {
            let kind = match strategy {
                ExecutionStrategy::Optimized => backends::TractStrategy::Optimized,
                ExecutionStrategy::Portable => backends::TractStrategy::Portable,
            };
            chain.push(Box::new(backends::TractLoader::new(kind)));
        }
        #[cfg(not(feature = "backend-tract"))]
        log::warn!(
            "strategy {:?} skipped: built without the backend-tract feature",
            strategy
        );
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_models_get_a_single_stub_strategy() {
        let chain = build_chain(
            &ModelLocation::new("stub://demo"),
            &[ExecutionStrategy::Optimized, ExecutionStrategy::Portable],
        );
        assert_eq!(chain.list(), vec!["stub".to_string()]);
    }

    #[cfg(not(feature = "backend-tract"))]
    #[test]
    fn real_models_need_tract() {
        let chain = build_chain(
            &ModelLocation::new("best.onnx"),
            &[ExecutionStrategy::Optimized],
        );
        assert!(chain.is_empty());
    }

    #[test]
    fn parses_strategy_names() {
        assert_eq!(
            "Optimized".parse::<ExecutionStrategy>().ok(),
            Some(ExecutionStrategy::Optimized)
        );
        assert!("gpu".parse::<ExecutionStrategy>().is_err());
    }
}
