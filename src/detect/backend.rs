use anyhow::Result;

use super::model::ModelLocation;

/// A loaded detector.
///
/// Input is the planar `1 x 3 x S x S` float tensor produced by the inference
/// channel's preprocessing; output is the flattened `[1, N, 6]` post-NMS
/// tensor. Backends run on the inference worker thread only.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Side length S of the square input.
    fn input_size(&self) -> u32;

    /// Run the model on one tensor.
    fn detect(&mut self, tensor: &[f32]) -> Result<Vec<f32>>;

    /// Optional warm-up hook, called once after loading.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// One execution strategy in the ordered fallback list.
///
/// `load` is the uniform `tryInitialize(backend) -> Result` contract: it
/// either returns a ready backend or an error describing why this strategy
/// cannot run the model.
pub trait BackendLoader: Send {
    fn name(&self) -> &str;

    fn load(&self, model: &ModelLocation, input_size: u32) -> Result<Box<dyn DetectorBackend>>;
}
