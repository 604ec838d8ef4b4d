use crate::contracts::{Exporter, MultiviewPredictor, NormalPredictor, Reconstructor, Upscaler};

/// The model set of one worker process, bound to a compute device.
///
/// Built once when the worker starts and dropped when it exits. Every stage
/// receives it by reference; nothing else holds model state.
pub struct ModelZoo {
    pub device: String,
    pub upscaler: Box<dyn Upscaler>,
    pub multiview: Box<dyn MultiviewPredictor>,
    pub normals: Box<dyn NormalPredictor>,
    pub reconstructor: Box<dyn Reconstructor>,
    pub exporter: Box<dyn Exporter>,
}

impl std::fmt::Debug for ModelZoo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelZoo")
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}
