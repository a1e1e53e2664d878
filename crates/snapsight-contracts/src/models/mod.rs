mod registry;
mod selectors;

pub use registry::{ModelRegistry, ModelSpec, DEFAULT_MODEL, VISION};
pub use selectors::{ModelSelection, ModelSelector};
