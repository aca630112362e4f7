mod handle;
pub mod stop;
mod types;

#[cfg(feature = "tch-backend")]
mod torch;

pub use handle::{CompletionBackend, ModelHandle};
#[cfg(feature = "tch-backend")]
pub use torch::TorchBackend;
pub use types::{CompletionResult, FinishReason, GenerationRequest};

use crate::config::AppConfig;

/// Loads the configured backend once.
#[cfg(feature = "tch-backend")]
pub fn load_handle(config: &AppConfig) -> anyhow::Result<ModelHandle> {
    Ok(ModelHandle::new(TorchBackend::load(config)?))
}

#[cfg(not(feature = "tch-backend"))]
pub fn load_handle(_config: &AppConfig) -> anyhow::Result<ModelHandle> {
    anyhow::bail!("built without an inference backend; enable the `tch-backend` feature")
}
