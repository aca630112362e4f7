use std::sync::Arc;
use std::time::Instant;

use tokio::task;
use tracing::{debug, info};

use crate::{
    error::ServiceError,
    model::{CompletionResult, GenerationRequest},
};

/// A loaded local model exposing one blocking generation call.
///
/// Implementations decide their own thread-safety; the handle never adds a
/// lock on top.
pub trait CompletionBackend: Send + Sync + 'static {
    fn complete(&self, request: &GenerationRequest) -> Result<CompletionResult, ServiceError>;
}

/// Process-wide handle built once at startup and injected into the router.
#[derive(Clone)]
pub struct ModelHandle {
    backend: Arc<dyn CompletionBackend>,
}

impl ModelHandle {
    pub fn new<B: CompletionBackend>(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    pub fn from_arc(backend: Arc<dyn CompletionBackend>) -> Self {
        Self { backend }
    }

    /// Runs the generation on the blocking pool. The call can't be cancelled
    /// once started.
    pub async fn complete(
        &self,
        request: GenerationRequest,
    ) -> Result<CompletionResult, ServiceError> {
        let backend = self.backend.clone();
        debug!(
            prompt_len = request.prompt.len(),
            max_tokens = request.max_tokens,
            temperature = request.temperature,
            top_p = request.top_p,
            "dispatching generation"
        );

        let start = Instant::now();
        let result = task::spawn_blocking(move || backend.complete(&request))
            .await
            .map_err(|err| ServiceError::Backend(format!("inference task failed: {err}")))??;

        info!(
            finish_reason = ?result.finish_reason,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "generation finished"
        );
        Ok(result)
    }

    /// Drops this reference to the backend. The model itself is freed once
    /// the last clone goes away.
    pub fn release(self) {
        let remaining = Arc::strong_count(&self.backend) - 1;
        drop(self.backend);
        info!(remaining, "model handle released");
    }
}
