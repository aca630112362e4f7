pub mod completion;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod model;
pub mod server;
pub mod smoke;
pub mod telemetry;

pub use completion::{ChatCompletionRequest, ChatMessage, CompletionRequest, Role, SamplingParams};
pub use config::AppConfig;
pub use error::ServiceError;
pub use model::{CompletionBackend, CompletionResult, FinishReason, GenerationRequest, ModelHandle};
pub use server::build_router;
