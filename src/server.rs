use std::{path::Path, sync::Arc};

use axum::{
    Json, Router,
    extract::{FromRequest, State},
    response::Html,
    routing::{get, post},
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::{
    completion::{
        ChatCompletionRequest, ChatCompletionResponse, CompletionRequest, CompletionResponse,
        ModelList,
    },
    config::AppConfig,
    error::ServiceError,
    model::ModelHandle,
};

pub const HEALTH_MESSAGE: &str = "Llama Server is running";
pub const FALLBACK_PAGE: &str = "<h1>Chatbot not found</h1><p>Please ensure chatbot.html exists in the same directory.</p>";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub model: ModelHandle,
}

/// JSON body extractor whose rejections use the service's `{"detail": ..}`
/// error shape.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ServiceError))]
pub struct ApiJson<T>(pub T);

#[derive(Serialize)]
struct HealthResponse {
    message: &'static str,
}

pub fn build_router(config: Arc<AppConfig>, model: ModelHandle) -> Router {
    let cors_allow_any = config.cors_allow_any;
    let state = AppState { config, model };

    let router = Router::new()
        .route("/", get(chatbot_page))
        .route("/health", get(health))
        .route("/v1/models", get(list_models))
        .route("/v1/completions", post(create_completion))
        .route("/v1/chat/completions", post(create_chat_completion))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if cors_allow_any {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

async fn chatbot_page(State(state): State<AppState>) -> Html<String> {
    Html(read_page(&state.config.static_page_path).await)
}

async fn read_page(path: &Path) -> String {
    match tokio::fs::read_to_string(path).await {
        Ok(page) => page,
        Err(err) => {
            warn!(path = %path.display(), %err, "static page unavailable, serving fallback");
            FALLBACK_PAGE.to_string()
        }
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        message: HEALTH_MESSAGE,
    })
}

async fn list_models(State(state): State<AppState>) -> Json<ModelList> {
    Json(ModelList::single(&state.config.model_id))
}

async fn create_completion(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<CompletionRequest>,
) -> Result<Json<CompletionResponse>, ServiceError> {
    let generation = request.into_generation()?;
    info!(
        prompt_len = generation.prompt.len(),
        max_tokens = generation.max_tokens,
        echo = generation.echo,
        "completion request"
    );

    let result = state.model.complete(generation).await?;
    Ok(Json(CompletionResponse::new(&state.config.model_id, result)))
}

async fn create_chat_completion(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ChatCompletionRequest>,
) -> Result<Json<ChatCompletionResponse>, ServiceError> {
    let messages = request.messages.len();
    let generation = request.into_generation()?;
    info!(
        messages,
        prompt_len = generation.prompt.len(),
        max_tokens = generation.max_tokens,
        "chat completion request"
    );

    let result = state.model.complete(generation).await?;
    Ok(Json(ChatCompletionResponse::new(
        &state.config.model_id,
        result,
    )))
}
