use std::{path::Path, sync::Arc};

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tower::ServiceExt;

use llama_server::{
    AppConfig, CompletionBackend, CompletionResult, FinishReason, GenerationRequest, ModelHandle,
    ServiceError, build_router, model::stop,
};

/// In-memory backend that replays a fixed continuation and records every
/// call it receives.
struct ScriptedBackend {
    continuation: String,
    calls: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedBackend {
    fn new(continuation: &str) -> Arc<Self> {
        Arc::new(Self {
            continuation: continuation.to_string(),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<GenerationRequest> {
        self.calls.lock().clone()
    }
}

impl CompletionBackend for ScriptedBackend {
    fn complete(&self, request: &GenerationRequest) -> Result<CompletionResult, ServiceError> {
        self.calls.lock().push(request.clone());
        if request.prompt.trim().is_empty() {
            return Err(ServiceError::Backend("prompt must not be empty".into()));
        }

        let mut text = self.continuation.clone();
        let finish_reason = if stop::truncate_at_stop(&mut text, &request.stop) {
            FinishReason::Stop
        } else {
            FinishReason::Length
        };
        if request.echo {
            text.insert_str(0, &request.prompt);
        }
        Ok(CompletionResult {
            text,
            finish_reason,
        })
    }
}

struct FailingBackend;

impl CompletionBackend for FailingBackend {
    fn complete(&self, _request: &GenerationRequest) -> Result<CompletionResult, ServiceError> {
        Err(ServiceError::Backend("CUDA error: out of memory".into()))
    }
}

fn config_with_page(page: &Path) -> Arc<AppConfig> {
    let page = page.display().to_string();
    let config = AppConfig::from_lookup(|key| match key {
        "STATIC_PAGE_PATH" => Some(page.clone()),
        _ => None,
    })
    .unwrap();
    Arc::new(config)
}

fn app(backend: Arc<dyn CompletionBackend>) -> Router {
    build_router(
        config_with_page(Path::new("does/not/exist.html")),
        ModelHandle::from_arc(backend),
    )
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

async fn get_json(router: Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let (status, body) = send(router, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn post_json(router: Router, uri: &str, payload: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap();
    let (status, body) = send(router, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn health_reports_liveness_even_when_backend_is_broken() {
    let (status, body) = get_json(app(Arc::new(FailingBackend)), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"message": "Llama Server is running"}));
}

#[tokio::test]
async fn models_listing_is_static() {
    let router = app(ScriptedBackend::new("x"));
    let (status, first) = get_json(router.clone(), "/v1/models").await;
    let (_, second) = get_json(router, "/v1/models").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(first, second);
    assert_eq!(
        first,
        json!({
            "object": "list",
            "data": [{
                "id": "mistral-7b-instruct",
                "object": "model",
                "created": 1677610602,
                "owned_by": "local"
            }]
        })
    );
}

#[tokio::test]
async fn completion_wraps_backend_output() {
    let backend = ScriptedBackend::new(" world, how are you");
    let (status, body) = post_json(
        app(backend.clone()),
        "/v1/completions",
        json!({"prompt": "Hello", "max_tokens": 5}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "cmpl-local");
    assert_eq!(body["object"], "text_completion");
    assert_eq!(body["model"], "mistral-7b-instruct");
    let choices = body["choices"].as_array().unwrap();
    assert_eq!(choices.len(), 1);
    assert_eq!(choices[0]["index"], 0);
    assert_eq!(choices[0]["text"], " world, how are you");
    assert_eq!(choices[0]["finish_reason"], "length");

    let calls = backend.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].prompt, "Hello");
    assert_eq!(calls[0].max_tokens, 5);
    assert_eq!(calls[0].temperature, 0.8);
    assert_eq!(calls[0].top_p, 0.95);
    assert!(!calls[0].echo);
    assert!(calls[0].stop.is_empty());
}

#[tokio::test]
async fn completion_forwards_echo() {
    let backend = ScriptedBackend::new(" there");
    let (status, body) = post_json(
        app(backend.clone()),
        "/v1/completions",
        json!({"prompt": "Hi", "echo": true, "temperature": 0.0, "top_p": 1.0}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["choices"][0]["text"], "Hi there");
    assert!(backend.calls()[0].echo);
}

#[tokio::test]
async fn chat_prompt_is_flattened_in_order() {
    let backend = ScriptedBackend::new(" Hello! Nice to meet you.\n");
    let (status, body) = post_json(
        app(backend.clone()),
        "/v1/chat/completions",
        json!({"messages": [{"role": "user", "content": "Hi"}]}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "chatcmpl-local");
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["choices"].as_array().unwrap().len(), 1);
    assert_eq!(body["choices"][0]["message"]["role"], "assistant");
    assert_eq!(
        body["choices"][0]["message"]["content"],
        "Hello! Nice to meet you."
    );

    let calls = backend.calls();
    assert_eq!(calls[0].prompt, "User: Hi\nAssistant: ");
    assert_eq!(calls[0].stop, vec!["User:", "System:"]);
}

#[tokio::test]
async fn chat_reply_stops_before_a_new_speaker_turn() {
    let backend = ScriptedBackend::new("Paris.\nUser: and Spain?\nSystem: note");
    let (status, body) = post_json(
        app(backend.clone()),
        "/v1/chat/completions",
        json!({"messages": [
            {"role": "system", "content": "Answer tersely."},
            {"role": "user", "content": "Capital of France?"}
        ]}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let content = body["choices"][0]["message"]["content"].as_str().unwrap();
    assert_eq!(content, "Paris.");
    assert!(!content.contains("User:"));
    assert!(!content.contains("System:"));
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    assert_eq!(
        backend.calls()[0].prompt,
        "System: Answer tersely.\nUser: Capital of France?\nAssistant: "
    );
}

#[tokio::test]
async fn chat_skips_messages_with_unknown_roles() {
    let backend = ScriptedBackend::new("Hello!");
    let (status, body) = post_json(
        app(backend.clone()),
        "/v1/chat/completions",
        json!({"messages": [
            {"role": "tool", "content": "x"},
            {"role": "user", "content": "Hi"}
        ]}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["choices"][0]["message"]["content"], "Hello!");
    assert_eq!(backend.calls()[0].prompt, "User: Hi\nAssistant: ");
}

#[tokio::test]
async fn empty_prompt_surfaces_backend_error() {
    let (status, body) = post_json(
        app(ScriptedBackend::new("x")),
        "/v1/completions",
        json!({"prompt": ""}),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"detail": "prompt must not be empty"}));
}

#[tokio::test]
async fn backend_failure_is_a_500_with_verbatim_detail() {
    let (status, body) = post_json(
        app(Arc::new(FailingBackend)),
        "/v1/chat/completions",
        json!({"messages": [{"role": "user", "content": "Hi"}]}),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["detail"], "CUDA error: out of memory");
}

#[tokio::test]
async fn out_of_range_params_never_reach_the_backend() {
    let backend = ScriptedBackend::new("x");
    let router = app(backend.clone());

    let (status, body) = post_json(
        router.clone(),
        "/v1/completions",
        json!({"prompt": "Hello", "temperature": 3.0}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["detail"], "temperature: must be within [0, 2]");

    let (status, _) = post_json(
        router.clone(),
        "/v1/chat/completions",
        json!({"messages": [], "top_p": 1.5}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = post_json(
        router,
        "/v1/completions",
        json!({"prompt": "Hello", "max_tokens": 0}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn malformed_bodies_are_client_errors() {
    let backend = ScriptedBackend::new("x");
    let router = app(backend.clone());

    let (status, body) =
        post_json(router.clone(), "/v1/completions", json!({"max_tokens": 5})).await;
    assert!(status.is_client_error());
    assert!(body["detail"].is_string());

    let (status, _) = post_json(
        router.clone(),
        "/v1/chat/completions",
        json!({"messages": [{"role": "user"}]}),
    )
    .await;
    assert!(status.is_client_error());

    let request = Request::builder()
        .method("POST")
        .uri("/v1/completions")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _) = send(router, request).await;
    assert!(status.is_client_error());

    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn root_serves_the_companion_page() {
    let dir = tempfile::tempdir().unwrap();
    let page = dir.path().join("chatbot.html");
    std::fs::write(&page, "<h1>chat</h1>").unwrap();

    let router = build_router(
        config_with_page(&page),
        ModelHandle::from_arc(ScriptedBackend::new("x")),
    );
    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let (status, body) = send(router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"<h1>chat</h1>");
}

#[tokio::test]
async fn root_falls_back_when_page_is_missing() {
    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let (status, body) = send(app(ScriptedBackend::new("x")), request).await;

    assert_eq!(status, StatusCode::OK);
    let html = String::from_utf8(body).unwrap();
    assert!(html.starts_with("<h1>Chatbot not found</h1>"));
}
