//! OpenAI-shaped completion records and the mapping between them and a
//! [`GenerationRequest`].

use serde::{Deserialize, Serialize};

use crate::{
    error::ServiceError,
    model::{CompletionResult, FinishReason, GenerationRequest},
};

pub const COMPLETION_ID: &str = "cmpl-local";
pub const CHAT_COMPLETION_ID: &str = "chatcmpl-local";
pub const MODEL_CREATED: u64 = 1677610602;
pub const CHAT_STOP_SEQUENCES: [&str; 2] = ["User:", "System:"];

const ASSISTANT_CUE: &str = "Assistant: ";

fn default_max_tokens() -> usize {
    512
}

fn default_temperature() -> f64 {
    0.8
}

fn default_top_p() -> f64 {
    0.95
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    #[serde(flatten)]
    pub params: SamplingParams,
    #[serde(default)]
    pub echo: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    /// Any other role string; accepted but left out of the prompt.
    #[serde(other)]
    Unknown,
}

impl Role {
    pub fn label(self) -> Option<&'static str> {
        match self {
            Role::System => Some("System"),
            Role::User => Some("User"),
            Role::Assistant => Some("Assistant"),
            Role::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(flatten)]
    pub params: SamplingParams,
}

/// Generation knobs shared by both request shapes.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct SamplingParams {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
        }
    }
}

impl SamplingParams {
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.max_tokens == 0 {
            return Err(ServiceError::validation(
                "max_tokens",
                "must be greater than 0",
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ServiceError::validation(
                "temperature",
                "must be within [0, 2]",
            ));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(ServiceError::validation("top_p", "must be within [0, 1]"));
        }
        Ok(())
    }
}

impl CompletionRequest {
    pub fn into_generation(self) -> Result<GenerationRequest, ServiceError> {
        self.params.validate()?;
        Ok(GenerationRequest {
            prompt: self.prompt,
            max_tokens: self.params.max_tokens,
            temperature: self.params.temperature,
            top_p: self.params.top_p,
            echo: self.echo,
            stop: Vec::new(),
        })
    }
}

impl ChatCompletionRequest {
    pub fn into_generation(self) -> Result<GenerationRequest, ServiceError> {
        self.params.validate()?;
        Ok(GenerationRequest {
            prompt: build_chat_prompt(&self.messages),
            max_tokens: self.params.max_tokens,
            temperature: self.params.temperature,
            top_p: self.params.top_p,
            echo: false,
            stop: CHAT_STOP_SEQUENCES.iter().map(|s| s.to_string()).collect(),
        })
    }
}

/// Flattens a conversation into `"<Role>: <content>\n"` lines followed by the
/// assistant cue. Messages with an unknown role are skipped.
pub fn build_chat_prompt(messages: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    for message in messages {
        let Some(label) = message.role.label() else {
            continue;
        };
        prompt.push_str(label);
        prompt.push_str(": ");
        prompt.push_str(&message.content);
        prompt.push('\n');
    }
    prompt.push_str(ASSISTANT_CUE);
    prompt
}

#[derive(Debug, Serialize)]
pub struct ModelCard {
    pub id: String,
    pub object: &'static str,
    pub created: u64,
    pub owned_by: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ModelList {
    pub object: &'static str,
    pub data: Vec<ModelCard>,
}

impl ModelList {
    pub fn single(model_id: &str) -> Self {
        Self {
            object: "list",
            data: vec![ModelCard {
                id: model_id.to_string(),
                object: "model",
                created: MODEL_CREATED,
                owned_by: "local",
            }],
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CompletionChoice {
    pub text: String,
    pub index: u32,
    pub finish_reason: FinishReason,
}

#[derive(Debug, Serialize)]
pub struct CompletionResponse {
    pub id: &'static str,
    pub object: &'static str,
    pub model: String,
    pub choices: Vec<CompletionChoice>,
}

impl CompletionResponse {
    pub fn new(model: &str, result: CompletionResult) -> Self {
        Self {
            id: COMPLETION_ID,
            object: "text_completion",
            model: model.to_string(),
            choices: vec![CompletionChoice {
                text: result.text,
                index: 0,
                finish_reason: result.finish_reason,
            }],
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: FinishReason,
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionResponse {
    pub id: &'static str,
    pub object: &'static str,
    pub model: String,
    pub choices: Vec<ChatChoice>,
}

impl ChatCompletionResponse {
    pub fn new(model: &str, result: CompletionResult) -> Self {
        Self {
            id: CHAT_COMPLETION_ID,
            object: "chat.completion",
            model: model.to_string(),
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessage {
                    role: Role::Assistant,
                    content: result.text.trim().to_string(),
                },
                finish_reason: result.finish_reason,
            }],
        }
    }
}
