use std::{fs, path::Path, time::Instant};

use serde::Serialize;
use tracing::info;

use crate::{
    completion::SamplingParams,
    error::ServiceError,
    model::{FinishReason, GenerationRequest, ModelHandle},
};

#[derive(Debug, Clone, Serialize)]
pub struct SmokeSample {
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SampleReport {
    pub prompt: String,
    pub text: String,
    pub finish_reason: FinishReason,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SmokeReport {
    pub samples: Vec<SampleReport>,
    pub avg_latency_ms: f64,
}

pub fn default_params() -> SamplingParams {
    SamplingParams {
        max_tokens: 50,
        temperature: 0.7,
        ..SamplingParams::default()
    }
}

pub async fn run_smoke(
    handle: &ModelHandle,
    params: SamplingParams,
    samples: Vec<SmokeSample>,
) -> Result<SmokeReport, ServiceError> {
    if samples.is_empty() {
        return Err(ServiceError::validation(
            "samples",
            "at least one prompt is required",
        ));
    }
    params.validate()?;

    let total = samples.len();
    let mut reports = Vec::with_capacity(total);

    for (idx, sample) in samples.into_iter().enumerate() {
        let request = GenerationRequest {
            prompt: sample.prompt.clone(),
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            echo: false,
            stop: Vec::new(),
        };

        let start = Instant::now();
        let result = handle.complete(request).await?;
        let latency_ms = start.elapsed().as_millis() as u64;
        info!(sample = idx + 1, total, latency_ms, "smoke prompt done");

        reports.push(SampleReport {
            prompt: sample.prompt,
            text: result.text.trim().to_string(),
            finish_reason: result.finish_reason,
            latency_ms,
        });
    }

    let avg_latency_ms = mean(reports.iter().map(|r| r.latency_ms as f64));
    Ok(SmokeReport {
        samples: reports,
        avg_latency_ms,
    })
}

pub fn load_samples_from_path(path: &Path) -> Result<Vec<SmokeSample>, ServiceError> {
    let raw = fs::read_to_string(path)?;
    parse_samples(&raw)
}

fn parse_samples(raw: &str) -> Result<Vec<SmokeSample>, ServiceError> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| ServiceError::Config(format!("invalid prompts file: {e}")))?;

    match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(idx, item)| {
                item.get("prompt")
                    .and_then(|v| v.as_str())
                    .map(|prompt| SmokeSample {
                        prompt: prompt.to_string(),
                    })
                    .ok_or_else(|| {
                        ServiceError::Config(format!(
                            "prompts item {idx} missing string field 'prompt'"
                        ))
                    })
            })
            .collect(),
        _ => Err(ServiceError::Config(
            "prompts file must be a JSON array".into(),
        )),
    }
}

pub fn fallback_samples() -> Vec<SmokeSample> {
    [
        "The future of AI is",
        "Once upon a time",
        "Python is a programming language that",
    ]
    .into_iter()
    .map(|prompt| SmokeSample {
        prompt: prompt.to_string(),
    })
    .collect()
}

fn mean<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let mut count = 0usize;
    let mut acc = 0.0;
    for value in values {
        count += 1;
        acc += value;
    }
    if count == 0 { 0.0 } else { acc / count as f64 }
}
