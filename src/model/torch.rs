use std::{fs, path::Path};

use parking_lot::Mutex;
use tch::{Device, Kind, Tensor, no_grad};
use tokenizers::Tokenizer;
use tracing::info;

use crate::{
    config::AppConfig,
    error::ServiceError,
    model::{CompletionBackend, CompletionResult, FinishReason, GenerationRequest, stop},
};

const EOS_CANDIDATES: [&str; 2] = ["</s>", "<|endoftext|>"];

/// TorchScript causal LM driven token by token through its traced forward
/// pass.
pub struct TorchBackend {
    name: String,
    tokenizer: Tokenizer,
    device: Device,
    context_length: usize,
    eos_token_id: Option<i64>,
    size_bytes: u64,
    module: Mutex<tch::CModule>,
}

impl TorchBackend {
    pub fn load(config: &AppConfig) -> Result<Self, ServiceError> {
        tch::set_num_threads(config.threads as i32);

        let tokenizer = Tokenizer::from_file(config.tokenizer_path.as_path())
            .map_err(|e| ServiceError::Config(format!("tokenizer: {e}")))?;
        let eos_token_id = resolve_eos(&tokenizer, config.eos_token.as_deref());

        let backend = Self::from_module(
            &config.model_id,
            &config.model_path,
            tokenizer,
            config.device,
            config.context_length,
            eos_token_id,
        )?;

        info!(
            model = %backend.name,
            size_bytes = backend.size_bytes,
            n_ctx = backend.context_length,
            n_threads = config.threads,
            device = ?backend.device,
            "model loaded"
        );
        Ok(backend)
    }

    fn from_module(
        name: &str,
        module_path: &Path,
        tokenizer: Tokenizer,
        device: Device,
        context_length: usize,
        eos_token_id: Option<i64>,
    ) -> Result<Self, ServiceError> {
        if !module_path.exists() {
            return Err(ServiceError::Config(format!(
                "model artifact missing: {}",
                module_path.display()
            )));
        }
        let size_bytes = fs::metadata(module_path)?.len();
        let mut module = tch::CModule::load_on_device(module_path, device)
            .map_err(|e| ServiceError::Config(e.to_string()))?;
        module.set_eval();

        Ok(Self {
            name: name.to_string(),
            tokenizer,
            device,
            context_length,
            eos_token_id,
            size_bytes,
            module: Mutex::new(module),
        })
    }

    fn forward_last_logits(
        &self,
        module: &tch::CModule,
        input_ids: &[i64],
    ) -> Result<Tensor, ServiceError> {
        let input_tensor = Tensor::from_slice(input_ids)
            .reshape([1, input_ids.len() as i64])
            .to(self.device);

        // Traced models return either bare logits or a (logits, past) tuple.
        let output = module
            .forward_is(&[tch::IValue::Tensor(input_tensor)])
            .map_err(|e| ServiceError::Backend(e.to_string()))?;
        let logits = match output {
            tch::IValue::Tensor(t) => t,
            tch::IValue::Tuple(ref tuple) if !tuple.is_empty() => match &tuple[0] {
                tch::IValue::Tensor(t) => t.shallow_clone(),
                _ => {
                    return Err(ServiceError::Backend(
                        "expected tensor as first tuple element".into(),
                    ));
                }
            },
            _ => return Err(ServiceError::Backend("unexpected model output format".into())),
        };

        // [1, seq_len, vocab] -> [vocab]
        Ok(logits.select(1, -1).squeeze().to_kind(Kind::Float))
    }

    fn decode(&self, ids: &[i64]) -> Result<String, ServiceError> {
        let ids: Vec<u32> = ids.iter().map(|&id| id as u32).collect();
        self.tokenizer
            .decode(&ids, true)
            .map_err(|e| ServiceError::Backend(e.to_string()))
    }
}

impl CompletionBackend for TorchBackend {
    fn complete(&self, request: &GenerationRequest) -> Result<CompletionResult, ServiceError> {
        if request.prompt.trim().is_empty() {
            return Err(ServiceError::Backend("prompt must not be empty".into()));
        }

        let encoding = self
            .tokenizer
            .encode(request.prompt.as_str(), true)
            .map_err(|e| ServiceError::Backend(e.to_string()))?;
        let mut input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let prompt_len = input_ids.len();
        let max_tokens = token_budget(prompt_len, request.max_tokens, self.context_length)?;

        let mut text = String::new();
        let mut finish_reason = FinishReason::Length;

        no_grad(|| {
            let module = self.module.lock();

            for _ in 0..max_tokens {
                let logits = self.forward_last_logits(&module, &input_ids)?;
                let next = sample_next(&logits, request.temperature, request.top_p)?;

                if Some(next) == self.eos_token_id {
                    finish_reason = FinishReason::Stop;
                    break;
                }
                input_ids.push(next);

                text = self.decode(&input_ids[prompt_len..])?;
                if stop::truncate_at_stop(&mut text, &request.stop) {
                    finish_reason = FinishReason::Stop;
                    break;
                }
            }

            Ok::<(), ServiceError>(())
        })?;

        if request.echo {
            text.insert_str(0, &request.prompt);
        }

        Ok(CompletionResult {
            text,
            finish_reason,
        })
    }
}

fn resolve_eos(tokenizer: &Tokenizer, explicit: Option<&str>) -> Option<i64> {
    let id = match explicit {
        Some(token) => tokenizer.token_to_id(token),
        None => EOS_CANDIDATES
            .iter()
            .find_map(|token| tokenizer.token_to_id(token)),
    };
    id.map(i64::from)
}

/// Tokens left for generation once the prompt is in the context window.
fn token_budget(
    prompt_len: usize,
    max_tokens: usize,
    context_length: usize,
) -> Result<usize, ServiceError> {
    if prompt_len >= context_length {
        return Err(ServiceError::Backend(format!(
            "Requested tokens ({prompt_len}) exceed context window of {context_length}"
        )));
    }
    Ok(max_tokens.min(context_length - prompt_len))
}

/// Greedy at temperature 0, otherwise nucleus sampling over the
/// temperature-scaled distribution.
fn sample_next(logits: &Tensor, temperature: f64, top_p: f64) -> Result<i64, ServiceError> {
    let backend_err = |e: tch::TchError| ServiceError::Backend(format!("sampling failed: {e}"));

    // Scaling by a denormal temperature overflows the logits to inf.
    if temperature < f64::EPSILON {
        return logits
            .f_argmax(0, false)
            .and_then(|t| t.f_int64_value(&[]))
            .map_err(backend_err);
    }

    let probs = (logits / temperature).softmax(-1, Kind::Float);
    let (sorted, indices) = probs.sort(-1, true);
    let cumulative = sorted.cumsum(-1, Kind::Float);
    // Keep a token while the mass before it is still under top_p; the most
    // likely token always survives.
    let outside = (&cumulative - &sorted).gt(top_p);
    let nucleus = sorted.masked_fill(&outside, 0.0);
    let choice = nucleus.f_multinomial(1, false).map_err(backend_err)?;
    indices
        .f_gather(-1, &choice, false)
        .and_then(|t| t.f_int64_value(&[0]))
        .map_err(backend_err)
}
