//! One-off generation against the configured model, or a timed smoke run.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use llama_server::{
    AppConfig, CompletionRequest, SamplingParams, model,
    smoke::{self, fallback_samples, load_samples_from_path},
    telemetry::init_tracing,
};

#[derive(Debug, Parser)]
#[command(name = "generate", about = "Run the local model without the HTTP server")]
struct Cli {
    /// Prompt to complete.
    #[arg(default_value = "Once upon a time,")]
    prompt: String,

    #[arg(long, default_value_t = 512)]
    max_tokens: usize,

    #[arg(long, default_value_t = 0.8)]
    temperature: f64,

    #[arg(long, default_value_t = 0.95)]
    top_p: f64,

    /// Include the prompt in the printed text.
    #[arg(long)]
    echo: bool,

    /// Run the smoke prompt set instead of a single prompt.
    #[arg(long)]
    smoke: bool,

    /// JSON array of `{"prompt": ...}` objects for the smoke run.
    #[arg(long, requires = "smoke")]
    prompts_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = AppConfig::from_env()?;
    let handle = model::load_handle(&config)?;

    let output = if cli.smoke {
        let samples = match cli.prompts_file.as_deref() {
            Some(path) => load_samples_from_path(path)
                .with_context(|| format!("reading {}", path.display()))?,
            None => fallback_samples(),
        };
        let report = smoke::run_smoke(&handle, smoke::default_params(), samples).await?;
        serde_json::to_string_pretty(&report)?
    } else {
        let request = CompletionRequest {
            prompt: cli.prompt,
            params: SamplingParams {
                max_tokens: cli.max_tokens,
                temperature: cli.temperature,
                top_p: cli.top_p,
            },
            echo: cli.echo,
        };
        let result = handle.complete(request.into_generation()?).await?;
        serde_json::to_string_pretty(&result)?
    };

    println!("{output}");
    handle.release();
    Ok(())
}
