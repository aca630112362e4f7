//! Prints whether the GPU stack is usable for local inference.

use std::process::ExitCode;

use llama_server::{
    AppConfig, GenerationRequest,
    diagnostics::{self, DiagnosticReport},
    model,
    telemetry::init_tracing,
};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    init_tracing();
    let config = AppConfig::from_env()?;

    println!("GPU support diagnostic");
    println!("{}", "=".repeat(40));

    let mut report = diagnostics::run(&config);
    if report.passed("libtorch-cuda") && report.passed("model-file") {
        report.push(generation_check(&config).await);
    }

    print_report(&report);
    println!();
    println!("Environment: {} / {}", std::env::consts::OS, std::env::consts::ARCH);
    println!("Working directory: {}", std::env::current_dir()?.display());

    Ok(if report.all_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn generation_check(config: &AppConfig) -> diagnostics::Check {
    let handle = match model::load_handle(config) {
        Ok(handle) => handle,
        Err(err) => return diagnostics::generation_check(false, format!("load failed: {err}")),
    };

    let request = GenerationRequest {
        prompt: "Hello".into(),
        max_tokens: 5,
        temperature: 0.8,
        top_p: 0.95,
        echo: false,
        stop: Vec::new(),
    };
    let check = match handle.complete(request).await {
        Ok(result) => diagnostics::generation_check(true, result.text.trim().to_string()),
        Err(err) => diagnostics::generation_check(false, err.to_string()),
    };
    handle.release();
    check
}

fn print_report(report: &DiagnosticReport) {
    for check in &report.checks {
        let mark = if check.passed { "ok  " } else { "FAIL" };
        println!("[{mark}] {:<14} {}", check.name, check.detail);
    }

    let hints = report.recommendations();
    if hints.is_empty() {
        println!("\nAll checks passed, the GPU should be used.");
    } else {
        println!("\nRecommendations:");
        for hint in hints {
            println!("- {hint}");
        }
    }
}
