//! Accelerator availability probe.
//!
//! Best effort: every check reports pass/fail with a human-readable detail
//! and never aborts the run.

use std::process::Command;

use serde::Serialize;

use crate::config::AppConfig;

#[derive(Debug, Clone, Serialize)]
pub struct Check {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

impl Check {
    fn pass(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            passed: true,
            detail: detail.into(),
        }
    }

    fn fail(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            passed: false,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticReport {
    pub checks: Vec<Check>,
}

impl DiagnosticReport {
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn passed(&self, name: &str) -> bool {
        self.checks.iter().any(|c| c.name == name && c.passed)
    }

    pub fn push(&mut self, check: Check) {
        self.checks.push(check);
    }

    /// Hints for every failed check, in check order.
    pub fn recommendations(&self) -> Vec<&'static str> {
        self.checks
            .iter()
            .filter(|c| !c.passed)
            .flat_map(|c| recommendations_for(c.name))
            .copied()
            .collect()
    }
}

pub fn run(config: &AppConfig) -> DiagnosticReport {
    let mut report = DiagnosticReport { checks: Vec::new() };
    report.push(check_nvcc());
    report.push(check_nvidia_smi());
    report.push(check_libtorch());
    report.push(check_model_file(config));
    report
}

pub fn generation_check(passed: bool, detail: impl Into<String>) -> Check {
    if passed {
        Check::pass("generation", detail)
    } else {
        Check::fail("generation", detail)
    }
}

fn check_nvcc() -> Check {
    match Command::new("nvcc").arg("--version").output() {
        Ok(output) if output.status.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let version = stdout
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("version unknown")
                .trim()
                .to_string();
            Check::pass("nvcc", version)
        }
        Ok(_) => Check::fail("nvcc", "CUDA compiler not found"),
        Err(_) => Check::fail("nvcc", "nvcc not found in PATH"),
    }
}

fn check_nvidia_smi() -> Check {
    match Command::new("nvidia-smi").output() {
        Ok(output) if output.status.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            match parse_cuda_version(&stdout) {
                Some(version) => Check::pass("nvidia-smi", format!("CUDA runtime {version}")),
                None => Check::pass("nvidia-smi", "driver responding"),
            }
        }
        Ok(_) => Check::fail("nvidia-smi", "nvidia-smi failed"),
        Err(_) => Check::fail("nvidia-smi", "nvidia-smi not found"),
    }
}

#[cfg(feature = "tch-backend")]
fn check_libtorch() -> Check {
    if tch::Cuda::is_available() {
        Check::pass(
            "libtorch-cuda",
            format!(
                "{} device(s), cuDNN {}",
                tch::Cuda::device_count(),
                if tch::Cuda::cudnn_is_available() {
                    "available"
                } else {
                    "missing"
                }
            ),
        )
    } else {
        Check::fail("libtorch-cuda", "libtorch reports no CUDA device")
    }
}

#[cfg(not(feature = "tch-backend"))]
fn check_libtorch() -> Check {
    Check::fail("libtorch-cuda", "built without the tch backend")
}

fn check_model_file(config: &AppConfig) -> Check {
    match std::fs::metadata(&config.model_path) {
        Ok(meta) if meta.is_file() => Check::pass(
            "model-file",
            format!(
                "{} ({} MiB)",
                config.model_path.display(),
                meta.len() / 1024 / 1024
            ),
        ),
        _ => Check::fail(
            "model-file",
            format!("no model file at {}", config.model_path.display()),
        ),
    }
}

/// Pulls the version out of the `CUDA Version: 12.2` banner of nvidia-smi.
pub fn parse_cuda_version(stdout: &str) -> Option<String> {
    let line = stdout.lines().find(|l| l.contains("CUDA Version"))?;
    let rest = line.split("CUDA Version:").nth(1)?;
    rest.split_whitespace()
        .next()
        .map(|v| v.trim_end_matches('|').to_string())
        .filter(|v| !v.is_empty())
}

fn recommendations_for(name: &str) -> &'static [&'static str] {
    match name {
        "nvcc" | "nvidia-smi" => &[
            "Install the NVIDIA CUDA toolkit",
            "Ensure nvidia-smi works",
            "Check that GPU drivers are installed",
        ],
        "libtorch-cuda" => &[
            "Use a CUDA build of libtorch (set LIBTORCH or TORCH_CUDA_VERSION before building)",
            "Set DEVICE=cuda to run the server on the GPU",
        ],
        "model-file" => &["Export a TorchScript model and point MODEL_PATH at it"],
        "generation" => &["Check TOKENIZER_PATH and the server logs for the load error"],
        _ => &[],
    }
}
