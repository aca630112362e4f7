use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};

#[cfg(feature = "tch-backend")]
use tch::Device;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub model_id: String,
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub context_length: usize,
    pub threads: usize,
    pub eos_token: Option<String>,
    pub static_page_path: PathBuf,
    pub cors_allow_any: bool,
    #[cfg(feature = "tch-backend")]
    pub device: Device,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup so tests don't have to
    /// touch the process environment.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen_addr = lookup("SERVER_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8000".into())
            .parse()
            .unwrap_or_else(|_| SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8000));

        let model_id = lookup("MODEL_ID").unwrap_or_else(|| "mistral-7b-instruct".to_string());

        let model_path = PathBuf::from(
            lookup("MODEL_PATH").unwrap_or_else(|| "models/mistral-7b-instruct.ts".to_string()),
        );
        let tokenizer_path = PathBuf::from(
            lookup("TOKENIZER_PATH").unwrap_or_else(|| "models/tokenizer.json".to_string()),
        );

        let context_length = lookup("N_CTX")
            .and_then(|v| v.parse().ok())
            .filter(|&n: &usize| n > 0)
            .unwrap_or(2048);
        let threads = lookup("N_THREADS")
            .and_then(|v| v.parse().ok())
            .filter(|&n: &usize| n > 0)
            .unwrap_or(4);
        let eos_token = lookup("EOS_TOKEN").filter(|v| !v.is_empty());

        let static_page_path = PathBuf::from(
            lookup("STATIC_PAGE_PATH").unwrap_or_else(|| "static/chatbot.html".to_string()),
        );
        let cors_allow_any = lookup("CORS_ALLOW_ANY")
            .map(|v| parse_flag(&v))
            .unwrap_or(true);

        #[cfg(feature = "tch-backend")]
        let device = {
            let raw = lookup("DEVICE").unwrap_or_else(|| "cpu".into());
            parse_device(&raw)
        };

        Ok(Self {
            listen_addr,
            model_id,
            model_path,
            tokenizer_path,
            context_length,
            threads,
            eos_token,
            static_page_path,
            cors_allow_any,
            #[cfg(feature = "tch-backend")]
            device,
        })
    }
}

fn parse_flag(raw: &str) -> bool {
    !matches!(
        raw.trim().to_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}

#[cfg(feature = "tch-backend")]
fn parse_device(raw: &str) -> Device {
    let lower = raw.to_lowercase();
    if lower.starts_with("cuda") {
        let idx = lower
            .split(':')
            .nth(1)
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(0);
        if tch::Cuda::is_available() {
            Device::Cuda(idx)
        } else {
            tracing::warn!(requested = %raw, "CUDA not available, falling back to CPU");
            Device::Cpu
        }
    } else {
        Device::Cpu
    }
}
