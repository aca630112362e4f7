use std::sync::Arc;

use tokio::{net::TcpListener, signal};

use llama_server::{AppConfig, build_router, model, telemetry::init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!(
        model = %config.model_path.display(),
        n_ctx = config.context_length,
        n_threads = config.threads,
        "loading model"
    );

    let handle = model::load_handle(config.as_ref())?;
    let router = build_router(config.clone(), handle.clone());

    let listener = TcpListener::bind(config.listen_addr).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "Llama Server ready");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    handle.release();
    tracing::info!("server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        tracing::error!(%err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("received shutdown signal");
}
