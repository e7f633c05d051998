use std::sync::Arc;

use log::info;

use deepmed_core::{RequestPipeline, ServerConfig};
use deepmed_server::http;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::load()?;
    let bind_addr = config.bind_addr;
    info!(
        "starting deepmed server: bind_addr={} max_concurrent={} max_rounds={} llm={}",
        bind_addr, config.max_concurrent_requests, config.max_rounds, config.llm.base_url
    );

    let pipeline = Arc::new(RequestPipeline::new(config));
    let app = http::router(pipeline);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("deepmed server listening on {} (Ctrl+C/SIGTERM to stop)", bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("deepmed server stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let ctrl_c = tokio::signal::ctrl_c();
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to listen for SIGTERM");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for Ctrl+C");
    }
}
