use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use haven::engine::Engine;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("HAVEN_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    haven::observability::init(metrics_port);

    let port = std::env::var("HAVEN_PORT").unwrap_or_else(|_| "8080".into());
    let bind = std::env::var("HAVEN_BIND").unwrap_or_else(|_| "0.0.0.0".into());
    let data_dir = std::env::var("HAVEN_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let compact_threshold: u64 = std::env::var("HAVEN_COMPACT_THRESHOLD")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1000);

    // Ensure data directory exists
    std::fs::create_dir_all(&data_dir)?;

    let journal_path = PathBuf::from(&data_dir).join("haven.journal");
    let engine = Arc::new(Engine::new(journal_path)?);
    tokio::spawn(haven::maintenance::run_compactor(
        engine.clone(),
        compact_threshold,
    ));

    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("haven listening on {addr}");
    info!("  data_dir: {data_dir}");
    info!("  compact_threshold: {compact_threshold}");
    info!(
        "  metrics: {}",
        metrics_port.map_or("disabled".to_string(), |p| format!(
            "http://0.0.0.0:{p}/metrics"
        ))
    );

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight requests
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
        info!("shutdown signal received");
    };

    axum::serve(listener, haven::http::router(engine))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("haven stopped");
    Ok(())
}
