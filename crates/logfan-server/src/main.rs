use anyhow::Context;
use clap::Parser;
use logfan_server::server::{
    config::{CliArgs, ServerConfig},
    engine::{ControllerSettings, RunController},
    http::router,
    telemetry::init_telemetry,
};
use tokio::net::TcpListener;
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();

    let providers = init_telemetry(args.log_format)?;
    let config = ServerConfig::try_from(args)?;

    let controller = RunController::new(ControllerSettings {
        log_dir: config.log_dir.clone(),
        output_dir: config.output_dir.clone(),
    });
    let app = router(controller.clone(), config.defaults.clone());

    let listener = TcpListener::bind(&config.server_addr)
        .await
        .with_context(|| format!("binding {}", config.server_addr))?;
    log_startup_info(&config);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(controller))
        .await?;

    tracing::info!("Service shut down successfully");
    providers.shutdown();
    Ok(())
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting control plane on {} with full config: {:#?}",
            config.server_addr,
            config
        );
    } else {
        tracing::info!(
            "Starting control plane on {} (sources in {})",
            config.server_addr,
            config.log_dir.display()
        );
    }
}

async fn shutdown_signal(controller: RunController) {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, stopping the active run...");

    let report = controller.shutdown().await;
    if report.stopped {
        tracing::info!("{}", report.message());
    }
}
