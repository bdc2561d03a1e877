use clap::Parser;
use phrasehunt_coordinator::server::{
    Coordinator,
    config::{CliArgs, ServerConfig},
    telemetry::init_telemetry,
};
use std::sync::Arc;
use tokio::{net::TcpListener, signal};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let providers = init_telemetry()?;
    let config = ServerConfig::try_from(args)?;

    let listener = TcpListener::bind(&config.listen_addr).await?;
    log_startup_info(&config);

    let coordinator = Arc::new(Coordinator::new(config));
    tokio::spawn(shutdown_signal(Arc::clone(&coordinator)));
    coordinator.serve(listener).await?;

    tracing::info!("Coordinator shut down");
    providers.shutdown();
    Ok(())
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Listening on {} with full config: {:#?}",
            config.listen_addr,
            config
        );
    } else {
        tracing::info!(
            "Listening on {} for target {} ({} words, full search: {})",
            config.listen_addr,
            config.session.target_address,
            config.session.word_count,
            config.session.full_search
        );
    }
}

async fn shutdown_signal(coordinator: Arc<Coordinator>) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    let token = coordinator.shutdown_token();
    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
        () = token.cancelled() => return,
    }
    coordinator.shutdown("coordinator stopped by signal");
}
