use clap::Parser;
use phrasehunt::{Bip44Deriver, PhraseDeriver, SearchStatus};
use phrasehunt_agent::{
    agent::{AgentClient, AgentConfig},
    cli::{Cli, Command},
    local::{self, LocalConfig},
    telemetry::init_telemetry,
};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_telemetry()?;

    let deriver: Arc<dyn PhraseDeriver> = Arc::new(Bip44Deriver::new());
    match cli.command {
        Command::Connect(args) => connect(AgentConfig::try_from(args)?, deriver).await,
        Command::Local(args) => run_local(LocalConfig::try_from(args)?, deriver).await,
    }
}

async fn connect(config: AgentConfig, deriver: Arc<dyn PhraseDeriver>) -> anyhow::Result<()> {
    if cfg!(debug_assertions) {
        tracing::info!("Starting agent with full config: {config:#?}");
    } else {
        tracing::info!(
            "Starting agent {} for {} with {} thread(s)",
            config.agent_id,
            config.coordinator,
            config.threads
        );
    }

    let client = AgentClient::new(config, deriver);
    tokio::spawn(shutdown_signal(client.shutdown_token()));
    let summary = client.run().await?;

    tracing::info!(
        "Agent finished: {} block(s), {} candidates, {} match(es)",
        summary.blocks_completed,
        summary.processed,
        summary.found.len()
    );
    for result in &summary.found {
        tracing::warn!("Match at index {}: {}", result.index, result.phrase);
    }
    Ok(())
}

async fn run_local(config: LocalConfig, deriver: Arc<dyn PhraseDeriver>) -> anyhow::Result<()> {
    if cfg!(debug_assertions) {
        tracing::info!("Starting local search with full config: {config:#?}");
    }

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));
    let report = local::run(config, deriver, shutdown).await?;

    match report.outcome.status {
        SearchStatus::Completed => tracing::info!(
            "Search complete: {} candidates checked, {} match(es)",
            report.outcome.processed,
            report.found.len()
        ),
        SearchStatus::Cancelled => tracing::info!(
            "Search stopped at {} of {}; run again to resume",
            report.outcome.next_index,
            report.outcome.total
        ),
        SearchStatus::EmptySpace => tracing::warn!("The pattern matches no phrases"),
    }
    for result in &report.found {
        tracing::warn!("Match at index {}: {}", result.index, result.phrase);
    }
    Ok(())
}

async fn shutdown_signal(token: CancellationToken) {
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

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }
    token.cancel();
}
