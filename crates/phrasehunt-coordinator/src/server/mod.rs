//! Server-side components of the phrasehunt coordinator.
//!
//! ## Submodules
//!
//! - [`blocks`] - adaptive block sizing and lazy block generation.
//! - [`state`] - the block queue and agent registry state machine.
//! - [`service`] - per-connection protocol handling.
//! - [`sweeper`] - periodic stale-block reclaim, checkpointing and progress
//!   logs.
//! - [`config`] - CLI and environment configuration.
//! - [`telemetry`] - log subscriber and optional OpenTelemetry counters.
//!
//! [`Coordinator`] ties them together: it owns the single state mutex, the
//! shutdown token every connection watches, and the checkpoint and results
//! files.

pub mod blocks;
pub mod config;
pub mod service;
pub mod state;
pub mod sweeper;
pub mod telemetry;

use config::ServerConfig;
use num_bigint::BigUint;
use num_traits::Zero;
use parking_lot::Mutex;
use phrasehunt::{Checkpoint, FoundResult};
use state::CoordinatorState;
use std::{
    fs::OpenOptions,
    io::{self, Write},
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::net::TcpListener;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// How long connection handlers get to deliver `SHUTDOWN` before the server
/// stops waiting for them.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Coordinator {
    config: ServerConfig,
    state: Mutex<CoordinatorState>,
    shutdown: CancellationToken,
    shutdown_reason: OnceLock<String>,
    connections: AtomicU64,
    results_file: Mutex<()>,
}

impl core::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.config)
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// Builds the coordinator, resuming from the configured checkpoint when it
    /// describes the same search.
    pub fn new(config: ServerConfig) -> Self {
        let resume_from = resume_point(&config);
        let state = CoordinatorState::new(
            config.session.clone(),
            &config.sizing,
            config.queue_depth,
            resume_from,
        );
        tracing::info!(
            "Search space holds {} candidates in blocks of {}",
            state.total(),
            state.block_size()
        );
        Self {
            config,
            state: Mutex::new(state),
            shutdown: CancellationToken::new(),
            shutdown_reason: OnceLock::new(),
            connections: AtomicU64::new(0),
            results_file: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Runs `f` with the state locked.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut CoordinatorState) -> R) -> R {
        f(&mut self.state.lock())
    }

    pub(crate) fn next_connection_id(&self) -> u64 {
        self.connections.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Asks every connection to send `SHUTDOWN` and stops accepting. The
    /// first reason given wins.
    pub fn shutdown(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.shutdown_reason.set(reason.clone()).is_ok() {
            tracing::info!("Shutting down: {reason}");
        }
        self.shutdown.cancel();
    }

    pub fn shutdown_reason(&self) -> Option<&str> {
        self.shutdown_reason.get().map(String::as_str)
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().is_finished()
    }

    /// Writes the current low-water checkpoint, if a path is configured.
    /// Failures are logged; the next write supersedes them.
    pub fn persist_checkpoint(&self) -> Option<Checkpoint> {
        let path = self.config.checkpoint_path.as_ref()?;
        let checkpoint = self.state.lock().checkpoint();
        match checkpoint.save(path) {
            Ok(()) => {
                tracing::debug!(
                    "Checkpoint saved at {} of {}",
                    checkpoint.current_index,
                    checkpoint.total_index
                );
                Some(checkpoint)
            }
            Err(e) => {
                tracing::error!("Failed to write checkpoint {}: {e}", path.display());
                None
            }
        }
    }

    /// Appends a match to the results file as one JSON line.
    pub fn append_result(&self, result: &FoundResult) {
        let Some(path) = self.config.results_path.as_ref() else {
            return;
        };
        let _guard = self.results_file.lock();
        let written = serde_json::to_string(result)
            .map_err(io::Error::from)
            .and_then(|line| {
                let mut file = OpenOptions::new().create(true).append(true).open(path)?;
                writeln!(file, "{line}")?;
                file.sync_data()
            });
        if let Err(e) = written {
            tracing::error!("Failed to append result to {}: {e}", path.display());
        }
    }

    /// Accepts agents until shutdown, then waits briefly for handlers to say
    /// goodbye and writes a final checkpoint.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> io::Result<()> {
        let tracker = TaskTracker::new();
        tracker.spawn(sweeper::run(Arc::clone(&self)));

        if self.is_finished() && self.config.exit_on_complete {
            self.shutdown("search space already exhausted");
        }

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracker.spawn(service::handler::handle_connection(
                            Arc::clone(&self),
                            stream,
                            peer,
                        ));
                    }
                    Err(e) => {
                        tracing::warn!("Failed to accept connection: {e}");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }

        tracker.close();
        if tokio::time::timeout(DRAIN_TIMEOUT, tracker.wait()).await.is_err() {
            tracing::warn!("Some connections did not close within {DRAIN_TIMEOUT:?}");
        }
        self.persist_checkpoint();
        self.log_results();
        Ok(())
    }

    fn log_results(&self) {
        let state = self.state.lock();
        let snapshot = state.snapshot();
        tracing::info!(
            "Scanned {} of {} candidates; {} match(es)",
            snapshot.low_water,
            snapshot.total,
            snapshot.found
        );
        for result in state.results() {
            tracing::info!(
                "Match at index {}: {} -> {}",
                result.index,
                result.phrase,
                result.derived_address
            );
        }
    }
}

fn resume_point(config: &ServerConfig) -> BigUint {
    let Some(path) = config.checkpoint_path.as_ref().filter(|_| config.resume) else {
        return BigUint::zero();
    };
    let checkpoint = match Checkpoint::load(path) {
        Ok(Some(checkpoint)) => checkpoint,
        Ok(None) => return BigUint::zero(),
        Err(e) => {
            tracing::warn!("Ignoring unreadable checkpoint {}: {e}", path.display());
            return BigUint::zero();
        }
    };
    let session = &config.session;
    if !checkpoint.matches(
        &session.target_address,
        session.seed_pattern.as_deref(),
        session.word_count,
        session.full_search,
        &session.total_combinations,
    ) {
        tracing::info!("Checkpoint {} belongs to another search", path.display());
        return BigUint::zero();
    }
    tracing::info!(
        "Resuming from checkpoint at {} of {}",
        checkpoint.current_index,
        checkpoint.total_index
    );
    checkpoint.current_index
}
