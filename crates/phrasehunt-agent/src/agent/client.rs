//! The agent's main loop.
//!
//! [`AgentClient::run`] keeps one connection alive at a time. Each
//! connection registers with `HELLO`, rebuilds the coordinator's search space
//! from the `HELLO_ACK` session, then multiplexes four sources in one
//! `select!`:
//!
//! - the shutdown token,
//! - messages from the coordinator,
//! - updates from the running block,
//! - the heartbeat and task-poll timers.
//!
//! Any I/O failure ends the connection; the running block is stopped (its
//! local checkpoint kept) and the client reconnects with exponential backoff.
//! The coordinator requeues the block on its side.

use super::{
    checkpoint::AgentCheckpoint,
    config::AgentConfig,
    connection::{self, Inbound, Link},
    error::{AgentError, Result},
    state::{AgentState, StateTracker},
    task::{BlockRun, BlockUpdate},
};
use num_bigint::BigUint;
use phrasehunt::{FoundResult, IndexRange, PhraseDeriver, SearchJob, SearchSpace};
use phrasehunt_proto::{Message, PROTOCOL_VERSION, ProtocolError, SessionInfo, unix_millis};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{
    sync::watch,
    time::{MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;

const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Totals across every connection of one [`AgentClient::run`].
#[derive(Clone, Debug, Default)]
pub struct RunSummary {
    pub blocks_completed: u64,
    pub processed: u64,
    pub found: Vec<FoundResult>,
    /// Reason given by the coordinator's `SHUTDOWN`, if it sent one.
    pub shutdown_reason: Option<String>,
}

/// How a connection ended without an error.
#[derive(Debug)]
enum Exit {
    /// The coordinator sent `SHUTDOWN`.
    Shutdown(Option<String>),
    /// Local shutdown requested.
    Stopped,
}

pub struct AgentClient {
    config: AgentConfig,
    deriver: Arc<dyn PhraseDeriver>,
    state: StateTracker,
    shutdown: CancellationToken,
}

impl core::fmt::Debug for AgentClient {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AgentClient")
            .field("agent_id", &self.config.agent_id)
            .field("coordinator", &self.config.coordinator)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

impl AgentClient {
    pub fn new(config: AgentConfig, deriver: Arc<dyn PhraseDeriver>) -> Self {
        Self {
            config,
            deriver,
            state: StateTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn state(&self) -> AgentState {
        self.state.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<AgentState> {
        self.state.subscribe()
    }

    /// Cancelling it makes [`Self::run`] stop the active block, say
    /// `GOODBYE` and return.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Works until the coordinator shuts the session down, the shutdown
    /// token fires, or reconnecting fails too often.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Unreachable`] after the configured number of
    /// consecutive failed attempts, or a fatal session error.
    pub async fn run(&self) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let mut failures = 0u32;

        loop {
            if self.shutdown.is_cancelled() {
                self.state.set(AgentState::Disconnected);
                return Ok(summary);
            }

            let mut registered = false;
            let result = self.run_connection(&mut summary, &mut registered).await;
            match result {
                Ok(exit) => {
                    self.state.set(AgentState::Disconnected);
                    if let Exit::Shutdown(reason) = exit {
                        tracing::info!(
                            "Coordinator ended the session: {}",
                            reason.as_deref().unwrap_or("no reason given")
                        );
                        summary.shutdown_reason = reason;
                    }
                    return Ok(summary);
                }
                Err(e) if e.is_fatal() => {
                    self.state.set(AgentState::Error);
                    tracing::error!("{e}");
                    return Err(e);
                }
                Err(e) => {
                    self.state.set(AgentState::Error);
                    failures = if registered { 1 } else { failures + 1 };
                    if failures > self.config.reconnect.attempts {
                        return Err(AgentError::Unreachable {
                            attempts: failures,
                            last: Box::new(e),
                        });
                    }
                    let delay = self.config.reconnect.delay(failures);
                    tracing::warn!(
                        "{e}; reconnecting in {delay:?} (attempt {failures}/{})",
                        self.config.reconnect.attempts
                    );
                    tokio::select! {
                        () = self.shutdown.cancelled() => {}
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn run_connection(&self, summary: &mut RunSummary, registered: &mut bool) -> Result<Exit> {
        let config = &self.config;
        self.state.set(AgentState::Connecting);
        let (link, mut inbound) = tokio::select! {
            () = self.shutdown.cancelled() => return Ok(Exit::Stopped),
            connected = connection::connect(&config.coordinator, config.connect_timeout) => connected?,
        };
        self.state.set(AgentState::Connected);
        tracing::info!("Connected to coordinator {}", config.coordinator);

        let (session, heartbeat_interval) = match self.register(&link, &mut inbound).await? {
            Registration::Accepted {
                session,
                heartbeat_interval,
            } => (session, heartbeat_interval),
            Registration::Shutdown(reason) => {
                link.close(CLOSE_GRACE).await;
                return Ok(Exit::Shutdown(reason));
            }
        };
        let job = Arc::new(self.build_job(&session)?);
        *registered = true;
        self.state.set(AgentState::Registered);
        tracing::info!(
            "Registered as {} for {} ({} candidates, {} word(s), full search: {})",
            config.agent_id,
            session.target_address,
            session.total_combinations,
            session.word_count,
            session.full_search
        );

        let mut conn = ConnectionLoop {
            client: self,
            link: &link,
            job,
            running: None,
            task_requested: None,
            last_heard: Instant::now(),
            heartbeat_interval,
            summary,
        };
        let result = conn.drive(&mut inbound).await;
        if let Some(run) = conn.running.take() {
            run.stop().await;
        }
        if matches!(result, Ok(Exit::Stopped)) {
            let _ = link.send(Message::goodbye(&config.agent_id)).await;
        }
        link.close(CLOSE_GRACE).await;
        result
    }

    async fn register(&self, link: &Link, inbound: &mut Inbound) -> Result<Registration> {
        let config = &self.config;
        link.send(Message::Hello {
            agent_id: config.agent_id.clone(),
            timestamp: unix_millis(),
            endpoint: config.endpoint.clone(),
            version: Some(PROTOCOL_VERSION.to_string()),
            threads: Some(config.threads),
        })
        .await?;

        let deadline = Instant::now() + config.rpc_timeout;
        loop {
            let wait = deadline.saturating_duration_since(Instant::now());
            match connection::recv_within(inbound, wait, "HELLO_ACK").await? {
                Message::HelloAck {
                    session,
                    heartbeat_interval_ms,
                    ..
                } => {
                    let heartbeat_interval = heartbeat_interval_ms
                        .filter(|ms| *ms > 0)
                        .map_or(config.heartbeat_interval, Duration::from_millis);
                    return Ok(Registration::Accepted {
                        session,
                        heartbeat_interval,
                    });
                }
                Message::Error { message, .. } => {
                    return Err(ProtocolError::Rejected { message }.into());
                }
                Message::Shutdown { reason, .. } => return Ok(Registration::Shutdown(reason)),
                other => {
                    tracing::debug!("Ignoring {} before HELLO_ACK", other.kind());
                }
            }
        }
    }

    /// Rebuilds the coordinator's search space from the session and the local
    /// wordlist.
    fn build_job(&self, session: &SessionInfo) -> Result<SearchJob> {
        let space = SearchSpace::from_params(
            session.seed_pattern.as_deref(),
            session.word_count,
            session.full_search,
            &self.config.wordlist,
        )?;
        if space.total() != &session.total_combinations {
            return Err(AgentError::SessionMismatch {
                reason: format!(
                    "coordinator searches {} candidates, the local wordlist yields {}",
                    session.total_combinations,
                    space.total()
                ),
            });
        }
        Ok(SearchJob::new(
            space,
            session.target_address.clone(),
            Arc::clone(&self.deriver),
        ))
    }
}

enum Registration {
    Accepted {
        session: SessionInfo,
        heartbeat_interval: Duration,
    },
    Shutdown(Option<String>),
}

/// State of one registered connection.
struct ConnectionLoop<'a> {
    client: &'a AgentClient,
    link: &'a Link,
    job: Arc<SearchJob>,
    running: Option<BlockRun>,
    /// When the outstanding `GET_TASK` was sent.
    task_requested: Option<Instant>,
    last_heard: Instant,
    heartbeat_interval: Duration,
    summary: &'a mut RunSummary,
}

impl ConnectionLoop<'_> {
    fn agent_id(&self) -> &str {
        &self.client.config.agent_id
    }

    async fn drive(&mut self, inbound: &mut Inbound) -> Result<Exit> {
        let shutdown = self.client.shutdown.clone();
        let mut heartbeat = interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;
        let mut poll = interval(self.client.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => return Ok(Exit::Stopped),
                message = connection::recv(inbound) => {
                    self.last_heard = Instant::now();
                    if let Some(exit) = self.on_message(message?).await? {
                        return Ok(exit);
                    }
                }
                update = next_update(&mut self.running) => self.on_update(update).await?,
                _ = heartbeat.tick() => self.on_heartbeat().await?,
                _ = poll.tick() => self.on_poll().await?,
            }
        }
    }

    async fn on_message(&mut self, message: Message) -> Result<Option<Exit>> {
        tracing::trace!("Received {}", message.kind());
        match message {
            Message::Task {
                block_id,
                start_index,
                end_index,
                ..
            } => {
                self.task_requested = None;
                self.start_block(block_id, IndexRange::new(start_index, end_index))
                    .await?;
            }
            Message::NoTask { exhausted, .. } => {
                self.task_requested = None;
                if exhausted {
                    tracing::info!("Coordinator has no blocks left; waiting for shutdown");
                } else {
                    tracing::debug!("No block available");
                }
            }
            Message::Ack { .. } | Message::HeartbeatAck { .. } => {}
            Message::Error { message, .. } => {
                tracing::warn!("Coordinator reported an error: {message}");
            }
            Message::Shutdown { reason, .. } => return Ok(Some(Exit::Shutdown(reason))),
            Message::HelloAck { .. } => tracing::debug!("Ignoring repeated HELLO_ACK"),
            other => tracing::warn!("Ignoring unexpected {} from coordinator", other.kind()),
        }
        Ok(None)
    }

    async fn start_block(&mut self, block_id: u64, range: IndexRange) -> Result<()> {
        if let Some(run) = &self.running {
            tracing::warn!(
                "Ignoring block {block_id} while block {} is still running",
                run.block_id()
            );
            return Ok(());
        }
        let config = &self.client.config;
        self.link
            .send(Message::TaskAccepted {
                agent_id: config.agent_id.clone(),
                timestamp: unix_millis(),
                block_id,
            })
            .await?;

        tracing::info!("Starting block {block_id} {range} ({} candidates)", range.len());
        let run = BlockRun::start(
            Arc::clone(&self.job),
            block_id,
            range,
            config.threads,
            config.progress_interval,
            config.checkpoint_path.as_deref(),
        )?;
        self.running = Some(run);
        self.client.state.set(AgentState::Working { block_id });
        Ok(())
    }

    async fn on_update(&mut self, update: Option<BlockUpdate>) -> Result<()> {
        let Some(block_id) = self.running.as_ref().map(BlockRun::block_id) else {
            return Ok(());
        };
        let agent_id = self.agent_id().to_string();
        match update {
            Some(BlockUpdate::Progress { current, rate }) => {
                tracing::debug!("Block {block_id} at {current} ({rate:.0}/s)");
                self.link
                    .send(Message::ReportProgress {
                        agent_id,
                        timestamp: unix_millis(),
                        block_id,
                        current_index: current,
                        rate,
                    })
                    .await?;
            }
            Some(BlockUpdate::Found(result)) => {
                tracing::warn!(
                    "Found phrase for {} at index {} in block {block_id}",
                    result.derived_address,
                    result.index
                );
                self.summary.found.push(result.clone());
                self.link
                    .send(Message::ReportFound {
                        agent_id,
                        timestamp: unix_millis(),
                        block_id,
                        result,
                    })
                    .await?;
            }
            Some(BlockUpdate::Completed { processed }) => {
                self.running = None;
                self.summary.blocks_completed += 1;
                self.summary.processed += processed;
                tracing::info!("Completed block {block_id} ({processed} candidates)");
                self.link
                    .send(Message::TaskCompleted {
                        agent_id,
                        timestamp: unix_millis(),
                        block_id,
                        processed,
                    })
                    .await?;
                self.client.state.set(AgentState::Registered);
                self.request_task().await?;
            }
            Some(BlockUpdate::Stopped { current }) => return Err(self.abandon(block_id, current)),
            None => {
                let current = self
                    .running
                    .as_ref()
                    .map_or_else(BigUint::default, |run| run.current().clone());
                return Err(self.abandon(block_id, current));
            }
        }
        Ok(())
    }

    /// Workers exited without finishing the block. The local checkpoint
    /// keeps the resume point; dropping the connection returns the block to
    /// the coordinator's queue.
    fn abandon(&mut self, block_id: u64, current: BigUint) -> AgentError {
        if let (Some(run), Some(path)) = (self.running.take(), &self.client.config.checkpoint_path) {
            if let Err(e) = AgentCheckpoint::new(block_id, run.range(), current.clone()).save(path) {
                tracing::warn!("Failed to write agent checkpoint {}: {e}", path.display());
            }
        }
        self.running = None;
        tracing::error!("Block {block_id} stopped early at {current}");
        AgentError::WorkerStopped { block_id }
    }

    async fn on_heartbeat(&mut self) -> Result<()> {
        let silent = self.last_heard.elapsed();
        if silent > self.heartbeat_interval + self.client.config.rpc_timeout {
            return Err(ProtocolError::Timeout {
                what: "HEARTBEAT_ACK",
            }
            .into());
        }
        let (block_id, current_index) = match &self.running {
            Some(run) => (Some(run.block_id()), Some(run.current().clone())),
            None => (None, None),
        };
        self.link
            .send(Message::Heartbeat {
                agent_id: self.agent_id().to_string(),
                timestamp: unix_millis(),
                block_id,
                current_index,
            })
            .await
    }

    async fn on_poll(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Ok(());
        }
        match self.task_requested {
            Some(at) if at.elapsed() > self.client.config.rpc_timeout => {
                Err(ProtocolError::Timeout { what: "TASK" }.into())
            }
            Some(_) => Ok(()),
            None => self.request_task().await,
        }
    }

    async fn request_task(&mut self) -> Result<()> {
        self.task_requested = Some(Instant::now());
        self.link.send(Message::get_task(self.agent_id())).await
    }
}

/// Next update of the running block; never resolves when idle.
async fn next_update(running: &mut Option<BlockRun>) -> Option<BlockUpdate> {
    match running {
        Some(run) => run.next_update().await,
        None => std::future::pending().await,
    }
}
