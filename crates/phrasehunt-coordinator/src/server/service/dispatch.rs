use crate::server::{
    Coordinator,
    state::{Completion, StateError, TaskOutcome},
    telemetry::{
        decrement_agents_connected, increment_agents_connected, increment_blocks_assigned,
        increment_blocks_completed, increment_blocks_requeued, increment_phrases_found,
    },
};
use phrasehunt_proto::{Message, PROTOCOL_VERSION, unix_millis};
use std::{net::SocketAddr, time::Instant};

/// What a connection knows about its peer.
#[derive(Clone, Debug)]
pub struct Connection {
    pub id: u64,
    pub peer: Option<SocketAddr>,
    /// Set by a successful `HELLO`.
    pub agent_id: Option<String>,
}

impl Connection {
    pub fn new(id: u64, peer: Option<SocketAddr>) -> Self {
        Self {
            id,
            peer,
            agent_id: None,
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum Reply {
    Send(Message),
    /// Nothing to send.
    Silent,
    /// The peer said goodbye.
    Close,
}

/// Applies one inbound message to the coordinator and decides the reply.
pub fn dispatch(
    coordinator: &Coordinator,
    conn: &mut Connection,
    message: Message,
    now: Instant,
) -> Reply {
    if let Message::Hello {
        agent_id,
        endpoint,
        version,
        threads,
        ..
    } = message
    {
        return hello(coordinator, conn, agent_id, endpoint, version, threads, now);
    }

    let agent_id = match authorize(conn, &message) {
        Ok(agent_id) => agent_id,
        Err(reply) => return reply,
    };

    match message {
        Message::GetTask { .. } => get_task(coordinator, agent_id, now),
        Message::TaskAccepted { block_id, .. } => {
            let accepted = coordinator.with_state(|s| s.accept_task(&agent_id, block_id, now));
            acknowledge(agent_id, Some(block_id), accepted)
        }
        Message::ReportProgress {
            block_id,
            current_index,
            rate,
            ..
        } => {
            let reported = coordinator.with_state(|s| {
                s.report_progress(&agent_id, block_id, &current_index, rate, now)
            });
            if let Err(e) = &reported {
                tracing::warn!("Rejected progress from {agent_id}: {e}");
            }
            acknowledge(agent_id, Some(block_id), reported)
        }
        Message::ReportFound {
            block_id, result, ..
        } => {
            let stored = coordinator.with_state(|s| s.record_found(block_id, result));
            increment_phrases_found();
            tracing::warn!(
                "Agent {agent_id} found a match in block {block_id} at index {}: {}",
                stored.index,
                stored.derived_address
            );
            coordinator.append_result(&stored);
            Reply::Send(Message::ack(agent_id, Some(block_id)))
        }
        Message::TaskCompleted {
            block_id,
            processed,
            ..
        } => complete(coordinator, agent_id, block_id, processed, now),
        Message::Heartbeat {
            block_id,
            current_index,
            ..
        } => {
            let alive = coordinator
                .with_state(|s| s.heartbeat(&agent_id, block_id, current_index.as_ref(), now));
            match alive {
                Ok(()) => Reply::Send(Message::HeartbeatAck {
                    agent_id,
                    timestamp: unix_millis(),
                }),
                Err(e) => Reply::Send(Message::error(Some(agent_id), e.to_string())),
            }
        }
        Message::Goodbye { .. } => {
            tracing::info!("Agent {agent_id} said goodbye");
            Reply::Close
        }
        Message::Error { message, .. } => {
            tracing::warn!("Agent {agent_id} reported an error: {message}");
            Reply::Silent
        }
        other @ (Message::Hello { .. }
        | Message::HelloAck { .. }
        | Message::Task { .. }
        | Message::NoTask { .. }
        | Message::Ack { .. }
        | Message::HeartbeatAck { .. }
        | Message::Shutdown { .. }) => {
            tracing::warn!("Ignoring {} from agent {agent_id}", other.kind());
            Reply::Silent
        }
    }
}

/// Releases whatever the connection registered. Called once the socket is
/// gone, whatever the reason.
pub fn disconnect(coordinator: &Coordinator, conn: &Connection) {
    let Some(agent_id) = conn.agent_id.as_deref() else {
        return;
    };
    let Some(requeued) = coordinator.with_state(|s| s.disconnect_agent(agent_id, conn.id)) else {
        return;
    };
    decrement_agents_connected();
    increment_blocks_requeued(requeued.len() as u64);
    if requeued.is_empty() {
        tracing::info!("Agent {agent_id} disconnected");
    } else {
        tracing::warn!("Agent {agent_id} disconnected; requeued blocks {requeued:?}");
    }
}

fn hello(
    coordinator: &Coordinator,
    conn: &mut Connection,
    agent_id: String,
    endpoint: Option<String>,
    version: Option<String>,
    threads: Option<usize>,
    now: Instant,
) -> Reply {
    let agent_id = agent_id.trim().to_string();
    if agent_id.is_empty() {
        return Reply::Send(Message::error(None, "agentId must not be empty"));
    }
    if let Some(version) = version.as_deref().filter(|v| *v != PROTOCOL_VERSION) {
        tracing::warn!(
            "Agent {agent_id} speaks protocol {version}, coordinator speaks {PROTOCOL_VERSION}"
        );
    }

    // A connection switching identities releases the old one first.
    if conn.agent_id.as_deref().is_some_and(|id| id != agent_id) {
        disconnect(coordinator, conn);
    }
    let endpoint = endpoint.or_else(|| conn.peer.map(|p| p.to_string()));
    let replaced = coordinator.with_state(|s| {
        s.register_agent(&agent_id, conn.id, endpoint.clone(), threads, now)
    });
    if !replaced {
        increment_agents_connected();
    }
    tracing::info!(
        "Agent {agent_id} registered from {} with {} thread(s)",
        endpoint.as_deref().unwrap_or("unknown endpoint"),
        threads.map_or_else(|| "?".to_string(), |t| t.to_string())
    );
    conn.agent_id = Some(agent_id.clone());

    let config = coordinator.config();
    Reply::Send(Message::HelloAck {
        agent_id,
        timestamp: unix_millis(),
        session: config.session.clone(),
        heartbeat_interval_ms: Some(
            u64::try_from(config.heartbeat_interval.as_millis()).unwrap_or(u64::MAX),
        ),
    })
}

/// The registered id of this connection, provided the message claims the
/// same one.
fn authorize(conn: &Connection, message: &Message) -> Result<String, Reply> {
    let claimed = message.agent_id().map(str::to_string);
    let Some(agent_id) = conn.agent_id.clone() else {
        return Err(Reply::Send(Message::error(
            claimed,
            format!("HELLO required before {}", message.kind()),
        )));
    };
    if let Some(claimed) = claimed.filter(|id| *id != agent_id) {
        return Err(Reply::Send(Message::error(
            Some(claimed.clone()),
            format!("agentId {claimed} does not match this connection ({agent_id})"),
        )));
    }
    Ok(agent_id)
}

fn get_task(coordinator: &Coordinator, agent_id: String, now: Instant) -> Reply {
    match coordinator.with_state(|s| s.request_task(&agent_id, now)) {
        Ok(TaskOutcome::Assigned { block_id, range }) => {
            increment_blocks_assigned();
            tracing::info!("Assigned block {block_id} {range} to {agent_id}");
            Reply::Send(Message::Task {
                agent_id,
                timestamp: unix_millis(),
                block_id,
                start_index: range.start,
                end_index: range.end,
            })
        }
        Ok(TaskOutcome::NoTask { exhausted }) => Reply::Send(Message::NoTask {
            agent_id,
            timestamp: unix_millis(),
            exhausted,
        }),
        Err(e) => Reply::Send(Message::error(Some(agent_id), e.to_string())),
    }
}

fn complete(
    coordinator: &Coordinator,
    agent_id: String,
    block_id: u64,
    processed: u64,
    now: Instant,
) -> Reply {
    let completed = coordinator.with_state(|s| s.complete_block(&agent_id, block_id, now));
    match &completed {
        Ok(Completion::Completed { range }) => {
            increment_blocks_completed();
            tracing::info!(
                "Agent {agent_id} completed block {block_id} {range} ({processed} processed)"
            );
            if coordinator.config().exit_on_complete && coordinator.is_finished() {
                coordinator.shutdown("search space exhausted");
            }
        }
        Ok(Completion::AlreadyCompleted) => {
            tracing::debug!("Duplicate completion of block {block_id} from {agent_id}");
        }
        Err(e) => tracing::warn!("Rejected completion from {agent_id}: {e}"),
    }
    acknowledge(agent_id, Some(block_id), completed)
}

fn acknowledge<T>(agent_id: String, block_id: Option<u64>, outcome: Result<T, StateError>) -> Reply {
    match outcome {
        Ok(_) => Reply::Send(Message::ack(agent_id, block_id)),
        Err(e) => Reply::Send(Message::error(Some(agent_id), e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{blocks::BlockSizing, config::ServerConfig, state::BlockStatus};
    use num_bigint::BigUint;
    use phrasehunt::FoundResult;
    use phrasehunt_proto::SessionInfo;

    fn coordinator() -> Coordinator {
        let session = SessionInfo {
            seed_pattern: Some("w0000 ? ?".to_string()),
            target_address: "addr:target".to_string(),
            word_count: 3,
            full_search: false,
            total_combinations: BigUint::from(40u32),
        };
        let mut config = ServerConfig::new(session);
        config.sizing = BlockSizing {
            target_blocks: 4,
            min_block: 1,
            max_block: 10,
            min_blocks: 1,
        };
        Coordinator::new(config)
    }

    fn hello(id: &str) -> Message {
        Message::Hello {
            agent_id: id.to_string(),
            timestamp: unix_millis(),
            endpoint: None,
            version: Some(PROTOCOL_VERSION.to_string()),
            threads: Some(2),
        }
    }

    fn sent(reply: Reply) -> Message {
        match reply {
            Reply::Send(message) => message,
            other => panic!("expected a reply, got {other:?}"),
        }
    }

    fn registered(coordinator: &Coordinator, id: &str, conn_id: u64) -> Connection {
        let mut conn = Connection::new(conn_id, None);
        let reply = sent(dispatch(coordinator, &mut conn, hello(id), Instant::now()));
        assert!(matches!(reply, Message::HelloAck { .. }), "{reply:?}");
        conn
    }

    #[test]
    fn hello_returns_the_session() {
        let coordinator = coordinator();
        let mut conn = Connection::new(1, "10.0.0.5:4000".parse().ok());
        match sent(dispatch(&coordinator, &mut conn, hello("a"), Instant::now())) {
            Message::HelloAck {
                agent_id,
                session,
                heartbeat_interval_ms,
                ..
            } => {
                assert_eq!(agent_id, "a");
                assert_eq!(session.total_combinations, BigUint::from(40u32));
                assert_eq!(heartbeat_interval_ms, Some(15_000));
            }
            other => panic!("unexpected {other:?}"),
        }
        let endpoint = coordinator.with_state(|s| s.agent("a").unwrap().endpoint.clone());
        assert_eq!(endpoint.as_deref(), Some("10.0.0.5:4000"));
    }

    #[test]
    fn requests_before_hello_are_rejected() {
        let coordinator = coordinator();
        let mut conn = Connection::new(1, None);
        let reply = sent(dispatch(
            &coordinator,
            &mut conn,
            Message::get_task("a"),
            Instant::now(),
        ));
        assert!(matches!(reply, Message::Error { .. }));
    }

    #[test]
    fn impersonation_is_rejected() {
        let coordinator = coordinator();
        let mut conn = registered(&coordinator, "a", 1);
        let reply = sent(dispatch(
            &coordinator,
            &mut conn,
            Message::get_task("b"),
            Instant::now(),
        ));
        assert!(matches!(reply, Message::Error { .. }));
    }

    #[test]
    fn task_lifecycle() {
        let coordinator = coordinator();
        let mut conn = registered(&coordinator, "a", 1);
        let now = Instant::now();

        let (block_id, start, end) =
            match sent(dispatch(&coordinator, &mut conn, Message::get_task("a"), now)) {
                Message::Task {
                    block_id,
                    start_index,
                    end_index,
                    ..
                } => (block_id, start_index, end_index),
                other => panic!("unexpected {other:?}"),
            };
        assert_eq!((block_id, start, end.clone()), (0, BigUint::from(0u32), BigUint::from(10u32)));

        let accepted = Message::TaskAccepted {
            agent_id: "a".to_string(),
            timestamp: 1,
            block_id,
        };
        assert_eq!(
            sent(dispatch(&coordinator, &mut conn, accepted, now)).kind(),
            "ACK"
        );

        let progress = Message::ReportProgress {
            agent_id: "a".to_string(),
            timestamp: 2,
            block_id,
            current_index: BigUint::from(4u32),
            rate: 10.0,
        };
        assert_eq!(
            sent(dispatch(&coordinator, &mut conn, progress, now)).kind(),
            "ACK"
        );

        let completed = Message::TaskCompleted {
            agent_id: "a".to_string(),
            timestamp: 3,
            block_id,
            processed: 10,
        };
        let ack = sent(dispatch(&coordinator, &mut conn, completed.clone(), now));
        assert_eq!((ack.kind(), ack.block_id()), ("ACK", Some(block_id)));
        assert_eq!(
            coordinator.with_state(|s| s.block_status(block_id)),
            Some(BlockStatus::Completed)
        );

        // A retransmitted completion is still acknowledged.
        let ack = sent(dispatch(&coordinator, &mut conn, completed, now));
        assert_eq!(ack.kind(), "ACK");
        assert_eq!(
            coordinator.with_state(|s| s.low_water().clone()),
            BigUint::from(10u32)
        );
    }

    #[test]
    fn progress_for_someone_elses_block_is_an_error() {
        let coordinator = coordinator();
        let now = Instant::now();
        let mut owner = registered(&coordinator, "owner", 1);
        let mut other = registered(&coordinator, "other", 2);
        let block_id = sent(dispatch(&coordinator, &mut owner, Message::get_task("owner"), now))
            .block_id()
            .unwrap();

        let progress = Message::ReportProgress {
            agent_id: "other".to_string(),
            timestamp: 2,
            block_id,
            current_index: BigUint::from(5u32),
            rate: 1.0,
        };
        match sent(dispatch(&coordinator, &mut other, progress, now)) {
            Message::Error { agent_id, message, .. } => {
                assert_eq!(agent_id.as_deref(), Some("other"));
                assert!(message.contains("not assigned"), "{message}");
            }
            unexpected => panic!("unexpected {unexpected:?}"),
        }
        let progress = coordinator.with_state(|s| s.block(block_id).unwrap().progress.clone());
        assert_eq!(progress, BigUint::from(0u32));
    }

    #[test]
    fn found_results_are_kept_and_acknowledged() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("found.jsonl");
        let mut coordinator = coordinator();
        coordinator.config.results_path = Some(results.clone());
        let mut conn = registered(&coordinator, "a", 1);

        let found = Message::ReportFound {
            agent_id: "a".to_string(),
            timestamp: 1,
            block_id: 2,
            result: FoundResult {
                phrase: "w0000 w0001 w0002".to_string(),
                derived_key: "wif:w0000 w0001 w0002".to_string(),
                derived_address: "addr:target".to_string(),
                index: BigUint::from(21u32),
                block_id: None,
            },
        };
        let ack = sent(dispatch(&coordinator, &mut conn, found, Instant::now()));
        assert_eq!(ack.block_id(), Some(2));
        assert_eq!(coordinator.with_state(|s| s.results().len()), 1);

        let text = std::fs::read_to_string(&results).unwrap();
        let line: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(line["phrase"], "w0000 w0001 w0002");
        assert_eq!(line["blockId"], 2);
    }

    #[test]
    fn heartbeat_and_goodbye() {
        let coordinator = coordinator();
        let mut conn = registered(&coordinator, "a", 1);
        let heartbeat = Message::Heartbeat {
            agent_id: "a".to_string(),
            timestamp: 1,
            block_id: None,
            current_index: None,
        };
        let reply = sent(dispatch(&coordinator, &mut conn, heartbeat, Instant::now()));
        assert_eq!(reply.kind(), "HEARTBEAT_ACK");

        let reply = dispatch(&coordinator, &mut conn, Message::goodbye("a"), Instant::now());
        assert_eq!(reply, Reply::Close);
    }

    #[test]
    fn disconnect_requeues_and_forgets_the_agent() {
        let coordinator = coordinator();
        let now = Instant::now();
        let mut conn = registered(&coordinator, "a", 1);
        let block_id = sent(dispatch(&coordinator, &mut conn, Message::get_task("a"), now))
            .block_id()
            .unwrap();

        disconnect(&coordinator, &conn);
        assert!(coordinator.with_state(|s| s.agent("a").is_none()));
        assert_eq!(
            coordinator.with_state(|s| s.block_status(block_id)),
            Some(BlockStatus::Pending)
        );
    }

    #[test]
    fn last_completion_triggers_shutdown() {
        let coordinator = coordinator();
        let now = Instant::now();
        let mut conn = registered(&coordinator, "a", 1);
        loop {
            match sent(dispatch(&coordinator, &mut conn, Message::get_task("a"), now)) {
                Message::Task { block_id, .. } => {
                    let completed = Message::TaskCompleted {
                        agent_id: "a".to_string(),
                        timestamp: 1,
                        block_id,
                        processed: 0,
                    };
                    sent(dispatch(&coordinator, &mut conn, completed, now));
                }
                Message::NoTask { exhausted, .. } => {
                    assert!(exhausted);
                    break;
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(coordinator.shutdown_token().is_cancelled());
        assert_eq!(coordinator.shutdown_reason(), Some("search space exhausted"));
    }
}
