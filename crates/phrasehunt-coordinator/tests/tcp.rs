use futures::{SinkExt, StreamExt};
use num_bigint::BigUint;
use phrasehunt::Checkpoint;
use phrasehunt_coordinator::server::{
    Coordinator, blocks::BlockSizing, config::ServerConfig, state::BlockStatus,
};
use phrasehunt_proto::{Message, MessageCodec, SessionInfo, unix_millis};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tokio_util::codec::Framed;

const WAIT: Duration = Duration::from_secs(5);

struct Agent {
    id: String,
    framed: Framed<TcpStream, MessageCodec>,
}

impl Agent {
    async fn connect(addr: SocketAddr, id: &str) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            id: id.to_string(),
            framed: Framed::new(stream, MessageCodec::new()),
        }
    }

    async fn send(&mut self, message: Message) {
        self.framed.send(message).await.unwrap();
    }

    async fn recv(&mut self) -> Message {
        tokio::time::timeout(WAIT, self.framed.next())
            .await
            .expect("timed out waiting for the coordinator")
            .expect("connection closed")
            .expect("protocol error")
    }

    async fn request(&mut self, message: Message) -> Message {
        self.send(message).await;
        self.recv().await
    }

    async fn hello(&mut self) -> SessionInfo {
        let hello = Message::Hello {
            agent_id: self.id.clone(),
            timestamp: unix_millis(),
            endpoint: None,
            version: None,
            threads: Some(1),
        };
        match self.request(hello).await {
            Message::HelloAck { session, .. } => session,
            other => panic!("unexpected {other:?}"),
        }
    }

    async fn complete(&mut self, block_id: u64) -> Message {
        let completed = Message::TaskCompleted {
            agent_id: self.id.clone(),
            timestamp: unix_millis(),
            block_id,
            processed: 10,
        };
        self.request(completed).await
    }
}

fn config(checkpoint: Option<std::path::PathBuf>) -> ServerConfig {
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
    config.queue_depth = 4;
    config.checkpoint_path = checkpoint;
    config
}

async fn start(config: ServerConfig) -> (SocketAddr, Arc<Coordinator>, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let coordinator = Arc::new(Coordinator::new(config));
    let server = tokio::spawn({
        let coordinator = Arc::clone(&coordinator);
        async move {
            coordinator.serve(listener).await.unwrap();
        }
    });
    (addr, coordinator, server)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disconnected_agents_blocks_are_reassigned_and_search_completes() {
    let dir = tempfile::tempdir().unwrap();
    let checkpoint_path = dir.path().join("coordinator.json");
    let (addr, coordinator, server) = start(config(Some(checkpoint_path.clone()))).await;

    let mut first = Agent::connect(addr, "first").await;
    let session = first.hello().await;
    assert_eq!(session.total_combinations, BigUint::from(40u32));
    let abandoned = match first.request(Message::get_task("first")).await {
        Message::Task {
            block_id,
            start_index,
            end_index,
            ..
        } => {
            assert_eq!(start_index, BigUint::from(0u32));
            assert_eq!(end_index, BigUint::from(10u32));
            block_id
        }
        other => panic!("unexpected {other:?}"),
    };
    drop(first);

    let mut second = Agent::connect(addr, "second").await;
    second.hello().await;
    let mut completed = Vec::new();
    loop {
        match second.request(Message::get_task("second")).await {
            Message::Task { block_id, .. } => {
                assert_eq!(second.complete(block_id).await.kind(), "ACK");
                completed.push(block_id);
            }
            Message::NoTask { exhausted: true, .. } => break,
            Message::NoTask { .. } => tokio::time::sleep(Duration::from_millis(20)).await,
            other => panic!("unexpected {other:?}"),
        }
        if completed.len() == 4 {
            break;
        }
    }
    completed.sort_unstable();
    assert_eq!(completed, vec![0, 1, 2, 3]);
    assert!(completed.contains(&abandoned));

    match second.recv().await {
        Message::Shutdown { reason, .. } => {
            assert_eq!(reason.as_deref(), Some("search space exhausted"));
        }
        other => panic!("unexpected {other:?}"),
    }

    tokio::time::timeout(WAIT, server).await.unwrap().unwrap();
    assert!(coordinator.is_finished());
    let checkpoint = Checkpoint::load(&checkpoint_path).unwrap().unwrap();
    assert_eq!(checkpoint.current_index, BigUint::from(40u32));
    assert!(checkpoint.is_finished());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn garbage_lines_do_not_close_the_connection() {
    let (addr, coordinator, server) = start(config(None)).await;

    let mut agent = Agent::connect(addr, "noisy").await;
    agent.hello().await;
    agent
        .framed
        .get_mut()
        .write_all(b"{not json}\n{\"type\":\"TELEPORT\",\"agentId\":\"noisy\"}\n\n")
        .await
        .unwrap();
    let reply = agent.request(Message::get_task("noisy")).await;
    assert_eq!(reply.kind(), "TASK");

    coordinator.shutdown("test over");
    match agent.recv().await {
        Message::Shutdown { reason, .. } => assert_eq!(reason.as_deref(), Some("test over")),
        other => panic!("unexpected {other:?}"),
    }
    tokio::time::timeout(WAIT, server).await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn progress_from_a_non_owner_is_rejected() {
    let (addr, coordinator, server) = start(config(None)).await;

    let mut owner = Agent::connect(addr, "owner").await;
    owner.hello().await;
    let block_id = owner
        .request(Message::get_task("owner"))
        .await
        .block_id()
        .unwrap();

    let mut intruder = Agent::connect(addr, "intruder").await;
    intruder.hello().await;
    let progress = Message::ReportProgress {
        agent_id: "intruder".to_string(),
        timestamp: unix_millis(),
        block_id,
        current_index: BigUint::from(9u32),
        rate: 1.0,
    };
    assert_eq!(intruder.request(progress).await.kind(), "ERROR");

    let heartbeat = Message::Heartbeat {
        agent_id: "intruder".to_string(),
        timestamp: unix_millis(),
        block_id: None,
        current_index: None,
    };
    assert_eq!(intruder.request(heartbeat).await.kind(), "HEARTBEAT_ACK");

    coordinator.shutdown("test over");
    tokio::time::timeout(WAIT, server).await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn completion_of_a_block_never_assigned_to_the_sender_is_rejected() {
    let (addr, coordinator, server) = start(config(None)).await;

    let mut owner = Agent::connect(addr, "owner").await;
    owner.hello().await;
    let held = owner
        .request(Message::get_task("owner"))
        .await
        .block_id()
        .unwrap();
    assert_eq!(held, 0);

    let mut intruder = Agent::connect(addr, "intruder").await;
    intruder.hello().await;
    // block 1 waits in the pending window and was never handed out
    assert_eq!(intruder.complete(1).await.kind(), "ERROR");
    assert_eq!(intruder.complete(held).await.kind(), "ERROR");

    assert_eq!(
        coordinator.with_state(|s| s.block_status(1)),
        Some(BlockStatus::Pending)
    );
    assert_eq!(
        coordinator.with_state(|s| s.block_status(held)),
        Some(BlockStatus::Assigned)
    );
    assert_eq!(
        coordinator.with_state(|s| s.low_water().clone()),
        BigUint::from(0u32)
    );

    // the block is still handed out and completed normally
    assert_eq!(owner.complete(held).await.kind(), "ACK");
    assert_eq!(
        intruder.request(Message::get_task("intruder")).await.block_id(),
        Some(1)
    );
    assert_eq!(intruder.complete(1).await.kind(), "ACK");
    assert_eq!(
        coordinator.with_state(|s| s.low_water().clone()),
        BigUint::from(20u32)
    );

    coordinator.shutdown("test over");
    tokio::time::timeout(WAIT, server).await.unwrap().unwrap();
}
