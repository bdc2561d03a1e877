//! One task per agent connection.
//!
//! The task owns the framed socket outright, so replies and the final
//! `SHUTDOWN` notice are written from a single place. It ends when the peer
//! closes, says `GOODBYE`, stays silent past the heartbeat timeout, or the
//! coordinator shuts down. Whatever the cause, the agent's blocks are handed
//! back to the queue on the way out.

use super::dispatch::{Connection, Reply, dispatch, disconnect};
use crate::server::Coordinator;
use futures::{SinkExt, StreamExt};
use phrasehunt_proto::{Message, MessageCodec, unix_millis};
use std::{net::SocketAddr, sync::Arc, time::Instant};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::Instrument;

pub async fn handle_connection(coordinator: Arc<Coordinator>, stream: TcpStream, peer: SocketAddr) {
    let conn = Connection::new(coordinator.next_connection_id(), Some(peer));
    let span = tracing::info_span!("connection", id = conn.id, %peer);
    serve_connection(coordinator, stream, peer, conn)
        .instrument(span)
        .await;
}

async fn serve_connection(
    coordinator: Arc<Coordinator>,
    stream: TcpStream,
    peer: SocketAddr,
    mut conn: Connection,
) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!("Could not set TCP_NODELAY for {peer}: {e}");
    }
    tracing::debug!("Accepted connection {} from {peer}", conn.id);

    let mut framed = Framed::new(stream, MessageCodec::new());
    let shutdown = coordinator.shutdown_token();
    let idle_timeout = coordinator.config().heartbeat_timeout;

    loop {
        let next = tokio::select! {
            () = shutdown.cancelled() => {
                let notice = Message::Shutdown {
                    timestamp: unix_millis(),
                    reason: coordinator.shutdown_reason().map(str::to_string),
                };
                if let Err(e) = framed.send(notice).await {
                    tracing::debug!("Could not deliver SHUTDOWN to {peer}: {e}");
                }
                break;
            }
            next = tokio::time::timeout(idle_timeout, framed.next()) => next,
        };

        let message = match next {
            Err(_elapsed) => {
                tracing::warn!(
                    "No message from {} in {idle_timeout:?}; dropping connection",
                    conn.agent_id.as_deref().unwrap_or("unregistered peer")
                );
                break;
            }
            Ok(None) => {
                tracing::debug!("Connection {} from {peer} closed", conn.id);
                break;
            }
            Ok(Some(Err(e))) => {
                tracing::warn!("Connection {} from {peer} failed: {e}", conn.id);
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        tracing::trace!("Received {} from {peer}", message.kind());
        match dispatch(&coordinator, &mut conn, message, Instant::now()) {
            Reply::Send(reply) => {
                if let Err(e) = framed.send(reply).await {
                    tracing::warn!("Failed to reply to {peer}: {e}");
                    break;
                }
            }
            Reply::Silent => {}
            Reply::Close => break,
        }
    }

    disconnect(&coordinator, &conn);
}
