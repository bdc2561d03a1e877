//! TCP link to the coordinator.
//!
//! The socket is split once: a writer task owns the write half and drains a
//! channel, so the heartbeat, the task poll and the block runner can all send
//! without sharing the socket. The read half stays with the caller as an
//! [`Inbound`] stream.

use super::error::{AgentError, Result};
use futures::{SinkExt, StreamExt};
use phrasehunt_proto::{Message, MessageCodec, ProtocolError};
use std::time::Duration;
use tokio::{
    io::AsyncWrite,
    net::{TcpStream, tcp::OwnedReadHalf},
    sync::mpsc,
    task::JoinHandle,
};
use tokio_util::codec::{FramedRead, FramedWrite};

const OUTBOX_CAPACITY: usize = 64;

/// Sending side of the link.
#[derive(Debug)]
pub struct Link {
    outbox: mpsc::Sender<Message>,
    writer: JoinHandle<()>,
}

pub type Inbound = FramedRead<OwnedReadHalf, MessageCodec>;

/// Opens the connection and starts the writer task.
///
/// # Errors
///
/// Fails when the connection is refused or does not complete within
/// `timeout`.
pub async fn connect(addr: &str, timeout: Duration) -> Result<(Link, Inbound)> {
    let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => {
            return Err(AgentError::Connect {
                addr: addr.to_string(),
                source,
            });
        }
        Err(_elapsed) => {
            return Err(AgentError::ConnectTimeout {
                addr: addr.to_string(),
                timeout,
            });
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!("Could not set TCP_NODELAY: {e}");
    }

    let (read, write) = stream.into_split();
    let (outbox, mut rx) = mpsc::channel::<Message>(OUTBOX_CAPACITY);
    let mut sink = FramedWrite::new(write, MessageCodec::new());
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            tracing::trace!("Sending {}", message.kind());
            if let Err(e) = sink.send(message).await {
                tracing::warn!("Write to coordinator failed: {e}");
                return;
            }
        }
        close_sink(&mut sink).await.ok();
    });

    Ok((Link { outbox, writer }, FramedRead::new(read, MessageCodec::new())))
}

impl Link {
    /// Queues a message for the writer task.
    ///
    /// # Errors
    ///
    /// Fails once the writer has stopped, which means the socket is gone.
    pub async fn send(&self, message: Message) -> Result<()> {
        self.outbox
            .send(message)
            .await
            .map_err(|_| ProtocolError::Closed.into())
    }

    /// Flushes queued messages and closes the write half, waiting at most
    /// `grace`.
    pub async fn close(self, grace: Duration) {
        let Self { outbox, mut writer } = self;
        drop(outbox);
        if tokio::time::timeout(grace, &mut writer).await.is_err() {
            writer.abort();
        }
    }
}

/// Flushes and shuts down the write half. A failure is logged and returned.
async fn close_sink<W>(sink: &mut FramedWrite<W, MessageCodec>) -> core::result::Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let closed = SinkExt::<Message>::close(sink).await;
    if let Err(e) = &closed {
        tracing::debug!("Closing the coordinator connection failed: {e}");
    }
    closed
}

/// Next message, mapping end of stream to [`ProtocolError::Closed`].
///
/// # Errors
///
/// Fails when the socket errors or the peer closes it.
pub async fn recv(inbound: &mut Inbound) -> Result<Message> {
    match inbound.next().await {
        Some(Ok(message)) => Ok(message),
        Some(Err(e)) => Err(e.into()),
        None => Err(ProtocolError::Closed.into()),
    }
}

/// Waits up to `timeout` for the next message.
///
/// # Errors
///
/// Fails with [`ProtocolError::Timeout`] naming `what` when nothing arrives.
pub async fn recv_within(inbound: &mut Inbound, timeout: Duration, what: &'static str) -> Result<Message> {
    tokio::time::timeout(timeout, recv(inbound))
        .await
        .map_err(|_| ProtocolError::Timeout { what })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use phrasehunt_proto::unix_millis;
    use std::{
        io,
        pin::Pin,
        task::{Context, Poll},
    };
    use tokio::net::TcpListener;

    /// Accepts writes but fails to shut down, like a reset socket.
    #[derive(Default)]
    struct ResetOnShutdown {
        written: Vec<u8>,
    }

    impl AsyncWrite for ResetOnShutdown {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.written.extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::ErrorKind::ConnectionReset.into()))
        }
    }

    #[tokio::test]
    async fn close_reports_a_failed_shutdown() {
        let mut sink = FramedWrite::new(ResetOnShutdown::default(), MessageCodec::new());
        sink.feed(Message::get_task("a")).await.unwrap();

        let err = close_sink(&mut sink).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Io(ref e) if e.kind() == io::ErrorKind::ConnectionReset));
        // queued lines are flushed before the shutdown fails
        let written = String::from_utf8(sink.get_ref().written.clone()).unwrap();
        assert!(written.ends_with('\n'));
        assert!(written.contains("GET_TASK"));
    }

    #[tokio::test]
    async fn writes_and_reads_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let (link, mut inbound) = connect(&addr, Duration::from_secs(5)).await.unwrap();
        let (peer, _) = listener.accept().await.unwrap();
        let (peer_read, peer_write) = peer.into_split();
        let mut peer_in = FramedRead::new(peer_read, MessageCodec::new());
        let mut peer_out = FramedWrite::new(peer_write, MessageCodec::new());

        link.send(Message::get_task("a")).await.unwrap();
        let got = peer_in.next().await.unwrap().unwrap();
        assert_eq!(got.kind(), "GET_TASK");

        peer_out
            .send(Message::Shutdown {
                timestamp: unix_millis(),
                reason: None,
            })
            .await
            .unwrap();
        let reply = recv_within(&mut inbound, Duration::from_secs(5), "SHUTDOWN")
            .await
            .unwrap();
        assert_eq!(reply.kind(), "SHUTDOWN");

        link.close(Duration::from_secs(1)).await;
        assert!(peer_in.next().await.is_none());
        drop(peer_out);
        assert!(matches!(
            recv(&mut inbound).await,
            Err(AgentError::Protocol(ProtocolError::Closed))
        ));
    }

    #[tokio::test]
    async fn silence_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (_link, mut inbound) = connect(&addr, Duration::from_secs(5)).await.unwrap();
        let _peer = listener.accept().await.unwrap();

        let err = recv_within(&mut inbound, Duration::from_millis(50), "HELLO_ACK")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AgentError::Protocol(ProtocolError::Timeout { what: "HELLO_ACK" })
        ));
    }

    #[tokio::test]
    async fn refused_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        let err = connect(&addr, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, AgentError::Connect { .. }));
    }
}
