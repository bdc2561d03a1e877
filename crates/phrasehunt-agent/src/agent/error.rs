use phrasehunt_proto::ProtocolError;
use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = AgentError> = core::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Could not connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out connecting to {addr} after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The session announced by the coordinator cannot be searched here.
    #[error("Cannot join the coordinator's search: {0}")]
    Search(#[from] phrasehunt::Error),

    /// The local wordlist produces a different search space than the
    /// coordinator's.
    #[error("Session mismatch: {reason}")]
    SessionMismatch { reason: String },

    /// The workers of a block exited before finishing it.
    #[error("Workers of block {block_id} stopped unexpectedly")]
    WorkerStopped { block_id: u64 },

    #[error("Coordinator unreachable after {attempts} attempt(s); last error: {last}")]
    Unreachable {
        attempts: u32,
        #[source]
        last: Box<AgentError>,
    },
}

impl AgentError {
    /// Errors that a reconnect cannot fix.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Search(_) | Self::SessionMismatch { .. } | Self::Unreachable { .. }
        )
    }
}
