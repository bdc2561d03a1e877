//! Connection lifecycle of an agent.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Registered <-> Working
//!                     |             |            |             |
//!                     +-------------+------> Error <-----------+
//!                                              |
//!                            backoff, then Connecting again
//! ```
//!
//! The current state is published on a [`watch`] channel so callers (and
//! tests) can follow the agent without polling its internals.

use core::fmt;
use tokio::sync::watch;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentState {
    Disconnected,
    Connecting,
    /// TCP is up, `HELLO_ACK` not received yet.
    Connected,
    /// Registered and idle, polling for blocks.
    Registered,
    /// Scanning block `block_id`.
    Working { block_id: u64 },
    Error,
}

impl AgentState {
    pub fn is_registered(&self) -> bool {
        matches!(self, Self::Registered | Self::Working { .. })
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Registered => f.write_str("registered"),
            Self::Working { block_id } => write!(f, "working on block {block_id}"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// Owner side of the state channel.
#[derive(Debug)]
pub struct StateTracker {
    tx: watch::Sender<AgentState>,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(AgentState::Disconnected);
        Self { tx }
    }

    pub fn get(&self) -> AgentState {
        *self.tx.borrow()
    }

    /// Moves to `next`; a no-op when already there.
    pub fn set(&self, next: AgentState) {
        self.tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            tracing::debug!("Agent state {current} -> {next}");
            *current = next;
            true
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<AgentState> {
        self.tx.subscribe()
    }
}
