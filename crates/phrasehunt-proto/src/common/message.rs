//! The closed set of protocol messages.

use crate::unix_millis;
use num_bigint::BigUint;
use phrasehunt::{
    FoundResult,
    decimal::{as_decimal, as_decimal_opt},
};
use serde::{Deserialize, Serialize};

/// Description of the search an agent joins, sent in `HELLO_ACK`.
///
/// Together with the wordlist it lets the agent rebuild the exact search space
/// the coordinator partitions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    #[serde(default)]
    pub seed_pattern: Option<String>,
    pub target_address: String,
    pub word_count: usize,
    #[serde(default)]
    pub full_search: bool,
    #[serde(with = "as_decimal")]
    pub total_combinations: BigUint,
}

/// One line on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Message {
    /// Agent registration.
    #[serde(alias = "AGENT_HELLO")]
    Hello {
        agent_id: String,
        timestamp: u64,
        #[serde(default)]
        endpoint: Option<String>,
        #[serde(default)]
        version: Option<String>,
        #[serde(default)]
        threads: Option<usize>,
    },
    HelloAck {
        agent_id: String,
        timestamp: u64,
        session: SessionInfo,
        /// How often the coordinator expects a `HEARTBEAT`.
        #[serde(default)]
        heartbeat_interval_ms: Option<u64>,
    },
    Error {
        #[serde(default)]
        agent_id: Option<String>,
        timestamp: u64,
        message: String,
    },
    GetTask {
        agent_id: String,
        timestamp: u64,
    },
    /// A block `[startIndex, endIndex)` assigned to the agent.
    Task {
        agent_id: String,
        timestamp: u64,
        block_id: u64,
        #[serde(with = "as_decimal")]
        start_index: BigUint,
        #[serde(with = "as_decimal")]
        end_index: BigUint,
    },
    NoTask {
        agent_id: String,
        timestamp: u64,
        /// Set once every block has been handed out or completed.
        #[serde(default)]
        exhausted: bool,
    },
    TaskAccepted {
        agent_id: String,
        timestamp: u64,
        block_id: u64,
    },
    Ack {
        agent_id: String,
        timestamp: u64,
        #[serde(default)]
        block_id: Option<u64>,
    },
    ReportProgress {
        agent_id: String,
        timestamp: u64,
        block_id: u64,
        /// First index of the block not yet evaluated.
        #[serde(with = "as_decimal")]
        current_index: BigUint,
        /// Indices per second.
        #[serde(default)]
        rate: f64,
    },
    ReportFound {
        agent_id: String,
        timestamp: u64,
        block_id: u64,
        result: FoundResult,
    },
    TaskCompleted {
        agent_id: String,
        timestamp: u64,
        block_id: u64,
        #[serde(default)]
        processed: u64,
    },
    Heartbeat {
        agent_id: String,
        timestamp: u64,
        /// Block the agent is working on, if any.
        #[serde(default)]
        block_id: Option<u64>,
        /// Low-water index inside that block.
        #[serde(default, with = "as_decimal_opt")]
        current_index: Option<BigUint>,
    },
    HeartbeatAck {
        agent_id: String,
        timestamp: u64,
    },
    Goodbye {
        agent_id: String,
        timestamp: u64,
    },
    Shutdown {
        timestamp: u64,
        #[serde(default)]
        reason: Option<String>,
    },
}

impl Message {
    /// The `type` tag as it appears on the wire.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "HELLO",
            Self::HelloAck { .. } => "HELLO_ACK",
            Self::Error { .. } => "ERROR",
            Self::GetTask { .. } => "GET_TASK",
            Self::Task { .. } => "TASK",
            Self::NoTask { .. } => "NO_TASK",
            Self::TaskAccepted { .. } => "TASK_ACCEPTED",
            Self::Ack { .. } => "ACK",
            Self::ReportProgress { .. } => "REPORT_PROGRESS",
            Self::ReportFound { .. } => "REPORT_FOUND",
            Self::TaskCompleted { .. } => "TASK_COMPLETED",
            Self::Heartbeat { .. } => "HEARTBEAT",
            Self::HeartbeatAck { .. } => "HEARTBEAT_ACK",
            Self::Goodbye { .. } => "GOODBYE",
            Self::Shutdown { .. } => "SHUTDOWN",
        }
    }

    pub fn agent_id(&self) -> Option<&str> {
        match self {
            Self::Hello { agent_id, .. }
            | Self::HelloAck { agent_id, .. }
            | Self::GetTask { agent_id, .. }
            | Self::Task { agent_id, .. }
            | Self::NoTask { agent_id, .. }
            | Self::TaskAccepted { agent_id, .. }
            | Self::Ack { agent_id, .. }
            | Self::ReportProgress { agent_id, .. }
            | Self::ReportFound { agent_id, .. }
            | Self::TaskCompleted { agent_id, .. }
            | Self::Heartbeat { agent_id, .. }
            | Self::HeartbeatAck { agent_id, .. }
            | Self::Goodbye { agent_id, .. } => Some(agent_id),
            Self::Error { agent_id, .. } => agent_id.as_deref(),
            Self::Shutdown { .. } => None,
        }
    }

    pub fn block_id(&self) -> Option<u64> {
        match self {
            Self::Task { block_id, .. }
            | Self::TaskAccepted { block_id, .. }
            | Self::ReportProgress { block_id, .. }
            | Self::ReportFound { block_id, .. }
            | Self::TaskCompleted { block_id, .. } => Some(*block_id),
            Self::Ack { block_id, .. } | Self::Heartbeat { block_id, .. } => *block_id,
            _ => None,
        }
    }

    pub fn ack(agent_id: impl Into<String>, block_id: Option<u64>) -> Self {
        Self::Ack {
            agent_id: agent_id.into(),
            timestamp: unix_millis(),
            block_id,
        }
    }

    pub fn error(agent_id: Option<String>, message: impl Into<String>) -> Self {
        Self::Error {
            agent_id,
            timestamp: unix_millis(),
            message: message.into(),
        }
    }

    pub fn get_task(agent_id: impl Into<String>) -> Self {
        Self::GetTask {
            agent_id: agent_id.into(),
            timestamp: unix_millis(),
        }
    }

    pub fn goodbye(agent_id: impl Into<String>) -> Self {
        Self::Goodbye {
            agent_id: agent_id.into(),
            timestamp: unix_millis(),
        }
    }
}
