//! # `phrasehunt-proto`: coordinator/agent wire protocol
//!
//! Agents and the coordinator talk over a persistent TCP connection, one JSON
//! object per line (UTF-8, `\n` terminated). Every object carries a `"type"`
//! tag; all other fields are camelCase. Indices are arbitrary precision and
//! travel as decimal strings.
//!
//! ## Exchanges
//!
//! | request | response |
//! |---|---|
//! | `HELLO` (alias `AGENT_HELLO`) | `HELLO_ACK` or `ERROR` |
//! | `GET_TASK` | `TASK` or `NO_TASK` |
//! | `TASK_ACCEPTED` | `ACK` |
//! | `REPORT_PROGRESS` | `ACK` (or `ERROR` when not the block owner) |
//! | `REPORT_FOUND` | `ACK` |
//! | `TASK_COMPLETED` | `ACK` |
//! | `HEARTBEAT` | `HEARTBEAT_ACK` |
//! | `GOODBYE` | none, the connection closes |
//! | `SHUTDOWN` | coordinator-initiated, unsolicited |
//!
//! Every request carries `agentId` and `timestamp` (milliseconds since the
//! Unix epoch); task-scoped messages carry `blockId`.
//!
//! ## Robustness
//!
//! [`MessageCodec`] never fails a connection because of a single bad line:
//! malformed JSON, unknown `type` tags, blank lines, invalid UTF-8 and lines
//! longer than [`MAX_LINE_LENGTH`] are logged and skipped.
//!
//! ## Module Overview
//!
//! - [`common::message`] - The closed [`Message`] union and session metadata.
//! - [`common::codec`] - Line framing on top of `tokio_util`'s `LinesCodec`.
//! - [`common::error`] - [`ProtocolError`].
//! - [`common::types`] - Protocol constants and clock helpers.

pub mod common;

pub use common::{codec::*, error::*, message::*, types::*};
