//! # `phrasehunt-coordinator`: block server for distributed phrase search
//!
//! The coordinator owns one search (pattern, target address, word count) and
//! cuts its index space into contiguous blocks. Agents connect over TCP, speak
//! the line-delimited JSON protocol from [`phrasehunt_proto`], and ask for
//! blocks one at a time.
//!
//! ## Highlights
//!
//! - **Adaptive blocks**: block size follows the size of the space, so a
//!   2048-candidate pattern and a full 12-word search both spread across
//!   agents.
//! - **Lazy queue**: only a bounded window of pending blocks exists at once.
//! - **Fault recovery**: blocks of agents that disconnect, fall silent or stop
//!   reporting progress go back to the end of the queue.
//! - **Resumable**: the contiguous completed prefix is checkpointed and picked
//!   up again on restart.
//! - **Exit on completion**: once every block is done, agents receive
//!   `SHUTDOWN` and the process exits.
//!
//! ## Usage
//!
//! ```bash
//! phrasehunt-coordinator --target-address 1Abc... \
//!     --pattern "abandon ? ? ability ..." --word-count 12
//! ```
//!
//! ## Module Overview
//!
//! - [`server`] - state machine, connection handling, housekeeping and
//!   configuration.

pub mod server;
