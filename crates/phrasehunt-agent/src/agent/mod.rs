//! Distributed mode: a client that pulls blocks from a coordinator.
//!
//! ## Submodules
//!
//! - [`client`] - reconnect loop and per-connection event loop.
//! - [`connection`] - TCP link with a dedicated writer task.
//! - [`task`] - one assigned block scanned by worker threads.
//! - [`checkpoint`] - per-block resume file.
//! - [`state`] - lifecycle states published on a watch channel.
//! - [`config`] - CLI and environment configuration.
//! - [`error`] - [`AgentError`].

pub mod checkpoint;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod state;
pub mod task;

pub use client::{AgentClient, RunSummary};
pub use config::{AgentConfig, ReconnectPolicy};
pub use error::{AgentError, Result};
pub use state::AgentState;
