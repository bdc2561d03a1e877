//! # `phrasehunt-agent`: worker for distributed phrase searches
//!
//! An agent scans blocks of a BIP39 phrase search with one OS thread per
//! subrange. It runs in one of two modes:
//!
//! - **`connect`**: registers with a `phrasehunt-coordinator`, rebuilds the
//!   search space from the session it announces, and keeps asking for blocks
//!   until the coordinator sends `SHUTDOWN`. Progress, matches and
//!   completions are reported back; a heartbeat keeps the registration alive.
//!   Lost connections are retried with exponential backoff, and a local
//!   checkpoint lets a block resume where it stopped when it comes back.
//! - **`local`**: searches the whole space on this machine against a regular
//!   session checkpoint.
//!
//! ## Usage
//!
//! ```bash
//! phrasehunt-agent connect --coordinator 10.0.0.1:5050 --threads 8
//! phrasehunt-agent local --target-address 1Abc... --pattern "abandon ? ..."
//! ```
//!
//! ## Module Overview
//!
//! - [`agent`] - coordinator client, block runner and local block checkpoint.
//! - [`local`] - standalone search.
//! - [`cli`] - command-line entry points.
//! - [`telemetry`] - log subscriber.

pub mod agent;
pub mod cli;
pub mod local;
pub mod telemetry;
