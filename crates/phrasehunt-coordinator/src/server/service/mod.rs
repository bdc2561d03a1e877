//! Agent-facing protocol service.
//!
//! Each accepted socket gets one task running [`handler::handle_connection`],
//! which owns both halves of the framed stream and is the only writer on it.
//! Incoming messages are turned into state transitions and replies by
//! [`dispatch::dispatch`], which never touches the socket and is unit tested
//! on its own.
//!
//! ## Structure
//!
//! - [`dispatch`] - message to reply mapping and authorization.
//! - [`handler`] - connection loop, idle timeout and shutdown notice.

pub mod dispatch;
pub mod handler;
