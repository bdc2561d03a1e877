//! Shared message definitions, framing and errors.
//!
//! Nothing here knows about sockets or tasks; both the coordinator and the
//! agent wrap a `TcpStream` in `Framed<_, MessageCodec>` and exchange
//! [`message::Message`] values.

pub mod codec;
pub mod error;
pub mod message;
pub mod types;
