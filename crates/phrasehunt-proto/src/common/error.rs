//! Errors raised while exchanging protocol messages.
//!
//! Only transport failures surface from the codec itself; a malformed line is
//! skipped rather than returned. The remaining variants are produced by the
//! request/response helpers on either side of the link.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The underlying socket failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A message could not be encoded.
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The peer closed the connection.
    #[error("Connection closed by peer")]
    Closed,

    /// No reply arrived in time.
    #[error("Timed out waiting for {what}")]
    Timeout { what: &'static str },

    /// The peer answered with a message that does not fit the exchange.
    #[error("Unexpected {got} while waiting for {expected}")]
    Unexpected {
        expected: &'static str,
        got: &'static str,
    },

    /// The peer answered with an `ERROR` message.
    #[error("Rejected by peer: {message}")]
    Rejected { message: String },
}
