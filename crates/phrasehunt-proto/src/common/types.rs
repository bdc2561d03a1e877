//! Protocol constants.

pub use phrasehunt::unix_millis;

/// Protocol revision announced in `HELLO`.
pub const PROTOCOL_VERSION: &str = "1";

/// Longest accepted line, in bytes, excluding the newline.
///
/// A `REPORT_FOUND` for a 24-word phrase is well under 1 KiB; anything near
/// this limit is garbage.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Default coordinator listen port.
pub const DEFAULT_PORT: u16 = 5050;
