//! Error types for phrase-space searches.
//!
//! Only configuration problems are fatal to a session. Everything that can go
//! wrong while the search is running (a single candidate failing to derive, a
//! checkpoint write failing) is recovered locally and surfaced as a log line or
//! a status event instead of one of these errors.

use num_bigint::BigUint;

/// A result type defaulting to this crate's [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All errors produced by `phrasehunt`.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The number of pattern tokens does not match the requested word count.
    #[error("word count mismatch: pattern has {actual} words, expected {expected}")]
    WordCountMismatch { expected: usize, actual: usize },

    /// The requested word count is not a BIP39 phrase length.
    #[error("unsupported word count {0}: expected one of 12, 15, 18, 21 or 24")]
    UnsupportedWordCount(usize),

    /// A fixed word in the pattern is not part of the wordlist.
    #[error("word {word:?} at position {position} is not in the wordlist")]
    UnknownWord { position: usize, word: String },

    /// A pattern token could not be interpreted.
    #[error("invalid pattern token {token:?} at position {position}: {reason}")]
    InvalidPattern {
        position: usize,
        token: String,
        reason: String,
    },

    /// The search parameters are inconsistent.
    #[error("invalid search parameters: {reason}")]
    InvalidParams { reason: String },

    /// An index was decoded outside of `[0, total)`.
    #[error("index {index} is outside of the search space (total {total})")]
    IndexOutOfRange { index: BigUint, total: BigUint },

    /// Reading or writing a checkpoint failed.
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A checkpoint file could not be encoded or decoded.
    #[error("checkpoint format error: {0}")]
    Format(#[from] serde_json::Error),

    /// The wordlist is unusable.
    #[error("invalid wordlist: {reason}")]
    Wordlist { reason: String },
}

/// Failure deriving a key or address for a single candidate phrase.
///
/// Never fatal: the worker skips the candidate and moves on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("derivation failed: {reason}")]
pub struct DeriveError {
    pub reason: String,
}

impl DeriveError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}
