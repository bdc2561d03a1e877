//! Newline-delimited JSON framing.

use crate::{MAX_LINE_LENGTH, Message, ProtocolError};
use bytes::{BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

/// Frames [`Message`]s as single JSON lines.
///
/// Decoding skips, and counts, every line that is not a valid message instead
/// of failing, so one bad peer write never tears down the connection. Only
/// genuine I/O errors are returned.
#[derive(Debug)]
pub struct MessageCodec {
    lines: LinesCodec,
    skipped: u64,
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageCodec {
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_LENGTH)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_length),
            skipped: 0,
        }
    }

    /// Number of lines discarded so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Maps one framed line to a message, or `None` when it has to be skipped.
    fn parse(&mut self, line: &str) -> Option<Message> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        match serde_json::from_str(line) {
            Ok(message) => Some(message),
            Err(_e) => {
                self.skipped += 1;
                #[cfg(feature = "tracing")]
                tracing::warn!("Skipping malformed line ({_e}): {}", preview(line));
                None
            }
        }
    }

    /// Handles a framing error. `Ok` means the offending input was dropped
    /// and decoding can continue.
    fn recover(&mut self, err: LinesCodecError) -> Result<(), ProtocolError> {
        match err {
            LinesCodecError::MaxLineLengthExceeded => {
                self.skipped += 1;
                #[cfg(feature = "tracing")]
                tracing::warn!("Skipping line longer than {MAX_LINE_LENGTH} bytes");
                Ok(())
            }
            // LinesCodec consumes the line before validating UTF-8.
            LinesCodecError::Io(e) if e.kind() == io::ErrorKind::InvalidData => {
                self.skipped += 1;
                #[cfg(feature = "tracing")]
                tracing::warn!("Skipping line that is not UTF-8");
                Ok(())
            }
            LinesCodecError::Io(e) => Err(e.into()),
        }
    }
}

#[cfg(feature = "tracing")]
fn preview(line: &str) -> &str {
    match line.char_indices().nth(120) {
        Some((i, _)) => &line[..i],
        None => line,
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Message>, ProtocolError> {
        loop {
            match self.lines.decode(buf) {
                Ok(Some(line)) => {
                    if let Some(message) = self.parse(&line) {
                        return Ok(Some(message));
                    }
                }
                Ok(None) => return Ok(None),
                Err(e) => self.recover(e)?,
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Message>, ProtocolError> {
        loop {
            match self.lines.decode_eof(buf) {
                Ok(Some(line)) => {
                    if let Some(message) = self.parse(&line) {
                        return Ok(Some(message));
                    }
                }
                Ok(None) => return Ok(None),
                Err(e) => self.recover(e)?,
            }
        }
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        <Self as Encoder<&Message>>::encode(self, &message, dst)
    }
}

impl Encoder<&Message> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, message: &Message, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let json = serde_json::to_vec(message)?;
        dst.reserve(json.len() + 1);
        dst.put_slice(&json);
        dst.put_u8(b'\n');
        Ok(())
    }
}
