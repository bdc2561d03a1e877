//! Per-block progress file.
//!
//! The coordinator only remembers which blocks are done, so an agent that
//! loses its connection mid-block would otherwise rescan from the block
//! start. After every progress report the agent records how far it got; when
//! the same block comes back it resumes from there.

use num_bigint::BigUint;
use phrasehunt::{IndexRange, decimal::as_decimal, read_json, unix_millis, write_json_atomic};
use serde::{Deserialize, Serialize};
use std::{fs, io, path::Path};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCheckpoint {
    pub block_id: u64,
    #[serde(with = "as_decimal")]
    pub start_index: BigUint,
    #[serde(with = "as_decimal")]
    pub end_index: BigUint,
    /// Every index of the block below this one has been evaluated.
    #[serde(with = "as_decimal")]
    pub current_index: BigUint,
    pub timestamp: u64,
}

impl AgentCheckpoint {
    pub fn new(block_id: u64, range: &IndexRange, current_index: BigUint) -> Self {
        Self {
            block_id,
            start_index: range.start.clone(),
            end_index: range.end.clone(),
            current_index,
            timestamp: unix_millis(),
        }
    }

    /// Returns `Ok(None)` when the file does not exist.
    ///
    /// # Errors
    ///
    /// Fails when the file exists but cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> phrasehunt::Result<Option<Self>> {
        read_json(path)
    }

    /// # Errors
    ///
    /// Fails when the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> phrasehunt::Result<()> {
        write_json_atomic(path, self)
    }

    /// Removes the file once its block is done.
    ///
    /// # Errors
    ///
    /// Fails when the file exists but cannot be removed.
    pub fn clear(path: impl AsRef<Path>) -> io::Result<()> {
        match fs::remove_file(path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    /// Where to restart `block_id` over `range`, if this checkpoint describes
    /// that exact block.
    pub fn resume_point(&self, block_id: u64, range: &IndexRange) -> Option<BigUint> {
        let same_block = self.block_id == block_id
            && self.start_index == range.start
            && self.end_index == range.end;
        (same_block && self.current_index > range.start && self.current_index <= range.end)
            .then(|| self.current_index.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: u32, end: u32) -> IndexRange {
        IndexRange::new(BigUint::from(start), BigUint::from(end))
    }

    #[test]
    fn save_load_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.json");
        assert_eq!(AgentCheckpoint::load(&path).unwrap(), None);

        let checkpoint = AgentCheckpoint::new(3, &range(100, 200), BigUint::from(150u32));
        checkpoint.save(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["blockId"], 3);
        assert_eq!(value["currentIndex"], "150");

        assert_eq!(AgentCheckpoint::load(&path).unwrap(), Some(checkpoint));
        AgentCheckpoint::clear(&path).unwrap();
        assert!(!path.exists());
        AgentCheckpoint::clear(&path).unwrap();
    }

    #[test]
    fn resumes_only_the_same_block() {
        let checkpoint = AgentCheckpoint::new(3, &range(100, 200), BigUint::from(150u32));
        assert_eq!(
            checkpoint.resume_point(3, &range(100, 200)),
            Some(BigUint::from(150u32))
        );
        assert_eq!(checkpoint.resume_point(4, &range(100, 200)), None);
        // Same id after a coordinator restart, different span.
        assert_eq!(checkpoint.resume_point(3, &range(0, 100)), None);

        let untouched = AgentCheckpoint::new(3, &range(100, 200), BigUint::from(100u32));
        assert_eq!(untouched.resume_point(3, &range(100, 200)), None);

        let finished = AgentCheckpoint::new(3, &range(100, 200), BigUint::from(200u32));
        assert_eq!(
            finished.resume_point(3, &range(100, 200)),
            Some(BigUint::from(200u32))
        );
    }
}
