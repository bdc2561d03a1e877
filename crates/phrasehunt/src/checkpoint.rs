//! Resumable search state on disk.
//!
//! The document is a single JSON object:
//!
//! ```json
//! {
//!   "seedPhrase": "abandon ? ? ...",
//!   "bitcoinAddress": "1LqBGSKuX5yYUonjxT5qGfpUsXKYYWeabA",
//!   "wordCount": 12,
//!   "fullSearch": false,
//!   "threadCount": 8,
//!   "timestamp": 1760000000000,
//!   "currentCombination": "4194304",
//!   "totalCombinations": "8589934592",
//!   "lastCheckedPhrase": "abandon zoo ...",
//!   "remainingRanges": [{ "start": "4194304", "end": "1073741824" }]
//! }
//! ```
//!
//! `currentCombination` is the low-water mark: every index below it has been
//! evaluated. `remainingRanges`, when present, lists the exact unscanned spans
//! of each worker so a multi-threaded run resumes without rescanning.

use crate::{IndexRange, Result, decimal::as_decimal};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{
    fs,
    io::{self, Write},
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    #[serde(rename = "seedPhrase", default)]
    pub seed_pattern: String,
    #[serde(rename = "bitcoinAddress")]
    pub target_address: String,
    pub word_count: usize,
    #[serde(default)]
    pub full_search: bool,
    #[serde(default)]
    pub thread_count: usize,
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    pub timestamp: u64,
    #[serde(rename = "currentCombination", with = "as_decimal")]
    pub current_index: BigUint,
    #[serde(rename = "totalCombinations", with = "as_decimal")]
    pub total_index: BigUint,
    #[serde(default)]
    pub last_checked_phrase: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remaining_ranges: Vec<IndexRange>,
}

impl Checkpoint {
    /// Loads a checkpoint, returning `Ok(None)` when the file does not exist.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Option<Self>> {
        read_json(path)
    }

    /// Writes the checkpoint atomically.
    ///
    /// # Errors
    ///
    /// Fails if the temporary file cannot be written or renamed into place.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        write_json_atomic(path, self)
    }

    /// `true` when this checkpoint belongs to the described session.
    ///
    /// The address must always match. A partial search must also have the same
    /// pattern, and both sides must agree on the word count, the search mode
    /// and the size of the space.
    pub fn matches(
        &self,
        target_address: &str,
        pattern: Option<&str>,
        word_count: usize,
        full_search: bool,
        total: &BigUint,
    ) -> bool {
        if self.target_address.trim() != target_address.trim()
            || self.word_count != word_count
            || self.full_search != full_search
            || &self.total_index != total
        {
            return false;
        }
        full_search || normalize(&self.seed_pattern) == normalize(pattern.unwrap_or_default())
    }

    /// The spans a resumed session still has to scan.
    ///
    /// Uses the recorded per-worker ranges when they are well formed and lie
    /// inside the space, and falls back to `[currentCombination, total)`.
    pub fn resume_ranges(&self) -> Vec<IndexRange> {
        let recorded: Vec<IndexRange> = self
            .remaining_ranges
            .iter()
            .filter(|r| !r.is_empty())
            .cloned()
            .collect();
        let well_formed = !recorded.is_empty()
            && recorded
                .iter()
                .all(|r| r.start >= self.current_index && r.end <= self.total_index);
        if well_formed {
            return recorded;
        }
        let tail = IndexRange::new(self.current_index.clone(), self.total_index.clone());
        if tail.is_empty() { Vec::new() } else { vec![tail] }
    }

    pub fn is_finished(&self) -> bool {
        self.current_index >= self.total_index
    }
}

fn normalize(pattern: &str) -> String {
    pattern
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Milliseconds since the Unix epoch.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

/// Reads a JSON document, returning `Ok(None)` when the file does not exist.
///
/// # Errors
///
/// Fails on any other I/O error or when the document does not parse.
pub fn read_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Option<T>> {
    let bytes = match fs::read(path.as_ref()) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Serializes `value` next to `path` and renames it into place, so readers
/// never observe a partially written file.
///
/// # Errors
///
/// Fails if the temporary file cannot be written, flushed or renamed.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    let result = (|| -> Result<()> {
        let mut file = fs::File::create(&tmp)?;
        serde_json::to_writer_pretty(&mut file, value)?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        Ok(())
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Checkpoint {
        Checkpoint {
            seed_pattern: "abandon ? ?".to_string(),
            target_address: "1Target".to_string(),
            word_count: 12,
            full_search: false,
            thread_count: 4,
            timestamp: 1_760_000_000_000,
            current_index: BigUint::from(100u32),
            total_index: BigUint::from(1_000u32),
            last_checked_phrase: Some("abandon zoo zoo".to_string()),
            remaining_ranges: Vec::new(),
        }
    }

    #[test]
    fn uses_the_documented_field_names() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["seedPhrase"], "abandon ? ?");
        assert_eq!(value["bitcoinAddress"], "1Target");
        assert_eq!(value["wordCount"], 12);
        assert_eq!(value["fullSearch"], false);
        assert_eq!(value["threadCount"], 4);
        assert_eq!(value["currentCombination"], "100");
        assert_eq!(value["totalCombinations"], "1000");
        assert_eq!(value["lastCheckedPhrase"], "abandon zoo zoo");
        assert!(value.get("remainingRanges").is_none());
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("checkpoint.json");
        assert!(Checkpoint::load(&path).unwrap().is_none());

        let mut checkpoint = sample();
        checkpoint.remaining_ranges = vec![
            IndexRange::new(BigUint::from(100u32), BigUint::from(400u32)),
            IndexRange::new(BigUint::from(550u32), BigUint::from(1_000u32)),
        ];
        checkpoint.save(&path).unwrap();

        let loaded = Checkpoint::load(&path).unwrap().unwrap();
        assert_eq!(loaded, checkpoint);
        assert!(!path.with_file_name("checkpoint.json.tmp").exists());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(Checkpoint::load(&path).is_err());
    }

    #[test]
    fn matching_rules() {
        let cp = sample();
        let total = BigUint::from(1_000u32);
        assert!(cp.matches("1Target", Some("ABANDON ?  ?"), 12, false, &total));
        assert!(!cp.matches("1Other", Some("abandon ? ?"), 12, false, &total));
        assert!(!cp.matches("1Target", Some("abandon ? zoo"), 12, false, &total));
        assert!(!cp.matches("1Target", Some("abandon ? ?"), 15, false, &total));
        assert!(!cp.matches("1Target", Some("abandon ? ?"), 12, false, &BigUint::from(9u32)));

        let mut full = sample();
        full.full_search = true;
        assert!(full.matches("1Target", None, 12, true, &total));
    }

    #[test]
    fn resume_ranges_prefers_recorded_spans() {
        let mut cp = sample();
        assert_eq!(
            cp.resume_ranges(),
            vec![IndexRange::new(BigUint::from(100u32), BigUint::from(1_000u32))]
        );

        cp.remaining_ranges = vec![
            IndexRange::new(BigUint::from(100u32), BigUint::from(200u32)),
            IndexRange::new(BigUint::from(700u32), BigUint::from(700u32)),
            IndexRange::new(BigUint::from(800u32), BigUint::from(1_000u32)),
        ];
        assert_eq!(cp.resume_ranges().len(), 2);

        // spans below the low-water mark are not trusted
        cp.remaining_ranges = vec![IndexRange::new(BigUint::from(0u32), BigUint::from(50u32))];
        assert_eq!(cp.resume_ranges()[0].start, BigUint::from(100u32));

        cp.current_index = BigUint::from(1_000u32);
        cp.remaining_ranges.clear();
        assert!(cp.resume_ranges().is_empty());
        assert!(cp.is_finished());
    }
}
