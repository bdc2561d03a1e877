//! The per-range scan loop.
//!
//! [`scan_range`] walks `[start, end)` with a [`Cursor`](crate::Cursor),
//! splices each tuple into the fixed words, filters on the mnemonic checksum
//! and derives the address of every valid candidate exactly once. Matches and
//! progress are handed to a [`ScanSink`]; the loop itself owns no shared state.

use crate::{
    IndexRange, PhraseDeriver, ProgressPolicy, SearchSpace, decimal::as_decimal, progress::Throttle,
};
use num_bigint::BigUint;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A phrase whose derived address matched the target.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoundResult {
    pub phrase: String,
    /// Private key in wallet import format.
    pub derived_key: String,
    pub derived_address: String,
    #[serde(with = "as_decimal")]
    pub index: BigUint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<u64>,
}

/// Everything a worker needs to evaluate candidates.
pub struct SearchJob {
    pub space: SearchSpace,
    pub target_address: String,
    pub deriver: Arc<dyn PhraseDeriver>,
}

impl SearchJob {
    pub fn new(
        space: SearchSpace,
        target_address: impl Into<String>,
        deriver: Arc<dyn PhraseDeriver>,
    ) -> Self {
        Self {
            space,
            target_address: target_address.into().trim().to_string(),
            deriver,
        }
    }

    pub fn total(&self) -> &BigUint {
        self.space.total()
    }
}

impl core::fmt::Debug for SearchJob {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SearchJob")
            .field("word_count", &self.space.word_count())
            .field("unknown", &self.space.unknown_count())
            .field("total", self.space.total())
            .field("target_address", &self.target_address)
            .finish_non_exhaustive()
    }
}

/// Receives the output of [`scan_range`].
pub trait ScanSink {
    /// `next` is the first index not yet evaluated and `processed` the number
    /// evaluated so far by this scan.
    fn progress(&mut self, next: &BigUint, processed: u64, last_phrase: &str);

    fn found(&mut self, result: FoundResult);
}

/// How a scan ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanOutcome {
    /// First index not evaluated. Equal to the range end when complete.
    pub next: BigUint,
    pub processed: u64,
    pub found: usize,
    pub completed: bool,
}

/// Scans `range` until it is exhausted or `cancel` fires.
///
/// A final progress report is always delivered before returning, so the sink
/// sees the exact resume point even when cancelled between throttle
/// boundaries.
pub fn scan_range<S: ScanSink>(
    job: &SearchJob,
    range: &IndexRange,
    policy: ProgressPolicy,
    cancel: &CancellationToken,
    sink: &mut S,
) -> ScanOutcome {
    let mut outcome = ScanOutcome {
        next: range.start.clone(),
        processed: 0,
        found: 0,
        completed: range.is_empty(),
    };
    if range.is_empty() {
        return outcome;
    }

    let indexer = job.space.indexer();
    let mut cursor = match indexer.cursor(&range.start) {
        Ok(cursor) => cursor,
        Err(_e) => {
            #[cfg(feature = "tracing")]
            tracing::error!("Cannot scan {range}: {_e}");
            return outcome;
        }
    };

    // `None` only for ranges wider than u64, which never finish anyway.
    let limit = range.len().to_u64();
    let mut throttle = Throttle::new(policy);
    let mut phrase = String::with_capacity(job.space.word_count() * 9);
    let mut processed = 0u64;

    while !limit.is_some_and(|l| processed >= l) {
        if cancel.is_cancelled() {
            #[cfg(feature = "tracing")]
            tracing::debug!("Scan of {range} cancelled after {processed} candidates");
            break;
        }

        job.space.splice_into(cursor.words(), &mut phrase);
        if job.deriver.is_valid_mnemonic(&phrase) {
            match job.deriver.derive_address(&phrase) {
                Ok(key) if key.address == job.target_address => {
                    let index = &range.start + processed;
                    #[cfg(feature = "tracing")]
                    tracing::info!("Match at index {index}: {}", key.address);
                    outcome.found += 1;
                    sink.found(FoundResult {
                        phrase: phrase.clone(),
                        derived_key: key.wif,
                        derived_address: key.address,
                        index,
                        block_id: None,
                    });
                }
                Ok(_) => {}
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Skipping index {}: {_e}", &range.start + processed);
                }
            }
        }

        processed += 1;
        if throttle.tick() {
            sink.progress(&(&range.start + processed), processed, &phrase);
        }
        if !cursor.advance() {
            // wrapped past the end of the whole space
            break;
        }
    }

    outcome.next = &range.start + processed;
    outcome.processed = processed;
    outcome.completed = outcome.next >= range.end;
    sink.progress(&outcome.next, processed, &phrase);
    outcome
}
