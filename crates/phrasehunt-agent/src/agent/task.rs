//! One assigned block, scanned by a pool of worker threads.

use super::checkpoint::AgentCheckpoint;
use num_bigint::BigUint;
use phrasehunt::{
    IndexRange, ProgressPolicy, RunOptions, SearchEvent, SearchHandle, SearchJob, SearchOutcome,
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

/// What the connection loop has to tell the coordinator.
#[derive(Debug)]
pub enum BlockUpdate {
    /// Low-water mark moved and a report is due.
    Progress { current: BigUint, rate: f64 },
    Found(phrasehunt::FoundResult),
    /// Every index of the block was evaluated.
    Completed { processed: u64 },
    /// Workers stopped before the end of the block.
    Stopped { current: BigUint },
}

pub struct BlockRun {
    block_id: u64,
    range: IndexRange,
    handle: SearchHandle,
    current: BigUint,
    rate: f64,
    report_every: Duration,
    last_report: Option<Instant>,
    reported: BigUint,
    checkpoint_path: Option<PathBuf>,
    finished: bool,
}

impl core::fmt::Debug for BlockRun {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BlockRun")
            .field("block_id", &self.block_id)
            .field("range", &self.range)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl BlockRun {
    /// Starts scanning `range`, resuming from the local checkpoint when it
    /// recorded progress for this very block.
    ///
    /// # Errors
    ///
    /// Fails when a worker thread cannot be spawned.
    pub fn start(
        job: Arc<SearchJob>,
        block_id: u64,
        range: IndexRange,
        threads: usize,
        report_every: Duration,
        checkpoint_path: Option<&Path>,
    ) -> phrasehunt::Result<Self> {
        let start = checkpoint_path
            .and_then(|path| match AgentCheckpoint::load(path) {
                Ok(checkpoint) => checkpoint,
                Err(e) => {
                    tracing::warn!("Ignoring unreadable agent checkpoint {}: {e}", path.display());
                    None
                }
            })
            .and_then(|checkpoint| checkpoint.resume_point(block_id, &range))
            .unwrap_or_else(|| range.start.clone());
        if start != range.start {
            tracing::info!("Resuming block {block_id} at {start} (block {range})");
        }

        let remaining = IndexRange::new(start.clone(), range.end.clone());
        let handle = SearchHandle::spawn(
            job,
            remaining.split(threads.max(1)),
            RunOptions {
                progress: ProgressPolicy::Interval(report_every.min(Duration::from_secs(1))),
                ..RunOptions::default()
            },
        )?;

        Ok(Self {
            block_id,
            range,
            handle,
            reported: start.clone(),
            current: start,
            rate: 0.0,
            report_every,
            last_report: None,
            checkpoint_path: checkpoint_path.map(Path::to_path_buf),
            finished: false,
        })
    }

    pub fn block_id(&self) -> u64 {
        self.block_id
    }

    pub fn range(&self) -> &IndexRange {
        &self.range
    }

    /// Low-water mark inside the block.
    pub fn current(&self) -> &BigUint {
        &self.current
    }

    /// Waits for the next update worth sending. Returns `None` after the
    /// final [`BlockUpdate::Completed`] or [`BlockUpdate::Stopped`].
    pub async fn next_update(&mut self) -> Option<BlockUpdate> {
        while !self.finished {
            let update = match self.handle.next_event().await? {
                SearchEvent::Progress(snapshot) => {
                    self.current = snapshot.current;
                    self.rate = snapshot.rate;
                    self.progress_due(Instant::now())
                }
                SearchEvent::Found(mut result) => {
                    result.block_id = Some(self.block_id);
                    Some(BlockUpdate::Found(result))
                }
                SearchEvent::Finished(outcome) => {
                    self.finished = true;
                    Some(self.finish(&outcome))
                }
            };
            if update.is_some() {
                return update;
            }
        }
        None
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Stops the workers without reporting completion and records how far
    /// they got.
    pub async fn stop(self) -> BigUint {
        self.handle.cancel();
        let block_id = self.block_id;
        let range = self.range.clone();
        let path = self.checkpoint_path.clone();
        let outcome = self.handle.wait().await;
        // `next_index` is the block end once every slot finished.
        let current = outcome.next_index.min(range.end.clone());
        if let Some(path) = path {
            save(&path, &AgentCheckpoint::new(block_id, &range, current.clone()));
        }
        tracing::info!("Stopped block {block_id} at {current}");
        current
    }

    fn progress_due(&mut self, now: Instant) -> Option<BlockUpdate> {
        let due = self
            .last_report
            .is_none_or(|at| now.duration_since(at) >= self.report_every);
        if !due || self.current == self.reported {
            return None;
        }
        self.last_report = Some(now);
        self.reported = self.current.clone();
        if let Some(path) = &self.checkpoint_path {
            save(path, &AgentCheckpoint::new(self.block_id, &self.range, self.current.clone()));
        }
        Some(BlockUpdate::Progress {
            current: self.current.clone(),
            rate: self.rate,
        })
    }

    fn finish(&mut self, outcome: &SearchOutcome) -> BlockUpdate {
        if outcome.remaining.is_empty() {
            self.current = self.range.end.clone();
            if let Some(path) = &self.checkpoint_path {
                if let Err(e) = AgentCheckpoint::clear(path) {
                    tracing::warn!("Failed to remove agent checkpoint {}: {e}", path.display());
                }
            }
            BlockUpdate::Completed {
                processed: outcome.processed,
            }
        } else {
            BlockUpdate::Stopped {
                current: outcome.next_index.clone(),
            }
        }
    }
}

fn save(path: &Path, checkpoint: &AgentCheckpoint) {
    if let Err(e) = checkpoint.save(path) {
        tracing::warn!("Failed to write agent checkpoint {}: {e}", path.display());
    }
}
