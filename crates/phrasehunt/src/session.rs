//! Multi-threaded search sessions.
//!
//! A [`SearchHandle`] runs one OS thread per assigned [`IndexRange`]. Each
//! thread drives [`scan_range`] and merges its progress into a single
//! aggregate behind a mutex at throttle boundaries, using the per-worker
//! "last reported" count to add only the delta. Progress and matches are
//! published as [`SearchEvent`]s on an unbounded channel, so the caller decides
//! how (and on which runtime) to consume them.

use crate::{
    Checkpoint, Error, Eta, FoundResult, IndexRange, PhraseDeriver, ProgressPolicy,
    ProgressSnapshot, RateEstimator, Result, ScanSink, SearchJob, SearchSpace, Wordlist,
    checkpoint::unix_millis, scan_range,
};
use num_bigint::BigUint;
use num_traits::Zero;
use parking_lot::Mutex;
use std::{
    path::PathBuf,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

/// User-facing parameters of a standalone search.
#[derive(Clone, Debug)]
pub struct SearchParams {
    pub pattern: Option<String>,
    pub target_address: String,
    pub word_count: usize,
    pub full_search: bool,
    pub threads: usize,
    pub progress: ProgressPolicy,
    pub checkpoint_path: Option<PathBuf>,
    pub checkpoint_interval: Duration,
    /// Resume from `checkpoint_path` when it matches this session.
    pub resume: bool,
    /// Defaults to the English BIP39 list.
    pub wordlist: Option<Wordlist>,
}

impl SearchParams {
    pub fn new(target_address: impl Into<String>, word_count: usize) -> Self {
        Self {
            pattern: None,
            target_address: target_address.into(),
            word_count,
            full_search: false,
            threads: 1,
            progress: ProgressPolicy::default(),
            checkpoint_path: None,
            checkpoint_interval: Duration::from_secs(5),
            resume: true,
            wordlist: None,
        }
    }

    #[must_use]
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    #[must_use]
    pub fn full_search(mut self, full_search: bool) -> Self {
        self.full_search = full_search;
        self
    }

    #[must_use]
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    #[must_use]
    pub fn progress(mut self, progress: ProgressPolicy) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn checkpoint(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn checkpoint_interval(mut self, interval: Duration) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    #[must_use]
    pub fn resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    #[must_use]
    pub fn wordlist(mut self, wordlist: Wordlist) -> Self {
        self.wordlist = Some(wordlist);
        self
    }

    /// Validates the parameters and builds the search space.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid thread count, a missing
    /// target, a missing wordlist or an invalid pattern.
    pub fn build_space(&self) -> Result<SearchSpace> {
        if self.threads == 0 {
            return Err(Error::InvalidParams {
                reason: "thread count must be greater than 0".to_string(),
            });
        }
        if self.target_address.trim().is_empty() {
            return Err(Error::InvalidParams {
                reason: "a target address is required".to_string(),
            });
        }
        let wordlist = match &self.wordlist {
            Some(list) => list.clone(),
            None => default_wordlist()?,
        };
        SearchSpace::from_params(
            self.pattern.as_deref(),
            self.word_count,
            self.full_search,
            &wordlist,
        )
    }

    fn header(&self) -> CheckpointHeader {
        CheckpointHeader {
            seed_pattern: if self.full_search {
                String::new()
            } else {
                self.pattern.clone().unwrap_or_default()
            },
            target_address: self.target_address.trim().to_string(),
            word_count: self.word_count,
            full_search: self.full_search,
            thread_count: self.threads,
        }
    }
}

#[cfg(feature = "bitcoin")]
fn default_wordlist() -> Result<Wordlist> {
    Ok(Wordlist::english())
}

#[cfg(not(feature = "bitcoin"))]
fn default_wordlist() -> Result<Wordlist> {
    Err(Error::InvalidParams {
        reason: "no wordlist given and the `bitcoin` feature is disabled".to_string(),
    })
}

/// Session fields copied into every checkpoint this run writes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CheckpointHeader {
    pub seed_pattern: String,
    pub target_address: String,
    pub word_count: usize,
    pub full_search: bool,
    pub thread_count: usize,
}

/// Run-level knobs for [`SearchHandle::spawn`].
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    pub progress: ProgressPolicy,
    /// Header for checkpoints produced by [`SearchHandle::checkpoint`].
    pub header: Option<CheckpointHeader>,
    /// Periodic and final checkpoint file. Requires `header`.
    pub checkpoint_path: Option<PathBuf>,
    pub checkpoint_interval: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchStatus {
    Completed,
    Cancelled,
    /// Some position has no candidates; nothing was scanned.
    EmptySpace,
}

/// Final state of a session.
#[derive(Clone, Debug)]
pub struct SearchOutcome {
    pub status: SearchStatus,
    /// Low-water mark at exit.
    pub next_index: BigUint,
    pub total: BigUint,
    pub processed: u64,
    pub found: usize,
    /// Unscanned spans, empty once completed.
    pub remaining: Vec<IndexRange>,
}

#[derive(Clone, Debug)]
pub enum SearchEvent {
    Progress(ProgressSnapshot),
    Found(FoundResult),
    Finished(SearchOutcome),
}

/// Starts a standalone search.
///
/// With `resume` set and a matching checkpoint on disk, the session continues
/// from the recorded ranges; a non-matching or unreadable checkpoint is
/// ignored and the search starts at index 0.
///
/// # Errors
///
/// Returns configuration errors only; the search itself never fails.
pub fn start_search(params: SearchParams, deriver: Arc<dyn PhraseDeriver>) -> Result<SearchHandle> {
    let space = params.build_space()?;
    let total = space.total().clone();
    let job = Arc::new(SearchJob::new(space, params.target_address.clone(), deriver));

    let ranges = match resume_point(&params, &total) {
        Some(ranges) => ranges,
        None => IndexRange::new(BigUint::zero(), total.clone()).split(params.threads),
    };

    #[cfg(feature = "tracing")]
    tracing::info!(
        "Starting search over {total} candidates with {} worker(s)",
        ranges.len()
    );

    SearchHandle::spawn(
        job,
        ranges,
        RunOptions {
            progress: params.progress,
            header: Some(params.header()),
            checkpoint_path: params.checkpoint_path.clone(),
            checkpoint_interval: params.checkpoint_interval,
        },
    )
}

fn resume_point(params: &SearchParams, total: &BigUint) -> Option<Vec<IndexRange>> {
    if !params.resume {
        return None;
    }
    let path = params.checkpoint_path.as_ref()?;
    let checkpoint = match Checkpoint::load(path) {
        Ok(checkpoint) => checkpoint?,
        Err(_e) => {
            #[cfg(feature = "tracing")]
            tracing::warn!("Ignoring unreadable checkpoint {}: {_e}", path.display());
            return None;
        }
    };
    if !checkpoint.matches(
        &params.target_address,
        params.pattern.as_deref(),
        params.word_count,
        params.full_search,
        total,
    ) {
        #[cfg(feature = "tracing")]
        tracing::info!("Checkpoint {} belongs to another search", path.display());
        return None;
    }

    #[cfg(feature = "tracing")]
    tracing::info!(
        "Resuming from checkpoint at {} of {}",
        checkpoint.current_index,
        checkpoint.total_index
    );

    let ranges = checkpoint.resume_ranges();
    match ranges.as_slice() {
        // The open tail is re-split across the requested threads.
        [tail] if tail.end == *total => Some(tail.split(params.threads)),
        _ => Some(ranges),
    }
}

#[derive(Debug)]
struct Slot {
    next: BigUint,
    end: BigUint,
    reported: u64,
}

#[derive(Debug)]
struct Aggregate {
    slots: Vec<Slot>,
    /// Upper bound of all ranges; the low-water mark once every slot is done.
    end: BigUint,
    processed: u64,
    found: usize,
    rate: RateEstimator,
    last_phrase: Option<String>,
    last_checkpoint: Instant,
}

impl Aggregate {
    fn low_water(&self) -> BigUint {
        self.slots
            .iter()
            .filter(|s| s.next < s.end)
            .map(|s| &s.next)
            .min()
            .unwrap_or(&self.end)
            .clone()
    }

    fn remaining(&self) -> Vec<IndexRange> {
        self.slots
            .iter()
            .filter(|s| s.next < s.end)
            .map(|s| IndexRange::new(s.next.clone(), s.end.clone()))
            .collect()
    }

    fn remaining_len(&self) -> BigUint {
        self.slots
            .iter()
            .filter(|s| s.next < s.end)
            .map(|s| &s.end - &s.next)
            .sum()
    }

    fn snapshot(&self, total: &BigUint) -> ProgressSnapshot {
        let rate = self.rate.rate();
        ProgressSnapshot {
            current: self.low_water(),
            total: total.clone(),
            processed: self.processed,
            rate,
            eta: Eta::from_rate(&self.remaining_len(), rate),
            last_phrase: self.last_phrase.clone(),
        }
    }

    fn checkpoint(&self, header: &CheckpointHeader, total: &BigUint) -> Checkpoint {
        let remaining = self.remaining();
        Checkpoint {
            seed_pattern: header.seed_pattern.clone(),
            target_address: header.target_address.clone(),
            word_count: header.word_count,
            full_search: header.full_search,
            thread_count: header.thread_count,
            timestamp: unix_millis(),
            current_index: self.low_water(),
            total_index: total.clone(),
            last_checked_phrase: self.last_phrase.clone(),
            // only `[low_water, total)` is implied by the low-water mark alone
            remaining_ranges: match remaining.as_slice() {
                [] => Vec::new(),
                [tail] if tail.end == *total => Vec::new(),
                _ => remaining,
            },
        }
    }
}

struct Shared {
    job: Arc<SearchJob>,
    options: RunOptions,
    state: Mutex<Aggregate>,
    /// Serializes checkpoint file writes.
    writer: Mutex<()>,
    events: mpsc::UnboundedSender<SearchEvent>,
}

impl Shared {
    fn publish(&self, event: SearchEvent) {
        // A dropped receiver only means nobody is listening.
        let _ = self.events.send(event);
    }

    fn build_checkpoint(&self) -> Option<Checkpoint> {
        let header = self.options.header.as_ref()?;
        Some(self.state.lock().checkpoint(header, self.job.total()))
    }

    fn write_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let Some(path) = &self.options.checkpoint_path else {
            return Ok(());
        };
        let _guard = self.writer.lock();
        checkpoint.save(path)
    }

    fn persist(&self, checkpoint: &Checkpoint) {
        if let Err(_e) = self.write_checkpoint(checkpoint) {
            #[cfg(feature = "tracing")]
            tracing::warn!("Failed to write checkpoint: {_e}");
        }
    }

    fn outcome(&self, status: SearchStatus) -> SearchOutcome {
        let state = self.state.lock();
        SearchOutcome {
            status,
            next_index: state.low_water(),
            total: self.job.total().clone(),
            processed: state.processed,
            found: state.found,
            remaining: state.remaining(),
        }
    }
}

struct WorkerSink {
    slot: usize,
    shared: Arc<Shared>,
}

impl ScanSink for WorkerSink {
    fn progress(&mut self, next: &BigUint, processed: u64, last_phrase: &str) {
        let now = Instant::now();
        let shared = &self.shared;
        let (snapshot, checkpoint) = {
            let mut state = shared.state.lock();
            let slot = &mut state.slots[self.slot];
            let delta = processed.saturating_sub(slot.reported);
            slot.reported = processed;
            if *next > slot.next {
                slot.next = next.clone();
            }
            state.processed += delta;
            let processed = state.processed;
            state.rate.record(now, processed);
            if !last_phrase.is_empty() {
                state.last_phrase = Some(last_phrase.to_owned());
            }

            let due = now.duration_since(state.last_checkpoint) >= shared.options.checkpoint_interval;
            let checkpoint = match (&shared.options.header, &shared.options.checkpoint_path) {
                (Some(header), Some(_)) if due => {
                    state.last_checkpoint = now;
                    Some(state.checkpoint(header, shared.job.total()))
                }
                _ => None,
            };
            (state.snapshot(shared.job.total()), checkpoint)
        };

        shared.publish(SearchEvent::Progress(snapshot));
        if let Some(checkpoint) = checkpoint {
            shared.persist(&checkpoint);
        }
    }

    fn found(&mut self, result: FoundResult) {
        self.shared.state.lock().found += 1;
        self.shared.publish(SearchEvent::Found(result));
    }
}

/// A running search. Dropping the handle does not stop the workers; call
/// [`Self::cancel`] first.
pub struct SearchHandle {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    events: mpsc::UnboundedReceiver<SearchEvent>,
    done: oneshot::Receiver<SearchOutcome>,
}

impl core::fmt::Debug for SearchHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SearchHandle")
            .field("job", &self.shared.job)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl SearchHandle {
    /// Spawns one worker thread per range.
    ///
    /// An empty search space finishes immediately with
    /// [`SearchStatus::EmptySpace`]; an empty range list finishes immediately
    /// as completed.
    ///
    /// # Errors
    ///
    /// Fails if a thread cannot be spawned. Workers already started are
    /// cancelled.
    pub fn spawn(job: Arc<SearchJob>, ranges: Vec<IndexRange>, options: RunOptions) -> Result<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        let ranges: Vec<IndexRange> = ranges.into_iter().filter(|r| !r.is_empty()).collect();
        let end = ranges
            .iter()
            .map(|r| &r.end)
            .max()
            .cloned()
            .unwrap_or_else(|| job.total().clone());
        let slots = ranges
            .iter()
            .map(|r| Slot {
                next: r.start.clone(),
                end: r.end.clone(),
                reported: 0,
            })
            .collect();

        let shared = Arc::new(Shared {
            job: Arc::clone(&job),
            options,
            state: Mutex::new(Aggregate {
                slots,
                end,
                processed: 0,
                found: 0,
                rate: RateEstimator::new(),
                last_phrase: None,
                last_checkpoint: Instant::now(),
            }),
            writer: Mutex::new(()),
            events: events_tx,
        });

        let handle = Self {
            shared: Arc::clone(&shared),
            cancel: cancel.clone(),
            events: events_rx,
            done: done_rx,
        };

        if job.space.is_empty() {
            #[cfg(feature = "tracing")]
            tracing::info!("Search space is empty, nothing to scan");
            finish(&shared, SearchStatus::EmptySpace, done_tx);
            return Ok(handle);
        }

        let mut workers = Vec::with_capacity(ranges.len());
        for (slot, range) in ranges.into_iter().enumerate() {
            let mut sink = WorkerSink {
                slot,
                shared: Arc::clone(&shared),
            };
            let worker_cancel = cancel.clone();
            let policy = shared.options.progress;
            let job = Arc::clone(&job);
            let spawned = thread::Builder::new()
                .name(format!("phrasehunt-worker-{slot}"))
                .spawn(move || {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Worker {slot} scanning {range}");
                    scan_range(&job, &range, policy, &worker_cancel, &mut sink)
                });
            match spawned {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    cancel.cancel();
                    return Err(e.into());
                }
            }
        }

        let supervisor_cancel = cancel.clone();
        let supervisor_shared = Arc::clone(&shared);
        let supervisor = thread::Builder::new()
            .name("phrasehunt-supervisor".to_string())
            .spawn(move || {
                for worker in workers {
                    if worker.join().is_err() {
                        #[cfg(feature = "tracing")]
                        tracing::error!("A search worker panicked");
                        supervisor_cancel.cancel();
                    }
                }
                let status = if supervisor_shared.state.lock().remaining().is_empty() {
                    SearchStatus::Completed
                } else {
                    SearchStatus::Cancelled
                };
                finish(&supervisor_shared, status, done_tx);
            });
        if let Err(e) = supervisor {
            cancel.cancel();
            return Err(e.into());
        }

        Ok(handle)
    }

    /// Requests cooperative cancellation. Workers stop after their current
    /// candidate and a final checkpoint is written.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn job(&self) -> &Arc<SearchJob> {
        &self.shared.job
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.shared.state.lock().snapshot(self.shared.job.total())
    }

    /// Current resumable state, if this run has a checkpoint header.
    pub fn checkpoint(&self) -> Option<Checkpoint> {
        self.shared.build_checkpoint()
    }

    /// Writes the current state to the configured checkpoint file.
    ///
    /// # Errors
    ///
    /// Fails when no checkpoint file is configured or the write fails.
    pub fn save_checkpoint(&self) -> Result<Checkpoint> {
        let checkpoint = self
            .shared
            .build_checkpoint()
            .filter(|_| self.shared.options.checkpoint_path.is_some())
            .ok_or_else(|| Error::InvalidParams {
                reason: "no checkpoint file configured".to_string(),
            })?;
        self.shared.write_checkpoint(&checkpoint)?;
        Ok(checkpoint)
    }

    /// Next event, or `None` once the session finished and all events were
    /// drained.
    pub async fn next_event(&mut self) -> Option<SearchEvent> {
        self.events.recv().await
    }

    pub fn try_next_event(&mut self) -> Option<SearchEvent> {
        self.events.try_recv().ok()
    }

    /// Consumes the handle into an event stream. Keep a
    /// [`Self::cancellation_token`] to stop it.
    pub fn into_stream(self) -> UnboundedReceiverStream<SearchEvent> {
        UnboundedReceiverStream::new(self.events)
    }

    /// Waits for every worker to exit.
    pub async fn wait(self) -> SearchOutcome {
        match self.done.await {
            Ok(outcome) => outcome,
            Err(_) => self.shared.outcome(SearchStatus::Cancelled),
        }
    }
}

fn finish(shared: &Shared, status: SearchStatus, done: oneshot::Sender<SearchOutcome>) {
    if status != SearchStatus::EmptySpace {
        if let Some(checkpoint) = shared.build_checkpoint() {
            shared.persist(&checkpoint);
        }
    }
    let outcome = shared.outcome(status);

    #[cfg(feature = "tracing")]
    tracing::info!(
        "Search finished ({:?}) at {} of {} after {} candidates, {} match(es)",
        outcome.status,
        outcome.next_index,
        outcome.total,
        outcome.processed,
        outcome.found
    );

    shared.publish(SearchEvent::Finished(outcome.clone()));
    let _ = done.send(outcome);
}
