//! Standalone mode: search the whole space on this machine.
//!
//! Runs the same worker fan-out as a distributed agent, but over `[0, total)`
//! and against a regular session checkpoint, so an interrupted run picks up
//! where it stopped.

use crate::agent::config::{load_wordlist, resolve_threads};
use anyhow::bail;
use clap::Args;
use phrasehunt::{
    FoundResult, PhraseDeriver, ProgressPolicy, SearchEvent, SearchOutcome, SearchParams,
    start_search,
};
use std::{
    fs::OpenOptions,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;

/// Options for `phrasehunt-agent local`.
#[derive(Args, Debug, Clone)]
pub struct LocalArgs {
    /// Address the recovered phrase must derive.
    ///
    /// Environment variable: `TARGET_ADDRESS`
    #[arg(long, env = "TARGET_ADDRESS")]
    pub target_address: String,

    /// Seed pattern, one token per word: a known word, `?` for any word, or a
    /// glob such as `ab*`. Required unless `--full-search` is set.
    ///
    /// Environment variable: `SEED_PATTERN`
    #[arg(long, env = "SEED_PATTERN")]
    pub pattern: Option<String>,

    /// Number of words in the phrase (12, 15, 18, 21 or 24).
    ///
    /// Environment variable: `WORD_COUNT`
    #[arg(long, env = "WORD_COUNT", default_value_t = 12)]
    pub word_count: usize,

    /// Treat every position as unknown and ignore the pattern.
    ///
    /// Environment variable: `FULL_SEARCH`
    #[arg(long, env = "FULL_SEARCH", default_value_t = false)]
    pub full_search: bool,

    /// Worker threads (0 = one per CPU).
    ///
    /// Environment variable: `THREADS`
    #[arg(long, env = "THREADS", default_value_t = 0)]
    pub threads: usize,

    /// File with one word per line replacing the English BIP39 list.
    ///
    /// Environment variable: `WORDLIST_FILE`
    #[arg(long, env = "WORDLIST_FILE")]
    pub wordlist: Option<PathBuf>,

    /// Checkpoint file, read on start and rewritten while searching.
    ///
    /// Environment variable: `CHECKPOINT_FILE`
    #[arg(long, env = "CHECKPOINT_FILE", default_value = "checkpoint.json")]
    pub checkpoint: PathBuf,

    /// Seconds between checkpoint writes.
    ///
    /// Environment variable: `CHECKPOINT_INTERVAL_SECS`
    #[arg(long, env = "CHECKPOINT_INTERVAL_SECS", default_value_t = 5)]
    pub checkpoint_interval_secs: u64,

    /// Ignore an existing checkpoint and start at index 0.
    ///
    /// Environment variable: `FRESH_START`
    #[arg(long, env = "FRESH_START", default_value_t = false)]
    pub fresh: bool,

    /// Append every match to this JSON-lines file.
    ///
    /// Environment variable: `RESULTS_FILE`
    #[arg(long, env = "RESULTS_FILE")]
    pub results: Option<PathBuf>,

    /// Seconds between progress log lines.
    ///
    /// Environment variable: `LOG_INTERVAL_SECS`
    #[arg(long, env = "LOG_INTERVAL_SECS", default_value_t = 10)]
    pub log_interval_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LocalConfig {
    pub params: SearchParams,
    pub results_path: Option<PathBuf>,
    pub log_interval: Duration,
}

impl TryFrom<LocalArgs> for LocalConfig {
    type Error = anyhow::Error;

    fn try_from(args: LocalArgs) -> anyhow::Result<Self> {
        if args.target_address.trim().is_empty() {
            bail!("--target-address must not be empty");
        }
        if !args.full_search && args.pattern.is_none() {
            bail!("--pattern is required unless --full-search is set");
        }
        if args.checkpoint_interval_secs == 0 {
            bail!("--checkpoint-interval-secs must be greater than 0");
        }

        let mut params = SearchParams::new(args.target_address.trim(), args.word_count)
            .full_search(args.full_search)
            .threads(resolve_threads(args.threads))
            .progress(ProgressPolicy::Interval(Duration::from_millis(500)))
            .checkpoint(args.checkpoint)
            .checkpoint_interval(Duration::from_secs(args.checkpoint_interval_secs))
            .resume(!args.fresh)
            .wordlist(load_wordlist(args.wordlist.as_ref())?);
        if let Some(pattern) = args.pattern {
            params = params.pattern(pattern);
        }
        // Surface pattern errors before any thread starts.
        params.build_space()?;

        Ok(Self {
            params,
            results_path: args.results,
            log_interval: Duration::from_secs(args.log_interval_secs),
        })
    }
}

#[derive(Clone, Debug)]
pub struct LocalReport {
    pub outcome: SearchOutcome,
    pub found: Vec<FoundResult>,
}

/// Runs a standalone search until it completes or `shutdown` fires. On
/// shutdown the workers stop and a final checkpoint is written.
///
/// # Errors
///
/// Returns configuration errors only.
pub async fn run(
    config: LocalConfig,
    deriver: Arc<dyn PhraseDeriver>,
    shutdown: CancellationToken,
) -> phrasehunt::Result<LocalReport> {
    let LocalConfig {
        params,
        results_path,
        log_interval,
    } = config;
    let mut handle = start_search(params, deriver)?;
    let mut found = Vec::new();
    let mut last_log = Instant::now();
    let mut stopping = false;

    loop {
        let event = tokio::select! {
            () = shutdown.cancelled(), if !stopping => {
                tracing::info!("Stopping search, writing checkpoint");
                handle.cancel();
                stopping = true;
                continue;
            }
            event = handle.next_event() => event,
        };
        match event {
            Some(SearchEvent::Progress(snapshot)) => {
                if last_log.elapsed() >= log_interval {
                    last_log = Instant::now();
                    tracing::info!(
                        "Checked up to {}/{} at {:.0}/s, ETA {}; last phrase: {}",
                        snapshot.current,
                        snapshot.total,
                        snapshot.rate,
                        snapshot.eta,
                        snapshot.last_phrase.as_deref().unwrap_or("-")
                    );
                }
            }
            Some(SearchEvent::Found(result)) => {
                tracing::warn!(
                    "Found phrase for {} at index {}",
                    result.derived_address,
                    result.index
                );
                if let Some(path) = &results_path {
                    if let Err(e) = append_result(path, &result) {
                        tracing::error!("Failed to record result in {}: {e}", path.display());
                    }
                }
                found.push(result);
            }
            Some(SearchEvent::Finished(outcome)) => return Ok(LocalReport { outcome, found }),
            None => break,
        }
    }

    Ok(LocalReport {
        outcome: handle.wait().await,
        found,
    })
}

/// Appends one JSON line and syncs it to disk.
fn append_result(path: &Path, result: &FoundResult) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut line = serde_json::to_vec(result)?;
    line.push(b'\n');
    file.write_all(&line)?;
    file.sync_data()
}

#[cfg(test)]
mod tests {
    use super::*;
    use phrasehunt::{Checkpoint, DeriveError, DerivedKey, SearchStatus, Wordlist};
    use num_bigint::BigUint;

    const PATTERN: &str = "w0000 w0001 w0002 w0003 w0004 w0005 w0006 w0007 w0008 w0009 ? ?";

    struct Slow {
        delay: Duration,
    }

    impl PhraseDeriver for Slow {
        fn is_valid_mnemonic(&self, _phrase: &str) -> bool {
            true
        }

        fn derive_address(&self, phrase: &str) -> Result<DerivedKey, DeriveError> {
            std::thread::sleep(self.delay);
            Ok(DerivedKey {
                wif: format!("wif:{phrase}"),
                address: format!("addr:{phrase}"),
            })
        }
    }

    fn config(dir: &Path, target: &str, threads: usize) -> LocalConfig {
        let wordlist = Wordlist::from_words((0..16).map(|i| format!("w{i:04}"))).unwrap();
        LocalConfig {
            params: SearchParams::new(target, 12)
                .pattern(PATTERN)
                .threads(threads)
                .checkpoint(dir.join("checkpoint.json"))
                .checkpoint_interval(Duration::from_millis(50))
                .wordlist(wordlist),
            results_path: Some(dir.join("found.jsonl")),
            log_interval: Duration::from_secs(60),
        }
    }

    fn deriver(delay: Duration) -> Arc<dyn PhraseDeriver> {
        Arc::new(Slow { delay })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn finds_the_phrase_and_records_it() {
        let dir = tempfile::tempdir().unwrap();
        // index 255: both unknown positions at the last word
        let target = format!("addr:{}", PATTERN.replace('?', "w0015"));
        let report = run(
            config(dir.path(), &target, 4),
            deriver(Duration::ZERO),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.outcome.status, SearchStatus::Completed);
        assert_eq!(report.outcome.processed, 256);
        assert_eq!(report.found.len(), 1);
        assert_eq!(report.found[0].index, BigUint::from(255u32));

        let lines = std::fs::read_to_string(dir.path().join("found.jsonl")).unwrap();
        assert_eq!(lines.lines().count(), 1);
        let recorded: FoundResult = serde_json::from_str(lines.trim()).unwrap();
        assert_eq!(recorded, report.found[0]);

        let checkpoint = Checkpoint::load(dir.path().join("checkpoint.json"))
            .unwrap()
            .unwrap();
        assert!(checkpoint.is_finished());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stops_on_shutdown_and_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let first = run(
            config(dir.path(), "addr:none", 1),
            deriver(Duration::from_millis(2)),
            shutdown,
        )
        .await
        .unwrap();
        assert_eq!(first.outcome.status, SearchStatus::Cancelled);
        assert!(first.outcome.processed < 256);

        let checkpoint = Checkpoint::load(dir.path().join("checkpoint.json"))
            .unwrap()
            .unwrap();
        assert_eq!(checkpoint.current_index, first.outcome.next_index);

        let second = run(
            config(dir.path(), "addr:none", 1),
            deriver(Duration::ZERO),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(second.outcome.status, SearchStatus::Completed);
        assert_eq!(first.outcome.processed + second.outcome.processed, 256);
    }

    #[test]
    fn args_are_validated() {
        let args = LocalArgs {
            target_address: "addr:x".to_string(),
            pattern: None,
            word_count: 12,
            full_search: false,
            threads: 1,
            wordlist: None,
            checkpoint: PathBuf::from("checkpoint.json"),
            checkpoint_interval_secs: 5,
            fresh: false,
            results: None,
            log_interval_secs: 10,
        };
        assert!(LocalConfig::try_from(args.clone()).is_err());

        let bad_word = LocalArgs {
            pattern: Some(["notaword"; 12].join(" ")),
            ..args.clone()
        };
        assert!(LocalConfig::try_from(bad_word).is_err());

        let full = LocalArgs {
            full_search: true,
            fresh: true,
            ..args
        };
        let config = LocalConfig::try_from(full).unwrap();
        assert!(!config.params.resume);
        assert!(config.params.full_search);
    }
}
