use super::blocks::BlockSizing;
use anyhow::{Context, bail};
use clap::Parser;
use phrasehunt::{SearchSpace, VALID_WORD_COUNTS, Wordlist};
use phrasehunt_proto::{DEFAULT_PORT, SessionInfo};
use std::{path::PathBuf, time::Duration};

/// Runtime configuration for the `phrasehunt-coordinator` binary.
///
/// The coordinator owns the search definition: agents learn the pattern,
/// target and word count from the `HELLO_ACK` it sends, so only the
/// coordinator needs to be told what to look for. All values are parsed from
/// CLI arguments or environment variables.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "phrasehunt-coordinator",
    version,
    about = "Hands out blocks of a BIP39 phrase search to connected agents"
)]
pub struct CliArgs {
    /// Address to accept agent connections on.
    ///
    /// Environment variable: `LISTEN_ADDR`
    #[arg(long, env = "LISTEN_ADDR", default_value_t = format!("0.0.0.0:{DEFAULT_PORT}"))]
    pub listen_addr: String,

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

    /// File with one word per line replacing the English BIP39 list. Agents
    /// must be given the same file.
    ///
    /// Environment variable: `WORDLIST_FILE`
    #[arg(long, env = "WORDLIST_FILE")]
    pub wordlist: Option<PathBuf>,

    /// Number of blocks a large space is cut into.
    ///
    /// Environment variable: `TARGET_BLOCKS`
    #[arg(long, env = "TARGET_BLOCKS", default_value_t = 4096)]
    pub target_blocks: u64,

    /// Smallest block handed out for a large space.
    ///
    /// Environment variable: `MIN_BLOCK_SIZE`
    #[arg(long, env = "MIN_BLOCK_SIZE", default_value_t = 10_000)]
    pub min_block_size: u64,

    /// Largest block handed out.
    ///
    /// Environment variable: `MAX_BLOCK_SIZE`
    #[arg(long, env = "MAX_BLOCK_SIZE", default_value_t = 50_000_000)]
    pub max_block_size: u64,

    /// Small spaces are still cut into at least this many blocks.
    ///
    /// Environment variable: `MIN_BLOCKS`
    #[arg(long, env = "MIN_BLOCKS", default_value_t = 64)]
    pub min_blocks: u64,

    /// Pending blocks materialized ahead of demand.
    ///
    /// Environment variable: `QUEUE_DEPTH`
    #[arg(long, env = "QUEUE_DEPTH", default_value_t = 1024)]
    pub queue_depth: usize,

    /// Seconds an assigned block may go without progress before it is
    /// handed to someone else.
    ///
    /// Environment variable: `STALE_TIMEOUT_SECS`
    #[arg(long, env = "STALE_TIMEOUT_SECS", default_value_t = 60)]
    pub stale_timeout_secs: u64,

    /// Seconds between stale-block sweeps and checkpoint writes.
    ///
    /// Environment variable: `SWEEP_INTERVAL_SECS`
    #[arg(long, env = "SWEEP_INTERVAL_SECS", default_value_t = 10)]
    pub sweep_interval_secs: u64,

    /// Heartbeat period announced to agents.
    ///
    /// Environment variable: `HEARTBEAT_INTERVAL_SECS`
    #[arg(long, env = "HEARTBEAT_INTERVAL_SECS", default_value_t = 15)]
    pub heartbeat_interval_secs: u64,

    /// Seconds of silence after which an agent is dropped and its blocks
    /// reclaimed.
    ///
    /// Environment variable: `HEARTBEAT_TIMEOUT_SECS`
    #[arg(long, env = "HEARTBEAT_TIMEOUT_SECS", default_value_t = 45)]
    pub heartbeat_timeout_secs: u64,

    /// Where the completion low-water mark is persisted.
    ///
    /// Environment variable: `CHECKPOINT_FILE`
    #[arg(long, env = "CHECKPOINT_FILE", default_value = "coordinator-checkpoint.json")]
    pub checkpoint: PathBuf,

    /// JSON-lines file every match is appended to.
    ///
    /// Environment variable: `RESULTS_FILE`
    #[arg(long, env = "RESULTS_FILE", default_value = "found.jsonl")]
    pub results: PathBuf,

    /// Start from index 0 even when a matching checkpoint exists.
    ///
    /// Environment variable: `FRESH_START`
    #[arg(long, env = "FRESH_START", default_value_t = false)]
    pub fresh: bool,

    /// Keep serving after the whole space is scanned instead of shutting
    /// down.
    ///
    /// Environment variable: `KEEP_RUNNING`
    #[arg(long, env = "KEEP_RUNNING", default_value_t = false)]
    pub keep_running: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub session: SessionInfo,
    pub sizing: BlockSizing,
    pub queue_depth: usize,
    pub stale_timeout: Duration,
    pub sweep_interval: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub checkpoint_path: Option<PathBuf>,
    pub results_path: Option<PathBuf>,
    pub resume: bool,
    pub exit_on_complete: bool,
}

impl ServerConfig {
    /// Defaults for serving `session`, with no files written.
    pub fn new(session: SessionInfo) -> Self {
        Self {
            listen_addr: format!("127.0.0.1:{DEFAULT_PORT}"),
            session,
            sizing: BlockSizing::default(),
            queue_depth: 1024,
            stale_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(15),
            heartbeat_timeout: Duration::from_secs(45),
            checkpoint_path: None,
            results_path: None,
            resume: true,
            exit_on_complete: true,
        }
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if !VALID_WORD_COUNTS.contains(&args.word_count) {
            bail!(
                "WORD_COUNT must be one of {:?}, got {}",
                VALID_WORD_COUNTS,
                args.word_count
            );
        }
        if args.target_address.trim().is_empty() {
            bail!("TARGET_ADDRESS must not be empty");
        }
        if !args.full_search && args.pattern.is_none() {
            bail!("SEED_PATTERN is required unless FULL_SEARCH is set");
        }
        if args.min_block_size == 0 || args.max_block_size < args.min_block_size {
            bail!(
                "Block size bounds are invalid: MIN_BLOCK_SIZE = {}, MAX_BLOCK_SIZE = {}",
                args.min_block_size,
                args.max_block_size
            );
        }
        if args.target_blocks == 0 || args.min_blocks == 0 || args.queue_depth == 0 {
            bail!("TARGET_BLOCKS, MIN_BLOCKS and QUEUE_DEPTH must be greater than 0");
        }
        if args.stale_timeout_secs == 0 || args.sweep_interval_secs == 0 {
            bail!("STALE_TIMEOUT_SECS and SWEEP_INTERVAL_SECS must be greater than 0");
        }
        if args.heartbeat_interval_secs == 0
            || args.heartbeat_timeout_secs <= args.heartbeat_interval_secs
        {
            bail!(
                "HEARTBEAT_TIMEOUT_SECS ({}) must exceed HEARTBEAT_INTERVAL_SECS ({})",
                args.heartbeat_timeout_secs,
                args.heartbeat_interval_secs
            );
        }

        let wordlist = match &args.wordlist {
            Some(path) => Wordlist::from_file(path)
                .with_context(|| format!("failed to load wordlist {}", path.display()))?,
            None => Wordlist::english(),
        };
        let space = SearchSpace::from_params(
            args.pattern.as_deref(),
            args.word_count,
            args.full_search,
            &wordlist,
        )?;

        let session = SessionInfo {
            seed_pattern: if args.full_search { None } else { args.pattern },
            target_address: args.target_address.trim().to_string(),
            word_count: args.word_count,
            full_search: args.full_search,
            total_combinations: space.total().clone(),
        };

        Ok(Self {
            listen_addr: args.listen_addr,
            session,
            sizing: BlockSizing {
                target_blocks: args.target_blocks,
                min_block: args.min_block_size,
                max_block: args.max_block_size,
                min_blocks: args.min_blocks,
            },
            queue_depth: args.queue_depth,
            stale_timeout: Duration::from_secs(args.stale_timeout_secs),
            sweep_interval: Duration::from_secs(args.sweep_interval_secs),
            heartbeat_interval: Duration::from_secs(args.heartbeat_interval_secs),
            heartbeat_timeout: Duration::from_secs(args.heartbeat_timeout_secs),
            checkpoint_path: Some(args.checkpoint),
            results_path: Some(args.results),
            resume: !args.fresh,
            exit_on_complete: !args.keep_running,
        })
    }
}
