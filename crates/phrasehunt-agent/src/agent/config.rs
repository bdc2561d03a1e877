use anyhow::{Context, bail};
use clap::Args;
use phrasehunt::Wordlist;
use phrasehunt_proto::DEFAULT_PORT;
use std::{path::PathBuf, time::Duration};

/// Options for `phrasehunt-agent connect`.
///
/// The search itself (pattern, target, word count) comes from the
/// coordinator; these only describe how this agent connects and how hard it
/// works.
#[derive(Args, Debug, Clone)]
pub struct ConnectArgs {
    /// Coordinator address.
    ///
    /// Environment variable: `COORDINATOR_ADDR`
    #[arg(long, env = "COORDINATOR_ADDR", default_value_t = format!("127.0.0.1:{DEFAULT_PORT}"))]
    pub coordinator: String,

    /// Fixed agent id. Defaults to `<name>-<random suffix>`.
    ///
    /// Environment variable: `AGENT_ID`
    #[arg(long, env = "AGENT_ID")]
    pub agent_id: Option<String>,

    /// Prefix of the generated agent id.
    ///
    /// Environment variable: `AGENT_NAME`
    #[arg(long, env = "AGENT_NAME", default_value = "agent")]
    pub name: String,

    /// Address reported to the coordinator for display.
    ///
    /// Environment variable: `AGENT_ENDPOINT`
    #[arg(long, env = "AGENT_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Worker threads per block (0 = one per CPU).
    ///
    /// Environment variable: `AGENT_THREADS`
    #[arg(long, env = "AGENT_THREADS", default_value_t = 0)]
    pub threads: usize,

    /// File with one word per line replacing the English BIP39 list. Must
    /// match the coordinator's.
    ///
    /// Environment variable: `WORDLIST_FILE`
    #[arg(long, env = "WORDLIST_FILE")]
    pub wordlist: Option<PathBuf>,

    /// Per-block progress file.
    ///
    /// Environment variable: `AGENT_CHECKPOINT_FILE`
    #[arg(long, env = "AGENT_CHECKPOINT_FILE", default_value = "agent-checkpoint.json")]
    pub checkpoint: PathBuf,

    /// Do not write a per-block progress file.
    ///
    /// Environment variable: `NO_CHECKPOINT`
    #[arg(long, env = "NO_CHECKPOINT", default_value_t = false)]
    pub no_checkpoint: bool,

    /// Seconds to wait for the TCP connection.
    ///
    /// Environment variable: `CONNECT_TIMEOUT_SECS`
    #[arg(long, env = "CONNECT_TIMEOUT_SECS", default_value_t = 10)]
    pub connect_timeout_secs: u64,

    /// Seconds to wait for a reply before treating the link as dead.
    ///
    /// Environment variable: `RPC_TIMEOUT_SECS`
    #[arg(long, env = "RPC_TIMEOUT_SECS", default_value_t = 30)]
    pub rpc_timeout_secs: u64,

    /// Heartbeat period used when the coordinator does not announce one.
    ///
    /// Environment variable: `HEARTBEAT_INTERVAL_SECS`
    #[arg(long, env = "HEARTBEAT_INTERVAL_SECS", default_value_t = 15)]
    pub heartbeat_interval_secs: u64,

    /// Milliseconds between `GET_TASK` requests while idle.
    ///
    /// Environment variable: `POLL_INTERVAL_MS`
    #[arg(long, env = "POLL_INTERVAL_MS", default_value_t = 2_000)]
    pub poll_interval_ms: u64,

    /// Milliseconds between progress reports for the active block.
    ///
    /// Environment variable: `PROGRESS_INTERVAL_MS`
    #[arg(long, env = "PROGRESS_INTERVAL_MS", default_value_t = 5_000)]
    pub progress_interval_ms: u64,

    /// Consecutive failed connection attempts before giving up.
    ///
    /// Environment variable: `RECONNECT_ATTEMPTS`
    #[arg(long, env = "RECONNECT_ATTEMPTS", default_value_t = 10)]
    pub reconnect_attempts: u32,

    /// First reconnect delay in milliseconds; doubles on every failure.
    ///
    /// Environment variable: `RECONNECT_DELAY_MS`
    #[arg(long, env = "RECONNECT_DELAY_MS", default_value_t = 500)]
    pub reconnect_delay_ms: u64,

    /// Upper bound for the reconnect delay in seconds.
    ///
    /// Environment variable: `RECONNECT_MAX_DELAY_SECS`
    #[arg(long, env = "RECONNECT_MAX_DELAY_SECS", default_value_t = 30)]
    pub reconnect_max_delay_secs: u64,
}

/// Exponential backoff between connection attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
    /// Consecutive failures tolerated before the agent gives up.
    pub attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `failure` (1-based).
    pub fn delay(&self, failure: u32) -> Duration {
        let shift = failure.saturating_sub(1).min(31);
        self.initial
            .checked_mul(1u32 << shift)
            .map_or(self.max, |d| d.min(self.max))
    }
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub coordinator: String,
    pub agent_id: String,
    pub endpoint: Option<String>,
    pub threads: usize,
    pub wordlist: Wordlist,
    pub checkpoint_path: Option<PathBuf>,
    pub connect_timeout: Duration,
    pub rpc_timeout: Duration,
    /// Used when `HELLO_ACK` carries no interval.
    pub heartbeat_interval: Duration,
    pub poll_interval: Duration,
    pub progress_interval: Duration,
    pub reconnect: ReconnectPolicy,
}

impl AgentConfig {
    /// Defaults for everything but the address, id and wordlist; no
    /// checkpoint file.
    pub fn new(coordinator: impl Into<String>, agent_id: impl Into<String>, wordlist: Wordlist) -> Self {
        Self {
            coordinator: coordinator.into(),
            agent_id: agent_id.into(),
            endpoint: None,
            threads: 1,
            wordlist,
            checkpoint_path: None,
            connect_timeout: Duration::from_secs(10),
            rpc_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(15),
            poll_interval: Duration::from_secs(2),
            progress_interval: Duration::from_secs(5),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// `<name>-<8 hex digits>`.
pub fn generate_agent_id(name: &str) -> String {
    format!("{name}-{:08x}", rand::random::<u32>())
}

pub(crate) fn load_wordlist(path: Option<&PathBuf>) -> anyhow::Result<Wordlist> {
    match path {
        Some(path) => Wordlist::from_file(path)
            .with_context(|| format!("failed to load wordlist {}", path.display())),
        None => Ok(Wordlist::english()),
    }
}

pub(crate) fn resolve_threads(threads: usize) -> usize {
    if threads == 0 { num_cpus::get().max(1) } else { threads }
}

impl TryFrom<ConnectArgs> for AgentConfig {
    type Error = anyhow::Error;

    fn try_from(args: ConnectArgs) -> anyhow::Result<Self> {
        if args.coordinator.trim().is_empty() {
            bail!("--coordinator must not be empty");
        }
        let agent_id = match args.agent_id {
            Some(id) if id.trim().is_empty() => bail!("--agent-id must not be empty"),
            Some(id) => id.trim().to_string(),
            None => generate_agent_id(args.name.trim()),
        };
        if args.rpc_timeout_secs == 0 || args.connect_timeout_secs == 0 {
            bail!("timeouts must be greater than 0");
        }
        if args.heartbeat_interval_secs == 0 {
            bail!("--heartbeat-interval-secs must be greater than 0");
        }
        if args.poll_interval_ms == 0 || args.progress_interval_ms == 0 {
            bail!("poll and progress intervals must be greater than 0");
        }
        if args.reconnect_attempts == 0 {
            bail!("--reconnect-attempts must be at least 1");
        }

        Ok(Self {
            coordinator: args.coordinator.trim().to_string(),
            agent_id,
            endpoint: args.endpoint,
            threads: resolve_threads(args.threads),
            wordlist: load_wordlist(args.wordlist.as_ref())?,
            checkpoint_path: (!args.no_checkpoint).then_some(args.checkpoint),
            connect_timeout: Duration::from_secs(args.connect_timeout_secs),
            rpc_timeout: Duration::from_secs(args.rpc_timeout_secs),
            heartbeat_interval: Duration::from_secs(args.heartbeat_interval_secs),
            poll_interval: Duration::from_millis(args.poll_interval_ms),
            progress_interval: Duration::from_millis(args.progress_interval_ms),
            reconnect: ReconnectPolicy {
                initial: Duration::from_millis(args.reconnect_delay_ms),
                max: Duration::from_secs(args.reconnect_max_delay_secs),
                attempts: args.reconnect_attempts,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        args: ConnectArgs,
    }

    fn parse(argv: &[&str]) -> anyhow::Result<AgentConfig> {
        let mut full = vec!["phrasehunt-agent"];
        full.extend_from_slice(argv);
        AgentConfig::try_from(Wrapper::try_parse_from(full)?.args)
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let policy = ReconnectPolicy {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(1),
            attempts: 5,
        };
        let delays: Vec<_> = (1..=6).map(|n| policy.delay(n)).collect();
        assert_eq!(
            delays,
            [100, 200, 400, 800, 1000, 1000].map(Duration::from_millis)
        );
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn explicit_values() {
        let config = parse(&[
            "--coordinator",
            "10.0.0.1:6000",
            "--agent-id",
            "rig-1",
            "--threads",
            "3",
            "--no-checkpoint",
            "--reconnect-attempts",
            "2",
        ])
        .unwrap();
        assert_eq!(config.coordinator, "10.0.0.1:6000");
        assert_eq!(config.agent_id, "rig-1");
        assert_eq!(config.threads, 3);
        assert_eq!(config.checkpoint_path, None);
        assert_eq!(config.reconnect.attempts, 2);
        assert_eq!(config.wordlist.len(), 2048);
    }

    #[test]
    fn generated_id_uses_the_name() {
        let config = parse(&["--name", "gpu", "--threads", "0"]).unwrap();
        assert!(config.agent_id.starts_with("gpu-"));
        assert_eq!(config.agent_id.len(), "gpu-".len() + 8);
        assert!(config.threads >= 1);
        assert_eq!(
            config.checkpoint_path,
            Some(PathBuf::from("agent-checkpoint.json"))
        );
    }

    #[test]
    fn rejects_bad_values() {
        assert!(parse(&["--agent-id", " "]).is_err());
        assert!(parse(&["--rpc-timeout-secs", "0"]).is_err());
        assert!(parse(&["--reconnect-attempts", "0"]).is_err());
        assert!(parse(&["--wordlist", "/nonexistent/words.txt"]).is_err());
    }
}
