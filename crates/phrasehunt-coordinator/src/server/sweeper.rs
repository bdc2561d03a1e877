//! Periodic housekeeping.
//!
//! Every `sweep_interval` the sweeper reclaims stale blocks and silent
//! agents, persists the low-water checkpoint when it moved, and logs overall
//! progress. It also notices completion and starts the shutdown when the
//! coordinator is configured to exit.

use super::{
    Coordinator,
    telemetry::{decrement_agents_connected, increment_blocks_requeued},
};
use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use std::{sync::Arc, time::Instant};
use tokio::time::{MissedTickBehavior, interval};

pub async fn run(coordinator: Arc<Coordinator>) {
    let config = coordinator.config().clone();
    let shutdown = coordinator.shutdown_token();
    let mut ticker = interval(config.sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    let mut persisted: Option<BigUint> = None;
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        sweep(&coordinator, Instant::now());

        let low_water = coordinator.with_state(|s| s.low_water().clone());
        if persisted.as_ref() != Some(&low_water) && coordinator.persist_checkpoint().is_some() {
            persisted = Some(low_water);
        }

        if config.exit_on_complete && coordinator.is_finished() {
            coordinator.shutdown("search space exhausted");
            break;
        }
    }
    tracing::debug!("Sweeper stopped");
}

/// One housekeeping pass.
pub fn sweep(coordinator: &Coordinator, now: Instant) {
    let config = coordinator.config();
    let (stale, silent, snapshot) = coordinator.with_state(|s| {
        let stale = s.sweep_stale_blocks(config.stale_timeout, now);
        let silent = s.sweep_silent_agents(config.heartbeat_timeout, now);
        (stale, silent, s.snapshot())
    });

    if !stale.is_empty() {
        increment_blocks_requeued(stale.len() as u64);
        tracing::warn!(
            "Requeued {} stale block(s) with no progress in {:?}: {stale:?}",
            stale.len(),
            config.stale_timeout
        );
    }
    for (agent_id, blocks) in &silent {
        decrement_agents_connected();
        increment_blocks_requeued(blocks.len() as u64);
        tracing::warn!("Dropped silent agent {agent_id}; requeued blocks {blocks:?}");
    }

    tracing::info!(
        "Progress {}/{} ({}), {} agent(s), {} assigned, {} pending, {:.0}/s, ETA {}, {} found",
        snapshot.low_water,
        snapshot.total,
        percent(&snapshot.low_water, &snapshot.total),
        snapshot.agents,
        snapshot.assigned,
        snapshot.pending,
        snapshot.rate,
        snapshot.eta,
        snapshot.found
    );
}

/// `done / total` as a percentage with two decimals.
fn percent(done: &BigUint, total: &BigUint) -> String {
    if total.is_zero() {
        return "100.00%".to_string();
    }
    let basis_points = (done * 10_000u32 / total).to_u64().unwrap_or(10_000);
    format!("{}.{:02}%", basis_points / 100, basis_points % 100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{blocks::BlockSizing, config::ServerConfig, state::BlockStatus};
    use phrasehunt_proto::SessionInfo;
    use std::time::Duration;

    #[test]
    fn percent_formats_basis_points() {
        let big = |n: u64| BigUint::from(n);
        assert_eq!(percent(&big(0), &big(7)), "0.00%");
        assert_eq!(percent(&big(1), &big(3)), "33.33%");
        assert_eq!(percent(&big(7), &big(7)), "100.00%");
        assert_eq!(percent(&big(0), &big(0)), "100.00%");
    }

    #[test]
    fn sweep_reclaims_blocks_of_silent_agents() {
        let session = SessionInfo {
            seed_pattern: None,
            target_address: "addr:target".to_string(),
            word_count: 12,
            full_search: true,
            total_combinations: BigUint::from(1_000u32),
        };
        let mut config = ServerConfig::new(session);
        config.sizing = BlockSizing {
            target_blocks: 10,
            min_block: 1,
            max_block: 100,
            min_blocks: 1,
        };
        config.stale_timeout = Duration::from_secs(60);
        config.heartbeat_timeout = Duration::from_secs(45);
        let coordinator = Coordinator::new(config);

        let t0 = Instant::now();
        let block = coordinator.with_state(|s| {
            s.register_agent("a", 1, None, None, t0);
            match s.request_task("a", t0).unwrap() {
                crate::server::state::TaskOutcome::Assigned { block_id, .. } => block_id,
                other => panic!("unexpected {other:?}"),
            }
        });

        sweep(&coordinator, t0 + Duration::from_secs(10));
        assert_eq!(
            coordinator.with_state(|s| s.block_status(block)),
            Some(BlockStatus::Assigned)
        );

        sweep(&coordinator, t0 + Duration::from_secs(50));
        assert!(coordinator.with_state(|s| s.agent("a").is_none()));
        assert_eq!(
            coordinator.with_state(|s| s.block_status(block)),
            Some(BlockStatus::Pending)
        );
    }
}
