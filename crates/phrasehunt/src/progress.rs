use crate::{Eta, decimal::as_decimal};
use num_bigint::BigUint;
use serde::Serialize;
use std::time::{Duration, Instant};

/// How often a worker reports progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgressPolicy {
    /// Every `n` evaluated indices.
    EveryCount(u64),
    /// At most once per interval of wall-clock time.
    Interval(Duration),
}

impl Default for ProgressPolicy {
    fn default() -> Self {
        Self::Interval(Duration::from_millis(500))
    }
}

/// Point-in-time view of a running search.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    /// Low-water mark: every index below it has been evaluated.
    #[serde(with = "as_decimal")]
    pub current: BigUint,
    #[serde(with = "as_decimal")]
    pub total: BigUint,
    /// Indices evaluated by this run.
    pub processed: u64,
    /// Indices per second over the estimator window.
    pub rate: f64,
    #[serde(skip)]
    pub eta: Eta,
    pub last_phrase: Option<String>,
}

/// Interval checks only read the clock every this many iterations.
const CLOCK_STRIDE: u64 = 64;

/// Per-worker throttle for [`ProgressPolicy`].
#[derive(Debug)]
pub(crate) struct Throttle {
    policy: ProgressPolicy,
    since_emit: u64,
    last_emit: Instant,
}

impl Throttle {
    pub(crate) fn new(policy: ProgressPolicy) -> Self {
        Self {
            policy,
            since_emit: 0,
            last_emit: Instant::now(),
        }
    }

    /// Counts one iteration; `true` when a report is due.
    #[inline]
    pub(crate) fn tick(&mut self) -> bool {
        self.since_emit += 1;
        let due = match self.policy {
            ProgressPolicy::EveryCount(n) => self.since_emit >= n.max(1),
            ProgressPolicy::Interval(interval) => {
                self.since_emit % CLOCK_STRIDE == 0 && self.last_emit.elapsed() >= interval
            }
        };
        if due {
            self.since_emit = 0;
            self.last_emit = Instant::now();
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_policy_fires_every_n() {
        let mut throttle = Throttle::new(ProgressPolicy::EveryCount(3));
        let fired: Vec<bool> = (0..7).map(|_| throttle.tick()).collect();
        assert_eq!(fired, [false, false, true, false, false, true, false]);
    }

    #[test]
    fn zero_count_behaves_like_one() {
        let mut throttle = Throttle::new(ProgressPolicy::EveryCount(0));
        assert!(throttle.tick());
        assert!(throttle.tick());
    }

    #[test]
    fn interval_policy_waits_for_the_clock() {
        let mut throttle = Throttle::new(ProgressPolicy::Interval(Duration::from_secs(3600)));
        assert!((0..1_000).all(|_| !throttle.tick()));

        let mut throttle = Throttle::new(ProgressPolicy::Interval(Duration::ZERO));
        let fired = (0..CLOCK_STRIDE * 2).filter(|_| throttle.tick()).count();
        assert_eq!(fired, 2);
    }
}
