use core::fmt;
use num_bigint::BigUint;
use num_traits::ToPrimitive;
use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

/// Longest ETA still reported as a duration: 100 years.
pub const MAX_ETA: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Estimated time to completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Eta {
    Remaining(Duration),
    /// Longer than [`MAX_ETA`].
    Unrealistic,
    /// No usable rate yet.
    Unknown,
}

impl Eta {
    /// ETA for `remaining` indices at `rate` indices per second.
    pub fn from_rate(remaining: &BigUint, rate: f64) -> Self {
        if !rate.is_finite() || rate <= 0.0 {
            return Self::Unknown;
        }
        let remaining = remaining.to_f64().unwrap_or(f64::INFINITY);
        let secs = remaining / rate;
        if !secs.is_finite() || secs > MAX_ETA.as_secs_f64() {
            return Self::Unrealistic;
        }
        Self::Remaining(Duration::from_secs_f64(secs.max(0.0)))
    }

    pub fn as_secs(&self) -> Option<u64> {
        match self {
            Self::Remaining(d) => Some(d.as_secs()),
            Self::Unrealistic | Self::Unknown => None,
        }
    }
}

impl fmt::Display for Eta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str("unknown"),
            Self::Unrealistic => f.write_str("unrealistic"),
            Self::Remaining(d) => {
                let secs = d.as_secs();
                let (days, rest) = (secs / 86_400, secs % 86_400);
                let (hours, rest) = (rest / 3_600, rest % 3_600);
                let (mins, secs) = (rest / 60, rest % 60);
                if days > 0 {
                    write!(f, "{days}d {hours:02}h {mins:02}m {secs:02}s")
                } else {
                    write!(f, "{hours:02}h {mins:02}m {secs:02}s")
                }
            }
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Sample {
    at: Instant,
    count: u64,
}

/// Sliding-window throughput estimator over `(timestamp, cumulative count)`
/// samples.
///
/// The rate is the mean of the per-pair rates between successive samples.
/// Pairs whose clock did not advance, whose counter went backwards, or whose
/// rate exceeds the sanity bound are ignored. All outputs are finite and
/// non-negative.
#[derive(Clone, Debug)]
pub struct RateEstimator {
    samples: VecDeque<Sample>,
    window: usize,
    max_rate: f64,
}

impl Default for RateEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl RateEstimator {
    pub const DEFAULT_WINDOW: usize = 10;
    /// Per-pair rates above this many indices per second are discarded.
    pub const DEFAULT_MAX_RATE: f64 = 1.0e9;

    pub fn new() -> Self {
        Self::with_window(Self::DEFAULT_WINDOW)
    }

    /// An estimator keeping the last `window` samples (at least two).
    pub fn with_window(window: usize) -> Self {
        let window = window.max(2);
        Self {
            samples: VecDeque::with_capacity(window),
            window,
            max_rate: Self::DEFAULT_MAX_RATE,
        }
    }

    #[must_use]
    pub fn with_max_rate(mut self, max_rate: f64) -> Self {
        if max_rate.is_finite() && max_rate > 0.0 {
            self.max_rate = max_rate;
        }
        self
    }

    /// Records the cumulative `count` observed at `at`.
    pub fn record(&mut self, at: Instant, count: u64) {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(Sample { at, count });
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Windowed rate in indices per second, or `0.0` without usable samples.
    pub fn rate(&self) -> f64 {
        let mut sum = 0.0;
        let mut pairs = 0u32;
        for (prev, next) in self.samples.iter().zip(self.samples.iter().skip(1)) {
            let Some(dt) = next.at.checked_duration_since(prev.at) else {
                continue;
            };
            let dt = dt.as_secs_f64();
            if dt <= 0.0 || next.count < prev.count {
                continue;
            }
            let rate = (next.count - prev.count) as f64 / dt;
            if !rate.is_finite() || rate > self.max_rate {
                continue;
            }
            sum += rate;
            pairs += 1;
        }
        if pairs == 0 {
            return 0.0;
        }
        let rate = sum / f64::from(pairs);
        if rate.is_finite() { rate.max(0.0) } else { 0.0 }
    }

    /// ETA until `current` reaches `total` at the windowed rate.
    pub fn eta(&self, current: &BigUint, total: &BigUint) -> Eta {
        if current >= total {
            return Eta::Remaining(Duration::ZERO);
        }
        Eta::from_rate(&(total - current), self.rate())
    }
}
