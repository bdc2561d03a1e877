use crate::decimal::as_decimal;
use core::fmt;
use num_bigint::BigUint;
use num_integer::Integer;
use num_traits::{ToPrimitive, Zero};
use serde::{Deserialize, Serialize};

/// A half-open span `[start, end)` of the index space.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexRange {
    #[serde(with = "as_decimal")]
    pub start: BigUint,
    #[serde(with = "as_decimal")]
    pub end: BigUint,
}

impl IndexRange {
    /// Creates `[start, end)`. An inverted pair collapses to the empty range
    /// at `start`.
    pub fn new(start: BigUint, end: BigUint) -> Self {
        let end = end.max(start.clone());
        Self { start, end }
    }

    pub fn len(&self) -> BigUint {
        &self.end - &self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn contains(&self, index: &BigUint) -> bool {
        &self.start <= index && index < &self.end
    }

    /// Length as a `u64`, saturating for ranges that do not fit.
    pub fn len_u64(&self) -> u64 {
        self.len().to_u64().unwrap_or(u64::MAX)
    }

    /// Splits the range into `parts` contiguous, non-overlapping sub-ranges.
    ///
    /// Sizes differ by at most one; the remainder goes to the leading ranges.
    /// When the range is shorter than `parts`, only non-empty ranges are
    /// returned, so the result may be shorter than `parts`. An empty range or
    /// `parts == 0` yields no ranges.
    pub fn split(&self, parts: usize) -> Vec<Self> {
        if parts == 0 || self.is_empty() {
            return Vec::new();
        }

        let (base, remainder) = self.len().div_rem(&BigUint::from(parts));
        // remainder < parts, which is a usize.
        let remainder = remainder.to_usize().unwrap_or_default();

        let mut ranges = Vec::with_capacity(parts);
        let mut start = self.start.clone();
        for i in 0..parts {
            let mut size = base.clone();
            if i < remainder {
                size += 1u32;
            }
            if size.is_zero() {
                break;
            }
            let end = &start + &size;
            ranges.push(Self {
                start: start.clone(),
                end: end.clone(),
            });
            start = end;
        }
        debug_assert_eq!(start, self.end);
        ranges
    }
}

impl fmt::Display for IndexRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}
