use crate::{Error, Result};
use num_bigint::BigUint;
use num_integer::Integer;
use num_traits::{One, ToPrimitive, Zero};
use std::sync::Arc;

/// Bijective mapping between ordinal indices and candidate word tuples.
///
/// Indices are decoded in mixed radix with position 0 as the least significant
/// digit: `word[i] = candidates[i][index mod len_i]`, then `index /= len_i`.
/// Every index in `[0, total)` therefore maps to a distinct tuple, and every
/// tuple of the Cartesian product is reached by exactly one index.
///
/// # Example
///
/// ```
/// use num_bigint::BigUint;
/// use phrasehunt::CombinationIndexer;
/// use std::sync::Arc;
///
/// let list: Vec<Arc<str>> = ["a", "b", "c"].into_iter().map(Arc::from).collect();
/// let indexer = CombinationIndexer::new(vec![list.clone(), list]);
///
/// assert_eq!(indexer.total(), &BigUint::from(9u32));
/// let words = indexer.decode(&BigUint::from(3u32)).unwrap();
/// assert_eq!(&*words[0], "a");
/// assert_eq!(&*words[1], "b");
/// ```
#[derive(Clone, Debug)]
pub struct CombinationIndexer {
    candidates: Vec<Vec<Arc<str>>>,
    total: BigUint,
}

impl CombinationIndexer {
    pub fn new(candidates: Vec<Vec<Arc<str>>>) -> Self {
        let total = candidates
            .iter()
            .fold(BigUint::one(), |acc, list| acc * BigUint::from(list.len()));
        Self { candidates, total }
    }

    /// Product of all candidate list lengths. Zero when any list is empty; one
    /// when there are no unknown positions at all.
    pub fn total(&self) -> &BigUint {
        &self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total.is_zero()
    }

    pub fn candidates(&self) -> &[Vec<Arc<str>>] {
        &self.candidates
    }

    /// Number of unknown positions.
    pub fn width(&self) -> usize {
        self.candidates.len()
    }

    /// Mixed-radix digits of `index`, one candidate position per unknown slot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfRange`] when `index >= total`.
    pub fn digits(&self, index: &BigUint) -> Result<Vec<usize>> {
        if index >= &self.total {
            return Err(Error::IndexOutOfRange {
                index: index.clone(),
                total: self.total.clone(),
            });
        }

        let mut rest = index.clone();
        let mut digits = Vec::with_capacity(self.candidates.len());
        for list in &self.candidates {
            let (quotient, remainder) = rest.div_rem(&BigUint::from(list.len()));
            // remainder < list.len(), which is a usize.
            digits.push(remainder.to_usize().unwrap_or_default());
            rest = quotient;
        }
        Ok(digits)
    }

    /// Decodes `index` into its word tuple.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfRange`] when `index >= total`.
    pub fn decode(&self, index: &BigUint) -> Result<Vec<Arc<str>>> {
        let digits = self.digits(index)?;
        Ok(digits
            .iter()
            .zip(&self.candidates)
            .map(|(&d, list)| Arc::clone(&list[d]))
            .collect())
    }

    /// Inverse of [`Self::digits`].
    ///
    /// Returns `None` if any digit is out of range for its position or the
    /// number of digits does not match [`Self::width`].
    pub fn encode(&self, digits: &[usize]) -> Option<BigUint> {
        if digits.len() != self.candidates.len() {
            return None;
        }
        let mut index = BigUint::zero();
        for (&digit, list) in digits.iter().zip(&self.candidates).rev() {
            if digit >= list.len() {
                return None;
            }
            index = index * BigUint::from(list.len()) + BigUint::from(digit);
        }
        Some(index)
    }

    /// A cursor positioned at `start`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfRange`] when `start >= total`.
    pub fn cursor(&self, start: &BigUint) -> Result<Cursor<'_>> {
        let digits = self.digits(start)?;
        let words = digits
            .iter()
            .zip(&self.candidates)
            .map(|(&d, list)| &*list[d])
            .collect();
        Ok(Cursor {
            candidates: &self.candidates,
            digits,
            words,
        })
    }
}

/// Sequential walker over the index space.
///
/// Produces the same tuples as calling [`CombinationIndexer::decode`] on
/// consecutive indices, but advances the digits in place instead of dividing a
/// big integer for every index.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    candidates: &'a [Vec<Arc<str>>],
    digits: Vec<usize>,
    words: Vec<&'a str>,
}

impl<'a> Cursor<'a> {
    /// Words at the current index, in indexer order.
    pub fn words(&self) -> &[&'a str] {
        &self.words
    }

    pub fn digits(&self) -> &[usize] {
        &self.digits
    }

    /// Moves to the next index.
    ///
    /// Returns `false` when the cursor wrapped past the last index of the
    /// space; it is then back at index zero.
    pub fn advance(&mut self) -> bool {
        for (position, list) in self.candidates.iter().enumerate() {
            let digit = &mut self.digits[position];
            *digit += 1;
            if *digit < list.len() {
                self.words[position] = &list[*digit];
                return true;
            }
            *digit = 0;
            self.words[position] = &list[0];
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn list(words: &[&str]) -> Vec<Arc<str>> {
        words.iter().map(|w| Arc::from(*w)).collect()
    }

    fn synthetic(n: usize) -> Vec<Arc<str>> {
        (0..n).map(|i| Arc::from(format!("w{i:04}"))).collect()
    }

    #[test]
    fn total_is_product_of_lengths() {
        let indexer = CombinationIndexer::new(vec![list(&["a", "b"]), list(&["x", "y", "z"])]);
        assert_eq!(indexer.total(), &BigUint::from(6u32));
        assert_eq!(indexer.width(), 2);
    }

    #[test]
    fn empty_candidate_list_means_empty_space() {
        let indexer = CombinationIndexer::new(vec![list(&["a", "b"]), Vec::new()]);
        assert!(indexer.is_empty());
        assert!(indexer.decode(&BigUint::zero()).is_err());
    }

    #[test]
    fn no_unknown_positions_is_a_single_candidate() {
        let indexer = CombinationIndexer::new(Vec::new());
        assert_eq!(indexer.total(), &BigUint::one());
        assert!(indexer.decode(&BigUint::zero()).unwrap().is_empty());
    }

    #[test]
    fn decode_is_a_bijection() {
        let indexer = CombinationIndexer::new(vec![
            list(&["a", "b", "c"]),
            list(&["x", "y"]),
            list(&["p", "q", "r", "s"]),
        ]);
        let total = indexer.total().to_usize().unwrap();
        let mut seen = HashSet::new();
        for i in 0..total {
            let words = indexer.decode(&BigUint::from(i)).unwrap();
            let tuple: Vec<String> = words.iter().map(|w| w.to_string()).collect();
            assert!(seen.insert(tuple), "index {i} decoded to a repeated tuple");
        }
        assert_eq!(seen.len(), 24);
    }

    #[test]
    fn first_and_last_indices() {
        let indexer = CombinationIndexer::new(vec![list(&["a", "b", "c"]), list(&["x", "y"])]);
        let first = indexer.decode(&BigUint::zero()).unwrap();
        assert_eq!((&*first[0], &*first[1]), ("a", "x"));

        let last = indexer.decode(&(indexer.total() - 1u32)).unwrap();
        assert_eq!((&*last[0], &*last[1]), ("c", "y"));

        assert!(matches!(
            indexer.decode(indexer.total()),
            Err(Error::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn two_wildcards_over_2048_words() {
        let words = synthetic(2048);
        let indexer = CombinationIndexer::new(vec![words.clone(), words.clone()]);
        assert_eq!(indexer.total(), &BigUint::from(4_194_304u32));

        let zero = indexer.decode(&BigUint::zero()).unwrap();
        assert_eq!(zero, vec![words[0].clone(), words[0].clone()]);

        let carry = indexer.decode(&BigUint::from(2048u32)).unwrap();
        assert_eq!(carry, vec![words[0].clone(), words[1].clone()]);
    }

    #[test]
    fn encode_inverts_digits() {
        let indexer = CombinationIndexer::new(vec![synthetic(7), synthetic(5), synthetic(3)]);
        for i in [0u32, 1, 6, 7, 34, 104] {
            let index = BigUint::from(i);
            let digits = indexer.digits(&index).unwrap();
            assert_eq!(indexer.encode(&digits), Some(index));
        }
        assert_eq!(indexer.encode(&[7, 0, 0]), None);
        assert_eq!(indexer.encode(&[0, 0]), None);
    }

    #[test]
    fn cursor_matches_decode() {
        let indexer = CombinationIndexer::new(vec![synthetic(3), synthetic(4), synthetic(2)]);
        let start = BigUint::from(5u32);
        let mut cursor = indexer.cursor(&start).unwrap();

        for i in 5u32..24 {
            let expected = indexer.decode(&BigUint::from(i)).unwrap();
            let expected: Vec<&str> = expected.iter().map(|w| &**w).collect();
            assert_eq!(cursor.words(), expected.as_slice(), "mismatch at {i}");
            let advanced = cursor.advance();
            assert_eq!(advanced, i + 1 < 24);
        }
    }

    #[test]
    fn huge_space_decodes() {
        let words = synthetic(2048);
        let indexer = CombinationIndexer::new(vec![words; 24]);
        assert_eq!(indexer.total(), &BigUint::from(2u32).pow(264));

        let last = indexer.decode(&(indexer.total() - 1u32)).unwrap();
        assert!(last.iter().all(|w| &**w == "w2047"));
    }
}
