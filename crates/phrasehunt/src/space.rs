//! Search-space construction from a seed pattern.
//!
//! A pattern is a whitespace separated list of tokens, one per phrase
//! position:
//!
//! - a plain word (`abandon`) is a known position,
//! - `?` or `*` on its own is a full wildcard,
//! - a word containing `*` or `?` (`ab*`, `?bandon`) is a partial pattern
//!   matched as a glob against every wordlist entry.

use crate::{CombinationIndexer, Error, Result, Wordlist};
use num_bigint::BigUint;
use std::sync::Arc;

/// BIP39 phrase lengths.
pub const VALID_WORD_COUNTS: [usize; 5] = [12, 15, 18, 21, 24];

/// One phrase position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Position {
    Known(Arc<str>),
    Wildcard,
    Pattern(String),
}

impl Position {
    pub const fn is_known(&self) -> bool {
        matches!(self, Self::Known(_))
    }
}

/// The ordered positions of a phrase together with the candidate list of each
/// unknown position.
#[derive(Clone, Debug)]
pub struct SearchSpace {
    positions: Vec<Position>,
    /// Phrase slot of each unknown position, in indexer order.
    unknown_slots: Vec<usize>,
    indexer: Arc<CombinationIndexer>,
}

impl SearchSpace {
    /// Builds a search space from user-facing parameters.
    ///
    /// With `full_search` every position is a wildcard and `pattern` is not
    /// consulted. Otherwise the pattern must have exactly `word_count` tokens.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the word count is not a BIP39 length,
    /// the pattern is missing or has the wrong length, or a known word is not
    /// in the wordlist.
    pub fn from_params(
        pattern: Option<&str>,
        word_count: usize,
        full_search: bool,
        wordlist: &Wordlist,
    ) -> Result<Self> {
        if full_search {
            return Self::full(word_count, wordlist);
        }
        let pattern = pattern.ok_or_else(|| Error::InvalidParams {
            reason: "a seed pattern is required unless full search is enabled".to_string(),
        })?;
        Self::parse(pattern, word_count, wordlist)
    }

    /// Every position is a wildcard.
    pub fn full(word_count: usize, wordlist: &Wordlist) -> Result<Self> {
        check_word_count(word_count)?;
        Ok(Self::from_positions(
            vec![Position::Wildcard; word_count],
            wordlist,
        ))
    }

    /// Parses a seed pattern. See the module docs for the token syntax.
    pub fn parse(pattern: &str, word_count: usize, wordlist: &Wordlist) -> Result<Self> {
        check_word_count(word_count)?;

        let tokens: Vec<&str> = pattern.split_whitespace().collect();
        if tokens.len() != word_count {
            return Err(Error::WordCountMismatch {
                expected: word_count,
                actual: tokens.len(),
            });
        }

        let mut positions = Vec::with_capacity(tokens.len());
        for (position, token) in tokens.into_iter().enumerate() {
            let token = token.to_lowercase();
            if token == "?" || token == "*" {
                positions.push(Position::Wildcard);
            } else if token.contains(['*', '?']) {
                if !token.chars().all(|c| c.is_ascii_lowercase() || c == '*' || c == '?') {
                    return Err(Error::InvalidPattern {
                        position,
                        token,
                        reason: "only letters, `*` and `?` are allowed".to_string(),
                    });
                }
                positions.push(Position::Pattern(token));
            } else {
                let Some(index) = wordlist.position(&token) else {
                    return Err(Error::UnknownWord {
                        position,
                        word: token,
                    });
                };
                positions.push(Position::Known(Arc::clone(&wordlist.words()[index])));
            }
        }

        Ok(Self::from_positions(positions, wordlist))
    }

    fn from_positions(positions: Vec<Position>, wordlist: &Wordlist) -> Self {
        let mut unknown_slots = Vec::new();
        let mut candidates = Vec::new();
        for (slot, position) in positions.iter().enumerate() {
            match position {
                Position::Known(_) => {}
                Position::Wildcard => {
                    unknown_slots.push(slot);
                    candidates.push(wordlist.words().to_vec());
                }
                Position::Pattern(pattern) => {
                    unknown_slots.push(slot);
                    candidates.push(
                        wordlist
                            .words()
                            .iter()
                            .filter(|w| glob_match(pattern, w))
                            .cloned()
                            .collect(),
                    );
                }
            }
        }

        Self {
            positions,
            unknown_slots,
            indexer: Arc::new(CombinationIndexer::new(candidates)),
        }
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn word_count(&self) -> usize {
        self.positions.len()
    }

    pub fn unknown_count(&self) -> usize {
        self.unknown_slots.len()
    }

    pub fn indexer(&self) -> &Arc<CombinationIndexer> {
        &self.indexer
    }

    pub fn total(&self) -> &BigUint {
        self.indexer.total()
    }

    /// `true` when some unknown position has no candidates.
    pub fn is_empty(&self) -> bool {
        self.indexer.is_empty()
    }

    /// Writes the full phrase for the given unknown-position words into `out`.
    ///
    /// `unknown` must be in indexer order, as produced by
    /// [`CombinationIndexer::decode`] or a [`Cursor`](crate::Cursor).
    pub fn splice_into<S: AsRef<str>>(&self, unknown: &[S], out: &mut String) {
        out.clear();
        let mut next_unknown = 0;
        for (slot, position) in self.positions.iter().enumerate() {
            if slot > 0 {
                out.push(' ');
            }
            match position {
                Position::Known(word) => out.push_str(word),
                Position::Wildcard | Position::Pattern(_) => {
                    debug_assert_eq!(self.unknown_slots[next_unknown], slot);
                    out.push_str(unknown[next_unknown].as_ref());
                    next_unknown += 1;
                }
            }
        }
    }

    /// Convenience wrapper around [`Self::splice_into`].
    pub fn splice<S: AsRef<str>>(&self, unknown: &[S]) -> String {
        let mut out = String::new();
        self.splice_into(unknown, &mut out);
        out
    }

    /// Decodes `index` and splices it into a full phrase.
    pub fn phrase_at(&self, index: &BigUint) -> Result<String> {
        let words = self.indexer.decode(index)?;
        Ok(self.splice(&words))
    }
}

fn check_word_count(word_count: usize) -> Result<()> {
    if VALID_WORD_COUNTS.contains(&word_count) {
        Ok(())
    } else {
        Err(Error::UnsupportedWordCount(word_count))
    }
}

/// Glob match where `*` matches any run of characters and `?` exactly one.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    // Last `*` seen and the text position it is currently absorbing up to.
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|&c| c == '*')
}
