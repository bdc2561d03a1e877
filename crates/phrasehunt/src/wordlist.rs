use crate::{Error, Result};
use std::{collections::HashMap, fs, path::Path, sync::Arc};

/// An ordered BIP39 wordlist.
///
/// Candidate lists derived from it keep wordlist order, which fixes the
/// mixed-radix ordering used by the [`CombinationIndexer`].
///
/// [`CombinationIndexer`]: crate::CombinationIndexer
#[derive(Clone, Debug)]
pub struct Wordlist {
    words: Arc<[Arc<str>]>,
    positions: Arc<HashMap<Arc<str>, usize>>,
}

impl Wordlist {
    /// Builds a wordlist from arbitrary words.
    ///
    /// # Errors
    ///
    /// Fails if the list is empty, contains an empty word or contains a
    /// duplicate.
    pub fn from_words<I, S>(words: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let words: Arc<[Arc<str>]> = words
            .into_iter()
            .map(|w| Arc::<str>::from(w.as_ref().trim().to_lowercase()))
            .collect();
        if words.is_empty() {
            return Err(Error::Wordlist {
                reason: "wordlist is empty".to_string(),
            });
        }

        let mut positions = HashMap::with_capacity(words.len());
        for (i, word) in words.iter().enumerate() {
            if word.is_empty() {
                return Err(Error::Wordlist {
                    reason: format!("empty word at line {}", i + 1),
                });
            }
            if positions.insert(Arc::clone(word), i).is_some() {
                return Err(Error::Wordlist {
                    reason: format!("duplicate word {word:?}"),
                });
            }
        }

        Ok(Self {
            words,
            positions: Arc::new(positions),
        })
    }

    /// Reads one word per line. Blank lines and lines starting with `#` are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or the words do not form a valid list.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_words(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#')),
        )
    }

    /// The standard 2048-word English BIP39 list.
    #[cfg_attr(docsrs, doc(cfg(feature = "bitcoin")))]
    #[cfg(feature = "bitcoin")]
    pub fn english() -> Self {
        // The list is fixed and valid, so construction cannot fail.
        let words: Arc<[Arc<str>]> = bip39::Language::English
            .word_list()
            .iter()
            .map(|w| Arc::<str>::from(*w))
            .collect();
        let positions = words
            .iter()
            .enumerate()
            .map(|(i, w)| (Arc::clone(w), i))
            .collect();
        Self {
            words,
            positions: Arc::new(positions),
        }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn words(&self) -> &[Arc<str>] {
        &self.words
    }

    /// Position of `word` in the list, if present.
    pub fn position(&self, word: &str) -> Option<usize> {
        self.positions.get(word).copied()
    }

    pub fn contains(&self, word: &str) -> bool {
        self.positions.contains_key(word)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_duplicates_and_empties() {
        assert!(Wordlist::from_words(Vec::<String>::new()).is_err());
        assert!(Wordlist::from_words(["abandon", "ability", "abandon"]).is_err());
        assert!(Wordlist::from_words(["abandon", " ", "ability"]).is_err());
    }

    #[test]
    fn normalizes_and_indexes_words() {
        let list = Wordlist::from_words(["Abandon", " ability "]).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.position("abandon"), Some(0));
        assert_eq!(list.position("ability"), Some(1));
        assert!(!list.contains("able"));
    }

    #[test]
    fn reads_one_word_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("words.txt");
        std::fs::write(&path, "# custom list\nalpha\n\n  beta\r\ngamma\n").unwrap();
        let list = Wordlist::from_file(&path).unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list.position("beta"), Some(1));

        assert!(Wordlist::from_file(dir.path().join("missing.txt")).is_err());
    }

    #[cfg(feature = "bitcoin")]
    #[test]
    fn english_list_has_2048_words() {
        let list = Wordlist::english();
        assert_eq!(list.len(), 2048);
        assert_eq!(&*list.words()[0], "abandon");
        assert_eq!(&*list.words()[2047], "zoo");
    }
}
