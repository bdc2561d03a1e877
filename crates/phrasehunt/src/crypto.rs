use crate::DeriveError;
use std::sync::Arc;

/// Key material derived from a candidate phrase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DerivedKey {
    /// Private key in wallet import format.
    pub wif: String,
    pub address: String,
}

/// Checksum validation and address derivation for candidate phrases.
///
/// Implementations must be pure: the same phrase always yields the same answer.
/// Workers call [`Self::is_valid_mnemonic`] on every candidate and
/// [`Self::derive_address`] exactly once for each valid one.
pub trait PhraseDeriver: Send + Sync {
    fn is_valid_mnemonic(&self, phrase: &str) -> bool;

    /// # Errors
    ///
    /// Any failure skips the candidate; it never aborts the search.
    fn derive_address(&self, phrase: &str) -> Result<DerivedKey, DeriveError>;
}

impl<T: PhraseDeriver + ?Sized> PhraseDeriver for Arc<T> {
    fn is_valid_mnemonic(&self, phrase: &str) -> bool {
        (**self).is_valid_mnemonic(phrase)
    }

    fn derive_address(&self, phrase: &str) -> Result<DerivedKey, DeriveError> {
        (**self).derive_address(phrase)
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;

    /// Accepts every phrase that does not contain `reject` and derives the
    /// address `addr:<phrase>`. Phrases containing `poison` fail to derive.
    #[derive(Default)]
    pub(crate) struct MockDeriver {
        pub reject: Option<&'static str>,
        pub poison: Option<&'static str>,
    }

    pub(crate) fn address_of(phrase: &str) -> String {
        format!("addr:{phrase}")
    }

    impl PhraseDeriver for MockDeriver {
        fn is_valid_mnemonic(&self, phrase: &str) -> bool {
            self.reject.is_none_or(|r| !phrase.contains(r))
        }

        fn derive_address(&self, phrase: &str) -> Result<DerivedKey, DeriveError> {
            if self.poison.is_some_and(|p| phrase.contains(p)) {
                return Err(DeriveError::new("poisoned"));
            }
            Ok(DerivedKey {
                wif: format!("wif:{phrase}"),
                address: address_of(phrase),
            })
        }
    }
}
