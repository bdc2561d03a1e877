use crate::{DeriveError, DerivedKey, PhraseDeriver};
use bip39::{Language, Mnemonic};
use bitcoin::{
    Address, Network,
    bip32::{ChildNumber, DerivationPath, Xpriv},
    secp256k1::{All, Secp256k1},
};

/// BIP39 English checksum validation plus BIP44 derivation at
/// `m/44'/0'/0'/0/0` to a mainnet P2PKH address, with an empty passphrase.
pub struct Bip44Deriver {
    secp: Secp256k1<All>,
    path: DerivationPath,
}

impl Default for Bip44Deriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Bip44Deriver {
    pub fn new() -> Self {
        let path = DerivationPath::from(vec![
            ChildNumber::Hardened { index: 44 },
            ChildNumber::Hardened { index: 0 },
            ChildNumber::Hardened { index: 0 },
            ChildNumber::Normal { index: 0 },
            ChildNumber::Normal { index: 0 },
        ]);
        Self {
            secp: Secp256k1::new(),
            path,
        }
    }

    pub fn path(&self) -> &DerivationPath {
        &self.path
    }
}

impl core::fmt::Debug for Bip44Deriver {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Bip44Deriver")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl PhraseDeriver for Bip44Deriver {
    fn is_valid_mnemonic(&self, phrase: &str) -> bool {
        Mnemonic::parse_in_normalized(Language::English, phrase).is_ok()
    }

    fn derive_address(&self, phrase: &str) -> Result<DerivedKey, DeriveError> {
        let mnemonic = Mnemonic::parse_in_normalized(Language::English, phrase)
            .map_err(|e| DeriveError::new(e.to_string()))?;
        let seed = mnemonic.to_seed_normalized("");
        let master = Xpriv::new_master(Network::Bitcoin, &seed)
            .map_err(|e| DeriveError::new(e.to_string()))?;
        let child = master
            .derive_priv(&self.secp, &self.path)
            .map_err(|e| DeriveError::new(e.to_string()))?;

        let private_key = child.to_priv();
        let public_key = private_key.public_key(&self.secp);
        let address = Address::p2pkh(public_key.pubkey_hash(), Network::Bitcoin);

        Ok(DerivedKey {
            wif: private_key.to_wif(),
            address: address.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ABANDON_ABOUT: &str = "abandon abandon abandon abandon abandon abandon \
                                 abandon abandon abandon abandon abandon about";

    #[test]
    fn validates_checksums() {
        let deriver = Bip44Deriver::new();
        assert!(deriver.is_valid_mnemonic(ABANDON_ABOUT));
        assert!(!deriver.is_valid_mnemonic(
            "abandon abandon abandon abandon abandon abandon \
             abandon abandon abandon abandon abandon abandon"
        ));
        assert!(!deriver.is_valid_mnemonic("not a phrase"));
    }

    #[test]
    fn derives_the_well_known_test_vector() {
        let deriver = Bip44Deriver::new();
        let key = deriver.derive_address(ABANDON_ABOUT).unwrap();
        assert_eq!(key.address, "1LqBGSKuX5yYUonjxT5qGfpUsXKYYWeabA");
        assert!(key.wif.starts_with('L') || key.wif.starts_with('K'));
    }

    #[test]
    fn invalid_phrase_is_a_derive_error() {
        let deriver = Bip44Deriver::new();
        assert!(deriver.derive_address("zoo zoo").is_err());
    }
}
