//! Hierarchical-deterministic root identity. A mnemonic sentence becomes a
//! 64-byte seed (PBKDF2-HMAC-SHA512, the usual mnemonic KDF), the seed
//! becomes a master key and chain code, and hardened children are derived
//! per index. The same sentence always yields the same DIDs.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use sha2::Sha512;

use eladid::did::Did;
use eladid::document::{builder, DidDocument};
use eladid::error::Kind;
use eladid::store::DidStore;
use eladid::{crypto, tracerr, Result};

type HmacSha512 = Hmac<Sha512>;

const SEED_ROUNDS: u32 = 2048;
const MASTER_KEY: &[u8] = b"Elastos seed";

/// A root identity derived from a mnemonic sentence.
pub struct RootIdentity {
    key: [u8; 32],
    chain: [u8; 32],
}

impl RootIdentity {
    /// Derive from a mnemonic sentence and an optional extra passphrase.
    ///
    /// # Errors
    ///
    /// * `InvalidArgs` on an empty sentence.
    pub fn from_mnemonic(mnemonic: &str, passphrase: &str) -> Result<Self> {
        if mnemonic.trim().is_empty() {
            tracerr!(Kind::InvalidArgs, "empty mnemonic sentence");
        }
        let mut seed = [0u8; 64];
        let salt = format!("mnemonic{passphrase}");
        pbkdf2::pbkdf2_hmac::<Sha512>(
            mnemonic.as_bytes(),
            salt.as_bytes(),
            SEED_ROUNDS,
            &mut seed,
        );

        let mut mac = HmacSha512::new_from_slice(MASTER_KEY).expect("any key length works");
        mac.update(&seed);
        let digest = mac.finalize().into_bytes();

        let mut key = [0u8; 32];
        let mut chain = [0u8; 32];
        key.copy_from_slice(&digest[..32]);
        chain.copy_from_slice(&digest[32..]);
        Ok(Self { key, chain })
    }

    /// The hardened child private key for `index`.
    ///
    /// Candidates falling outside the curve order are re-derived with a
    /// bumped counter, so every index yields a key.
    #[must_use]
    pub fn derive(&self, index: u32) -> Vec<u8> {
        for counter in 0u8..=u8::MAX {
            let mut mac =
                HmacSha512::new_from_slice(&self.chain).expect("any key length works");
            mac.update(&[0x00]);
            mac.update(&self.key);
            mac.update(&(0x8000_0000 | index).to_be_bytes());
            mac.update(&[counter]);
            let digest = mac.finalize().into_bytes();
            let candidate = &digest[..32];
            if crypto::public_key_from_private(candidate).is_ok() {
                return candidate.to_vec();
            }
        }
        unreachable!("curve order rejections are vanishingly rare");
    }

    /// The DID at `index`.
    #[must_use]
    pub fn did(&self, index: u32) -> Did {
        let sk = self.derive(index);
        let pk = crypto::public_key_from_private(&sk).expect("derived key is valid");
        Did::from_key(&pk)
    }

    /// Create and seal a primitive DID document at `index`, storing its
    /// private key.
    ///
    /// # Errors
    ///
    /// * Store failures while persisting the key.
    pub fn new_did(
        &self, index: u32, store: &Arc<dyn DidStore>, storepass: &str,
    ) -> Result<DidDocument> {
        let sk = self.derive(index);
        let doc = builder::new_primitive(&sk, store, storepass)?;
        store.store_did(&doc)?;
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use eladid::test_utils::MemStore;

    use super::*;

    const MNEMONIC: &str =
        "advance duty suspect finish space matter squeeze elephant twenty over stick shine";

    #[test]
    fn derivation_is_deterministic() {
        let a = RootIdentity::from_mnemonic(MNEMONIC, "").expect("identity");
        let b = RootIdentity::from_mnemonic(MNEMONIC, "").expect("identity");
        assert_eq!(a.derive(0), b.derive(0));
        assert_eq!(a.did(0), b.did(0));
        assert_ne!(a.derive(0), a.derive(1));
    }

    #[test]
    fn passphrase_changes_the_tree() {
        let a = RootIdentity::from_mnemonic(MNEMONIC, "").expect("identity");
        let b = RootIdentity::from_mnemonic(MNEMONIC, "extra").expect("identity");
        assert_ne!(a.did(0), b.did(0));
    }

    #[test]
    fn new_did_is_sealed_and_stored() {
        let identity = RootIdentity::from_mnemonic(MNEMONIC, "").expect("identity");
        let store = MemStore::shared();
        let doc = identity.new_did(0, &store, "passwd").expect("new DID");

        assert_eq!(doc.subject().expect("subject"), &identity.did(0));
        assert!(!doc.proof.is_empty());
        let keyid = doc.default_public_key().expect("key").id.clone();
        assert!(store.contains_private_key(&keyid));
        store.load_did(doc.subject().expect("subject")).expect("stored");
    }

    #[test]
    fn empty_mnemonic_rejected() {
        assert!(RootIdentity::from_mnemonic("  ", "").is_err());
    }
}
