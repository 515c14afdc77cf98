//! Filesystem store. Layout under the root directory:
//!
//! ```text
//! ids/<idstring>/document.json
//! ids/<idstring>/metadata.json
//! ids/<idstring>/keys/<hash-of-key-id>
//! ```
//!
//! Key files hold `salt || nonce || ciphertext`; the cipher key is derived
//! from the store passphrase with PBKDF2-HMAC-SHA512.

use std::fs;
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha512;
use tracing::debug;

use eladid::did::{Did, DidUrl};
use eladid::document::{DidDocument, DocumentMetadata};
use eladid::error::Kind;
use eladid::store::DidStore;
use eladid::{crypto, tracerr, Result};

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KDF_ROUNDS: u32 = 10_000;

/// The store contract on disk.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// * `IOError` when the directory cannot be created.
    pub fn open(root: &Path) -> Result<Self> {
        if let Err(e) = fs::create_dir_all(root.join("ids")) {
            tracerr!(Kind::IOError, "cannot create store at {}: {}", root.display(), e);
        }
        Ok(Self { root: root.to_path_buf() })
    }

    fn id_dir(&self, did: &Did) -> PathBuf {
        self.root.join("ids").join(did.id())
    }

    fn key_path(&self, id: &DidUrl) -> PathBuf {
        let name = crypto::base58::encode(&crypto::sha256(id.to_string().as_bytes()));
        self.id_dir(id.did()).join("keys").join(name)
    }

    fn cipher_key(storepass: &str, salt: &[u8]) -> [u8; 32] {
        let mut key = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha512>(storepass.as_bytes(), salt, KDF_ROUNDS, &mut key);
        key
    }

    fn write(&self, path: &Path, body: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                tracerr!(Kind::IOError, "cannot create {}: {}", parent.display(), e);
            }
        }
        if let Err(e) = fs::write(path, body) {
            tracerr!(Kind::IOError, "cannot write {}: {}", path.display(), e);
        }
        Ok(())
    }
}

impl DidStore for FileStore {
    fn store_did(&self, doc: &DidDocument) -> Result<()> {
        let did = doc.subject()?;
        self.write(&self.id_dir(did).join("document.json"), doc.to_json()?.as_bytes())?;
        self.store_metadata(did, &doc.metadata)
    }

    fn load_did(&self, did: &Did) -> Result<DidDocument> {
        let path = self.id_dir(did).join("document.json");
        let body = match fs::read_to_string(&path) {
            Ok(body) => body,
            Err(_) => tracerr!(Kind::NotFound, "no document for {}", did),
        };
        let mut doc = DidDocument::from_json(&body)?;
        if let Some(metadata) = self.load_metadata(did)? {
            doc.metadata = metadata;
        }
        Ok(doc)
    }

    fn store_private_key(&self, id: &DidUrl, storepass: &str, key: &[u8]) -> Result<()> {
        if storepass.is_empty() {
            tracerr!(Kind::InvalidArgs, "empty store passphrase");
        }
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut nonce);

        let cipher_key = Self::cipher_key(storepass, &salt);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&cipher_key));
        let sealed = match cipher.encrypt(Nonce::from_slice(&nonce), key) {
            Ok(sealed) => sealed,
            Err(_) => tracerr!(Kind::IOError, "cannot seal private key {}", id),
        };

        let mut body = salt.to_vec();
        body.extend_from_slice(&nonce);
        body.extend_from_slice(&sealed);
        debug!("sealing private key for {}", id);
        self.write(&self.key_path(id), &body)
    }

    fn load_private_key(&self, id: &DidUrl, storepass: &str) -> Result<Vec<u8>> {
        let body = match fs::read(self.key_path(id)) {
            Ok(body) => body,
            Err(_) => tracerr!(Kind::NotFound, "no private key for {}", id),
        };
        if body.len() <= SALT_LEN + NONCE_LEN {
            tracerr!(Kind::IOError, "truncated key file for {}", id);
        }
        let (salt, rest) = body.split_at(SALT_LEN);
        let (nonce, sealed) = rest.split_at(NONCE_LEN);

        let cipher_key = Self::cipher_key(storepass, salt);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&cipher_key));
        match cipher.decrypt(Nonce::from_slice(nonce), sealed) {
            Ok(key) => Ok(key),
            Err(_) => tracerr!(Kind::InvalidArgs, "wrong store passphrase"),
        }
    }

    fn contains_private_key(&self, id: &DidUrl) -> bool {
        self.key_path(id).exists()
    }

    fn store_metadata(&self, did: &Did, metadata: &DocumentMetadata) -> Result<()> {
        let body = serde_json::to_string(metadata)?;
        self.write(&self.id_dir(did).join("metadata.json"), body.as_bytes())
    }

    fn load_metadata(&self, did: &Did) -> Result<Option<DocumentMetadata>> {
        let path = self.id_dir(did).join("metadata.json");
        let body = match fs::read_to_string(&path) {
            Ok(body) => body,
            Err(_) => return Ok(None),
        };
        match serde_json::from_str(&body) {
            Ok(metadata) => Ok(Some(metadata)),
            Err(e) => tracerr!(Kind::IOError, "corrupt metadata for {}: {}", did, e),
        }
    }
}
