//! TTL-bounded on-disk memoization of resolve results. Files are content
//! addressed by the hash of the resolved identifier; writes go through a
//! temp file and an atomic rename, so concurrent writers race on
//! latest-wins and readers never observe a torn file.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::crypto;
use crate::did::{Did, DidUrl};
use crate::error::Kind;
use crate::{tracerr, Result};

/// One cached resolve result with its write timestamp.
#[derive(Deserialize, Serialize)]
struct Entry {
    /// Write time, milliseconds since the epoch.
    written: i64,
    /// The RPC result body as received.
    result: Value,
}

/// The on-disk cache. Cheap to clone paths around; all state is the
/// directory.
#[derive(Clone, Debug)]
pub struct ResolverCache {
    dir: PathBuf,
}

impl ResolverCache {
    /// Open (creating if needed) a cache under `dir`.
    ///
    /// # Errors
    ///
    /// * `IOError` when the directory cannot be created.
    pub fn new(dir: &Path) -> Result<Self> {
        if let Err(e) = fs::create_dir_all(dir) {
            tracerr!(Kind::IOError, "cannot create cache directory {}: {}", dir.display(), e);
        }
        Ok(Self { dir: dir.to_path_buf() })
    }

    /// Cache file name for a DID result.
    #[must_use]
    pub fn did_key(did: &Did) -> String {
        crypto::base58::encode(&crypto::sha256(did.to_string().as_bytes()))
    }

    /// Cache file name for a credential result, issuer-qualified when the
    /// query was.
    #[must_use]
    pub fn credential_key(id: &DidUrl, issuer: Option<&Did>) -> String {
        let base = crypto::base58::encode(&crypto::sha256(id.to_string().as_bytes()));
        match issuer {
            Some(issuer) => format!("{base}.{}", crypto::base58::encode(issuer.id().as_bytes())),
            None => base,
        }
    }

    /// Load a cached result if it is younger than `ttl` milliseconds.
    /// Expired or unreadable entries are a miss, never an error.
    #[must_use]
    pub fn load(&self, key: &str, ttl: i64) -> Option<Value> {
        let path = self.dir.join(key);
        let body = fs::read_to_string(&path).ok()?;
        let entry: Entry = serde_json::from_str(&body).ok()?;
        let age = Utc::now().timestamp_millis() - entry.written;
        if age > ttl {
            debug!("cache entry {} expired ({age}ms old)", key);
            return None;
        }
        Some(entry.result)
    }

    /// Store a result under `key`, last-writer-wins.
    ///
    /// # Errors
    ///
    /// * `IOError` when the write or rename fails.
    pub fn store(&self, key: &str, result: &Value) -> Result<()> {
        let entry = Entry { written: Utc::now().timestamp_millis(), result: result.clone() };
        let body = serde_json::to_string(&entry)?;

        let tmp = self.dir.join(format!("{key}.{}.tmp", std::process::id()));
        let path = self.dir.join(key);
        if let Err(e) = fs::write(&tmp, body) {
            tracerr!(Kind::IOError, "cannot write cache entry {}: {}", tmp.display(), e);
        }
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            tracerr!(Kind::IOError, "cannot commit cache entry {}: {}", path.display(), e);
        }
        Ok(())
    }

    /// Drop every cached entry.
    ///
    /// # Errors
    ///
    /// * `IOError` when the directory cannot be read.
    pub fn invalidate_all(&self) -> Result<()> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => tracerr!(Kind::IOError, "cannot read cache directory: {}", e),
        };
        for entry in entries.flatten() {
            let _ = fs::remove_file(entry.path());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn store_then_load_within_ttl() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = ResolverCache::new(dir.path()).expect("cache");
        let did = Did::new("iCachedSubject").expect("did");
        let key = ResolverCache::did_key(&did);
        let result = json!({"did": did.to_string(), "status": 0});

        cache.store(&key, &result).expect("store");
        assert_eq!(cache.load(&key, 60_000), Some(result));
    }

    #[test]
    fn zero_ttl_is_a_miss() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = ResolverCache::new(dir.path()).expect("cache");
        let key = ResolverCache::did_key(&Did::new("iShortLived").expect("did"));
        cache.store(&key, &json!({"status": 3})).expect("store");
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(cache.load(&key, 0), None);
    }

    #[test]
    fn last_writer_wins() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = ResolverCache::new(dir.path()).expect("cache");
        let key = ResolverCache::did_key(&Did::new("iOverwritten").expect("did"));
        cache.store(&key, &json!({"v": 1})).expect("store");
        cache.store(&key, &json!({"v": 2})).expect("store");
        assert_eq!(cache.load(&key, 60_000), Some(json!({"v": 2})));
    }

    #[test]
    fn credential_keys_separate_issuers() {
        let id = DidUrl::parse("did:elastos:iOwner#profile", None).expect("url");
        let issuer = Did::new("iIssuer").expect("did");
        let plain = ResolverCache::credential_key(&id, None);
        let qualified = ResolverCache::credential_key(&id, Some(&issuer));
        assert_ne!(plain, qualified);
        assert!(qualified.starts_with(&plain));
    }

    #[test]
    fn corrupt_entry_is_a_miss() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = ResolverCache::new(dir.path()).expect("cache");
        let key = "corrupt";
        std::fs::write(dir.path().join(key), "{not json").expect("write");
        assert_eq!(cache.load(key, 60_000), None);
    }
}
