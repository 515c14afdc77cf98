//! # Store contract
//!
//! The interface the runtime needs from a key/document store. Documents
//! without an attached store cannot publish; the store owns private key
//! custody and unlocks keys with a passphrase. The filesystem implementation
//! lives in the `eladid-keyring` crate; an in-memory one for tests is in
//! [`crate::test_utils`].

use crate::did::{Did, DidUrl};
use crate::document::{DidDocument, DocumentMetadata};
use crate::Result;

/// Key and document storage. Implementations must be safe for shared use
/// from a single logical thread of control; the runtime never calls back
/// into the store re-entrantly.
pub trait DidStore: Send + Sync {
    /// Persist a document (and its metadata) under its subject DID.
    fn store_did(&self, doc: &DidDocument) -> Result<()>;

    /// Load a document, with metadata reattached.
    ///
    /// # Errors
    ///
    /// * `NotFound` when the DID has never been stored.
    fn load_did(&self, did: &Did) -> Result<DidDocument>;

    /// Persist a private key under its key id, sealed with `storepass`.
    fn store_private_key(&self, id: &DidUrl, storepass: &str, key: &[u8]) -> Result<()>;

    /// Load and unseal a private key.
    ///
    /// # Errors
    ///
    /// * `NotFound` when no key is stored under `id`.
    /// * `InvalidArgs` when `storepass` does not unseal it.
    fn load_private_key(&self, id: &DidUrl, storepass: &str) -> Result<Vec<u8>>;

    /// True when a private key is stored under `id`.
    fn contains_private_key(&self, id: &DidUrl) -> bool;

    /// Update stored metadata without rewriting the document.
    fn store_metadata(&self, did: &Did, metadata: &DocumentMetadata) -> Result<()>;

    /// Load stored metadata, if any.
    fn load_metadata(&self, did: &Did) -> Result<Option<DocumentMetadata>>;
}
