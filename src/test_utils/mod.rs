//! Fixtures for tests: an in-memory store and small document factories.
//! Compiled into the crate so integration tests and downstream crates can
//! reuse them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::crypto;
use crate::did::{Did, DidUrl};
use crate::document::{builder, DidDocument, DocumentBuilder, DocumentMetadata};
use crate::error::Kind;
use crate::store::DidStore;
use crate::validate::DocumentSource;
use crate::{tracerr, Result};

/// Store passphrase used across the fixtures.
pub const STOREPASS: &str = "passwd";

/// In-memory implementation of the store contract. Private keys are kept
/// alongside the passphrase that sealed them; unsealing checks equality.
#[derive(Default)]
pub struct MemStore {
    docs: Mutex<HashMap<String, DidDocument>>,
    metadata: Mutex<HashMap<String, DocumentMetadata>>,
    keys: Mutex<HashMap<String, (String, Vec<u8>)>>,
}

impl MemStore {
    /// A fresh, empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh store behind the trait object the runtime passes around.
    #[must_use]
    pub fn shared() -> Arc<dyn DidStore> {
        Arc::new(Self::new())
    }
}

impl DidStore for MemStore {
    fn store_did(&self, doc: &DidDocument) -> Result<()> {
        let subject = doc.subject()?.to_string();
        let mut stripped = doc.clone();
        stripped.metadata.store = None;
        self.metadata
            .lock()
            .expect("store lock poisoned")
            .insert(subject.clone(), stripped.metadata.clone());
        self.docs.lock().expect("store lock poisoned").insert(subject, stripped);
        Ok(())
    }

    fn load_did(&self, did: &Did) -> Result<DidDocument> {
        match self.docs.lock().expect("store lock poisoned").get(&did.to_string()) {
            Some(doc) => Ok(doc.clone()),
            None => tracerr!(Kind::NotFound, "no document for {}", did),
        }
    }

    fn store_private_key(&self, id: &DidUrl, storepass: &str, key: &[u8]) -> Result<()> {
        if storepass.is_empty() {
            tracerr!(Kind::InvalidArgs, "empty store passphrase");
        }
        self.keys
            .lock()
            .expect("store lock poisoned")
            .insert(id.to_string(), (storepass.to_string(), key.to_vec()));
        Ok(())
    }

    fn load_private_key(&self, id: &DidUrl, storepass: &str) -> Result<Vec<u8>> {
        match self.keys.lock().expect("store lock poisoned").get(&id.to_string()) {
            Some((pass, key)) => {
                if pass != storepass {
                    tracerr!(Kind::InvalidArgs, "wrong store passphrase");
                }
                Ok(key.clone())
            }
            None => tracerr!(Kind::NotFound, "no private key for {}", id),
        }
    }

    fn contains_private_key(&self, id: &DidUrl) -> bool {
        self.keys.lock().expect("store lock poisoned").contains_key(&id.to_string())
    }

    fn store_metadata(&self, did: &Did, metadata: &DocumentMetadata) -> Result<()> {
        let mut stripped = metadata.clone();
        stripped.store = None;
        self.metadata.lock().expect("store lock poisoned").insert(did.to_string(), stripped);
        Ok(())
    }

    fn load_metadata(&self, did: &Did) -> Result<Option<DocumentMetadata>> {
        Ok(self.metadata.lock().expect("store lock poisoned").get(&did.to_string()).cloned())
    }
}

/// An unsigned primitive document with its private key. No store attached.
#[must_use]
pub fn primitive_document() -> (DidDocument, Vec<u8>) {
    let sk = crypto::generate_private_key();
    let pk = crypto::public_key_from_private(&sk).expect("derive public key");
    let did = Did::from_key(&pk);
    let keyid = did.url("primary");
    let doc = DocumentBuilder::new(&did)
        .authentication_key(&keyid, &crypto::base58::encode(&pk))
        .expect("add key");
    (doc.build_unsigned(), sk)
}

/// A sealed primitive document whose key lives in `store`.
#[must_use]
pub fn primitive_document_in(store: &Arc<dyn DidStore>, storepass: &str) -> (DidDocument, Vec<u8>) {
    let sk = crypto::generate_private_key();
    let doc = builder::new_primitive(&sk, store, storepass).expect("new primitive DID");
    (doc, sk)
}

/// Alias kept for readability at call sites: a document ready to publish.
#[must_use]
pub fn published_document_in(store: &Arc<dyn DidStore>, storepass: &str) -> (DidDocument, Vec<u8>) {
    primitive_document_in(store, storepass)
}

/// A customized DID with a single primitive controller, both sealed into
/// the same store.
pub struct CustomizedFixture {
    /// The controller's document.
    pub controller: DidDocument,
    /// The customized document, sealed by the controller.
    pub customized: DidDocument,
}

/// Build a [`CustomizedFixture`] with a human-readable subject.
#[must_use]
pub fn customized_fixture(store: &Arc<dyn DidStore>, storepass: &str) -> CustomizedFixture {
    let (controller, _) = primitive_document_in(store, storepass);
    let controller_did = controller.subject().expect("subject").clone();
    let signkey = controller.default_public_key().expect("key").id.clone();

    let custom_did = Did::new(&format!("littlefish{}", &crypto::rand_txid()[..8])).expect("did");
    let customized = DocumentBuilder::new(&custom_did)
        .controller(&controller_did)
        .attach_store(store.clone())
        .seal(&signkey, storepass)
        .expect("seal customized document");

    CustomizedFixture { controller, customized }
}

/// A document source over a fixed set of documents.
#[derive(Default)]
pub struct FixedDocuments {
    docs: HashMap<String, DidDocument>,
}

impl FixedDocuments {
    /// Build from the given documents.
    #[must_use]
    pub fn of(docs: &[&DidDocument]) -> Self {
        let mut map = HashMap::new();
        for doc in docs {
            if let Some(did) = &doc.id {
                map.insert(did.to_string(), (*doc).clone());
            }
        }
        Self { docs: map }
    }
}

impl DocumentSource for FixedDocuments {
    fn document(&self, did: &Did) -> Result<Option<DidDocument>> {
        Ok(self.docs.get(&did.to_string()).cloned())
    }
}
