//! Deactivation through an authorization key: the target document delegates
//! a key to another DID, which can then terminate it.

use std::sync::Arc;

use eladid::document::DocumentBuilder;
use eladid::error::Kind;
use eladid::test_utils::{self, MemStore};
use eladid::{Backend, DidStatus, DummyLedger, DEFAULT_TTL_MS};

fn backend(ledger: &Arc<DummyLedger>) -> (Backend, tempfile::TempDir) {
    let cache_dir = tempfile::tempdir().expect("tempdir");
    let backend =
        Backend::new(ledger.clone(), cache_dir.path(), DEFAULT_TTL_MS).expect("backend");
    (backend, cache_dir)
}

#[test]
fn authorized_controller_deactivates_target() {
    let ledger = Arc::new(DummyLedger::new());
    let (backend, _cache) = backend(&ledger);
    let store = MemStore::shared();

    // B holds the recovery key
    let (b_doc, _) = test_utils::published_document_in(&store, test_utils::STOREPASS);
    let b_did = b_doc.subject().expect("subject").clone();
    let b_key = b_doc.default_public_key().expect("key").clone();
    backend.create_did(&b_doc, &b_key.id, test_utils::STOREPASS).expect("publish B");

    // A delegates deactivation to B through an authorization key
    let (a_doc, _) = test_utils::published_document_in(&store, test_utils::STOREPASS);
    let a_did = a_doc.subject().expect("subject").clone();
    let a_signkey = a_doc.default_public_key().expect("key").id.clone();
    let a_doc = DocumentBuilder::edit(&a_doc)
        .authorization_key(&a_did.url("recovery"), &b_did, &b_key.public_key_base58)
        .expect("add authorization key")
        .seal(&a_signkey, test_utils::STOREPASS)
        .expect("seal");
    backend.create_did(&a_doc, &a_signkey, test_utils::STOREPASS).expect("publish A");

    // B invokes deactivation against A
    backend
        .deactivate_did(&a_did, &b_doc, &b_key.id, Some(&b_key.id), test_utils::STOREPASS)
        .expect("deactivate A");

    let (resolved, status) = backend.resolve_did(&a_did, true).expect("resolve");
    assert_eq!(status, DidStatus::Deactivated);
    assert!(resolved.expect("document").metadata.deactivated);

    // the deactivation envelope was signed under B's identity, not A's
    let biography = backend.resolve_did_biography(&a_did).expect("biography");
    let newest = &biography.txs[0].request;
    assert_eq!(newest.proof.verification_method.did(), &b_did);
}

#[test]
fn stranger_cannot_deactivate() {
    let ledger = Arc::new(DummyLedger::new());
    let (backend, _cache) = backend(&ledger);
    let store = MemStore::shared();

    let (a_doc, _) = test_utils::published_document_in(&store, test_utils::STOREPASS);
    let a_did = a_doc.subject().expect("subject").clone();
    let a_signkey = a_doc.default_public_key().expect("key").id.clone();
    backend.create_did(&a_doc, &a_signkey, test_utils::STOREPASS).expect("publish A");

    // C was never delegated anything by A
    let (c_doc, _) = test_utils::published_document_in(&store, test_utils::STOREPASS);
    let c_key = c_doc.default_public_key().expect("key").id.clone();
    backend.create_did(&c_doc, &c_key, test_utils::STOREPASS).expect("publish C");

    let err = backend
        .deactivate_did(&a_did, &c_doc, &c_key, Some(&c_key), test_utils::STOREPASS)
        .expect_err("unauthorized deactivation must fail");
    assert!(err.is(Kind::TransactionError));

    let (_, status) = backend.resolve_did(&a_did, true).expect("resolve");
    assert_eq!(status, DidStatus::Valid);
}
