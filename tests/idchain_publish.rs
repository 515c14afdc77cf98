//! End-to-end publish and resolve flows against the in-process ledger:
//! create, update chains, stale-txid replays, deactivation.

use std::sync::Arc;

use eladid::document::DocumentBuilder;
use eladid::error::Kind;
use eladid::test_utils::{self, MemStore};
use eladid::{crypto, Backend, DidStatus, DidStore, DummyLedger, DEFAULT_TTL_MS};
use eladid_keyring::{FileStore, RootIdentity};

const MNEMONIC: &str =
    "advance duty suspect finish space matter squeeze elephant twenty over stick shine";

fn backend(ledger: &Arc<DummyLedger>) -> (Backend, tempfile::TempDir) {
    let cache_dir = tempfile::tempdir().expect("tempdir");
    let backend = Backend::new(ledger.clone(), cache_dir.path(), DEFAULT_TTL_MS)
        .expect("backend");
    (backend, cache_dir)
}

#[test]
fn publish_then_resolve_reproduces_signature() {
    let ledger = Arc::new(DummyLedger::new());
    let (backend, _cache) = backend(&ledger);

    let store_dir = tempfile::tempdir().expect("tempdir");
    let store: Arc<dyn DidStore> =
        Arc::new(FileStore::open(store_dir.path()).expect("open store"));
    let identity = RootIdentity::from_mnemonic(MNEMONIC, "").expect("identity");

    let doc = identity.new_did(0, &store, test_utils::STOREPASS).expect("new DID");
    let did = doc.subject().expect("subject").clone();
    let signkey = doc.default_public_key().expect("key").id.clone();
    let published_signature = doc.proof_signature().expect("proof").to_string();

    backend.create_did(&doc, &signkey, test_utils::STOREPASS).expect("publish");

    let (resolved, status) = backend.resolve_did(&did, true).expect("resolve");
    let resolved = resolved.expect("document");
    assert_eq!(status, DidStatus::Valid);
    assert_eq!(resolved.proof_signature(), Some(published_signature.as_str()));
    assert!(resolved.metadata.txid.is_some());
    // the resolved document is bit-identical to what was published
    assert_eq!(resolved.to_json().expect("json"), doc.to_json().expect("json"));
}

#[test]
fn update_chain_and_biography_order() {
    let ledger = Arc::new(DummyLedger::new());
    let (backend, _cache) = backend(&ledger);
    let store = MemStore::shared();

    let (doc, _) = test_utils::published_document_in(&store, test_utils::STOREPASS);
    let did = doc.subject().expect("subject").clone();
    let signkey = doc.default_public_key().expect("key").id.clone();
    let mut signs = vec![doc.proof_signature().expect("proof").to_string()];

    backend.create_did(&doc, &signkey, test_utils::STOREPASS).expect("publish create");

    // first update: add #key1
    let (resolved, _) = backend.resolve_did(&did, true).expect("resolve");
    let mut current = resolved.expect("document");
    let txid1 = current.metadata.txid.clone().expect("txid");
    current.metadata.store = Some(store.clone());
    let extra = crypto::public_key_from_private(&crypto::generate_private_key()).expect("key");
    let current = DocumentBuilder::edit(&current)
        .authentication_key(&did.url("key1"), &crypto::base58::encode(&extra))
        .expect("add key1")
        .seal(&signkey, test_utils::STOREPASS)
        .expect("seal");
    signs.push(current.proof_signature().expect("proof").to_string());
    backend.update_did(&current, &signkey, test_utils::STOREPASS).expect("publish update 1");

    // second update: add #key2
    let (resolved, _) = backend.resolve_did(&did, true).expect("resolve");
    let mut current = resolved.expect("document");
    let txid2 = current.metadata.txid.clone().expect("txid");
    assert_ne!(txid1, txid2);
    // the previous resolve's signature travels as the predecessor
    assert_eq!(current.metadata.prev_signature.as_deref(), Some(signs[0].as_str()));
    current.metadata.store = Some(store.clone());
    let extra = crypto::public_key_from_private(&crypto::generate_private_key()).expect("key");
    let current = DocumentBuilder::edit(&current)
        .authentication_key(&did.url("key2"), &crypto::base58::encode(&extra))
        .expect("add key2")
        .seal(&signkey, test_utils::STOREPASS)
        .expect("seal");
    signs.push(current.proof_signature().expect("proof").to_string());
    backend.update_did(&current, &signkey, test_utils::STOREPASS).expect("publish update 2");

    // biography: three transactions, newest first
    let biography = backend.resolve_did_biography(&did).expect("biography");
    assert_eq!(biography.len(), 3);
    assert_eq!(biography.status, DidStatus::Valid);
    for i in 0..3 {
        let doc = biography.document_by_index(i).expect("document");
        assert_eq!(doc.proof_signature(), Some(signs[2 - i].as_str()));
    }
    assert_eq!(biography.txid_by_index(2), Some(txid1.as_str()));
}

#[test]
fn replayed_update_with_stale_txid_rejected() {
    let ledger = Arc::new(DummyLedger::new());
    let (backend, _cache) = backend(&ledger);
    let store = MemStore::shared();

    let (doc, _) = test_utils::published_document_in(&store, test_utils::STOREPASS);
    let did = doc.subject().expect("subject").clone();
    let signkey = doc.default_public_key().expect("key").id.clone();
    backend.create_did(&doc, &signkey, test_utils::STOREPASS).expect("publish create");

    let (resolved, _) = backend.resolve_did(&did, true).expect("resolve");
    let mut first = resolved.expect("document");
    let stale_txid = first.metadata.txid.clone().expect("txid");
    first.metadata.store = Some(store.clone());
    let extra = crypto::public_key_from_private(&crypto::generate_private_key()).expect("key");
    let first = DocumentBuilder::edit(&first)
        .authentication_key(&did.url("key1"), &crypto::base58::encode(&extra))
        .expect("add key")
        .seal(&signkey, test_utils::STOREPASS)
        .expect("seal");
    backend.update_did(&first, &signkey, test_utils::STOREPASS).expect("publish update");

    // replay another update still chained to the original txid
    let count_before = ledger.len();
    let mut replay = first.clone();
    replay.metadata.txid = Some(stale_txid);
    let err = backend
        .update_did(&replay, &signkey, test_utils::STOREPASS)
        .expect_err("stale update must be rejected");
    assert!(err.is(Kind::TransactionError));
    assert!(err.reason().contains("Previous transaction id mismatch"));
    // the rejected operation left no trace
    assert_eq!(ledger.len(), count_before);
}

#[test]
fn deactivate_after_update() {
    let ledger = Arc::new(DummyLedger::new());
    let (backend, _cache) = backend(&ledger);
    let store = MemStore::shared();

    let (doc, _) = test_utils::published_document_in(&store, test_utils::STOREPASS);
    let did = doc.subject().expect("subject").clone();
    let signkey = doc.default_public_key().expect("key").id.clone();
    backend.create_did(&doc, &signkey, test_utils::STOREPASS).expect("publish create");

    let (resolved, _) = backend.resolve_did(&did, true).expect("resolve");
    let mut current = resolved.expect("document");
    current.metadata.store = Some(store.clone());
    let extra = crypto::public_key_from_private(&crypto::generate_private_key()).expect("key");
    let updated = DocumentBuilder::edit(&current)
        .authentication_key(&did.url("key1"), &crypto::base58::encode(&extra))
        .expect("add key")
        .seal(&signkey, test_utils::STOREPASS)
        .expect("seal");
    backend.update_did(&updated, &signkey, test_utils::STOREPASS).expect("publish update");

    let mut signer = updated.clone();
    signer.metadata.store = Some(store.clone());
    backend
        .deactivate_did(&did, &signer, &signkey, None, test_utils::STOREPASS)
        .expect("deactivate");

    // resolution returns the pre-deactivation document, flagged deactivated
    let (resolved, status) = backend.resolve_did(&did, true).expect("resolve");
    let resolved = resolved.expect("document");
    assert_eq!(status, DidStatus::Deactivated);
    assert!(resolved.metadata.deactivated);
    assert_eq!(
        resolved.proof_signature(),
        updated.proof_signature(),
        "authoritative document must be the last one before deactivation"
    );
    // the terminating transition carries no document, so the predecessor
    // slot names the last live document
    assert_eq!(resolved.metadata.prev_signature.as_deref(), updated.proof_signature());

    // any further update is refused
    let mut replay = updated.clone();
    replay.metadata.store = Some(store.clone());
    replay.metadata.txid = resolved.metadata.txid.clone();
    let err = backend
        .update_did(&replay, &signkey, test_utils::STOREPASS)
        .expect_err("update after deactivation must fail");
    assert!(err.reason().contains("DID already deactivated"));
}

#[test]
fn unknown_did_resolves_to_not_found() {
    let ledger = Arc::new(DummyLedger::new());
    let (backend, _cache) = backend(&ledger);
    let did = "did:elastos:iNobodyHome".parse().expect("did");

    let (doc, status) = backend.resolve_did(&did, true).expect("resolve");
    assert!(doc.is_none());
    assert_eq!(status, DidStatus::NotFound);

    let err = backend.resolve_did_biography(&did).expect_err("no biography");
    assert!(err.is(Kind::NotFound));
}

#[test]
fn local_resolve_handle_takes_precedence() {
    let ledger = Arc::new(DummyLedger::new());
    let (backend, _cache) = backend(&ledger);
    let store = MemStore::shared();

    let (doc, _) = test_utils::published_document_in(&store, test_utils::STOREPASS);
    let did = doc.subject().expect("subject").clone();
    let handle_doc = doc.clone();
    backend.set_local_resolve_handle(Some(Box::new(move |asked: &eladid::Did| {
        (asked == handle_doc.subject().expect("subject")).then(|| handle_doc.clone())
    })));

    // never published, but the local handle answers anyway
    let (resolved, status) = backend.resolve_did(&did, true).expect("resolve");
    assert_eq!(status, DidStatus::Valid);
    assert_eq!(
        resolved.expect("document").to_json().expect("json"),
        doc.to_json().expect("json")
    );

    backend.set_local_resolve_handle(None);
    let (resolved, status) = backend.resolve_did(&did, true).expect("resolve");
    assert!(resolved.is_none());
    assert_eq!(status, DidStatus::NotFound);
}

#[test]
fn cached_resolution_survives_ledger_reset() {
    let ledger = Arc::new(DummyLedger::new());
    let (backend, _cache) = backend(&ledger);
    let store = MemStore::shared();

    let (doc, _) = test_utils::published_document_in(&store, test_utils::STOREPASS);
    let did = doc.subject().expect("subject").clone();
    let signkey = doc.default_public_key().expect("key").id.clone();
    backend.create_did(&doc, &signkey, test_utils::STOREPASS).expect("publish");

    // prime the cache, then wipe the chain
    let (_, status) = backend.resolve_did(&did, false).expect("resolve");
    assert_eq!(status, DidStatus::Valid);
    ledger.reset();

    // cache still answers; a forced resolve sees the empty chain
    let (cached, status) = backend.resolve_did(&did, false).expect("resolve");
    assert_eq!(status, DidStatus::Valid);
    assert!(cached.is_some());
    let (_, status) = backend.resolve_did(&did, true).expect("resolve");
    assert_eq!(status, DidStatus::NotFound);
}
