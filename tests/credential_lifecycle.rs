//! Credential lifecycle against the in-process ledger: declare, resolve,
//! list, revoke, and issuer-scoped revocation checks.

use std::sync::Arc;

use eladid::error::Kind;
use eladid::test_utils::{self, MemStore};
use eladid::{
    Backend, Credential, CredentialBuilder, CredentialStatus, DidDocument, DidUrl, DummyLedger,
    DEFAULT_TTL_MS,
};

fn backend(ledger: &Arc<DummyLedger>) -> (Backend, tempfile::TempDir) {
    let cache_dir = tempfile::tempdir().expect("tempdir");
    let backend =
        Backend::new(ledger.clone(), cache_dir.path(), DEFAULT_TTL_MS).expect("backend");
    (backend, cache_dir)
}

struct Party {
    doc: DidDocument,
    signkey: DidUrl,
}

fn publish_party(backend: &Backend, store: &Arc<dyn eladid::DidStore>) -> Party {
    let (doc, _) = test_utils::published_document_in(store, test_utils::STOREPASS);
    let signkey = doc.default_public_key().expect("key").id.clone();
    backend.create_did(&doc, &signkey, test_utils::STOREPASS).expect("publish");
    Party { doc, signkey }
}

fn issue(store: &Arc<dyn eladid::DidStore>, issuer: &Party, owner: &Party) -> Credential {
    let owner_did = owner.doc.subject().expect("subject").clone();
    CredentialBuilder::new(&owner_did.url("membership"), &owner_did)
        .with_type("MembershipCredential")
        .claim("club", "rustaceans")
        .claim("grade", 7)
        .seal(&issuer.doc, &issuer.signkey, test_utils::STOREPASS, store.as_ref())
        .expect("issue credential")
}

#[test]
fn declare_then_resolve() {
    let ledger = Arc::new(DummyLedger::new());
    let (backend, _cache) = backend(&ledger);
    let store = MemStore::shared();

    let issuer = publish_party(&backend, &store);
    let owner = publish_party(&backend, &store);
    let vc = issue(&store, &issuer, &owner);

    backend
        .declare_credential(&vc, &owner.signkey, &owner.doc, test_utils::STOREPASS)
        .expect("declare");

    let (resolved, status) = backend.resolve_credential(&vc.id, true).expect("resolve");
    assert_eq!(status, CredentialStatus::Valid);
    let resolved = resolved.expect("credential");
    assert_eq!(resolved.to_json().expect("json"), vc.to_json().expect("json"));

    // double declaration is refused
    let err = backend
        .declare_credential(&vc, &owner.signkey, &owner.doc, test_utils::STOREPASS)
        .expect_err("second declare must fail");
    assert!(err.is(Kind::TransactionError));
    assert!(err.reason().contains("already exists"));
}

#[test]
fn revoke_by_issuer() {
    let ledger = Arc::new(DummyLedger::new());
    let (backend, _cache) = backend(&ledger);
    let store = MemStore::shared();

    let issuer = publish_party(&backend, &store);
    let issuer_did = issuer.doc.subject().expect("subject").clone();
    let owner = publish_party(&backend, &store);
    let vc = issue(&store, &issuer, &owner);

    backend
        .declare_credential(&vc, &owner.signkey, &owner.doc, test_utils::STOREPASS)
        .expect("declare");
    assert!(!backend.resolve_revocation(&vc.id, &issuer_did).expect("revocation query"));

    backend
        .revoke_credential(&vc.id, &issuer.signkey, &issuer.doc, test_utils::STOREPASS)
        .expect("revoke");

    let (resolved, status) = backend.resolve_credential(&vc.id, true).expect("resolve");
    assert_eq!(status, CredentialStatus::Revoked);
    // the declared content is still recoverable from the history
    assert!(resolved.is_some());
    assert!(backend.resolve_revocation(&vc.id, &issuer_did).expect("revocation query"));

    // revoking twice is refused
    let err = backend
        .revoke_credential(&vc.id, &issuer.signkey, &issuer.doc, test_utils::STOREPASS)
        .expect_err("second revoke must fail");
    assert!(err.reason().contains("already revoked"));
}

#[test]
fn revocation_without_declaration() {
    let ledger = Arc::new(DummyLedger::new());
    let (backend, _cache) = backend(&ledger);
    let store = MemStore::shared();

    let owner = publish_party(&backend, &store);
    let owner_did = owner.doc.subject().expect("subject").clone();
    let vc_id = owner_did.url("neverdeclared");

    // a credential can be revoked before it was ever put on chain
    backend
        .revoke_credential(&vc_id, &owner.signkey, &owner.doc, test_utils::STOREPASS)
        .expect("revoke undeclared");

    let (resolved, status) = backend.resolve_credential(&vc_id, true).expect("resolve");
    assert!(resolved.is_none());
    assert_eq!(status, CredentialStatus::Revoked);
}

#[test]
fn unknown_credential_is_not_found() {
    let ledger = Arc::new(DummyLedger::new());
    let (backend, _cache) = backend(&ledger);

    let id = DidUrl::parse("did:elastos:iNobody#ghost", None).expect("url");
    let (resolved, status) = backend.resolve_credential(&id, true).expect("resolve");
    assert!(resolved.is_none());
    assert_eq!(status, CredentialStatus::NotFound);

    let err = backend.resolve_credential_biography(&id, None).expect_err("no biography");
    assert!(err.is(Kind::NotFound));
}

#[test]
fn list_credentials_paginates() {
    let ledger = Arc::new(DummyLedger::new());
    let (backend, _cache) = backend(&ledger);
    let store = MemStore::shared();

    let owner = publish_party(&backend, &store);
    let owner_did = owner.doc.subject().expect("subject").clone();

    for name in ["alpha", "beta", "gamma"] {
        let vc = CredentialBuilder::new(&owner_did.url(name), &owner_did)
            .claim("name", name)
            .seal(&owner.doc, &owner.signkey, test_utils::STOREPASS, store.as_ref())
            .expect("issue");
        backend
            .declare_credential(&vc, &owner.signkey, &owner.doc, test_utils::STOREPASS)
            .expect("declare");
    }

    let all = backend.list_credentials(&owner_did, 0, 10).expect("list");
    assert_eq!(all.len(), 3);
    assert!(all.iter().all(|id| id.did() == &owner_did));

    let page = backend.list_credentials(&owner_did, 1, 1).expect("list page");
    assert_eq!(page.len(), 1);
    assert_eq!(page[0], all[1]);

    let empty = backend.list_credentials(&owner_did, 3, 10).expect("list past end");
    assert!(empty.is_empty());
}

#[test]
fn credential_biography_orders_newest_first() {
    let ledger = Arc::new(DummyLedger::new());
    let (backend, _cache) = backend(&ledger);
    let store = MemStore::shared();

    let issuer = publish_party(&backend, &store);
    let owner = publish_party(&backend, &store);
    let vc = issue(&store, &issuer, &owner);

    backend
        .declare_credential(&vc, &owner.signkey, &owner.doc, test_utils::STOREPASS)
        .expect("declare");
    backend
        .revoke_credential(&vc.id, &issuer.signkey, &issuer.doc, test_utils::STOREPASS)
        .expect("revoke");

    let biography = backend.resolve_credential_biography(&vc.id, None).expect("biography");
    assert_eq!(biography.status, CredentialStatus::Revoked);
    assert_eq!(biography.txs.len(), 2);
    assert_eq!(
        biography.txs[0].request.header.operation,
        eladid::CredentialOperation::Revoke
    );
    assert_eq!(
        biography.txs[1].request.header.operation,
        eladid::CredentialOperation::Declare
    );
    assert!(biography.credential().is_some());
}
