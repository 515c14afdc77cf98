//! # Request validator
//!
//! The per-operation admission rules applied to a request against the prior
//! state of its subject. Both the in-memory ledger and the resolver run the
//! same matrix, so a transition the ledger admits is exactly one the
//! resolver later accepts.

use crate::credential::Credential;
use crate::did::Did;
use crate::document::DidDocument;
use crate::error::Kind;
use crate::request::{CredentialOperation, CredentialRequest, DidRequest, Operation};
use crate::{tracerr, Result};

/// Looks up the current document for a DID while validating: controller
/// default keys, authorizing documents, credential issuers.
pub trait DocumentSource {
    /// The current document, or `None` when the DID is unknown.
    ///
    /// # Errors
    ///
    /// * Implementation-defined lookup failures.
    fn document(&self, did: &Did) -> Result<Option<DidDocument>>;
}

/// A source that knows no documents. Sufficient for primitive DIDs, whose
/// requests are self-contained.
pub struct NoDocuments;

impl DocumentSource for NoDocuments {
    fn document(&self, _did: &Did) -> Result<Option<DidDocument>> {
        Ok(None)
    }
}

/// The most recent admitted transition for a DID.
#[derive(Clone, Debug)]
pub struct LastState {
    /// Its ledger txid.
    pub txid: String,
    /// The operation that produced it.
    pub operation: Operation,
    /// The document it carried; absent for a deactivation.
    pub doc: Option<DidDocument>,
}

impl LastState {
    fn document(&self) -> Result<&DidDocument> {
        match &self.doc {
            Some(doc) => Ok(doc),
            None => tracerr!(Kind::TransactionError, "prior transaction carries no document"),
        }
    }
}

/// Admit or reject a DID request against the prior state of its subject.
/// Returns the earliest failing condition.
///
/// # Errors
///
/// * `TransactionError` with the specific reason.
pub fn admit_did_request(
    request: &DidRequest, last: Option<&LastState>, source: &dyn DocumentSource,
) -> Result<()> {
    match request.header.operation {
        Operation::Create => {
            if last.is_some() {
                tracerr!(Kind::TransactionError, "DID already exists");
            }
            let doc = payload_document(request)?;
            verify_transition(request, doc, source)
        }
        Operation::Update => {
            let last = live_predecessor(last)?;
            check_prev_txid(request, last)?;
            let doc = payload_document(request)?;
            if doc.is_customized() && !doc.same_controllers(last.document()?) {
                tracerr!(Kind::TransactionError, "Controllers diverged from previous document");
            }
            verify_transition(request, doc, source)
        }
        Operation::Transfer => {
            let last = live_predecessor(last)?;
            check_prev_txid(request, last)?;
            let doc = payload_document(request)?;
            let Some(ticket) = request.ticket()? else {
                tracerr!(Kind::TransactionError, "Transfer operation must attach the ticket");
            };
            if ticket.txid != last.txid {
                tracerr!(Kind::TransactionError, "Ticket is invalid: stale transaction id");
            }
            if let Err(e) = ticket.verify(last.document()?, source) {
                tracerr!(Kind::TransactionError, "Ticket is invalid: {}", e.reason());
            }
            if !doc.has_controller(&ticket.to) {
                tracerr!(
                    Kind::TransactionError,
                    "Ticket is invalid: document does not list {} as controller",
                    ticket.to
                );
            }
            verify_transition(request, doc, source)
        }
        Operation::Deactivate => {
            let last = live_predecessor(last)?;
            if let Err(e) = request.verify(last.document()?, source) {
                tracerr!(Kind::TransactionError, "Deactivation not authorized: {}", e.reason());
            }
            Ok(())
        }
    }
}

/// Admit or reject a credential request against the credential's prior
/// state: the live declare (if any) and whether a revoke was recorded.
///
/// # Errors
///
/// * `TransactionError` with the specific reason.
pub fn admit_credential_request(
    request: &CredentialRequest, declared: Option<&Credential>, revoked: bool,
    source: &dyn DocumentSource,
) -> Result<()> {
    match request.header.operation {
        CredentialOperation::Declare => {
            if declared.is_some() {
                tracerr!(Kind::TransactionError, "Credential already exists");
            }
            if revoked {
                tracerr!(Kind::TransactionError, "Credential already revoked");
            }
        }
        CredentialOperation::Revoke => {
            if revoked {
                tracerr!(Kind::TransactionError, "Credential already revoked");
            }
        }
    }
    if let Err(e) = request.verify(declared, source) {
        tracerr!(Kind::TransactionError, "Credential request not authorized: {}", e.reason());
    }
    Ok(())
}

fn payload_document(request: &DidRequest) -> Result<&DidDocument> {
    let Some(doc) = &request.doc else {
        tracerr!(Kind::TransactionError, "request carries no document");
    };
    doc.check_structure()?;
    Ok(doc)
}

fn live_predecessor(last: Option<&LastState>) -> Result<&LastState> {
    let Some(last) = last else {
        tracerr!(Kind::TransactionError, "DID not exists");
    };
    if last.operation == Operation::Deactivate {
        tracerr!(Kind::TransactionError, "DID already deactivated");
    }
    Ok(last)
}

fn check_prev_txid(request: &DidRequest, last: &LastState) -> Result<()> {
    if request.header.previous_txid.as_deref() != Some(last.txid.as_str()) {
        tracerr!(Kind::TransactionError, "Previous transaction id mismatch");
    }
    Ok(())
}

fn verify_transition(
    request: &DidRequest, doc: &DidDocument, source: &dyn DocumentSource,
) -> Result<()> {
    if let Err(e) = request.verify(doc, source) {
        tracerr!(Kind::TransactionError, "Request not genuine: {}", e.reason());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::DidRequest;
    use crate::test_utils::{self, MemStore};

    fn create_request() -> (DidRequest, DidDocument) {
        let store = MemStore::shared();
        let (doc, _) = test_utils::published_document_in(&store, test_utils::STOREPASS);
        let signkey = doc.default_public_key().expect("key").id.clone();
        let envelope = DidRequest::create(&doc, &signkey, test_utils::STOREPASS).expect("sign");
        (DidRequest::from_json(&envelope).expect("parse"), doc)
    }

    #[test]
    fn create_on_empty_history() {
        let (request, _) = create_request();
        admit_did_request(&request, None, &NoDocuments).expect("admit");
    }

    #[test]
    fn create_on_existing_did_rejected() {
        let (request, doc) = create_request();
        let last = LastState {
            txid: "T".repeat(32),
            operation: Operation::Create,
            doc: Some(doc),
        };
        let err = admit_did_request(&request, Some(&last), &NoDocuments).expect_err("rejected");
        assert!(err.is(Kind::TransactionError));
        assert!(err.reason().contains("already exists"));
    }

    #[test]
    fn update_without_history_rejected() {
        let store = MemStore::shared();
        let (mut doc, _) = test_utils::published_document_in(&store, test_utils::STOREPASS);
        doc.metadata.txid = Some("X".repeat(32));
        let signkey = doc.default_public_key().expect("key").id.clone();
        let envelope = DidRequest::update(&doc, &signkey, test_utils::STOREPASS).expect("sign");
        let request = DidRequest::from_json(&envelope).expect("parse");

        let err = admit_did_request(&request, None, &NoDocuments).expect_err("rejected");
        assert!(err.reason().contains("not exists"));
    }

    #[test]
    fn update_with_stale_txid_rejected() {
        let store = MemStore::shared();
        let (mut doc, _) = test_utils::published_document_in(&store, test_utils::STOREPASS);
        doc.metadata.txid = Some("X".repeat(32));
        let signkey = doc.default_public_key().expect("key").id.clone();
        let envelope = DidRequest::update(&doc, &signkey, test_utils::STOREPASS).expect("sign");
        let request = DidRequest::from_json(&envelope).expect("parse");

        let last = LastState {
            txid: "Y".repeat(32),
            operation: Operation::Create,
            doc: Some(doc),
        };
        let err = admit_did_request(&request, Some(&last), &NoDocuments).expect_err("rejected");
        assert!(err.reason().contains("Previous transaction id mismatch"));
    }

    #[test]
    fn operations_on_deactivated_did_rejected() {
        let store = MemStore::shared();
        let (mut doc, _) = test_utils::published_document_in(&store, test_utils::STOREPASS);
        doc.metadata.txid = Some("X".repeat(32));
        let signkey = doc.default_public_key().expect("key").id.clone();
        let envelope = DidRequest::update(&doc, &signkey, test_utils::STOREPASS).expect("sign");
        let request = DidRequest::from_json(&envelope).expect("parse");

        let last = LastState {
            txid: "X".repeat(32),
            operation: Operation::Deactivate,
            doc: None,
        };
        let err = admit_did_request(&request, Some(&last), &NoDocuments).expect_err("rejected");
        assert!(err.reason().contains("already deactivated"));
    }

    #[test]
    fn transfer_without_ticket_rejected() {
        let store = MemStore::shared();
        let fixture = test_utils::customized_fixture(&store, test_utils::STOREPASS);
        let source = test_utils::FixedDocuments::of(&[&fixture.controller]);

        let mut doc = fixture.customized.clone();
        doc.metadata.txid = Some("X".repeat(32));
        let signkey = fixture.controller.default_public_key().expect("key").id.clone();
        let envelope = DidRequest::update(&doc, &signkey, test_utils::STOREPASS).expect("sign");
        let mut request = DidRequest::from_json(&envelope).expect("parse");
        // rewrite as a transfer missing its ticket
        request.header.operation = Operation::Transfer;

        let last = LastState {
            txid: "X".repeat(32),
            operation: Operation::Create,
            doc: Some(fixture.customized.clone()),
        };
        let err = admit_did_request(&request, Some(&last), &source).expect_err("rejected");
        assert!(err.reason().contains("must attach the ticket"));
    }
}
