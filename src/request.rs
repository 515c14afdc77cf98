//! # DID request codec
//!
//! The self-describing signed envelope for the four DID operations. The
//! message under the signature is the raw-byte concatenation of the header
//! fields and payload in a fixed order; the envelope itself travels as
//! compact JSON.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::canon;
use crate::crypto;
use crate::did::{Did, DidUrl};
use crate::document::{DidDocument, PROOF_TYPE};
use crate::error::Kind;
use crate::ticket::TransferTicket;
use crate::validate::DocumentSource;
use crate::{tracerr, Error, Result};

pub mod credential;

pub use credential::{CredentialOperation, CredentialRequest};

/// Version tag stamped into every DID request header.
pub const SPEC_VERSION: &str = "elastos/did/1.0";

/// The four DID operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Anchor a new DID.
    Create,
    /// Replace the current document.
    Update,
    /// Hand a customized DID to a new controller set.
    Transfer,
    /// Terminate the DID.
    Deactivate,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Transfer => "transfer",
            Self::Deactivate => "deactivate",
        };
        f.write_str(s)
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "transfer" => Ok(Self::Transfer),
            "deactivate" => Ok(Self::Deactivate),
            other => tracerr!(Kind::MalformedRequest, "unknown operation: {}", other),
        }
    }
}

impl Serialize for Operation {
    fn serialize<S: serde::Serializer>(
        &self, serializer: S,
    ) -> core::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Operation {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> core::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Envelope header. Field order is the wire order and the signing order.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    /// Version tag.
    pub specification: String,
    /// The operation this envelope requests.
    pub operation: Operation,
    /// Latest txid of the subject; required for update and transfer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_txid: Option<String>,
    /// Base64URL transfer ticket; required for transfer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<String>,
}

/// The primary proof on an envelope.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RequestProof {
    /// Proof algorithm tag.
    #[serde(rename = "type", default = "default_proof_type")]
    pub type_: String,
    /// The key that signed the envelope.
    pub verification_method: DidUrl,
    /// Base64URL of the 64-byte signature.
    pub signature: String,
}

fn default_proof_type() -> String {
    PROOF_TYPE.to_string()
}

/// A parsed (or freshly signed) DID request envelope.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DidRequest {
    /// Envelope header.
    pub header: Header,
    /// Base64URL canonical document, or the plain DID string for
    /// deactivation.
    pub payload: String,
    /// Primary proof.
    pub proof: RequestProof,
    /// The document carried in the payload, when there is one.
    #[serde(skip)]
    pub doc: Option<DidDocument>,
    /// The subject DID this request operates on.
    #[serde(skip)]
    pub did: Option<Did>,
}

impl DidRequest {
    /// Sign a create request for `doc`.
    ///
    /// # Errors
    ///
    /// * `NoAttachedStore` when the document has no store handle.
    pub fn create(doc: &DidDocument, signkey: &DidUrl, storepass: &str) -> Result<String> {
        sign_document(Operation::Create, doc, None, None, signkey, storepass)
    }

    /// Sign an update request for `doc`; `previousTxid` comes from the
    /// document's metadata.
    ///
    /// # Errors
    ///
    /// * `InvalidArgs` when the document has never been published.
    pub fn update(doc: &DidDocument, signkey: &DidUrl, storepass: &str) -> Result<String> {
        let Some(prev) = doc.metadata.txid.clone() else {
            tracerr!(Kind::InvalidArgs, "document has no transaction id; resolve it first");
        };
        sign_document(Operation::Update, doc, Some(prev), None, signkey, storepass)
    }

    /// Sign a transfer request carrying `ticket`.
    ///
    /// # Errors
    ///
    /// * `InvalidArgs` without a txid; `NoAttachedStore` without a store.
    pub fn transfer(
        doc: &DidDocument, ticket: &TransferTicket, signkey: &DidUrl, storepass: &str,
    ) -> Result<String> {
        let Some(prev) = doc.metadata.txid.clone() else {
            tracerr!(Kind::InvalidArgs, "document has no transaction id; resolve it first");
        };
        sign_document(
            Operation::Transfer,
            doc,
            Some(prev),
            Some(ticket.to_base64url()?),
            signkey,
            storepass,
        )
    }

    /// Sign a deactivate request for `target`. The signer document holds
    /// `signkey`; `creator` names the proof key when it differs (a key of
    /// the target document delegated to the signer).
    ///
    /// # Errors
    ///
    /// * `NoAttachedStore` when the signer document has no store handle.
    pub fn deactivate(
        target: &Did, signer: &DidDocument, signkey: &DidUrl, creator: Option<&DidUrl>,
        storepass: &str,
    ) -> Result<String> {
        let header = Header {
            specification: SPEC_VERSION.to_string(),
            operation: Operation::Deactivate,
            previous_txid: None,
            ticket: None,
        };
        let payload = target.to_string();
        let signature = sign_envelope(&header, &payload, signer, signkey, storepass)?;
        let request = DidRequest {
            header,
            payload,
            proof: RequestProof {
                type_: PROOF_TYPE.to_string(),
                verification_method: creator.unwrap_or(signkey).clone(),
                signature,
            },
            doc: None,
            did: Some(target.clone()),
        };
        canon::to_string(&request)
    }

    /// Parse an envelope, materializing the payload document when the
    /// operation carries one.
    ///
    /// # Errors
    ///
    /// * `MalformedRequest` on bad Base64URL, missing header fields, an
    ///   unknown operation or a wrong specification tag.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut request: Self = match serde_json::from_str(json) {
            Ok(req) => req,
            Err(e) => tracerr!(Kind::MalformedRequest, "malformed request envelope: {}", e),
        };
        if request.header.specification != SPEC_VERSION {
            tracerr!(
                Kind::MalformedRequest,
                "unknown specification: {}",
                request.header.specification
            );
        }
        if request.payload.is_empty() {
            tracerr!(Kind::MalformedRequest, "request carries no payload");
        }

        match request.header.operation {
            Operation::Deactivate => {
                request.did = Some(Did::from_str(&request.payload)?);
            }
            Operation::Update | Operation::Transfer
                if request.header.previous_txid.as_deref().unwrap_or("").is_empty() =>
            {
                tracerr!(
                    Kind::MalformedRequest,
                    "{} request without previousTxid",
                    request.header.operation
                );
            }
            _ => {}
        }

        if request.header.operation != Operation::Deactivate {
            let raw = crypto::base64url::decode(&request.payload)?;
            let json = String::from_utf8(raw)?;
            let doc = DidDocument::from_json(&json)?;
            request.did = doc.id.clone();
            request.doc = Some(doc);
        }
        Ok(request)
    }

    /// The subject this request operates on.
    ///
    /// # Errors
    ///
    /// * `MalformedRequest` when parsing never established one.
    pub fn subject(&self) -> Result<&Did> {
        match &self.did {
            Some(did) => Ok(did),
            None => tracerr!(Kind::MalformedRequest, "request has no subject"),
        }
    }

    /// The byte stream under the envelope signature.
    #[must_use]
    pub fn signing_input(&self) -> Vec<u8> {
        signing_input(&self.header, &self.payload)
    }

    /// Verify the envelope against `context`.
    ///
    /// For deactivation `context` is the document being deactivated: the
    /// proof key either authenticates that document directly, or is the
    /// signer's default key delegated through the target's `authorization`
    /// subset. For every other operation `context` is ignored in favor of
    /// the payload document, whose own proofs must also verify.
    ///
    /// # Errors
    ///
    /// * `ResolveError` with the first failing condition.
    pub fn verify(&self, context: &DidDocument, source: &dyn DocumentSource) -> Result<()> {
        let input = self.signing_input();
        let sig = crypto::decode_signature(&self.proof.signature)?;
        let method = &self.proof.verification_method;

        if self.header.operation == Operation::Deactivate {
            let subject = self.subject()?;
            if method.owned_by(subject) {
                let Some(key) = context.authentication_key(method) else {
                    tracerr!(Kind::ResolveError, "deactivation key {} not usable", method);
                };
                return crypto::verify_base58(&key.public_key_base58, &input, &sig);
            }
            // Delegated deactivation: the proof key is the signer's default
            // key, delegated through the target's authorization subset.
            let signer = method.did();
            let Some(signer_doc) = source.document(signer)? else {
                tracerr!(Kind::ResolveError, "authorizing document {} cannot be resolved", signer);
            };
            let Some(signer_key) = signer_doc.default_public_key() else {
                tracerr!(Kind::ResolveError, "authorizing document {} has no default key", signer);
            };
            if signer_key.id != *method {
                tracerr!(
                    Kind::ResolveError,
                    "delegated deactivation must use the default key, got {}",
                    method
                );
            }
            let Some(delegated) = context.authorization_key_for(signer) else {
                tracerr!(Kind::ResolveError, "no authorization delegated to {}", signer);
            };
            if delegated.public_key_base58 != signer_key.public_key_base58 {
                tracerr!(Kind::ResolveError, "authorization key does not match signer key");
            }
            return crypto::verify_base58(&signer_key.public_key_base58, &input, &sig);
        }

        let Some(doc) = &self.doc else {
            tracerr!(Kind::ResolveError, "request carries no document");
        };
        doc.is_genuine(source)?;

        if doc.is_customized() {
            let controller = method.did();
            if !doc.has_controller(controller) {
                tracerr!(Kind::ResolveError, "envelope signer {} is not a controller", controller);
            }
            let Some(controller_doc) = source.document(controller)? else {
                tracerr!(Kind::ResolveError, "controller {} cannot be resolved", controller);
            };
            let Some(key) = controller_doc.default_public_key() else {
                tracerr!(Kind::ResolveError, "controller {} has no default key", controller);
            };
            if key.id != *method {
                tracerr!(
                    Kind::ResolveError,
                    "envelope must be signed with a controller default key, got {}",
                    method
                );
            }
            return crypto::verify_base58(&key.public_key_base58, &input, &sig);
        }

        let Some(key) = doc.authentication_key(method) else {
            tracerr!(Kind::ResolveError, "envelope key {} not usable for signing", method);
        };
        crypto::verify_base58(&key.public_key_base58, &input, &sig)
    }

    /// The ticket attached to a transfer envelope.
    ///
    /// # Errors
    ///
    /// * `MalformedRequest` when the header carries a malformed ticket.
    pub fn ticket(&self) -> Result<Option<TransferTicket>> {
        match &self.header.ticket {
            Some(data) => Ok(Some(TransferTicket::from_base64url(data)?)),
            None => Ok(None),
        }
    }

    /// Serialize for transport.
    ///
    /// # Errors
    ///
    /// * `MalformedRequest` on serialization failure.
    pub fn to_json(&self) -> Result<String> {
        canon::to_string(self)
    }
}

/// `spec || operation || previousTxid || ticket || payload`, raw bytes in
/// that fixed order, absent fields skipped.
pub(crate) fn signing_input(header: &Header, payload: &str) -> Vec<u8> {
    let mut msg = Vec::new();
    msg.extend_from_slice(header.specification.as_bytes());
    msg.extend_from_slice(header.operation.to_string().as_bytes());
    if let Some(prev) = &header.previous_txid {
        msg.extend_from_slice(prev.as_bytes());
    }
    if let Some(ticket) = &header.ticket {
        msg.extend_from_slice(ticket.as_bytes());
    }
    msg.extend_from_slice(payload.as_bytes());
    msg
}

pub(crate) fn sign_envelope(
    header: &Header, payload: &str, signer: &DidDocument, signkey: &DidUrl, storepass: &str,
) -> Result<String> {
    if storepass.is_empty() {
        tracerr!(Kind::InvalidArgs, "empty store passphrase");
    }
    let Some(store) = &signer.metadata.store else {
        tracerr!(Kind::NoAttachedStore, "no attached store with document");
    };
    let sk = store.load_private_key(signkey, storepass)?;
    let sig = crypto::sign(&sk, &signing_input(header, payload))?;
    Ok(crypto::encode_signature(&sig))
}

fn sign_document(
    operation: Operation, doc: &DidDocument, previous_txid: Option<String>, ticket: Option<String>,
    signkey: &DidUrl, storepass: &str,
) -> Result<String> {
    doc.check_structure()?;
    let header = Header {
        specification: SPEC_VERSION.to_string(),
        operation,
        previous_txid,
        ticket,
    };
    let payload = crypto::base64url::encode(doc.to_json()?.as_bytes());
    let signature = sign_envelope(&header, &payload, doc, signkey, storepass)?;
    let request = DidRequest {
        header,
        payload,
        proof: RequestProof {
            type_: PROOF_TYPE.to_string(),
            verification_method: signkey.clone(),
            signature,
        },
        doc: None,
        did: doc.id.clone(),
    };
    canon::to_string(&request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{self, MemStore};
    use crate::validate::NoDocuments;

    fn signed_create() -> (DidDocument, String) {
        let store = MemStore::shared();
        let (doc, _) = test_utils::published_document_in(&store, test_utils::STOREPASS);
        let signkey = doc.default_public_key().expect("key").id.clone();
        let envelope = DidRequest::create(&doc, &signkey, test_utils::STOREPASS).expect("sign");
        (doc, envelope)
    }

    #[test]
    fn create_round_trip() {
        let (doc, envelope) = signed_create();
        let request = DidRequest::from_json(&envelope).expect("parse");

        assert_eq!(request.header.operation, Operation::Create);
        assert_eq!(request.header.specification, SPEC_VERSION);
        assert_eq!(request.subject().expect("subject"), doc.subject().expect("subject"));
        // payload document reproduces the published document bit-identically
        assert_eq!(
            request.doc.as_ref().expect("doc").to_json().expect("json"),
            doc.to_json().expect("json")
        );
        request.verify(request.doc.as_ref().expect("doc"), &NoDocuments).expect("verify");
    }

    #[test]
    fn emit_parse_emit_is_identity() {
        let (_, envelope) = signed_create();
        let request = DidRequest::from_json(&envelope).expect("parse");
        assert_eq!(request.to_json().expect("json"), envelope);
    }

    #[test]
    fn update_requires_txid() {
        let store = MemStore::shared();
        let (doc, _) = test_utils::primitive_document_in(&store, test_utils::STOREPASS);
        let signkey = doc.default_public_key().expect("key").id.clone();
        let err = DidRequest::update(&doc, &signkey, test_utils::STOREPASS)
            .expect_err("expected error");
        assert!(err.is(Kind::InvalidArgs));
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let (_, envelope) = signed_create();
        let mut request = DidRequest::from_json(&envelope).expect("parse");
        // graft a different payload under the original proof
        let other_store = MemStore::shared();
        let (other, _) = test_utils::published_document_in(&other_store, test_utils::STOREPASS);
        request.payload = crypto::base64url::encode(other.to_json().expect("json").as_bytes());
        request.doc = Some(other);
        assert!(request
            .verify(request.doc.as_ref().expect("doc"), &NoDocuments)
            .is_err());
    }

    #[test]
    fn unknown_operation_is_malformed() {
        let (_, envelope) = signed_create();
        let broken = envelope.replace("\"operation\":\"create\"", "\"operation\":\"destroy\"");
        let err = DidRequest::from_json(&broken).expect_err("expected parse failure");
        assert!(err.is(Kind::MalformedRequest));
    }

    #[test]
    fn bad_base64_payload_is_malformed() {
        let (_, envelope) = signed_create();
        let mut value: serde_json::Value = serde_json::from_str(&envelope).expect("json");
        value["payload"] = serde_json::Value::from("!!not-base64url!!");
        let err = DidRequest::from_json(&value.to_string()).expect_err("expected parse failure");
        assert!(err.is(Kind::MalformedRequest));
    }

    #[test]
    fn deactivate_self_signed() {
        let store = MemStore::shared();
        let (doc, _) = test_utils::published_document_in(&store, test_utils::STOREPASS);
        let did = doc.subject().expect("subject").clone();
        let signkey = doc.default_public_key().expect("key").id.clone();

        let envelope = DidRequest::deactivate(&did, &doc, &signkey, None, test_utils::STOREPASS)
            .expect("sign");
        let request = DidRequest::from_json(&envelope).expect("parse");
        assert_eq!(request.payload, did.to_string());
        assert!(request.doc.is_none());
        request.verify(&doc, &NoDocuments).expect("verify");
    }
}
