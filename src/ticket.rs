//! # Transfer ticket
//!
//! A signed authorization for handing a customized DID to a new controller
//! set. Issued by the prior controllers against the DID's latest txid;
//! admissible only when the proofs satisfy the prior multisig.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canon;
use crate::crypto;
use crate::did::{Did, DidUrl};
use crate::document::{now_seconds, one_or_many, DidDocument, PROOF_TYPE};
use crate::error::Kind;
use crate::store::DidStore;
use crate::validate::DocumentSource;
use crate::{tracerr, Result};

/// Proof by one prior controller over the canonical ticket body.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TicketProof {
    /// Proof algorithm tag.
    #[serde(rename = "type")]
    pub type_: String,
    /// Creation time.
    pub created: DateTime<Utc>,
    /// The controller default key that signed.
    pub verification_method: DidUrl,
    /// Base64URL of the 64-byte signature.
    pub signature: String,
}

/// Authorization to transfer a customized DID.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferTicket {
    /// The DID being transferred.
    pub id: Did,
    /// The DID receiving effective controllership.
    pub to: Did,
    /// The subject's latest txid at the moment of issue.
    pub txid: String,
    /// Proofs by prior controllers; threshold is the prior multisig.
    #[serde(with = "one_or_many")]
    pub proof: Vec<TicketProof>,
}

impl TransferTicket {
    /// Build an unsigned ticket for `doc`, whose metadata carries the
    /// latest txid.
    ///
    /// # Errors
    ///
    /// * `InvalidArgs` when the document has never been published (no txid)
    ///   or is not customized.
    pub fn new(doc: &DidDocument, to: &Did) -> Result<Self> {
        if !doc.is_customized() {
            tracerr!(Kind::InvalidArgs, "only customized DIDs can be transferred");
        }
        let Some(txid) = doc.metadata.txid.clone() else {
            tracerr!(Kind::InvalidArgs, "document has no transaction id; resolve it first");
        };
        Ok(Self { id: doc.subject()?.clone(), to: to.clone(), txid, proof: Vec::new() })
    }

    /// Canonical signing input: `id`, `to`, `txid` in declared order,
    /// proofs excluded.
    ///
    /// # Errors
    ///
    /// * `MalformedRequest` on serialization failure.
    pub fn signing_input(&self) -> Result<Vec<u8>> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.remove("proof");
        }
        canon::to_vec(&value)
    }

    /// Append a proof by one prior controller's default key.
    ///
    /// # Errors
    ///
    /// * `InvalidArgs` when the store will not unseal `signkey`.
    pub fn sign_by(
        &mut self, signkey: &DidUrl, storepass: &str, store: &dyn DidStore,
    ) -> Result<()> {
        let input = self.signing_input()?;
        let sk = store.load_private_key(signkey, storepass)?;
        let sig = crypto::sign(&sk, &input)?;
        self.proof.retain(|p| &p.verification_method != signkey);
        self.proof.push(TicketProof {
            type_: PROOF_TYPE.to_string(),
            created: now_seconds(),
            verification_method: signkey.clone(),
            signature: crypto::encode_signature(&sig),
        });
        Ok(())
    }

    /// Verify the ticket against the prior document: every proof is by a
    /// distinct prior controller's default key, and together they meet the
    /// prior multisig threshold.
    ///
    /// # Errors
    ///
    /// * `TransactionError` with the first failing condition.
    pub fn verify(&self, prior: &DidDocument, source: &dyn DocumentSource) -> Result<()> {
        if prior.id.as_ref() != Some(&self.id) {
            tracerr!(Kind::TransactionError, "ticket subject {} does not match document", self.id);
        }
        if self.proof.is_empty() {
            tracerr!(Kind::TransactionError, "ticket carries no proof");
        }

        let input = self.signing_input()?;
        let mut signers: Vec<&Did> = Vec::new();
        for proof in &self.proof {
            let controller = proof.verification_method.did();
            if !prior.has_controller(controller) {
                tracerr!(
                    Kind::TransactionError,
                    "ticket proof by {} which is not a prior controller",
                    controller
                );
            }
            if signers.contains(&controller) {
                tracerr!(Kind::TransactionError, "duplicate ticket proof by {}", controller);
            }
            let Some(controller_doc) = source.document(controller)? else {
                tracerr!(Kind::TransactionError, "controller {} cannot be resolved", controller);
            };
            let Some(key) = controller_doc.default_public_key() else {
                tracerr!(Kind::TransactionError, "controller {} has no default key", controller);
            };
            if key.id != proof.verification_method {
                tracerr!(
                    Kind::TransactionError,
                    "ticket proof must use the controller default key, got {}",
                    proof.verification_method
                );
            }
            let sig = crypto::decode_signature(&proof.signature)?;
            crypto::verify_base58(&key.public_key_base58, &input, &sig)?;
            signers.push(controller);
        }

        if signers.len() < prior.multisig_threshold() {
            tracerr!(
                Kind::TransactionError,
                "ticket carries {} of {} required proofs",
                signers.len(),
                prior.multisig_threshold()
            );
        }
        Ok(())
    }

    /// Serialize for embedding in a transfer envelope.
    ///
    /// # Errors
    ///
    /// * `MalformedRequest` on serialization failure.
    pub fn to_json(&self) -> Result<String> {
        canon::to_string(self)
    }

    /// Parse the Base64URL form carried in an envelope header.
    ///
    /// # Errors
    ///
    /// * `MalformedRequest` on bad encoding or JSON.
    pub fn from_base64url(data: &str) -> Result<Self> {
        let raw = crypto::base64url::decode(data)?;
        let json = String::from_utf8(raw)?;
        match serde_json::from_str(&json) {
            Ok(ticket) => Ok(ticket),
            Err(e) => tracerr!(Kind::MalformedRequest, "malformed ticket: {}", e),
        }
    }

    /// The Base64URL form carried in an envelope header.
    ///
    /// # Errors
    ///
    /// * `MalformedRequest` on serialization failure.
    pub fn to_base64url(&self) -> Result<String> {
        Ok(crypto::base64url::encode(self.to_json()?.as_bytes()))
    }
}
