//! Credential request envelopes: declare and revoke, mirroring the DID
//! envelope with a credential payload.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::canon;
use crate::credential::Credential;
use crate::crypto;
use crate::did::DidUrl;
use crate::document::{DidDocument, PROOF_TYPE};
use crate::error::Kind;
use crate::request::RequestProof;
use crate::validate::DocumentSource;
use crate::{tracerr, Error, Result};

/// Version tag stamped into every credential request header.
pub const VC_SPEC_VERSION: &str = "elastos/credential/1.0";

/// The two credential lifecycle operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialOperation {
    /// Put a credential on chain.
    Declare,
    /// Revoke it.
    Revoke,
}

impl fmt::Display for CredentialOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Declare => f.write_str("declare"),
            Self::Revoke => f.write_str("revoke"),
        }
    }
}

impl FromStr for CredentialOperation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "declare" => Ok(Self::Declare),
            "revoke" => Ok(Self::Revoke),
            other => tracerr!(Kind::MalformedRequest, "unknown credential operation: {}", other),
        }
    }
}

impl Serialize for CredentialOperation {
    fn serialize<S: serde::Serializer>(
        &self, serializer: S,
    ) -> core::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for CredentialOperation {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> core::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Credential envelope header: same shape as the DID header, no txid
/// chaining and no ticket.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialHeader {
    /// Version tag.
    pub specification: String,
    /// Declare or revoke.
    pub operation: CredentialOperation,
}

/// A parsed (or freshly signed) credential request envelope.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CredentialRequest {
    /// Envelope header.
    pub header: CredentialHeader,
    /// Base64URL canonical credential for declare; the plain credential id
    /// for revoke.
    pub payload: String,
    /// Proof by the signer.
    pub proof: RequestProof,
    /// The credential carried in a declare payload.
    #[serde(skip)]
    pub vc: Option<Credential>,
    /// The credential id this request operates on.
    #[serde(skip)]
    pub id: Option<DidUrl>,
}

impl CredentialRequest {
    /// Sign a declare request. The signer is the credential owner; the
    /// signer document holds `signkey`.
    ///
    /// # Errors
    ///
    /// * `NoAttachedStore` when the signer document has no store handle.
    pub fn declare(
        vc: &Credential, signkey: &DidUrl, signer: &DidDocument, storepass: &str,
    ) -> Result<String> {
        vc.check_structure()?;
        let header = CredentialHeader {
            specification: VC_SPEC_VERSION.to_string(),
            operation: CredentialOperation::Declare,
        };
        let payload = crypto::base64url::encode(vc.to_json()?.as_bytes());
        Self::finish(header, payload, signkey, signer, storepass, Some(vc.clone()), &vc.id)
    }

    /// Sign a revoke request for a credential id. The signer is the owner
    /// or the issuer.
    ///
    /// # Errors
    ///
    /// * `NoAttachedStore` when the signer document has no store handle.
    pub fn revoke(
        id: &DidUrl, signkey: &DidUrl, signer: &DidDocument, storepass: &str,
    ) -> Result<String> {
        let header = CredentialHeader {
            specification: VC_SPEC_VERSION.to_string(),
            operation: CredentialOperation::Revoke,
        };
        Self::finish(header, id.to_string(), signkey, signer, storepass, None, id)
    }

    fn finish(
        header: CredentialHeader, payload: String, signkey: &DidUrl, signer: &DidDocument,
        storepass: &str, vc: Option<Credential>, id: &DidUrl,
    ) -> Result<String> {
        let mut msg = Vec::new();
        msg.extend_from_slice(header.specification.as_bytes());
        msg.extend_from_slice(header.operation.to_string().as_bytes());
        msg.extend_from_slice(payload.as_bytes());

        if storepass.is_empty() {
            tracerr!(Kind::InvalidArgs, "empty store passphrase");
        }
        let Some(store) = &signer.metadata.store else {
            tracerr!(Kind::NoAttachedStore, "no attached store with document");
        };
        let sk = store.load_private_key(signkey, storepass)?;
        let sig = crypto::sign(&sk, &msg)?;

        let request = CredentialRequest {
            header,
            payload,
            proof: RequestProof {
                type_: PROOF_TYPE.to_string(),
                verification_method: signkey.clone(),
                signature: crypto::encode_signature(&sig),
            },
            vc,
            id: Some(id.clone()),
        };
        canon::to_string(&request)
    }

    /// Parse an envelope, materializing the declared credential when there
    /// is one.
    ///
    /// # Errors
    ///
    /// * `MalformedRequest` on structural failure.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut request: Self = match serde_json::from_str(json) {
            Ok(req) => req,
            Err(e) => tracerr!(Kind::MalformedRequest, "malformed credential envelope: {}", e),
        };
        if request.header.specification != VC_SPEC_VERSION {
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
            CredentialOperation::Declare => {
                let raw = crypto::base64url::decode(&request.payload)?;
                let vc = Credential::from_json(&String::from_utf8(raw)?)?;
                request.id = Some(vc.id.clone());
                request.vc = Some(vc);
            }
            CredentialOperation::Revoke => {
                request.id = Some(DidUrl::from_str(&request.payload)?);
            }
        }
        Ok(request)
    }

    /// The credential id this request operates on.
    ///
    /// # Errors
    ///
    /// * `MalformedRequest` when parsing never established one.
    pub fn credential_id(&self) -> Result<&DidUrl> {
        match &self.id {
            Some(id) => Ok(id),
            None => tracerr!(Kind::MalformedRequest, "request has no credential id"),
        }
    }

    /// The byte stream under the envelope signature.
    #[must_use]
    pub fn signing_input(&self) -> Vec<u8> {
        let mut msg = Vec::new();
        msg.extend_from_slice(self.header.specification.as_bytes());
        msg.extend_from_slice(self.header.operation.to_string().as_bytes());
        msg.extend_from_slice(self.payload.as_bytes());
        msg
    }

    /// Verify the envelope. Declares must be signed by an authentication
    /// key of the credential owner and carry a credential whose issuer
    /// proof verifies; revokes may be signed by the owner or the issuer of
    /// `declared` (when the declare is known).
    ///
    /// # Errors
    ///
    /// * `ResolveError` with the first failing condition.
    pub fn verify(&self, declared: Option<&Credential>, source: &dyn DocumentSource) -> Result<()> {
        let id = self.credential_id()?;
        let signer = self.proof.verification_method.did();

        match self.header.operation {
            CredentialOperation::Declare => {
                let Some(vc) = &self.vc else {
                    tracerr!(Kind::ResolveError, "declare request carries no credential");
                };
                if signer != vc.owner() {
                    tracerr!(Kind::ResolveError, "declare must be signed by the owner {}", vc.owner());
                }
                let Some(issuer_doc) = source.document(vc.issuer())? else {
                    tracerr!(Kind::ResolveError, "issuer {} cannot be resolved", vc.issuer());
                };
                vc.verify(&issuer_doc)?;
            }
            CredentialOperation::Revoke => {
                let owner = id.did();
                let issuer = declared.map(Credential::issuer);
                if signer != owner && issuer != Some(signer) {
                    tracerr!(
                        Kind::ResolveError,
                        "revoke must be signed by the owner or issuer, got {}",
                        signer
                    );
                }
            }
        }

        let Some(signer_doc) = source.document(signer)? else {
            tracerr!(Kind::ResolveError, "signer {} cannot be resolved", signer);
        };
        let Some(key) = signer_doc.authentication_key(&self.proof.verification_method) else {
            tracerr!(
                Kind::ResolveError,
                "key {} not usable by signer",
                self.proof.verification_method
            );
        };
        let sig = crypto::decode_signature(&self.proof.signature)?;
        crypto::verify_base58(&key.public_key_base58, &self.signing_input(), &sig)
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
