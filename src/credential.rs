//! # Verifiable credentials
//!
//! The credential model, issuer-side authoring, and proof verification.
//! Claims are free-form JSON; only structure and signature are checked
//! here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::canon;
use crate::crypto;
use crate::did::{Did, DidUrl};
use crate::document::{now_seconds, rfc3339_opt, DidDocument, PROOF_TYPE};
use crate::error::Kind;
use crate::store::DidStore;
use crate::{tracerr, Result};

/// Type tag every credential carries.
pub const BASE_TYPE: &str = "VerifiableCredential";

/// Subject block: the DID the claims are about, plus the claims themselves.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct CredentialSubject {
    /// The credential owner.
    pub id: Option<Did>,
    /// Free-form claims, order preserved.
    #[serde(flatten)]
    pub claims: Map<String, Value>,
}

/// Issuer proof over the canonical credential minus the proof itself.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialProof {
    /// Proof algorithm tag.
    #[serde(rename = "type")]
    pub type_: String,
    /// The issuer key that signed.
    pub verification_method: DidUrl,
    /// Base64URL of the 64-byte signature.
    pub signature: String,
}

/// A verifiable credential, signed by its issuer.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Credential {
    /// Credential id, a DID URL under the owner's DID.
    pub id: DidUrl,
    /// Type list; always contains [`BASE_TYPE`].
    #[serde(rename = "type")]
    pub types: Vec<String>,
    /// The DID that issued and signed this credential.
    pub issuer: Option<Did>,
    /// Issue time.
    #[serde(with = "rfc3339_opt")]
    pub issuance_date: Option<DateTime<Utc>>,
    /// Expiry; absent means the owner document's expiry governs.
    #[serde(skip_serializing_if = "Option::is_none", with = "rfc3339_opt")]
    pub expiration_date: Option<DateTime<Utc>>,
    /// The claims.
    pub credential_subject: CredentialSubject,
    /// Issuer signature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof: Option<CredentialProof>,
}

impl Credential {
    /// The credential owner: the subject id, or the DID the credential id
    /// hangs off.
    #[must_use]
    pub fn owner(&self) -> &Did {
        self.credential_subject.id.as_ref().unwrap_or_else(|| self.id.did())
    }

    /// The issuer, defaulting to the owner for self-issued credentials.
    #[must_use]
    pub fn issuer(&self) -> &Did {
        self.issuer.as_ref().unwrap_or_else(|| self.owner())
    }

    /// True when `expirationDate` has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expiration_date.is_some_and(|exp| exp < Utc::now())
    }

    /// Canonical signing input: every field but `proof`, declared order.
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

    /// Serialize for transport.
    ///
    /// # Errors
    ///
    /// * `MalformedRequest` on serialization failure.
    pub fn to_json(&self) -> Result<String> {
        canon::to_string(self)
    }

    /// Parse from the wire form.
    ///
    /// # Errors
    ///
    /// * `MalformedRequest` on bad JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        match serde_json::from_str(json) {
            Ok(vc) => Ok(vc),
            Err(e) => tracerr!(Kind::MalformedRequest, "malformed credential: {}", e),
        }
    }

    /// Structural validity: id owned by the subject, base type present,
    /// claims non-empty.
    ///
    /// # Errors
    ///
    /// * `MalformedRequest` with the first failing condition.
    pub fn check_structure(&self) -> Result<()> {
        if self.id.fragment().is_none() {
            tracerr!(Kind::MalformedRequest, "credential id {} has no fragment", self.id);
        }
        if let Some(subject) = &self.credential_subject.id {
            if !self.id.owned_by(subject) {
                tracerr!(Kind::MalformedRequest, "credential id {} not under subject", self.id);
            }
        }
        if !self.types.iter().any(|t| t == BASE_TYPE) {
            tracerr!(Kind::MalformedRequest, "credential is missing the {} type", BASE_TYPE);
        }
        if self.credential_subject.claims.is_empty() {
            tracerr!(Kind::MalformedRequest, "credential carries no claims");
        }
        Ok(())
    }

    /// Verify the issuer proof against `issuer_doc`. The verification
    /// method must be one of the issuer's authentication keys.
    ///
    /// # Errors
    ///
    /// * `ResolveError` when the proof is absent or does not verify.
    pub fn verify(&self, issuer_doc: &DidDocument) -> Result<()> {
        self.check_structure()?;
        let Some(proof) = &self.proof else {
            tracerr!(Kind::ResolveError, "credential {} carries no proof", self.id);
        };
        if issuer_doc.id.as_ref() != Some(self.issuer()) {
            tracerr!(Kind::ResolveError, "issuer document does not match {}", self.issuer());
        }
        let Some(key) = issuer_doc.authentication_key(&proof.verification_method) else {
            tracerr!(
                Kind::ResolveError,
                "verification method {} not usable for issuing",
                proof.verification_method
            );
        };
        let sig = crypto::decode_signature(&proof.signature)?;
        crypto::verify_base58(&key.public_key_base58, &self.signing_input()?, &sig)
    }
}

/// Issuer-side builder: collect claims, then seal with an issuer key.
pub struct CredentialBuilder {
    vc: Credential,
}

impl CredentialBuilder {
    /// Start a credential identified by `id` about `owner`.
    #[must_use]
    pub fn new(id: &DidUrl, owner: &Did) -> Self {
        Self {
            vc: Credential {
                id: id.clone(),
                types: vec![BASE_TYPE.to_string()],
                credential_subject: CredentialSubject {
                    id: Some(owner.clone()),
                    claims: Map::new(),
                },
                ..Credential::default()
            },
        }
    }

    /// Add a type tag.
    #[must_use]
    pub fn with_type(mut self, type_: &str) -> Self {
        if !self.vc.types.iter().any(|t| t == type_) {
            self.vc.types.push(type_.to_string());
        }
        self
    }

    /// Add one claim.
    #[must_use]
    pub fn claim(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.vc.credential_subject.claims.insert(name.to_string(), value.into());
        self
    }

    /// Set the expiry.
    #[must_use]
    pub fn expiration(mut self, date: DateTime<Utc>) -> Self {
        self.vc.expiration_date = Some(date);
        self
    }

    /// Sign with an issuer key and return the sealed credential.
    ///
    /// # Errors
    ///
    /// * `InvalidArgs` when `signkey` is not an authentication key of the
    ///   issuer document, or the store will not unseal it.
    pub fn seal(
        mut self, issuer_doc: &DidDocument, signkey: &DidUrl, storepass: &str,
        store: &dyn DidStore,
    ) -> Result<Credential> {
        if issuer_doc.authentication_key(signkey).is_none() {
            tracerr!(Kind::InvalidArgs, "{} is not an authentication key of the issuer", signkey);
        }
        self.vc.issuer = issuer_doc.id.clone();
        self.vc.issuance_date = Some(now_seconds());
        self.vc.check_structure()?;

        let sk = store.load_private_key(signkey, storepass)?;
        let sig = crypto::sign(&sk, &self.vc.signing_input()?)?;
        self.vc.proof = Some(CredentialProof {
            type_: PROOF_TYPE.to_string(),
            verification_method: signkey.clone(),
            signature: crypto::encode_signature(&sig),
        });
        Ok(self.vc)
    }
}
