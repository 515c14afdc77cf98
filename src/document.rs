//! # DID Document
//!
//! The document model with its component structures, lookup helpers and
//! proof verification. Field declaration order matches the wire schema: the
//! canonical writer serializes structs in declared order and that byte
//! stream is the signing input.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canon;
use crate::crypto;
use crate::did::{Did, DidUrl};
use crate::error::Kind;
use crate::store::DidStore;
use crate::validate::DocumentSource;
use crate::{tracerr, Error, Result};

pub mod builder;

pub use builder::DocumentBuilder;

/// Key type tag used throughout the method.
pub const KEY_TYPE: &str = "ECDSAsecp256r1";

/// Proof type tag on documents, credentials, tickets and envelopes.
pub const PROOF_TYPE: &str = KEY_TYPE;

/// A public key owned by the document that lists it.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublicKey {
    /// Key identifier.
    pub id: DidUrl,
    /// Key algorithm tag.
    #[serde(rename = "type", default = "default_key_type")]
    pub type_: String,
    /// The DID authorized to use the key. For authorization keys this names
    /// another DID; otherwise it names the document subject.
    pub controller: Did,
    /// Base58 of the 33-byte compressed SEC1 point.
    pub public_key_base58: String,
}

fn default_key_type() -> String {
    KEY_TYPE.to_string()
}

impl PublicKey {
    /// Raw public key bytes.
    ///
    /// # Errors
    ///
    /// * `InvalidArgs` on bad base58.
    pub fn key_bytes(&self) -> Result<Vec<u8>> {
        crypto::base58::decode(&self.public_key_base58)
    }
}

/// Proof over the canonical form of a document, minus `metadata` and the
/// proofs themselves.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Proof {
    /// Proof algorithm tag.
    #[serde(rename = "type", default = "default_key_type")]
    pub type_: String,
    /// Creation time, seconds precision.
    pub created: DateTime<Utc>,
    /// The key that produced the signature.
    pub creator: DidUrl,
    /// Base64URL of the 64-byte signature.
    pub signature_value: String,
}

/// A service advertised by the document subject.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    /// Service identifier.
    pub id: DidUrl,
    /// Service type.
    #[serde(rename = "type")]
    pub type_: String,
    /// Endpoint URI.
    pub service_endpoint: String,
}

/// Multisig rule for customized DIDs: `m` of `n` controllers must sign.
/// Wire form is the string `"m:n"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Multisig {
    /// Required signature count.
    pub m: usize,
    /// Controller count.
    pub n: usize,
}

impl fmt::Display for Multisig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.m, self.n)
    }
}

impl FromStr for Multisig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let Some((m, n)) = s.split_once(':') else {
            tracerr!(Kind::InvalidArgs, "multisig must be \"m:n\", got {}", s);
        };
        let (Ok(m), Ok(n)) = (m.parse::<usize>(), n.parse::<usize>()) else {
            tracerr!(Kind::InvalidArgs, "multisig must be \"m:n\", got {}", s);
        };
        if m == 0 || m > n {
            tracerr!(Kind::InvalidArgs, "multisig threshold out of range: {}:{}", m, n);
        }
        Ok(Self { m, n })
    }
}

impl Serialize for Multisig {
    fn serialize<S: serde::Serializer>(
        &self, serializer: S,
    ) -> core::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Multisig {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> core::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Attached document state that is not part of the signed payload: txid,
/// signatures observed on chain, alias, and the store handle that unlocks
/// publishing.
#[derive(Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DocumentMetadata {
    /// Ledger transaction id of the latest transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txid: Option<String>,
    /// Proof signature of the current on-chain document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Proof signature of the previous on-chain document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_signature: Option<String>,
    /// Caller-chosen label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Set when resolution classified the DID as deactivated.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub deactivated: bool,
    /// Store handle. Never serialized; documents loaded from the wire have
    /// no store until one is attached.
    #[serde(skip)]
    pub store: Option<Arc<dyn DidStore>>,
}

impl fmt::Debug for DocumentMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentMetadata")
            .field("txid", &self.txid)
            .field("signature", &self.signature)
            .field("prev_signature", &self.prev_signature)
            .field("alias", &self.alias)
            .field("deactivated", &self.deactivated)
            .field("store", &self.store.as_ref().map(|_| "attached"))
            .finish()
    }
}

impl DocumentMetadata {
    /// True when a store is attached.
    #[must_use]
    pub fn attached_store(&self) -> bool {
        self.store.is_some()
    }
}

/// A DID document. The signed payload excludes `proof` and `metadata`; the
/// proofs sign the canonical form of the remaining fields.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DidDocument {
    /// Subject DID.
    pub id: Option<Did>,
    /// Controllers, ordered. Empty for a primitive DID.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub controller: Vec<Did>,
    /// Signature threshold; only meaningful with more than one controller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multisig: Option<Multisig>,
    /// Keys owned by this document.
    #[serde(rename = "publicKey", skip_serializing_if = "Vec::is_empty")]
    pub public_key: Vec<PublicKey>,
    /// Keys usable to authenticate as the subject.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub authentication: Vec<DidUrl>,
    /// Keys a third party holds to act on the subject's behalf, e.g. to
    /// deactivate it.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub authorization: Vec<DidUrl>,
    /// Credentials embedded in the document.
    #[serde(rename = "verifiableCredential", skip_serializing_if = "Vec::is_empty")]
    pub verifiable_credential: Vec<crate::credential::Credential>,
    /// Advertised services.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub service: Vec<Service>,
    /// Expiry; a document past this instant still resolves, flagged expired.
    #[serde(skip_serializing_if = "Option::is_none", with = "rfc3339_opt")]
    pub expires: Option<DateTime<Utc>>,
    /// One proof per signing controller; a single proof serializes as an
    /// object, several as an array.
    #[serde(skip_serializing_if = "Vec::is_empty", with = "one_or_many")]
    pub proof: Vec<Proof>,
    /// Out-of-band state, never signed.
    #[serde(skip)]
    pub metadata: DocumentMetadata,
}

impl DidDocument {
    /// The subject DID.
    ///
    /// # Errors
    ///
    /// * `MalformedRequest` if the document carries no id.
    pub fn subject(&self) -> Result<&Did> {
        match &self.id {
            Some(did) => Ok(did),
            None => tracerr!(Kind::MalformedRequest, "document has no subject"),
        }
    }

    /// A customized DID delegates authority to its controllers; a primitive
    /// DID is its own authority.
    #[must_use]
    pub fn is_customized(&self) -> bool {
        !self.controller.is_empty()
    }

    /// The key whose base58 material hashes to the subject's id-string.
    #[must_use]
    pub fn default_public_key(&self) -> Option<&PublicKey> {
        let subject = self.id.as_ref()?;
        self.public_key.iter().find(|pk| {
            pk.controller == *subject
                && pk
                    .key_bytes()
                    .map(|bytes| crypto::id_string(&bytes) == subject.id())
                    .unwrap_or(false)
        })
    }

    /// Look up any key by id.
    #[must_use]
    pub fn public_key(&self, id: &DidUrl) -> Option<&PublicKey> {
        self.public_key.iter().find(|pk| &pk.id == id)
    }

    /// Look up an authentication key by id.
    #[must_use]
    pub fn authentication_key(&self, id: &DidUrl) -> Option<&PublicKey> {
        self.authentication.contains(id).then(|| self.public_key(id)).flatten()
    }

    /// Look up an authorization key by id.
    #[must_use]
    pub fn authorization_key(&self, id: &DidUrl) -> Option<&PublicKey> {
        self.authorization.contains(id).then(|| self.public_key(id)).flatten()
    }

    /// The authorization entry delegated to `controller`, if any.
    #[must_use]
    pub fn authorization_key_for(&self, controller: &Did) -> Option<&PublicKey> {
        self.authorization
            .iter()
            .filter_map(|id| self.public_key(id))
            .find(|pk| &pk.controller == controller)
    }

    /// True when `did` is a listed controller.
    #[must_use]
    pub fn has_controller(&self, did: &Did) -> bool {
        self.controller.contains(did)
    }

    /// True when both documents list the same controller set.
    #[must_use]
    pub fn same_controllers(&self, other: &Self) -> bool {
        self.controller.len() == other.controller.len()
            && other.controller.iter().all(|c| self.has_controller(c))
    }

    /// Required proof count: the multisig threshold, or one.
    #[must_use]
    pub fn multisig_threshold(&self) -> usize {
        self.multisig.map_or(1, |ms| ms.m)
    }

    /// True when the expiry has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires.is_some_and(|exp| exp < Utc::now())
    }

    /// First proof signature, the value republished in metadata.
    #[must_use]
    pub fn proof_signature(&self) -> Option<&str> {
        self.proof.first().map(|p| p.signature_value.as_str())
    }

    /// The canonical byte stream the proofs sign: every field except
    /// `proof` and `metadata`, in declared order.
    ///
    /// # Errors
    ///
    /// * `MalformedRequest` on serialization failure.
    pub fn signing_input(&self) -> Result<Vec<u8>> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            // proof is the trailing key, so removal keeps the others' order
            map.remove("proof");
        }
        canon::to_vec(&value)
    }

    /// Serialize for transport, proofs included.
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
    /// * `MalformedRequest` on bad JSON or a missing subject.
    pub fn from_json(json: &str) -> Result<Self> {
        let doc: Self = match serde_json::from_str(json) {
            Ok(doc) => doc,
            Err(e) => tracerr!(Kind::MalformedRequest, "malformed document: {}", e),
        };
        doc.subject()?;
        Ok(doc)
    }

    /// Structural validity: subject present, every referenced key exists, a
    /// primitive DID owns its default key, a customized DID lists at least
    /// one controller and a threshold within range.
    ///
    /// # Errors
    ///
    /// * `MalformedRequest` with the first failing condition.
    pub fn check_structure(&self) -> Result<()> {
        let subject = self.subject()?;

        for id in self.authentication.iter().chain(self.authorization.iter()) {
            if self.public_key(id).is_none() {
                tracerr!(Kind::MalformedRequest, "referenced key not in key set: {}", id);
            }
        }

        if self.is_customized() {
            if let Some(ms) = self.multisig {
                if ms.n != self.controller.len() {
                    tracerr!(
                        Kind::MalformedRequest,
                        "multisig {} does not cover {} controllers",
                        ms,
                        self.controller.len()
                    );
                }
            }
        } else {
            if self.multisig.is_some() {
                tracerr!(Kind::MalformedRequest, "primitive DID cannot carry multisig");
            }
            if self.default_public_key().is_none() {
                tracerr!(Kind::MalformedRequest, "no default key for subject {}", subject);
            }
        }
        Ok(())
    }

    /// Append a proof signed by `signkey`, whose private key is unsealed
    /// from `store` with `storepass`. Sealing a document again replaces any
    /// proof already created by the same key.
    ///
    /// # Errors
    ///
    /// * `InvalidArgs` when the store holds no key under `signkey`.
    pub fn sign_by(
        &mut self, signkey: &DidUrl, storepass: &str, store: &dyn DidStore,
    ) -> Result<()> {
        let input = self.signing_input()?;
        let sk = store.load_private_key(signkey, storepass)?;
        let sig = crypto::sign(&sk, &input)?;
        self.proof.retain(|p| &p.creator != signkey);
        self.proof.push(Proof {
            type_: PROOF_TYPE.to_string(),
            created: now_seconds(),
            creator: signkey.clone(),
            signature_value: crypto::encode_signature(&sig),
        });
        Ok(())
    }

    /// Verify every proof against the canonical payload. A primitive
    /// document must carry a proof by one of its own authentication keys; a
    /// customized document must carry proofs by at least `m` distinct
    /// controllers, each signed with that controller's default key (located
    /// through `source`).
    ///
    /// # Errors
    ///
    /// * `ResolveError` with the first failing proof.
    pub fn is_genuine(&self, source: &dyn DocumentSource) -> Result<()> {
        self.check_structure()?;
        let input = self.signing_input()?;

        if self.proof.is_empty() {
            tracerr!(Kind::ResolveError, "document carries no proof");
        }

        if !self.is_customized() {
            let proof = &self.proof[0];
            let Some(key) = self.authentication_key(&proof.creator) else {
                tracerr!(Kind::ResolveError, "proof creator {} not usable", proof.creator);
            };
            let sig = crypto::decode_signature(&proof.signature_value)?;
            return crypto::verify_base58(&key.public_key_base58, &input, &sig);
        }

        let mut signers: Vec<&Did> = Vec::new();
        for proof in &self.proof {
            let controller = proof.creator.did();
            if !self.has_controller(controller) {
                tracerr!(Kind::ResolveError, "proof creator {} is not a controller", controller);
            }
            if signers.contains(&controller) {
                tracerr!(Kind::ResolveError, "duplicate proof by controller {}", controller);
            }
            let Some(controller_doc) = source.document(controller)? else {
                tracerr!(Kind::ResolveError, "controller {} cannot be resolved", controller);
            };
            let Some(key) = controller_doc.default_public_key() else {
                tracerr!(Kind::ResolveError, "controller {} has no default key", controller);
            };
            if key.id != proof.creator {
                tracerr!(
                    Kind::ResolveError,
                    "proof must be created by the controller default key, got {}",
                    proof.creator
                );
            }
            let sig = crypto::decode_signature(&proof.signature_value)?;
            crypto::verify_base58(&key.public_key_base58, &input, &sig)?;
            signers.push(controller);
        }

        if signers.len() < self.multisig_threshold() {
            tracerr!(
                Kind::ResolveError,
                "{} of {} required controller proofs",
                signers.len(),
                self.multisig_threshold()
            );
        }
        Ok(())
    }
}

/// Current time truncated to whole seconds, the precision proofs carry.
#[must_use]
pub fn now_seconds() -> DateTime<Utc> {
    DateTime::from_timestamp(Utc::now().timestamp(), 0).unwrap_or_default()
}

/// Render a timestamp the way the wire format carries it.
#[must_use]
pub fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(crate) mod rfc3339_opt {
    //! Seconds-precision RFC3339 for optional timestamps.

    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>, serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(t) => serializer.serialize_str(&super::format_time(t)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let s = Option::<String>::deserialize(deserializer)?;
        match s {
            Some(s) => {
                let t = DateTime::parse_from_rfc3339(&s).map_err(serde::de::Error::custom)?;
                Ok(Some(t.with_timezone(&Utc)))
            }
            None => Ok(None),
        }
    }
}

pub(crate) mod one_or_many {
    //! Single proof as an object, several as an array, on both directions.

    use serde::de::{Deserialize, Deserializer};
    use serde::ser::{Serialize, SerializeSeq, Serializer};
    use serde_json::Value;

    pub fn serialize<T, S>(value: &[T], serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Serialize,
        S: Serializer,
    {
        if value.len() == 1 {
            return value[0].serialize(serializer);
        }
        let mut seq = serializer.serialize_seq(Some(value.len()))?;
        for e in value {
            seq.serialize_element(e)?;
        }
        seq.end()
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Vec<T>, D::Error>
    where
        T: serde::de::DeserializeOwned,
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        match value {
            Value::Array(items) => items
                .into_iter()
                .map(|v| serde_json::from_value(v).map_err(serde::de::Error::custom))
                .collect(),
            other => {
                let one: T = serde_json::from_value(other).map_err(serde::de::Error::custom)?;
                Ok(vec![one])
            }
        }
    }
}
