//! Authoring and editing of DID documents. A builder starts empty or from an
//! existing document, mutates the unsigned fields, and seals the result by
//! signing fresh proofs. Editing drops the old proofs; metadata is carried
//! across so a resealed document can still publish.

use chrono::{DateTime, Datelike, Utc};

use crate::credential::Credential;
use crate::crypto;
use crate::did::{Did, DidUrl};
use crate::document::{DidDocument, Multisig, PublicKey, Service, KEY_TYPE};
use crate::error::Kind;
use crate::{tracerr, Result};

/// Default document lifetime: five years, the method's maximum.
pub const MAX_VALID_YEARS: i32 = 5;

/// Builder for authoring or editing a document.
#[derive(Debug)]
pub struct DocumentBuilder {
    doc: DidDocument,
}

impl DocumentBuilder {
    /// Start a fresh document for `subject`.
    #[must_use]
    pub fn new(subject: &Did) -> Self {
        let mut doc = DidDocument { id: Some(subject.clone()), ..DidDocument::default() };
        doc.expires = Some(default_expires());
        Self { doc }
    }

    /// Edit an existing document. Proofs are discarded, with the outgoing
    /// signature kept in metadata for publish chaining; everything else,
    /// metadata included, carries over.
    #[must_use]
    pub fn edit(doc: &DidDocument) -> Self {
        let mut doc = doc.clone();
        let outgoing = doc.proof_signature().map(str::to_string);
        if outgoing.is_some() {
            doc.metadata.prev_signature = outgoing;
        }
        doc.proof.clear();
        Self { doc }
    }

    /// Add a plain public key.
    ///
    /// # Errors
    ///
    /// * `InvalidArgs` on a duplicate key id or bad base58.
    pub fn public_key(mut self, id: &DidUrl, key_base58: &str) -> Result<Self> {
        self.push_key(id, None, key_base58)?;
        Ok(self)
    }

    /// Add a key and reference it for authentication.
    ///
    /// # Errors
    ///
    /// * `InvalidArgs` on a duplicate key id or bad base58.
    pub fn authentication_key(mut self, id: &DidUrl, key_base58: &str) -> Result<Self> {
        self.push_key(id, None, key_base58)?;
        self.doc.authentication.push(id.clone());
        Ok(self)
    }

    /// Add an authorization key held by `controller`, usable by that DID to
    /// deactivate the subject.
    ///
    /// # Errors
    ///
    /// * `InvalidArgs` on a duplicate key id or bad base58.
    pub fn authorization_key(
        mut self, id: &DidUrl, controller: &Did, key_base58: &str,
    ) -> Result<Self> {
        self.push_key(id, Some(controller), key_base58)?;
        self.doc.authorization.push(id.clone());
        Ok(self)
    }

    /// Reference an existing key for authentication.
    ///
    /// # Errors
    ///
    /// * `InvalidArgs` when no key with `id` exists.
    pub fn authenticate_with(mut self, id: &DidUrl) -> Result<Self> {
        if self.doc.public_key(id).is_none() {
            tracerr!(Kind::InvalidArgs, "no key {} to reference", id);
        }
        if !self.doc.authentication.contains(id) {
            self.doc.authentication.push(id.clone());
        }
        Ok(self)
    }

    /// Add a controller. The subject becomes (or stays) customized.
    #[must_use]
    pub fn controller(mut self, controller: &Did) -> Self {
        if !self.doc.controller.contains(controller) {
            self.doc.controller.push(controller.clone());
        }
        self
    }

    /// Replace the controller set.
    #[must_use]
    pub fn controllers(mut self, controllers: &[Did]) -> Self {
        self.doc.controller = controllers.to_vec();
        self
    }

    /// Set the multisig rule over the current controller set.
    ///
    /// # Errors
    ///
    /// * `InvalidArgs` when the threshold exceeds the controller count.
    pub fn multisig(mut self, m: usize) -> Result<Self> {
        let n = self.doc.controller.len();
        if m == 0 || m > n {
            tracerr!(Kind::InvalidArgs, "multisig threshold {} out of range for {} controllers", m, n);
        }
        self.doc.multisig = Some(Multisig { m, n });
        Ok(self)
    }

    /// Embed a credential.
    ///
    /// # Errors
    ///
    /// * `InvalidArgs` when the credential belongs to another subject.
    pub fn credential(mut self, credential: &Credential) -> Result<Self> {
        let subject = self.doc.subject()?;
        if !credential.id.owned_by(subject) {
            tracerr!(Kind::InvalidArgs, "credential {} not owned by {}", credential.id, subject);
        }
        self.doc.verifiable_credential.retain(|vc| vc.id != credential.id);
        self.doc.verifiable_credential.push(credential.clone());
        Ok(self)
    }

    /// Add a service endpoint.
    #[must_use]
    pub fn service(mut self, id: &DidUrl, type_: &str, endpoint: &str) -> Self {
        self.doc.service.retain(|s| &s.id != id);
        self.doc.service.push(Service {
            id: id.clone(),
            type_: type_.to_string(),
            service_endpoint: endpoint.to_string(),
        });
        self
    }

    /// Override the expiry. Clamped to the method maximum.
    #[must_use]
    pub fn expires(mut self, expires: DateTime<Utc>) -> Self {
        let max = default_expires();
        self.doc.expires = Some(expires.min(max));
        self
    }

    /// Attach the store that will seal this document and later publish it.
    #[must_use]
    pub fn attach_store(mut self, store: std::sync::Arc<dyn crate::store::DidStore>) -> Self {
        self.doc.metadata.store = Some(store);
        self
    }

    /// The document as built, unsigned. Callers that only need a payload
    /// for negative fixtures use this; everything else goes through
    /// [`Self::seal`].
    #[must_use]
    pub fn build_unsigned(self) -> DidDocument {
        self.doc
    }

    /// Seal the document: check structure, then sign a proof with `signkey`
    /// out of the document's attached store. Customized documents with more
    /// than one required signature are sealed once and counter-signed with
    /// [`DidDocument::sign_by`].
    ///
    /// # Errors
    ///
    /// * `NoAttachedStore` without a store handle.
    /// * `MalformedRequest` when the structure is invalid.
    pub fn seal(mut self, signkey: &DidUrl, storepass: &str) -> Result<DidDocument> {
        if storepass.is_empty() {
            tracerr!(Kind::InvalidArgs, "empty store passphrase");
        }
        self.doc.check_structure()?;
        let Some(store) = self.doc.metadata.store.clone() else {
            tracerr!(Kind::NoAttachedStore, "cannot seal without an attached store");
        };
        self.doc.sign_by(signkey, storepass, store.as_ref())?;
        Ok(self.doc)
    }
}

/// Create a primitive DID document from a freshly generated key. The key id
/// is `#primary`; the private key is sealed into `store`.
///
/// # Errors
///
/// * Store failures while persisting the key.
pub fn new_primitive(
    private_key: &[u8], store: &std::sync::Arc<dyn crate::store::DidStore>, storepass: &str,
) -> Result<DidDocument> {
    let public_key = crypto::public_key_from_private(private_key)?;
    let did = Did::from_key(&public_key);
    let keyid = did.url("primary");
    store.store_private_key(&keyid, storepass, private_key)?;

    let mut builder = DocumentBuilder::new(&did);
    builder.doc.metadata.store = Some(store.clone());
    builder
        .authentication_key(&keyid, &crypto::base58::encode(&public_key))?
        .seal(&keyid, storepass)
}

impl DocumentBuilder {
    fn push_key(&mut self, id: &DidUrl, controller: Option<&Did>, key_base58: &str) -> Result<()> {
        let subject = self.doc.subject()?.clone();
        if !id.owned_by(&subject) {
            tracerr!(Kind::InvalidArgs, "key {} not owned by {}", id, subject);
        }
        if self.doc.public_key(id).is_some() {
            tracerr!(Kind::InvalidArgs, "key {} already exists", id);
        }
        let raw = crypto::base58::decode(key_base58)?;
        if raw.len() != crypto::PUBLIC_KEY_BYTES {
            tracerr!(Kind::InvalidArgs, "public key must be {} bytes", crypto::PUBLIC_KEY_BYTES);
        }
        self.doc.public_key.push(PublicKey {
            id: id.clone(),
            type_: KEY_TYPE.to_string(),
            controller: controller.cloned().unwrap_or(subject),
            public_key_base58: key_base58.to_string(),
        });
        Ok(())
    }
}

fn default_expires() -> DateTime<Utc> {
    let now = crate::document::now_seconds();
    now.with_year(now.year() + MAX_VALID_YEARS).unwrap_or(now)
}
