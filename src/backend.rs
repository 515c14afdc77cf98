//! # Backend façade
//!
//! The context value behind every public verb: publish, update, transfer
//! and deactivate DIDs; declare and revoke credentials; resolve both. Holds
//! the transport adapters, the resolver cache and the TTL. Replaces the
//! process-wide singletons of older SDKs: construct one and pass it around.

use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tracing::debug;

use crate::credential::Credential;
use crate::crypto;
use crate::did::{Did, DidUrl};
use crate::document::DidDocument;
use crate::error::Kind;
use crate::ledger::{HttpLedger, Ledger};
use crate::request::{CredentialRequest, DidRequest, Operation};
use crate::resolve::{
    CredentialBiography, CredentialStatus, DidBiography, DidStatus, ResolveResult, ResolverCache,
};
use crate::ticket::TransferTicket;
use crate::validate::DocumentSource;
use crate::{tracerr, Result};

/// Default cache TTL: one day.
pub const DEFAULT_TTL_MS: i64 = 24 * 60 * 60 * 1000;

/// Host-installed override consulted before any remote resolution.
pub type LocalResolveHandle = Box<dyn Fn(&Did) -> Option<DidDocument> + Send + Sync>;

/// The backend context. Configuration is set at construction and treated as
/// immutable afterwards; the TTL and local override may be swapped, and
/// callers reconfiguring concurrently must serialize the switch themselves.
pub struct Backend {
    publisher: Option<Arc<dyn Ledger>>,
    resolver: Option<Arc<dyn Ledger>>,
    cache: ResolverCache,
    ttl: AtomicI64,
    local_handle: Mutex<Option<LocalResolveHandle>>,
}

impl Backend {
    /// A backend where one adapter serves both roles, as with the
    /// in-process [`crate::ledger::DummyLedger`].
    ///
    /// # Errors
    ///
    /// * `IOError` when the cache directory cannot be created.
    pub fn new(ledger: Arc<dyn Ledger>, cache_dir: &Path, ttl_ms: i64) -> Result<Self> {
        Ok(Self {
            publisher: Some(ledger.clone()),
            resolver: Some(ledger),
            cache: ResolverCache::new(cache_dir)?,
            ttl: AtomicI64::new(ttl_ms),
            local_handle: Mutex::new(None),
        })
    }

    /// A backend resolving against a remote node, with an optional
    /// host-supplied publisher.
    ///
    /// # Errors
    ///
    /// * `InvalidArgs` on an empty URL; `IOError` on the cache directory.
    pub fn with_resolver_url(
        publisher: Option<Arc<dyn Ledger>>, url: &str, cache_dir: &Path, ttl_ms: i64,
    ) -> Result<Self> {
        Ok(Self {
            publisher,
            resolver: Some(Arc::new(HttpLedger::new(url)?)),
            cache: ResolverCache::new(cache_dir)?,
            ttl: AtomicI64::new(ttl_ms),
            local_handle: Mutex::new(None),
        })
    }

    /// Swap the cache TTL.
    pub fn set_ttl(&self, ttl_ms: i64) {
        self.ttl.store(ttl_ms, Ordering::Relaxed);
    }

    /// The current cache TTL in milliseconds.
    #[must_use]
    pub fn ttl(&self) -> i64 {
        self.ttl.load(Ordering::Relaxed)
    }

    /// Install (or clear) the local resolve override.
    pub fn set_local_resolve_handle(&self, handle: Option<LocalResolveHandle>) {
        *self.local_handle.lock().expect("handle lock poisoned") = handle;
    }

    fn publisher(&self) -> Result<&Arc<dyn Ledger>> {
        match &self.publisher {
            Some(p) => Ok(p),
            None => tracerr!(Kind::NotInitialized, "no method to create transaction"),
        }
    }

    fn resolver(&self) -> Result<&Arc<dyn Ledger>> {
        match &self.resolver {
            Some(r) => Ok(r),
            None => tracerr!(Kind::NotInitialized, "no resolver"),
        }
    }

    // ------------------------------------------------------------------
    // Publish verbs
    // ------------------------------------------------------------------

    /// Anchor a new DID.
    ///
    /// # Errors
    ///
    /// * `NoAttachedStore`, `NotInitialized`, or `TransactionError` from
    ///   the adapter.
    pub fn create_did(
        &self, document: &DidDocument, signkey: &DidUrl, storepass: &str,
    ) -> Result<()> {
        let publisher = self.publisher()?;
        if !document.metadata.attached_store() {
            tracerr!(Kind::NoAttachedStore, "no attached store with document");
        }
        let envelope = DidRequest::create(document, signkey, storepass)?;
        publisher.create_id_transaction(&envelope, "")
    }

    /// Replace the current document; `previousTxid` is taken from the
    /// document's metadata.
    ///
    /// # Errors
    ///
    /// * As [`Self::create_did`], plus `InvalidArgs` without a txid.
    pub fn update_did(
        &self, document: &DidDocument, signkey: &DidUrl, storepass: &str,
    ) -> Result<()> {
        let publisher = self.publisher()?;
        if !document.metadata.attached_store() {
            tracerr!(Kind::NoAttachedStore, "no attached store with document");
        }
        let envelope = DidRequest::update(document, signkey, storepass)?;
        publisher.create_id_transaction(&envelope, "")
    }

    /// Hand a customized DID to a new controller set under `ticket`.
    ///
    /// # Errors
    ///
    /// * As [`Self::update_did`].
    pub fn transfer_did(
        &self, document: &DidDocument, ticket: &TransferTicket, signkey: &DidUrl,
        storepass: &str,
    ) -> Result<()> {
        let publisher = self.publisher()?;
        if !document.metadata.attached_store() {
            tracerr!(Kind::NoAttachedStore, "no attached store with document");
        }
        let envelope = DidRequest::transfer(document, ticket, signkey, storepass)?;
        publisher.create_id_transaction(&envelope, "")
    }

    /// Terminate `target`. The signer document holds `signkey`; `creator`
    /// names the proof key when the two differ (delegated deactivation).
    ///
    /// # Errors
    ///
    /// * As [`Self::create_did`].
    pub fn deactivate_did(
        &self, target: &Did, signer: &DidDocument, signkey: &DidUrl, creator: Option<&DidUrl>,
        storepass: &str,
    ) -> Result<()> {
        let publisher = self.publisher()?;
        if !signer.metadata.attached_store() {
            tracerr!(Kind::NoAttachedStore, "no attached store with document");
        }
        let envelope = DidRequest::deactivate(target, signer, signkey, creator, storepass)?;
        publisher.create_id_transaction(&envelope, "")
    }

    /// Put a credential on chain, signed by its owner.
    ///
    /// # Errors
    ///
    /// * As [`Self::create_did`].
    pub fn declare_credential(
        &self, credential: &Credential, signkey: &DidUrl, signer: &DidDocument, storepass: &str,
    ) -> Result<()> {
        let publisher = self.publisher()?;
        if !signer.metadata.attached_store() {
            tracerr!(Kind::NoAttachedStore, "no attached store with document");
        }
        let envelope = CredentialRequest::declare(credential, signkey, signer, storepass)?;
        publisher.create_id_transaction(&envelope, "")
    }

    /// Revoke a credential by id, signed by its owner or issuer.
    ///
    /// # Errors
    ///
    /// * As [`Self::create_did`].
    pub fn revoke_credential(
        &self, id: &DidUrl, signkey: &DidUrl, signer: &DidDocument, storepass: &str,
    ) -> Result<()> {
        let publisher = self.publisher()?;
        if !signer.metadata.attached_store() {
            tracerr!(Kind::NoAttachedStore, "no attached store with document");
        }
        let envelope = CredentialRequest::revoke(id, signkey, signer, storepass)?;
        publisher.create_id_transaction(&envelope, "")
    }

    // ------------------------------------------------------------------
    // Resolve verbs
    // ------------------------------------------------------------------

    /// Resolve a DID to its authoritative document and status. `force`
    /// bypasses the cache.
    ///
    /// # Errors
    ///
    /// * `ResolveError` / `MalformedResolveResponse` on transport or
    ///   verification failure. `NotFound` is a status, not an error.
    pub fn resolve_did(&self, did: &Did, force: bool) -> Result<(Option<DidDocument>, DidStatus)> {
        if let Some(handle) = &*self.local_handle.lock().expect("handle lock poisoned") {
            if let Some(doc) = handle(did) {
                debug!("resolved {} from local handle", did);
                return Ok((Some(doc), DidStatus::Valid));
            }
        }

        // the signature recorded by the previous resolve, captured before
        // this one overwrites the cache entry
        let carried = self
            .cache
            .load(&ResolverCache::did_key(did), i64::MAX)
            .as_ref()
            .and_then(newest_document_signature);

        // a cached body may hold the full history written by a biography
        // query, so the strict per-status count only binds fresh responses
        let (body, cached) = self.did_result_body(did, false, force)?;
        let result = ResolveResult::from_value(&body, did, cached)?;

        match result.status {
            DidStatus::NotFound => Ok((None, DidStatus::NotFound)),
            DidStatus::Deactivated => {
                if result.txs.len() < 2 {
                    tracerr!(
                        Kind::MalformedResolveResponse,
                        "invalid DID biography, wrong transaction count"
                    );
                }
                let doc_tx = &result.txs[1];
                let Some(mut doc) = doc_tx.request.doc.clone() else {
                    tracerr!(
                        Kind::MalformedResolveResponse,
                        "invalid DID biography, missing document"
                    );
                };
                check_live_operation(doc_tx)?;
                doc_tx.request.verify(&doc, self)?;
                result.txs[0].request.verify(&doc, self)?;

                doc.metadata.txid = Some(result.txs[0].txid.clone());
                doc.metadata.signature = doc.proof_signature().map(str::to_string);
                // the deactivation carries no document, so the predecessor
                // of the terminating transition is the document itself
                doc.metadata.prev_signature = result.txs[1]
                    .request
                    .doc
                    .as_ref()
                    .and_then(DidDocument::proof_signature)
                    .map(str::to_string);
                doc.metadata.deactivated = true;
                Ok((Some(doc), DidStatus::Deactivated))
            }
            status => {
                let tx = &result.txs[0];
                let Some(mut doc) = tx.request.doc.clone() else {
                    tracerr!(
                        Kind::MalformedResolveResponse,
                        "invalid DID biography, missing document"
                    );
                };
                check_live_operation(tx)?;
                tx.request.verify(&doc, self)?;

                doc.metadata.txid = Some(tx.txid.clone());
                doc.metadata.signature = doc.proof_signature().map(str::to_string);
                // predecessor from the history when the body carries one,
                // otherwise from the previous resolve when the document has
                // actually changed since
                doc.metadata.prev_signature = result
                    .txs
                    .get(1)
                    .and_then(|prev| prev.request.doc.as_ref())
                    .and_then(DidDocument::proof_signature)
                    .map(str::to_string)
                    .or_else(|| {
                        carried.filter(|sig| Some(sig.as_str()) != doc.proof_signature())
                    });
                Ok((Some(doc), status))
            }
        }
    }

    /// The full ordered history of a DID. Always queries the chain
    /// (`all=true`), bypassing the cache for the read but still writing the
    /// result.
    ///
    /// # Errors
    ///
    /// * `NotFound` when the DID was never anchored.
    pub fn resolve_did_biography(&self, did: &Did) -> Result<DidBiography> {
        let (body, _) = self.did_result_body(did, true, true)?;
        let result = ResolveResult::from_value(&body, did, true)?;
        if result.status == DidStatus::NotFound {
            tracerr!(Kind::NotFound, "DID not exists: {}", did);
        }
        Ok(result.into_biography())
    }

    /// Resolve a credential to its content and status.
    ///
    /// # Errors
    ///
    /// * `ResolveError` / `MalformedResolveResponse` on transport or
    ///   verification failure.
    pub fn resolve_credential(
        &self, id: &DidUrl, force: bool,
    ) -> Result<(Option<Credential>, CredentialStatus)> {
        let body = self.credential_result_body(id, None, force)?;
        let biography = CredentialBiography::from_value(&body, id)?;

        match biography.status {
            CredentialStatus::NotFound => Ok((None, CredentialStatus::NotFound)),
            status => {
                let declared = biography.credential().cloned();
                for tx in &biography.txs {
                    tx.request.verify(declared.as_ref(), self)?;
                }
                Ok((declared, status))
            }
        }
    }

    /// The full history of a credential, optionally scoped to revocations
    /// by one issuer. Bypasses the cache read.
    ///
    /// # Errors
    ///
    /// * `NotFound` when the credential was never declared or revoked.
    pub fn resolve_credential_biography(
        &self, id: &DidUrl, issuer: Option<&Did>,
    ) -> Result<CredentialBiography> {
        let body = self.credential_result_body(id, issuer, true)?;
        let biography = CredentialBiography::from_value(&body, id)?;
        if biography.status == CredentialStatus::NotFound {
            tracerr!(Kind::NotFound, "credential not exists: {}", id);
        }
        Ok(biography)
    }

    /// Whether `issuer` (or the owner) has revoked the credential. Always
    /// consults the chain.
    ///
    /// # Errors
    ///
    /// * Transport failures.
    pub fn resolve_revocation(&self, id: &DidUrl, issuer: &Did) -> Result<bool> {
        let body = self.credential_result_body(id, Some(issuer), true)?;
        let biography = CredentialBiography::from_value(&body, id)?;
        Ok(biography.status == CredentialStatus::Revoked)
    }

    /// List credential ids declared by a DID, paginated.
    ///
    /// # Errors
    ///
    /// * Transport failures or a response for the wrong DID.
    pub fn list_credentials(&self, did: &Did, skip: usize, limit: usize) -> Result<Vec<DidUrl>> {
        let request = json!({
            "method": "did_listCredentials",
            "params": [{"did": did.to_string(), "skip": skip, "limit": limit}],
            "id": crypto::rand_txid(),
        });
        let body = self.rpc_call(&request)?;

        let Some(owner) = body.get("did").and_then(Value::as_str) else {
            tracerr!(Kind::MalformedResolveResponse, "result is missing the did field");
        };
        if owner != did.to_string() {
            tracerr!(Kind::MalformedResolveResponse, "response is not for {}", did);
        }
        let mut ids = Vec::new();
        if let Some(items) = body.get("credentials").and_then(Value::as_array) {
            for item in items {
                let Some(s) = item.as_str() else {
                    tracerr!(Kind::MalformedResolveResponse, "invalid credentials field");
                };
                ids.push(DidUrl::parse(s, None)?);
            }
        }
        Ok(ids)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn rpc_call(&self, request: &Value) -> Result<Value> {
        let resolver = self.resolver()?;
        let response = resolver.resolve(&request.to_string())?;
        let envelope: Value = match serde_json::from_str(&response) {
            Ok(v) => v,
            Err(e) => {
                tracerr!(Kind::MalformedResolveResponse, "deserialize resolved data failed: {}", e)
            }
        };

        match envelope.get("result") {
            Some(result) if result.is_object() => Ok(result.clone()),
            _ => {
                if let Some(error) = envelope.get("error").filter(|e| !e.is_null()) {
                    let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
                    let message =
                        error.get("message").and_then(Value::as_str).unwrap_or_default();
                    tracerr!(Kind::ResolveError, "resolve error({}): {}", code, message);
                }
                tracerr!(Kind::MalformedResolveResponse, "missing or invalid error field");
            }
        }
    }

    fn did_result_body(&self, did: &Did, all: bool, force: bool) -> Result<(Value, bool)> {
        let key = ResolverCache::did_key(did);
        if !force && !all {
            if let Some(body) = self.cache.load(&key, self.ttl()) {
                debug!("resolved {} from cache", did);
                return Ok((body, true));
            }
        }

        let request = json!({
            "method": "did_resolveDID",
            "params": [{"did": did.to_string(), "all": all}],
            "id": crypto::rand_txid(),
        });
        let body = self.rpc_call(&request)?;

        if body.get("status").and_then(Value::as_i64) != Some(DidStatus::NotFound.code()) {
            self.cache.store(&key, &body)?;
        }
        Ok((body, false))
    }

    fn credential_result_body(
        &self, id: &DidUrl, issuer: Option<&Did>, force: bool,
    ) -> Result<Value> {
        let key = ResolverCache::credential_key(id, issuer);
        if !force {
            if let Some(body) = self.cache.load(&key, self.ttl()) {
                debug!("resolved {} from cache", id);
                return Ok(body);
            }
        }

        let mut params = json!({"id": id.to_string()});
        if let Some(issuer) = issuer {
            params["issuer"] = Value::from(issuer.to_string());
        }
        let request = json!({
            "method": "did_resolveCredential",
            "params": [params],
            "id": crypto::rand_txid(),
        });
        let body = self.rpc_call(&request)?;

        if body.get("status").and_then(Value::as_i64) != Some(CredentialStatus::NotFound.code()) {
            self.cache.store(&key, &body)?;
        }
        Ok(body)
    }
}

/// The proof signature of the newest document in a stored result body.
/// Deactivation payloads are plain DID strings and yield nothing.
fn newest_document_signature(body: &Value) -> Option<String> {
    let payload = body
        .get("transaction")?
        .get(0)?
        .get("operation")?
        .get("payload")?
        .as_str()?;
    let raw = crypto::base64url::decode(payload).ok()?;
    let doc = DidDocument::from_json(&String::from_utf8(raw).ok()?).ok()?;
    doc.proof_signature().map(str::to_string)
}

fn check_live_operation(tx: &crate::resolve::DidTransaction) -> Result<()> {
    if !matches!(
        tx.request.header.operation,
        Operation::Create | Operation::Update | Operation::Transfer
    ) {
        tracerr!(Kind::MalformedResolveResponse, "wrong transaction status");
    }
    Ok(())
}

/// During post-resolution verification, controller and issuer documents are
/// looked up through the backend itself.
impl DocumentSource for Backend {
    fn document(&self, did: &Did) -> Result<Option<DidDocument>> {
        let (doc, status) = self.resolve_did(did, false)?;
        if status.is_live() {
            Ok(doc)
        } else {
            Ok(None)
        }
    }
}
