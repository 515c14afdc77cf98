//! # Ledger adapters
//!
//! The transport seam between the runtime and the chain. The same trait is
//! satisfied by the in-process replica used for tests and dry runs and by
//! the JSON-RPC client that talks to a real node, so the resolver is
//! identical against both backends.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::debug;

use crate::credential::Credential;
use crate::crypto;
use crate::did::{Did, DidUrl, PREFIX};
use crate::document::{format_time, now_seconds, DidDocument};
use crate::error::Kind;
use crate::request::{
    CredentialOperation, CredentialRequest, DidRequest, Operation, SPEC_VERSION,
};
use crate::validate::{admit_credential_request, admit_did_request, DocumentSource, LastState};
use crate::{tracerr, Result};

/// The synchronous transport contract. `create_id_transaction` submits a
/// signed envelope; `resolve` answers a JSON-RPC request string with a
/// response string.
pub trait Ledger: Send + Sync {
    /// Submit a signed request envelope for anchoring.
    ///
    /// # Errors
    ///
    /// * `TransactionError` when the chain rejects the transition.
    fn create_id_transaction(&self, payload: &str, memo: &str) -> Result<()>;

    /// Answer a JSON-RPC request.
    ///
    /// # Errors
    ///
    /// * `ResolveError` on transport failure.
    fn resolve(&self, request: &str) -> Result<String>;
}

const CAPACITY: usize = 256;

enum ChainRequest {
    Did(DidRequest),
    Credential(CredentialRequest),
}

struct TxRecord {
    txid: String,
    timestamp: DateTime<Utc>,
    request: ChainRequest,
    /// The envelope exactly as admitted, replayed into resolve responses.
    envelope: Value,
}

/// In-process replica of the chain: a bounded transaction array plus the
/// same admission matrix the on-chain contract applies. Txids are random;
/// clients only ever compare them for equality.
#[derive(Default)]
pub struct DummyLedger {
    records: Mutex<Vec<TxRecord>>,
}

/// Document lookup over a snapshot of the record array.
struct RecordsView<'a>(&'a [TxRecord]);

impl RecordsView<'_> {
    fn last_for(&self, did: &Did) -> Option<(usize, &TxRecord)> {
        self.0
            .iter()
            .enumerate()
            .rev()
            .find(|(_, rec)| matches!(&rec.request, ChainRequest::Did(req) if req.did.as_ref() == Some(did)))
    }

    fn last_state(&self, did: &Did) -> Option<LastState> {
        self.last_for(did).map(|(_, rec)| {
            let ChainRequest::Did(req) = &rec.request else { unreachable!() };
            LastState {
                txid: rec.txid.clone(),
                operation: req.header.operation,
                doc: req.doc.clone(),
            }
        })
    }

    fn declared(&self, id: &DidUrl) -> Option<&Credential> {
        self.0.iter().rev().find_map(|rec| match &rec.request {
            ChainRequest::Credential(req)
                if req.id.as_ref() == Some(id)
                    && req.header.operation == CredentialOperation::Declare =>
            {
                req.vc.as_ref()
            }
            _ => None,
        })
    }

    fn revoked_by(&self, id: &DidUrl, issuer: Option<&Did>) -> bool {
        self.0.iter().any(|rec| match &rec.request {
            ChainRequest::Credential(req)
                if req.id.as_ref() == Some(id)
                    && req.header.operation == CredentialOperation::Revoke =>
            {
                match issuer {
                    // an issuer-scoped query only sees revocations by that
                    // issuer or by the owner
                    Some(issuer) => {
                        let signer = req.proof.verification_method.did();
                        signer == issuer || signer == id.did()
                    }
                    None => true,
                }
            }
            _ => false,
        })
    }
}

impl DocumentSource for RecordsView<'_> {
    fn document(&self, did: &Did) -> Result<Option<DidDocument>> {
        match self.last_state(did) {
            Some(state) if state.operation != Operation::Deactivate => Ok(state.doc),
            _ => Ok(None),
        }
    }
}

impl DummyLedger {
    /// A fresh, empty replica.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all state.
    pub fn reset(&self) {
        self.records.lock().expect("ledger lock poisoned").clear();
    }

    /// Number of admitted transactions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().expect("ledger lock poisoned").len()
    }

    /// True when nothing has been admitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The latest txid for a DID, if any.
    #[must_use]
    pub fn last_txid(&self, did: &Did) -> Option<String> {
        let records = self.records.lock().expect("ledger lock poisoned");
        RecordsView(&records).last_for(did).map(|(_, rec)| rec.txid.clone())
    }

    fn did_result(records: &[TxRecord], did: &Did, all: bool) -> Value {
        let view = RecordsView(records);
        let Some((_, last)) = view.last_for(did) else {
            return json!({"did": did.to_string(), "status": 3});
        };
        let ChainRequest::Did(last_req) = &last.request else { unreachable!() };

        let status = match last_req.header.operation {
            Operation::Deactivate => 2,
            _ if last_req.doc.as_ref().is_some_and(DidDocument::is_expired) => 1,
            _ => 0,
        };

        let mut txs: Vec<Value> = Vec::new();
        if all {
            for rec in records.iter().rev() {
                if matches!(&rec.request, ChainRequest::Did(req) if req.did.as_ref() == Some(did)) {
                    txs.push(tx_to_json(rec));
                }
            }
        } else if status == 2 {
            // the deactivation followed by the last document transition
            let mut found = Vec::new();
            for rec in records.iter().rev() {
                if matches!(&rec.request, ChainRequest::Did(req) if req.did.as_ref() == Some(did)) {
                    found.push(rec);
                    if found.len() == 2 {
                        break;
                    }
                }
            }
            txs = found.into_iter().map(tx_to_json).collect();
        } else {
            txs.push(tx_to_json(last));
        }

        json!({"did": did.to_string(), "status": status, "transaction": txs})
    }

    fn credential_result(records: &[TxRecord], id: &DidUrl, issuer: Option<&Did>) -> Value {
        let view = RecordsView(records);
        let declared = view.declared(id);
        let revoked = view.revoked_by(id, issuer);

        if declared.is_none() && !revoked {
            return json!({"id": id.to_string(), "status": 3});
        }

        let mut txs: Vec<Value> = Vec::new();
        for rec in records.iter().rev() {
            match &rec.request {
                ChainRequest::Credential(req) if req.id.as_ref() == Some(id) => {
                    let is_revoke = req.header.operation == CredentialOperation::Revoke;
                    if is_revoke && !revoked {
                        continue;
                    }
                    txs.push(tx_to_json(rec));
                }
                _ => {}
            }
        }

        let status = if revoked { 2 } else { 0 };
        json!({"id": id.to_string(), "status": status, "transaction": txs})
    }

    fn list_credentials(records: &[TxRecord], did: &Did, skip: usize, limit: usize) -> Value {
        let mut ids: Vec<String> = Vec::new();
        for rec in records.iter().rev() {
            if let ChainRequest::Credential(req) = &rec.request {
                if req.header.operation == CredentialOperation::Declare {
                    if let Some(id) = &req.id {
                        if id.did() == did && !ids.contains(&id.to_string()) {
                            ids.push(id.to_string());
                        }
                    }
                }
            }
        }
        let page: Vec<String> = ids.into_iter().skip(skip).take(limit).collect();
        json!({"did": did.to_string(), "credentials": page})
    }
}

fn tx_to_json(rec: &TxRecord) -> Value {
    json!({
        "txid": rec.txid,
        "timestamp": format_time(&rec.timestamp),
        "operation": rec.envelope,
    })
}

fn rpc_ok(result: Value, id: &Value) -> String {
    json!({"jsonrpc": "2.0", "result": result, "error": null, "id": id}).to_string()
}

fn rpc_err(code: i64, message: &str, id: &Value) -> String {
    json!({
        "jsonrpc": "2.0",
        "result": null,
        "error": {"code": code, "message": message},
        "id": id,
    })
    .to_string()
}

impl Ledger for DummyLedger {
    fn create_id_transaction(&self, payload: &str, _memo: &str) -> Result<()> {
        if payload.is_empty() {
            tracerr!(Kind::InvalidArgs, "empty transaction payload");
        }
        let mut records = self.records.lock().expect("ledger lock poisoned");
        if records.len() >= CAPACITY {
            tracerr!(Kind::TransactionError, "the transaction array should be larger");
        }

        let envelope: Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => tracerr!(Kind::TransactionError, "payload is not JSON: {}", e),
        };
        let spec = envelope
            .get("header")
            .and_then(|h| h.get("specification"))
            .and_then(Value::as_str)
            .unwrap_or_default();

        let view = RecordsView(&records);
        let request = if spec == SPEC_VERSION {
            let request = DidRequest::from_json(payload)?;
            let last = view.last_state(request.subject()?);
            admit_did_request(&request, last.as_ref(), &view)?;
            ChainRequest::Did(request)
        } else {
            let request = CredentialRequest::from_json(payload)?;
            let id = request.credential_id()?;
            let declared = view.declared(id).cloned();
            let revoked = view.revoked_by(id, None);
            admit_credential_request(&request, declared.as_ref(), revoked, &view)?;
            ChainRequest::Credential(request)
        };

        let txid = crypto::rand_txid();
        debug!("admitted transaction {}", txid);
        records.push(TxRecord { txid, timestamp: now_seconds(), request, envelope });
        Ok(())
    }

    fn resolve(&self, request: &str) -> Result<String> {
        let req: Value = match serde_json::from_str(request) {
            Ok(v) => v,
            Err(e) => tracerr!(Kind::MalformedResolveResponse, "request is not JSON: {}", e),
        };
        let id = req.get("id").cloned().unwrap_or(Value::Null);
        let method = req.get("method").and_then(Value::as_str).unwrap_or_default();
        let params = req
            .get("params")
            .and_then(Value::as_array)
            .and_then(|a| a.first())
            .cloned()
            .unwrap_or(Value::Null);

        let records = self.records.lock().expect("ledger lock poisoned");
        match method {
            "did_resolveDID" => {
                let Some(did) = params.get("did").and_then(Value::as_str) else {
                    return Ok(rpc_err(-32602, "missing did parameter", &id));
                };
                if !did.starts_with(PREFIX) {
                    return Ok(rpc_err(-32602, "unsupported DID", &id));
                }
                let Ok(did) = did.parse::<Did>() else {
                    return Ok(rpc_err(-32602, "invalid DID", &id));
                };
                let all = params.get("all").and_then(Value::as_bool).unwrap_or(false);
                Ok(rpc_ok(Self::did_result(&records, &did, all), &id))
            }
            "did_resolveCredential" => {
                let Some(vc_id) = params.get("id").and_then(Value::as_str) else {
                    return Ok(rpc_err(-32602, "missing id parameter", &id));
                };
                let Ok(vc_id) = DidUrl::parse(vc_id, None) else {
                    return Ok(rpc_err(-32602, "invalid credential id", &id));
                };
                let issuer = match params.get("issuer").and_then(Value::as_str) {
                    Some(s) => match s.parse::<Did>() {
                        Ok(did) => Some(did),
                        Err(_) => return Ok(rpc_err(-32602, "invalid issuer", &id)),
                    },
                    None => None,
                };
                Ok(rpc_ok(Self::credential_result(&records, &vc_id, issuer.as_ref()), &id))
            }
            "did_listCredentials" => {
                let Some(did) = params.get("did").and_then(Value::as_str) else {
                    return Ok(rpc_err(-32602, "missing did parameter", &id));
                };
                let Ok(did) = did.parse::<Did>() else {
                    return Ok(rpc_err(-32602, "invalid DID", &id));
                };
                let skip = params.get("skip").and_then(Value::as_u64).unwrap_or(0) as usize;
                let limit =
                    params.get("limit").and_then(Value::as_u64).unwrap_or(u64::MAX) as usize;
                Ok(rpc_ok(Self::list_credentials(&records, &did, skip, limit), &id))
            }
            other => Ok(rpc_err(-32601, &format!("unknown method: {other}"), &id)),
        }
    }
}

/// JSON-RPC client against a real resolver node. Resolve-only: anchoring
/// goes through a host-supplied [`Ledger`], typically a wallet bridge.
pub struct HttpLedger {
    url: String,
    client: reqwest::blocking::Client,
}

impl HttpLedger {
    /// A client for the node at `url`.
    ///
    /// # Errors
    ///
    /// * `InvalidArgs` on an empty URL.
    pub fn new(url: &str) -> Result<Self> {
        if url.is_empty() {
            tracerr!(Kind::InvalidArgs, "no url string");
        }
        let client = match reqwest::blocking::Client::builder().build() {
            Ok(c) => c,
            Err(e) => tracerr!(Kind::ResolveError, "cannot build HTTP client: {}", e),
        };
        Ok(Self { url: url.to_string(), client })
    }
}

impl Ledger for HttpLedger {
    fn create_id_transaction(&self, _payload: &str, _memo: &str) -> Result<()> {
        tracerr!(Kind::Unsupported, "the default resolver transport cannot publish");
    }

    fn resolve(&self, request: &str) -> Result<String> {
        let response = match self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(request.to_string())
            .send()
        {
            Ok(r) => r,
            Err(e) => tracerr!(Kind::ResolveError, "resolve transport failed: {}", e),
        };
        if !response.status().is_success() {
            tracerr!(Kind::ResolveError, "resolver returned HTTP {}", response.status());
        }
        match response.text() {
            Ok(body) => Ok(body),
            Err(e) => tracerr!(Kind::ResolveError, "cannot read resolver response: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{self, MemStore};

    fn publish_create(ledger: &DummyLedger) -> (DidDocument, DidUrl) {
        let store = MemStore::shared();
        let (doc, _) = test_utils::published_document_in(&store, test_utils::STOREPASS);
        let signkey = doc.default_public_key().expect("key").id.clone();
        let envelope = DidRequest::create(&doc, &signkey, test_utils::STOREPASS).expect("sign");
        ledger.create_id_transaction(&envelope, "").expect("admit");
        (doc, signkey)
    }

    #[test]
    fn create_then_resolve_reproduces_document() {
        let ledger = DummyLedger::new();
        let (doc, _) = publish_create(&ledger);
        let did = doc.subject().expect("subject").clone();

        let request = json!({
            "method": "did_resolveDID",
            "params": [{"did": did.to_string(), "all": false}],
            "id": "nonce",
        })
        .to_string();
        let response = ledger.resolve(&request).expect("resolve");
        let value: Value = serde_json::from_str(&response).expect("json");

        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["result"]["status"], 0);
        let payload = value["result"]["transaction"][0]["operation"]["payload"]
            .as_str()
            .expect("payload");
        let raw = crypto::base64url::decode(payload).expect("decode");
        assert_eq!(String::from_utf8(raw).expect("utf8"), doc.to_json().expect("json"));
    }

    #[test]
    fn duplicate_create_rejected_and_state_unchanged() {
        let ledger = DummyLedger::new();
        let store = MemStore::shared();
        let (doc, _) = test_utils::published_document_in(&store, test_utils::STOREPASS);
        let signkey = doc.default_public_key().expect("key").id.clone();
        let envelope = DidRequest::create(&doc, &signkey, test_utils::STOREPASS).expect("sign");

        ledger.create_id_transaction(&envelope, "").expect("admit");
        let before = ledger.len();
        let err = ledger.create_id_transaction(&envelope, "").expect_err("rejected");
        assert!(err.is(Kind::TransactionError));
        assert!(err.reason().contains("already exists"));
        assert_eq!(ledger.len(), before);
    }

    #[test]
    fn unknown_did_is_not_found() {
        let ledger = DummyLedger::new();
        let request = json!({
            "method": "did_resolveDID",
            "params": [{"did": "did:elastos:iNobodyHome", "all": false}],
            "id": "n",
        })
        .to_string();
        let value: Value =
            serde_json::from_str(&ledger.resolve(&request).expect("resolve")).expect("json");
        assert_eq!(value["result"]["status"], 3);
        assert!(value["result"].get("transaction").is_none());
    }

    #[test]
    fn unsupported_method_prefix_is_an_rpc_error() {
        let ledger = DummyLedger::new();
        let request = json!({
            "method": "did_resolveDID",
            "params": [{"did": "did:example:abc", "all": false}],
            "id": "n",
        })
        .to_string();
        let value: Value =
            serde_json::from_str(&ledger.resolve(&request).expect("resolve")).expect("json");
        assert!(value["result"].is_null());
        assert_eq!(value["error"]["code"], -32602);
    }

    #[test]
    fn unknown_rpc_method_is_an_error() {
        let ledger = DummyLedger::new();
        let request =
            json!({"method": "did_burnItDown", "params": [{}], "id": "n"}).to_string();
        let value: Value =
            serde_json::from_str(&ledger.resolve(&request).expect("resolve")).expect("json");
        assert_eq!(value["error"]["code"], -32601);
    }

    #[test]
    fn reset_clears_state() {
        let ledger = DummyLedger::new();
        publish_create(&ledger);
        assert!(!ledger.is_empty());
        ledger.reset();
        assert!(ledger.is_empty());
    }
}
