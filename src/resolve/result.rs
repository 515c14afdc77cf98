//! Resolve-result parsing and biography reconstruction. An RPC result body
//! becomes an ordered transaction history (newest first, as delivered);
//! counts and operations must agree with the claimed status before anything
//! else looks at the content.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::credential::Credential;
use crate::crypto;
use crate::did::{Did, DidUrl};
use crate::document::DidDocument;
use crate::error::Kind;
use crate::request::{CredentialOperation, CredentialRequest, DidRequest, Operation};
use crate::{tracerr, Result};

/// DID status as carried on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DidStatus {
    /// The DID resolves to a live document.
    Valid,
    /// Live, but the document's expiry has passed.
    Expired,
    /// Terminated by a deactivate transaction.
    Deactivated,
    /// Never anchored.
    NotFound,
}

impl DidStatus {
    /// Map the wire integer.
    ///
    /// # Errors
    ///
    /// * `MalformedResolveResponse` on an unknown code.
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(Self::Valid),
            1 => Ok(Self::Expired),
            2 => Ok(Self::Deactivated),
            3 => Ok(Self::NotFound),
            other => tracerr!(Kind::MalformedResolveResponse, "unknown DID status: {}", other),
        }
    }

    /// The wire integer.
    #[must_use]
    pub fn code(self) -> i64 {
        match self {
            Self::Valid => 0,
            Self::Expired => 1,
            Self::Deactivated => 2,
            Self::NotFound => 3,
        }
    }

    /// Expired still resolves; only deactivation and absence do not.
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(self, Self::Valid | Self::Expired)
    }
}

/// Credential status as carried on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialStatus {
    /// Declared and not revoked.
    Valid,
    /// Revoked by owner or issuer.
    Revoked,
    /// Never declared.
    NotFound,
}

impl CredentialStatus {
    /// Map the wire integer.
    ///
    /// # Errors
    ///
    /// * `MalformedResolveResponse` on an unknown code.
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(Self::Valid),
            2 => Ok(Self::Revoked),
            3 => Ok(Self::NotFound),
            other => {
                tracerr!(Kind::MalformedResolveResponse, "unknown credential status: {}", other)
            }
        }
    }

    /// The wire integer.
    #[must_use]
    pub fn code(self) -> i64 {
        match self {
            Self::Valid => 0,
            Self::Revoked => 2,
            Self::NotFound => 3,
        }
    }
}

/// One anchored DID transition.
#[derive(Clone, Debug)]
pub struct DidTransaction {
    /// Ledger transaction id, 32 characters.
    pub txid: String,
    /// Anchor time.
    pub timestamp: DateTime<Utc>,
    /// The admitted request.
    pub request: DidRequest,
}

impl DidTransaction {
    fn from_value(value: &Value) -> Result<Self> {
        let Some(txid) = value.get("txid").and_then(Value::as_str) else {
            tracerr!(Kind::MalformedResolveResponse, "transaction is missing txid");
        };
        if txid.len() != crypto::TXID_LEN {
            tracerr!(Kind::MalformedResolveResponse, "malformed txid: {}", txid);
        }
        let Some(timestamp) = value.get("timestamp").and_then(Value::as_str) else {
            tracerr!(Kind::MalformedResolveResponse, "transaction is missing timestamp");
        };
        let timestamp = DateTime::parse_from_rfc3339(timestamp)?.with_timezone(&Utc);
        let Some(operation) = value.get("operation") else {
            tracerr!(Kind::MalformedResolveResponse, "transaction is missing operation");
        };
        let request = DidRequest::from_json(&operation.to_string())?;
        Ok(Self { txid: txid.to_string(), timestamp, request })
    }
}

/// A parsed `did_resolveDID` result: subject, status and the transaction
/// list, newest first.
#[derive(Clone, Debug)]
pub struct ResolveResult {
    /// The resolved DID.
    pub did: Did,
    /// Claimed status, validated against the transactions.
    pub status: DidStatus,
    /// Newest-first transitions.
    pub txs: Vec<DidTransaction>,
}

impl ResolveResult {
    /// Parse and cross-check a result body. `all` marks a biography query,
    /// which returns the full history rather than the status-determined
    /// count.
    ///
    /// # Errors
    ///
    /// * `MalformedResolveResponse` on any structural or consistency
    ///   failure.
    pub fn from_value(value: &Value, requested: &Did, all: bool) -> Result<Self> {
        let Some(did) = value.get("did").and_then(Value::as_str) else {
            tracerr!(Kind::MalformedResolveResponse, "result is missing the did field");
        };
        if did != requested.to_string() {
            tracerr!(Kind::MalformedResolveResponse, "response is not for {}", requested);
        }
        let Some(code) = value.get("status").and_then(Value::as_i64) else {
            tracerr!(Kind::MalformedResolveResponse, "result is missing the status field");
        };
        let status = DidStatus::from_code(code)?;

        let mut txs = Vec::new();
        if let Some(items) = value.get("transaction") {
            let Some(items) = items.as_array() else {
                tracerr!(Kind::MalformedResolveResponse, "transaction field is not an array");
            };
            for item in items {
                let tx = DidTransaction::from_value(item)?;
                if tx.request.subject()? != requested {
                    tracerr!(Kind::MalformedResolveResponse, "transaction is not for {}", requested);
                }
                txs.push(tx);
            }
        }

        check_consistency(status, &txs, all)?;
        Ok(Self { did: requested.clone(), status, txs })
    }

    /// Reshape into a biography handed to callers.
    #[must_use]
    pub fn into_biography(self) -> DidBiography {
        let status = match self.status {
            DidStatus::Expired => DidStatus::Valid,
            other => other,
        };
        DidBiography { did: self.did, status, txs: self.txs }
    }
}

fn check_consistency(status: DidStatus, txs: &[DidTransaction], all: bool) -> Result<()> {
    match status {
        DidStatus::NotFound => {
            if !txs.is_empty() {
                tracerr!(Kind::MalformedResolveResponse, "NotFound status with transactions");
            }
            return Ok(());
        }
        DidStatus::Deactivated => {
            if (!all && txs.len() != 2) || txs.is_empty() {
                tracerr!(
                    Kind::MalformedResolveResponse,
                    "invalid DID biography, wrong transaction count"
                );
            }
            if txs[0].request.header.operation != Operation::Deactivate {
                tracerr!(Kind::MalformedResolveResponse, "invalid DID biography, wrong status");
            }
            if txs.len() > 1 && txs[1].request.header.operation == Operation::Deactivate {
                tracerr!(Kind::MalformedResolveResponse, "invalid DID biography, wrong status");
            }
        }
        DidStatus::Valid | DidStatus::Expired => {
            if (!all && txs.len() != 1) || txs.is_empty() {
                tracerr!(
                    Kind::MalformedResolveResponse,
                    "invalid DID biography, wrong transaction count"
                );
            }
            if txs[0].request.header.operation == Operation::Deactivate {
                tracerr!(Kind::MalformedResolveResponse, "invalid DID biography, wrong status");
            }
        }
    }
    Ok(())
}

/// The ordered history of one DID, newest first. The embedded documents are
/// handed out to the caller.
#[derive(Clone, Debug)]
pub struct DidBiography {
    /// The subject.
    pub did: Did,
    /// `NotFound`, `Valid` or `Deactivated`.
    pub status: DidStatus,
    /// Newest-first transitions.
    pub txs: Vec<DidTransaction>,
}

impl DidBiography {
    /// Transaction count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.txs.len()
    }

    /// True when the history is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    /// The document carried by transaction `index` (0 = newest).
    #[must_use]
    pub fn document_by_index(&self, index: usize) -> Option<&DidDocument> {
        self.txs.get(index).and_then(|tx| tx.request.doc.as_ref())
    }

    /// The txid of transaction `index` (0 = newest).
    #[must_use]
    pub fn txid_by_index(&self, index: usize) -> Option<&str> {
        self.txs.get(index).map(|tx| tx.txid.as_str())
    }
}

/// One anchored credential transition.
#[derive(Clone, Debug)]
pub struct CredentialTransaction {
    /// Ledger transaction id, 32 characters.
    pub txid: String,
    /// Anchor time.
    pub timestamp: DateTime<Utc>,
    /// The admitted request.
    pub request: CredentialRequest,
}

impl CredentialTransaction {
    fn from_value(value: &Value) -> Result<Self> {
        let Some(txid) = value.get("txid").and_then(Value::as_str) else {
            tracerr!(Kind::MalformedResolveResponse, "transaction is missing txid");
        };
        if txid.len() != crypto::TXID_LEN {
            tracerr!(Kind::MalformedResolveResponse, "malformed txid: {}", txid);
        }
        let Some(timestamp) = value.get("timestamp").and_then(Value::as_str) else {
            tracerr!(Kind::MalformedResolveResponse, "transaction is missing timestamp");
        };
        let timestamp = DateTime::parse_from_rfc3339(timestamp)?.with_timezone(&Utc);
        let Some(operation) = value.get("operation") else {
            tracerr!(Kind::MalformedResolveResponse, "transaction is missing operation");
        };
        let request = CredentialRequest::from_json(&operation.to_string())?;
        Ok(Self { txid: txid.to_string(), timestamp, request })
    }
}

/// The ordered history of one credential, newest first.
#[derive(Clone, Debug)]
pub struct CredentialBiography {
    /// The credential id.
    pub id: DidUrl,
    /// `NotFound`, `Valid` or `Revoked`.
    pub status: CredentialStatus,
    /// Newest-first transitions.
    pub txs: Vec<CredentialTransaction>,
}

impl CredentialBiography {
    /// Parse and cross-check a `did_resolveCredential` result body.
    ///
    /// # Errors
    ///
    /// * `MalformedResolveResponse` on any structural or consistency
    ///   failure.
    pub fn from_value(value: &Value, requested: &DidUrl) -> Result<Self> {
        let Some(id) = value.get("id").and_then(Value::as_str) else {
            tracerr!(Kind::MalformedResolveResponse, "result is missing the id field");
        };
        if id != requested.to_string() {
            tracerr!(Kind::MalformedResolveResponse, "response is not for {}", requested);
        }
        let Some(code) = value.get("status").and_then(Value::as_i64) else {
            tracerr!(Kind::MalformedResolveResponse, "result is missing the status field");
        };
        let status = CredentialStatus::from_code(code)?;

        let mut txs = Vec::new();
        if let Some(items) = value.get("transaction") {
            let Some(items) = items.as_array() else {
                tracerr!(Kind::MalformedResolveResponse, "transaction field is not an array");
            };
            for item in items {
                let tx = CredentialTransaction::from_value(item)?;
                if tx.request.credential_id()? != requested {
                    tracerr!(Kind::MalformedResolveResponse, "transaction is not for {}", requested);
                }
                txs.push(tx);
            }
        }

        match status {
            CredentialStatus::NotFound => {
                if !txs.is_empty() {
                    tracerr!(Kind::MalformedResolveResponse, "NotFound status with transactions");
                }
            }
            CredentialStatus::Valid => {
                if txs.len() != 1
                    || txs[0].request.header.operation != CredentialOperation::Declare
                {
                    tracerr!(
                        Kind::MalformedResolveResponse,
                        "invalid credential biography, wrong transaction count"
                    );
                }
            }
            CredentialStatus::Revoked => {
                if txs.is_empty()
                    || txs.len() > 2
                    || txs[0].request.header.operation != CredentialOperation::Revoke
                {
                    tracerr!(
                        Kind::MalformedResolveResponse,
                        "invalid credential biography, wrong status"
                    );
                }
            }
        }
        Ok(Self { id: requested.clone(), status, txs })
    }

    /// The declared credential carried in this history, if any.
    #[must_use]
    pub fn credential(&self) -> Option<&Credential> {
        self.txs.iter().find_map(|tx| tx.request.vc.as_ref())
    }
}
