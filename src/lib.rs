//! # Elastos DID
//!
//! Client-side runtime of the Elastos DID method: build, sign and validate
//! the DID and credential operations anchored on the EID sidechain, and
//! resolve DIDs and verifiable credentials with a self-verifying
//! transaction history.
//!
//! The [`backend::Backend`] context is the entry point: construct one over
//! a [`ledger::Ledger`] adapter (the in-process [`ledger::DummyLedger`] or
//! the JSON-RPC [`ledger::HttpLedger`]) and call its publish and resolve
//! verbs.

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

pub mod backend;
pub mod canon;
pub mod credential;
pub mod crypto;
pub mod did;
pub mod document;
pub mod error;
pub mod ledger;
pub mod request;
pub mod resolve;
pub mod store;
pub mod test_utils;
pub mod ticket;
pub mod validate;

pub use backend::{Backend, LocalResolveHandle, DEFAULT_TTL_MS};
pub use credential::{Credential, CredentialBuilder};
pub use did::{Did, DidUrl};
pub use document::{DidDocument, DocumentBuilder, DocumentMetadata, PublicKey};
pub use error::Error;
pub use ledger::{DummyLedger, HttpLedger, Ledger};
pub use request::{CredentialOperation, CredentialRequest, DidRequest, Operation};
pub use resolve::{
    CredentialBiography, CredentialStatus, DidBiography, DidStatus, ResolverCache,
};
pub use store::DidStore;
pub use ticket::TransferTicket;
pub use validate::DocumentSource;

/// Result type used across the SDK.
pub type Result<T, E = error::Error> = core::result::Result<T, E>;
