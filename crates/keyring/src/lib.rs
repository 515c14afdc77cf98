//! # eladid keyring
//!
//! The production side of the store contract: documents and metadata as
//! JSON on disk, private keys sealed with AES-256-GCM under a key derived
//! from the store passphrase, and a hierarchical-deterministic root
//! identity that turns a mnemonic sentence into DID keys.

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

mod filestore;
mod identity;

pub use filestore::FileStore;
pub use identity::RootIdentity;
