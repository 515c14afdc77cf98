//! # Resolution
//!
//! Result parsing, biography reconstruction and the on-disk resolver
//! cache. The orchestration itself lives on [`crate::backend::Backend`].

pub mod cache;
pub mod result;

pub use cache::ResolverCache;
pub use result::{
    CredentialBiography, CredentialStatus, CredentialTransaction, DidBiography, DidStatus,
    DidTransaction, ResolveResult,
};
