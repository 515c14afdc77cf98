//! # DID and DID URL
//!
//! Method-qualified identifiers, comparable by string equality on their
//! canonical form, and the DID URL variant used as an opaque key or
//! credential identifier.

use std::fmt::{self, Display, Write as _};
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::de;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::crypto;
use crate::error::Kind;
use crate::{tracerr, Error, Result};

/// The DID method this runtime speaks.
pub const METHOD: &str = "elastos";

/// Scheme prefix of every identifier this runtime accepts.
pub const PREFIX: &str = "did:elastos:";

/// Validation limit for a full DID string.
pub const MAX_DID_LEN: usize = 128;

fn id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9._-]+$").expect("invalid regex"))
}

/// A decentralized identifier: `did:elastos:<idstring>`. Immutable.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Did {
    id: String,
}

impl Did {
    /// Construct from a method-specific id-string.
    ///
    /// # Errors
    ///
    /// * `InvalidArgs` on an empty or over-long id-string, or characters
    ///   outside the method alphabet.
    pub fn new(id: &str) -> Result<Self> {
        if id.is_empty() {
            tracerr!(Kind::InvalidArgs, "empty id-string");
        }
        if PREFIX.len() + id.len() > MAX_DID_LEN {
            tracerr!(Kind::InvalidArgs, "id-string is too long");
        }
        if !id_regex().is_match(id) {
            tracerr!(Kind::InvalidArgs, "invalid id-string: {}", id);
        }
        Ok(Self { id: id.to_string() })
    }

    /// Derive a primitive DID from a compressed public key.
    #[must_use]
    pub fn from_key(public_key: &[u8]) -> Self {
        Self { id: crypto::id_string(public_key) }
    }

    /// The method-specific id-string.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The method name.
    #[must_use]
    pub fn method(&self) -> &str {
        METHOD
    }

    /// A DID URL addressing a fragment of this DID's document.
    #[must_use]
    pub fn url(&self, fragment: &str) -> DidUrl {
        DidUrl {
            did: self.clone(),
            path: None,
            query: None,
            fragment: Some(fragment.trim_start_matches('#').to_string()),
        }
    }
}

impl Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}{}", self.id)
    }
}

impl FromStr for Did {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let Some(id) = s.strip_prefix(PREFIX) else {
            if s.starts_with("did:") {
                tracerr!(Kind::Unsupported, "unsupported DID method: {}", s);
            }
            tracerr!(Kind::InvalidArgs, "not a DID: {}", s);
        };
        Self::new(id)
    }
}

impl Serialize for Did {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Did {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(de::Error::custom)
    }
}

/// A DID plus optional path, query and fragment. Used as an opaque key or
/// credential identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DidUrl {
    did: Did,
    path: Option<String>,
    query: Option<String>,
    fragment: Option<String>,
}

impl Default for DidUrl {
    // Deserialization always overwrites this; structural checks catch any
    // leak of the placeholder.
    fn default() -> Self {
        Self {
            did: Did { id: "invalid".to_string() },
            path: None,
            query: None,
            fragment: None,
        }
    }
}

impl DidUrl {
    /// Construct from parts.
    #[must_use]
    pub fn new(did: &Did, fragment: Option<&str>) -> Self {
        Self {
            did: did.clone(),
            path: None,
            query: None,
            fragment: fragment.map(|f| f.trim_start_matches('#').to_string()),
        }
    }

    /// Parse a DID URL. A bare `#fragment` is resolved against `context`.
    ///
    /// # Errors
    ///
    /// * `InvalidArgs` on malformed input or a bare fragment with no context.
    pub fn parse(s: &str, context: Option<&Did>) -> Result<Self> {
        if s.is_empty() {
            tracerr!(Kind::InvalidArgs, "empty DID URL");
        }
        if let Some(fragment) = s.strip_prefix('#') {
            let Some(did) = context else {
                tracerr!(Kind::InvalidArgs, "fragment-only DID URL without context: {}", s);
            };
            return Ok(did.url(fragment));
        }

        let (rest, fragment) = match s.split_once('#') {
            Some((r, f)) => (r, Some(f.to_string())),
            None => (s, None),
        };
        let (rest, query) = match rest.split_once('?') {
            Some((r, q)) => (r, Some(q.to_string())),
            None => (rest, None),
        };
        let (did_part, path) = match rest.split_once('/') {
            Some((r, p)) => (r, Some(format!("/{p}"))),
            None => (rest, None),
        };

        Ok(Self { did: Did::from_str(did_part)?, path, query, fragment })
    }

    /// The DID component.
    #[must_use]
    pub fn did(&self) -> &Did {
        &self.did
    }

    /// The fragment, without the leading `#`.
    #[must_use]
    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    /// True when this URL addresses a fragment of `did`'s document.
    #[must_use]
    pub fn owned_by(&self, did: &Did) -> bool {
        &self.did == did
    }
}

impl Display for DidUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.did)?;
        if let Some(path) = &self.path {
            f.write_str(path)?;
        }
        if let Some(query) = &self.query {
            write!(f, "?{query}")?;
        }
        if let Some(fragment) = &self.fragment {
            f.write_char('#')?;
            f.write_str(fragment)?;
        }
        Ok(())
    }
}

impl FromStr for DidUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s, None)
    }
}

impl Serialize for DidUrl {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DidUrl {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn did_round_trip() {
        let did = Did::from_str("did:elastos:iXKedNtkZfzxnnwrVkadDEMWOfmVkEfKeX")
            .expect("parse failed");
        assert_eq!(did.id(), "iXKedNtkZfzxnnwrVkadDEMWOfmVkEfKeX");
        assert_eq!(did.to_string(), "did:elastos:iXKedNtkZfzxnnwrVkadDEMWOfmVkEfKeX");
    }

    #[test]
    fn other_method_is_unsupported() {
        let err = Did::from_str("did:example:abc").expect_err("expected error");
        assert!(err.is(Kind::Unsupported));
        assert!(Did::from_str("elastos:abc").is_err());
        assert!(Did::from_str("did:elastos:").is_err());
    }

    #[test]
    fn key_derivation_matches_idstring() {
        let pk = crypto::public_key_from_private(&crypto::generate_private_key())
            .expect("derive key");
        let did = Did::from_key(&pk);
        assert_eq!(did.id(), crypto::id_string(&pk));
    }

    #[test]
    fn didurl_parts() {
        let url = DidUrl::from_str("did:elastos:abc/creds?service=x#primary").expect("parse");
        assert_eq!(url.did().id(), "abc");
        assert_eq!(url.fragment(), Some("primary"));
        assert_eq!(url.to_string(), "did:elastos:abc/creds?service=x#primary");
    }

    #[test]
    fn fragment_shorthand_needs_context() {
        let did = Did::new("abc").expect("new");
        let url = DidUrl::parse("#key1", Some(&did)).expect("parse");
        assert_eq!(url.to_string(), "did:elastos:abc#key1");
        assert!(DidUrl::parse("#key1", None).is_err());
    }

    #[test]
    fn serde_as_string() {
        let url = DidUrl::from_str("did:elastos:abc#primary").expect("parse");
        let json = serde_json::to_string(&url).expect("serialize");
        assert_eq!(json, "\"did:elastos:abc#primary\"");
        let back: DidUrl = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, url);
    }
}
