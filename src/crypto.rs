//! # Crypto primitives
//!
//! ECDSA over secp256r1 with SHA-256 pre-hash, the Base58/Base64URL codecs,
//! and the DID id-string fingerprint derivation. Signatures are the raw
//! 64-byte `r || s` form; DER never crosses this module's boundary.

use base64ct::{Base64UrlUnpadded, Encoding};
use p256::ecdsa::signature::{DigestSigner, DigestVerifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::{rngs::StdRng, Rng, SeedableRng};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use crate::error::Kind;
use crate::{tracerr, Result};

/// Length of a raw `r || s` signature in bytes.
pub const SIGNATURE_BYTES: usize = 64;

/// Length of a private key in bytes.
pub const PRIVATE_KEY_BYTES: usize = 32;

/// Length of a compressed SEC1 public key in bytes.
pub const PUBLIC_KEY_BYTES: usize = 33;

/// Length of a ledger transaction id in characters.
pub const TXID_LEN: usize = 32;

const ALNUM: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Generate a fresh secp256r1 private key.
#[must_use]
pub fn generate_private_key() -> Vec<u8> {
    let sk = SigningKey::random(&mut OsRng);
    sk.to_bytes().to_vec()
}

/// Derive the compressed public key for a private key.
///
/// # Errors
///
/// * `InvalidArgs` if the bytes are not a valid scalar.
pub fn public_key_from_private(private_key: &[u8]) -> Result<Vec<u8>> {
    let sk = match SigningKey::from_slice(private_key) {
        Ok(sk) => sk,
        Err(e) => tracerr!(Kind::InvalidArgs, "invalid private key: {}", e),
    };
    Ok(sk.verifying_key().to_encoded_point(true).as_bytes().to_vec())
}

/// Sign `msg` with SHA-256 pre-hash, returning the 64-byte `r || s` form.
///
/// # Errors
///
/// * `InvalidArgs` if the private key bytes are not a valid scalar.
pub fn sign(private_key: &[u8], msg: &[u8]) -> Result<Vec<u8>> {
    let sk = match SigningKey::from_slice(private_key) {
        Ok(sk) => sk,
        Err(e) => tracerr!(Kind::InvalidArgs, "invalid private key: {}", e),
    };
    let sig: Signature = sk.sign_digest(Sha256::new_with_prefix(msg));
    Ok(sig.to_bytes().to_vec())
}

/// Verify a 64-byte signature over `msg` against a SEC1 public key.
///
/// # Errors
///
/// * `InvalidArgs` on a malformed key or signature.
/// * `ResolveError` when the signature does not verify.
pub fn verify(public_key: &[u8], msg: &[u8], sig: &[u8]) -> Result<()> {
    let vk = match VerifyingKey::from_sec1_bytes(public_key) {
        Ok(vk) => vk,
        Err(e) => tracerr!(Kind::InvalidArgs, "invalid public key: {}", e),
    };
    let sig = match Signature::from_slice(sig) {
        Ok(sig) => sig,
        Err(e) => tracerr!(Kind::InvalidArgs, "invalid signature encoding: {}", e),
    };
    match vk.verify_digest(Sha256::new_with_prefix(msg), &sig) {
        Ok(()) => Ok(()),
        Err(e) => tracerr!(Kind::ResolveError, "signature verification failed: {}", e),
    }
}

/// SHA-256 of `data`.
#[must_use]
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Derive the method-specific id-string for a public key:
/// `Base58(fingerprint || checksum)` where the fingerprint is
/// `RIPEMD160(SHA256(key))` and the checksum the first four bytes of the
/// double SHA-256 of the fingerprint. Must stay bit-exact for compatibility
/// with identifiers already on chain.
#[must_use]
pub fn id_string(public_key: &[u8]) -> String {
    let fingerprint: [u8; 20] = Ripemd160::digest(sha256(public_key)).into();
    let check = sha256(&sha256(&fingerprint));
    let mut body = fingerprint.to_vec();
    body.extend_from_slice(&check[..4]);
    base58::encode(&body)
}

/// Random 32-character alphanumeric token, used for ledger txids and
/// JSON-RPC request nonces.
#[must_use]
pub fn rand_txid() -> String {
    let mut rng = StdRng::from_entropy();
    (0..TXID_LEN).map(|_| ALNUM[rng.gen_range(0..ALNUM.len())] as char).collect()
}

/// Base58 codec, Bitcoin alphabet, no checksum. The id-string derivation
/// step owns the checksum.
pub mod base58 {
    use crate::error::Kind;
    use crate::{tracerr, Result};

    /// Encode bytes to Base58.
    #[must_use]
    pub fn encode(data: &[u8]) -> String {
        bs58::encode(data).into_string()
    }

    /// Decode a Base58 string.
    ///
    /// # Errors
    ///
    /// * `InvalidArgs` on characters outside the alphabet.
    pub fn decode(data: &str) -> Result<Vec<u8>> {
        match bs58::decode(data).into_vec() {
            Ok(v) => Ok(v),
            Err(e) => tracerr!(Kind::InvalidArgs, "invalid base58: {}", e),
        }
    }
}

/// Base64URL codec without padding, used for request payloads and tickets.
pub mod base64url {
    use base64ct::{Base64UrlUnpadded, Encoding};

    use crate::error::Kind;
    use crate::{tracerr, Result};

    /// Encode bytes to unpadded Base64URL.
    #[must_use]
    pub fn encode(data: &[u8]) -> String {
        Base64UrlUnpadded::encode_string(data)
    }

    /// Decode an unpadded Base64URL string.
    ///
    /// # Errors
    ///
    /// * `MalformedRequest` on invalid input.
    pub fn decode(data: &str) -> Result<Vec<u8>> {
        match Base64UrlUnpadded::decode_vec(data) {
            Ok(v) => Ok(v),
            Err(e) => tracerr!(Kind::MalformedRequest, "invalid base64url: {}", e),
        }
    }
}

/// Decode a base58 public key and verify in one step. Keys on documents are
/// carried in base58.
///
/// # Errors
///
/// Same as [`verify`], plus `InvalidArgs` on a bad base58 key.
pub fn verify_base58(public_key_base58: &str, msg: &[u8], sig: &[u8]) -> Result<()> {
    let key = base58::decode(public_key_base58)?;
    verify(&key, msg, sig)
}

/// Encode a signature for an envelope or proof field.
#[must_use]
pub fn encode_signature(sig: &[u8]) -> String {
    Base64UrlUnpadded::encode_string(sig)
}

/// Decode a signature from an envelope or proof field.
///
/// # Errors
///
/// * `MalformedRequest` on bad encoding or wrong length.
pub fn decode_signature(sig: &str) -> Result<Vec<u8>> {
    let raw = base64url::decode(sig)?;
    if raw.len() != SIGNATURE_BYTES {
        tracerr!(
            Kind::MalformedRequest,
            "signature must be {} bytes, got {}",
            SIGNATURE_BYTES,
            raw.len()
        );
    }
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_round_trip() {
        let sk = generate_private_key();
        let pk = public_key_from_private(&sk).expect("derive public key");
        assert_eq!(pk.len(), PUBLIC_KEY_BYTES);

        let msg = b"did:elastos:testing";
        let sig = sign(&sk, msg).expect("sign");
        verify(&pk, msg, &sig).expect("verify");
        assert!(verify(&pk, b"did:elastos:tampered", &sig).is_err());
    }

    #[test]
    fn verify_rejects_wrong_key() {
        let sk = generate_private_key();
        let other = public_key_from_private(&generate_private_key()).expect("derive");
        let sig = sign(&sk, b"message").expect("sign");
        assert!(verify(&other, b"message", &sig).is_err());
    }

    #[test]
    fn base58_inverse() {
        for data in [&b""[..], &b"\x00\x00hello"[..], &[0xffu8; 40][..]] {
            let enc = base58::encode(data);
            assert_eq!(base58::decode(&enc).expect("decode"), data);
        }
        assert!(base58::decode("0OIl").is_err());
    }

    #[test]
    fn base64url_inverse() {
        for data in [&b""[..], &b"f"[..], &b"fo"[..], &b"foob"[..], &[0u8, 255, 7][..]] {
            let enc = base64url::encode(data);
            assert!(!enc.contains('='));
            assert_eq!(base64url::decode(&enc).expect("decode"), data);
        }
    }

    #[test]
    fn id_string_is_deterministic() {
        let pk = public_key_from_private(&generate_private_key()).expect("derive");
        let a = id_string(&pk);
        let b = id_string(&pk);
        assert_eq!(a, b);
        // 20-byte fingerprint plus 4-byte checksum
        assert_eq!(base58::decode(&a).expect("decode").len(), 24);
    }

    #[test]
    fn txid_shape() {
        let txid = rand_txid();
        assert_eq!(txid.len(), TXID_LEN);
        assert!(txid.bytes().all(|b| b.is_ascii_alphanumeric()));
    }

    #[test]
    fn signature_codec() {
        let sk = generate_private_key();
        let sig = sign(&sk, b"x").expect("sign");
        let enc = encode_signature(&sig);
        assert_eq!(decode_signature(&enc).expect("decode"), sig);
        assert!(decode_signature("AAAA").is_err());
    }
}
