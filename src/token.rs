//! Advertisement token codec and signature linker.
//!
//! A token travels inside a spendable output's locking condition as an
//! ordered field list `[protocol tag, identity key, domain, label,
//! signature]`, preceded by the Ed25519 public key that locks the output.
//! The trailing signature is computed over the concatenation of the other
//! fields and must verify against that locking key, so the party able to
//! spend the output is the party that signed the advertisement claim.
//!
//! This is the forgery-prevention boundary — everything here is pure and
//! side-effect-free so it can be fuzzed independently of storage and network
//! state.

use crate::{DiscoveryError, Result};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

/// Domain separation constant mixed into every token digest.
const TOKEN_SIGNING_DOMAIN: &[u8] = b"OVERLAY_ADVERTISEMENT_V1";

/// Field count of a complete advertisement token (four claims plus the
/// trailing signature).
pub const TOKEN_FIELD_COUNT: usize = 5;

/// Ed25519 public key length.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Ed25519 signature length.
pub const SIGNATURE_LEN: usize = 64;

/// Upper bound on a single encoded field. An advertisement carries a tag, a
/// key, a base URI, and a label; anything larger is not a token we emit.
const MAX_FIELD_LEN: u64 = 4096;

/// An opaque locking condition carrying an encoded token.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LockingScript(Vec<u8>);

/// A token decoded out of a [`LockingScript`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedToken {
    /// The public key the output's locking condition is bound to.
    pub locking_public_key: [u8; PUBLIC_KEY_LEN],
    /// The ordered field list, trailing signature included.
    pub fields: Vec<Vec<u8>>,
}

impl LockingScript {
    /// Wrap raw locking-condition bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Raw locking-condition bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Encode a field list locked to `locking_public_key`.
    ///
    /// Layout: the 32-byte key, a compact-size field count, then each field
    /// as compact-size length plus bytes.
    pub fn encode(locking_public_key: &[u8; PUBLIC_KEY_LEN], fields: &[Vec<u8>]) -> Self {
        let mut out = Vec::with_capacity(
            PUBLIC_KEY_LEN + 1 + fields.iter().map(|f| f.len() + 3).sum::<usize>(),
        );
        out.extend_from_slice(locking_public_key);
        write_compact(&mut out, fields.len() as u64);
        for field in fields {
            write_compact(&mut out, field.len() as u64);
            out.extend_from_slice(field);
        }
        Self(out)
    }

    /// Decode the embedded token.
    ///
    /// Fails with [`DiscoveryError::MalformedToken`] on truncated input,
    /// oversized fields, or trailing bytes — this locking condition is then
    /// simply not an advertisement token.
    pub fn decode(&self) -> Result<DecodedToken> {
        let bytes = &self.0;
        if bytes.len() < PUBLIC_KEY_LEN + 1 {
            return Err(DiscoveryError::MalformedToken(format!(
                "locking condition too short ({} bytes)",
                bytes.len()
            )));
        }
        let mut locking_public_key = [0u8; PUBLIC_KEY_LEN];
        locking_public_key.copy_from_slice(&bytes[..PUBLIC_KEY_LEN]);
        let mut pos = PUBLIC_KEY_LEN;

        let count = read_compact(bytes, &mut pos)?;
        if count == 0 || count > TOKEN_FIELD_COUNT as u64 {
            return Err(DiscoveryError::MalformedToken(format!(
                "unsupported field count {count}"
            )));
        }
        let mut fields = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let len = read_compact(bytes, &mut pos)?;
            if len > MAX_FIELD_LEN {
                return Err(DiscoveryError::MalformedToken(format!(
                    "field length {len} exceeds maximum"
                )));
            }
            let end = pos + len as usize;
            if end > bytes.len() {
                return Err(DiscoveryError::MalformedToken(
                    "field extends past end of locking condition".into(),
                ));
            }
            fields.push(bytes[pos..end].to_vec());
            pos = end;
        }
        if pos != bytes.len() {
            return Err(DiscoveryError::MalformedToken(format!(
                "{} trailing bytes after final field",
                bytes.len() - pos
            )));
        }
        Ok(DecodedToken {
            locking_public_key,
            fields,
        })
    }
}

/// Deterministic digest over a field list, domain-separated.
fn token_digest(fields: &[Vec<u8>]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(TOKEN_SIGNING_DOMAIN);
    for field in fields {
        hasher.update(field);
    }
    hasher.finalize().into()
}

/// Sign a field list, producing the trailing signature field.
pub fn sign_token_fields(signing_key: &SigningKey, fields: &[Vec<u8>]) -> Vec<u8> {
    let digest = token_digest(fields);
    signing_key.sign(&digest).to_bytes().to_vec()
}

/// Check that a token's trailing signature links `public_key` to the
/// preceding fields.
///
/// Returns `Ok(false)` on cryptographic mismatch — never an error. Fails with
/// [`DiscoveryError::MalformedToken`] only on structurally invalid input: a
/// truncated signature, a bad key length, or a field list too short to carry
/// a signature at all.
pub fn verify_token_linkage(public_key: &[u8], fields: &[Vec<u8>]) -> Result<bool> {
    let (signature, signed) = fields.split_last().ok_or_else(|| {
        DiscoveryError::MalformedToken("token has no fields to verify".into())
    })?;
    if signed.is_empty() {
        return Err(DiscoveryError::MalformedToken(
            "token has no signed fields".into(),
        ));
    }
    let sig_bytes: [u8; SIGNATURE_LEN] = signature.as_slice().try_into().map_err(|_| {
        DiscoveryError::MalformedToken(format!("signature is {} bytes", signature.len()))
    })?;
    let key_bytes: [u8; PUBLIC_KEY_LEN] = public_key.try_into().map_err(|_| {
        DiscoveryError::MalformedToken(format!("public key is {} bytes", public_key.len()))
    })?;
    let verifying_key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| DiscoveryError::MalformedToken(format!("invalid public key: {e}")))?;

    let digest = token_digest(signed);
    Ok(verifying_key
        .verify(&digest, &Signature::from_bytes(&sig_bytes))
        .is_ok())
}

fn write_compact(out: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => out.push(value as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(value as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
}

fn read_compact(bytes: &[u8], pos: &mut usize) -> Result<u64> {
    let truncated = || DiscoveryError::MalformedToken("truncated length prefix".into());
    let first = *bytes.get(*pos).ok_or_else(truncated)?;
    *pos += 1;
    let (width, value) = match first {
        0xfd => (2, None),
        0xfe => (4, None),
        0xff => (8, None),
        byte => (0, Some(byte as u64)),
    };
    if let Some(value) = value {
        return Ok(value);
    }
    let end = *pos + width;
    if end > bytes.len() {
        return Err(truncated());
    }
    let mut buf = [0u8; 8];
    buf[..width].copy_from_slice(&bytes[*pos..end]);
    *pos = end;
    Ok(u64::from_le_bytes(buf))
}
