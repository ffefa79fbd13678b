//! Ed25519 verkey <-> `did:key` conversion.

use crate::message::WireError;

/// Multicodec prefix of an Ed25519 public key.
const ED25519_MULTICODEC: [u8; 2] = [0xed, 0x01];

/// Prefix of a base58btc-encoded `did:key`.
const DID_KEY_PREFIX: &str = "did:key:z";

/// Convert a base58 Ed25519 verkey to `did:key:z6Mk…`.
pub fn verkey_to_did_key(verkey: &str) -> Result<String, WireError> {
    let raw = bs58::decode(verkey)
        .into_vec()
        .map_err(|e| WireError::InvalidKey(format!("{verkey}: {e}")))?;
    if raw.len() != 32 {
        return Err(WireError::InvalidKey(format!(
            "{verkey}: expected 32 bytes, got {}",
            raw.len()
        )));
    }
    let mut prefixed = Vec::with_capacity(34);
    prefixed.extend_from_slice(&ED25519_MULTICODEC);
    prefixed.extend_from_slice(&raw);
    Ok(format!("{DID_KEY_PREFIX}{}", bs58::encode(prefixed).into_string()))
}

/// Convert `did:key:z6Mk…` (optionally with a `#fragment`) back to a base58 verkey.
pub fn did_key_to_verkey(did_key: &str) -> Result<String, WireError> {
    let without_fragment = did_key.split('#').next().unwrap_or(did_key);
    let encoded = without_fragment
        .strip_prefix(DID_KEY_PREFIX)
        .ok_or_else(|| WireError::InvalidKey(format!("{did_key}: not a base58btc did:key")))?;
    let raw = bs58::decode(encoded)
        .into_vec()
        .map_err(|e| WireError::InvalidKey(format!("{did_key}: {e}")))?;
    if raw.len() != 34 || raw[..2] != ED25519_MULTICODEC {
        return Err(WireError::InvalidKey(format!("{did_key}: not an Ed25519 key")));
    }
    Ok(bs58::encode(&raw[2..]).into_string())
}

/// Routing keys may arrive as bare verkeys or already in DID form.
pub fn normalize_routing_key(key: &str) -> Result<String, WireError> {
    if key.split(':').count() == 3 {
        Ok(key.to_string())
    } else {
        verkey_to_did_key(key)
    }
}

/// Accept either form and return a base58 verkey.
pub fn to_verkey(key: &str) -> Result<String, WireError> {
    if key.starts_with("did:key:") {
        did_key_to_verkey(key)
    } else {
        Ok(key.to_string())
    }
}
