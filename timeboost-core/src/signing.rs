// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! Prefixed-message ECDSA signing shared by bids and express-lane submissions.
//!
//! Messages are hashed as `keccak256("\x19Ethereum Signed Message:\n" + len + message)`,
//! so a signature produced here can never be replayed as a raw transaction signature.

use alloy_primitives::{Address, B256, Signature, eip191_hash_message, hex};
use k256::ecdsa::SigningKey;
use thiserror::Error;

pub const SIGNATURE_BYTES: usize = 65;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SigningError {
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),
    #[error("signing failed: {0}")]
    Signing(String),
}

pub fn signing_hash(message: &[u8]) -> B256 {
    eip191_hash_message(message)
}

/// Signs `message` as a personal message. The returned signature encodes `v` as 27/28.
pub fn sign_message(key: &SigningKey, message: &[u8]) -> Result<Signature, SigningError> {
    sign_prehash(key, &signing_hash(message))
}

pub fn sign_prehash(key: &SigningKey, prehash: &B256) -> Result<Signature, SigningError> {
    let (signature, recovery_id) = key
        .sign_prehash_recoverable(prehash.as_slice())
        .map_err(|err| SigningError::Signing(err.to_string()))?;
    Ok(Signature::from_signature_and_parity(
        signature,
        recovery_id.is_y_odd(),
    ))
}

/// Recovers the address that signed `message`. Malformed input yields
/// [`SigningError::InvalidSignature`].
pub fn recover_signer(message: &[u8], signature: &[u8]) -> Result<Address, SigningError> {
    if signature.len() != SIGNATURE_BYTES {
        return Err(SigningError::InvalidSignature(format!(
            "signature must be {SIGNATURE_BYTES} bytes, got {}",
            signature.len()
        )));
    }
    let v = signature[SIGNATURE_BYTES - 1];
    if !matches!(v, 0 | 1 | 27 | 28) {
        return Err(SigningError::InvalidSignature(format!(
            "recovery id must be 0, 1, 27 or 28, got {v}"
        )));
    }
    let signature = Signature::from_raw(signature)
        .map_err(|err| SigningError::InvalidSignature(err.to_string()))?;
    signature
        .recover_address_from_prehash(&signing_hash(message))
        .map_err(|err| SigningError::InvalidSignature(err.to_string()))
}

pub fn address_of(key: &SigningKey) -> Address {
    let verifying = key.verifying_key().to_encoded_point(false);
    Address::from_raw_public_key(&verifying.as_bytes()[1..])
}

/// Parses a hex private key, with or without `0x` prefix.
pub fn parse_private_key(value: &str) -> Result<SigningKey, SigningError> {
    let trimmed = value.trim();
    let bytes =
        hex::decode(trimmed).map_err(|err| SigningError::InvalidPrivateKey(err.to_string()))?;
    SigningKey::from_slice(&bytes).map_err(|err| SigningError::InvalidPrivateKey(err.to_string()))
}
