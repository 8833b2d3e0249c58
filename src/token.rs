// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Token Codec
//!
//! Reversible, deterministic transform between a raw credential and its
//! public identifier:
//!
//! ```text
//! public_id = base64url( iv || AES-256-GCM(key, iv, token) )
//! ```
//!
//! - The key is derived from the configured secret with Argon2id over a
//!   fixed salt. Determinism is the requirement here, not salt secrecy;
//!   the slow KDF runs once per codec construction and is cached for the
//!   process lifetime.
//! - The IV is the SHA-256 hash of the token truncated to 96 bits, so
//!   `encode` is a pure function of `(secret, token)` and can double as a
//!   lookup key, while IVs still never repeat across distinct tokens.
//! - Output is unpadded URL-safe base64, safe in URLs and checkout
//!   metadata.
//!
//! Decoding failure is always [`CodecError::Decode`], regardless of
//! whether the input was truncated, not base64, or failed tag
//! verification. Callers treat that single variant as "not meant for this
//! system"; every other variant is a hard fault.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use base64ct::{Base64UrlUnpadded, Encoding};
use sha2::{Digest, Sha256};

use crate::config::MIN_SECRET_LEN;
use crate::models::AccessToken;

/// Fixed KDF salt. Rotating the *secret* is the supported rotation path;
/// the salt only domain-separates this codec from other uses of the secret.
const CODEC_SALT: &[u8] = b"tollgate.codec.v1";

/// AES-GCM initialization vector length in bytes.
const IV_LEN: usize = 12;

/// GCM authentication tag length in bytes.
const TAG_LEN: usize = 16;

/// Argon2id parameters: 19 MiB, 2 iterations, 1 lane (OWASP baseline).
const KDF_MEMORY_KIB: u32 = 19 * 1024;
const KDF_ITERATIONS: u32 = 2;
const KDF_LANES: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("codec secret must be at least {MIN_SECRET_LEN} characters")]
    WeakSecret,

    #[error("key derivation failed")]
    KeyDerivation,

    #[error("encryption failed")]
    Encrypt,

    /// Malformed or forged public identifier. The only variant callers are
    /// allowed to swallow.
    #[error("public identifier is not a valid codec output")]
    Decode,
}

/// Deterministic credential <-> public identifier codec for one secret.
pub struct TokenCodec {
    key: [u8; 32],
}

impl TokenCodec {
    /// Derive the cipher key from `secret` (runs Argon2id once).
    pub fn new(secret: &str) -> Result<Self, CodecError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(CodecError::WeakSecret);
        }

        let params = Params::new(KDF_MEMORY_KIB, KDF_ITERATIONS, KDF_LANES, Some(32))
            .map_err(|_| CodecError::KeyDerivation)?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key = [0u8; 32];
        argon2
            .hash_password_into(secret.as_bytes(), CODEC_SALT, &mut key)
            .map_err(|_| CodecError::KeyDerivation)?;

        Ok(Self { key })
    }

    /// Encode a credential into its public identifier.
    ///
    /// Deterministic: the same token under the same secret always yields
    /// the identical string.
    pub fn encode(&self, token: &AccessToken) -> Result<String, CodecError> {
        let iv = derive_iv(token.as_str());
        let cipher = Aes256Gcm::new_from_slice(&self.key).map_err(|_| CodecError::Encrypt)?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&iv), token.as_str().as_bytes())
            .map_err(|_| CodecError::Encrypt)?;

        let mut blob = Vec::with_capacity(IV_LEN + ciphertext.len());
        blob.extend_from_slice(&iv);
        blob.extend_from_slice(&ciphertext);
        Ok(Base64UrlUnpadded::encode_string(&blob))
    }

    /// Decode a public identifier back into the credential it was built
    /// from, verifying the authentication tag.
    pub fn decode(&self, public_id: &str) -> Result<AccessToken, CodecError> {
        let blob = Base64UrlUnpadded::decode_vec(public_id).map_err(|_| CodecError::Decode)?;
        if blob.len() <= IV_LEN + TAG_LEN {
            return Err(CodecError::Decode);
        }
        let (iv, ciphertext) = blob.split_at(IV_LEN);

        let cipher = Aes256Gcm::new_from_slice(&self.key).map_err(|_| CodecError::Decode)?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(iv), ciphertext)
            .map_err(|_| CodecError::Decode)?;

        let token = String::from_utf8(plaintext).map_err(|_| CodecError::Decode)?;

        // The IV commits to the token; a mismatch means the blob was
        // spliced together from two valid outputs.
        if derive_iv(&token) != iv {
            return Err(CodecError::Decode);
        }

        Ok(AccessToken(token))
    }
}

impl Drop for TokenCodec {
    fn drop(&mut self) {
        self.key.fill(0);
    }
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec").finish_non_exhaustive()
    }
}

/// Per-token IV: SHA-256 of the token truncated to the GCM nonce length.
fn derive_iv(token: &str) -> [u8; IV_LEN] {
    let digest = Sha256::digest(token.as_bytes());
    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(&digest[..IV_LEN]);
    iv
}
