//! Thin wrappers over the primitive crates, shaped the way the handshake and
//! box-stream use them.
//!
//! - `auth`: HMAC-SHA-512 truncated to 32 bytes (NaCl `crypto_auth`)
//! - `secretbox`: XSalsa20-Poly1305 with a detached 16-byte tag
//! - `sha256` over a concatenation of slices
//! - Ed25519 → X25519 conversion for long-term keys

use crypto_secretbox::aead::generic_array::GenericArray;
use crypto_secretbox::aead::{AeadInPlace, KeyInit};
use crypto_secretbox::XSalsa20Poly1305;
use ed25519_dalek::{SigningKey, VerifyingKey};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;
pub const TAG_LEN: usize = 16;
pub const AUTH_TAG_LEN: usize = 32;

type HmacSha512 = Hmac<Sha512>;

/// Authenticated decryption failed (wrong key, wrong nonce or tampered data).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("secretbox authentication failed")]
pub struct SecretBoxError;

fn hmac(key: &[u8; KEY_LEN], message: &[u8]) -> HmacSha512 {
    let mut mac =
        <HmacSha512 as Mac>::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(message);
    mac
}

/// Compute the 32-byte authentication tag of `message` under `key`.
pub fn auth(key: &[u8; KEY_LEN], message: &[u8]) -> [u8; AUTH_TAG_LEN] {
    let full = hmac(key, message).finalize().into_bytes();
    let mut tag = [0u8; AUTH_TAG_LEN];
    tag.copy_from_slice(&full[..AUTH_TAG_LEN]);
    tag
}

/// Constant-time check of a tag produced by [`auth`].
pub fn auth_verify(key: &[u8; KEY_LEN], message: &[u8], tag: &[u8; AUTH_TAG_LEN]) -> bool {
    hmac(key, message).verify_truncated_left(tag).is_ok()
}

/// SHA-256 of the concatenation of `parts`.
pub fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Encrypt `buffer` in place, returning the detached tag.
pub fn seal_detached(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    buffer: &mut [u8],
) -> Result<[u8; TAG_LEN], SecretBoxError> {
    let cipher = XSalsa20Poly1305::new(GenericArray::from_slice(key));
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(nonce), b"", buffer)
        .map_err(|_| SecretBoxError)?;
    Ok(tag.into())
}

/// Decrypt `buffer` in place after checking `tag`.
///
/// On failure the buffer contents are unspecified.
pub fn open_detached(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    buffer: &mut [u8],
    tag: &[u8; TAG_LEN],
) -> Result<(), SecretBoxError> {
    let cipher = XSalsa20Poly1305::new(GenericArray::from_slice(key));
    cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(nonce),
            b"",
            buffer,
            GenericArray::from_slice(tag),
        )
        .map_err(|_| SecretBoxError)
}

/// Combined-mode seal: `tag ‖ ciphertext`.
pub fn seal(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
) -> Result<Vec<u8>, SecretBoxError> {
    let mut out = vec![0u8; TAG_LEN + plaintext.len()];
    out[TAG_LEN..].copy_from_slice(plaintext);
    let tag = seal_detached(key, nonce, &mut out[TAG_LEN..])?;
    out[..TAG_LEN].copy_from_slice(&tag);
    Ok(out)
}

/// Combined-mode open of `tag ‖ ciphertext`.
pub fn open(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    sealed: &[u8],
) -> Result<Vec<u8>, SecretBoxError> {
    if sealed.len() < TAG_LEN {
        return Err(SecretBoxError);
    }
    let (tag, ciphertext) = sealed.split_at(TAG_LEN);
    let tag: [u8; TAG_LEN] = tag.try_into().map_err(|_| SecretBoxError)?;
    let mut plaintext = ciphertext.to_vec();
    open_detached(key, nonce, &mut plaintext, &tag)?;
    Ok(plaintext)
}

/// Montgomery form of an Ed25519 public key.
pub fn curve_public(key: &VerifyingKey) -> PublicKey {
    PublicKey::from(key.to_montgomery().to_bytes())
}

/// X25519 secret matching [`curve_public`] of the signing key's public half.
pub fn curve_secret(key: &SigningKey) -> StaticSecret {
    StaticSecret::from(key.to_scalar_bytes())
}
