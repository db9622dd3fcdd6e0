//! Ed25519 identity keys, feed ids and the network key.
//!
//! A **feed id** is the textual form of an Ed25519 public key:
//! `@` + standard base64 of the 32 key bytes + `.ed25519`.
//!
//! # Example
//!
//! ```
//! use ssb_crypto::identity::{FeedId, IdentityKeypair};
//!
//! let keypair = IdentityKeypair::generate();
//! let feed_id = keypair.feed_id();
//! assert!(feed_id.as_str().starts_with('@'));
//!
//! let signature = keypair.sign(b"challenge");
//! assert!(keypair.verify(b"challenge", &signature));
//!
//! let parsed = FeedId::parse(feed_id.as_str()).unwrap();
//! assert_eq!(parsed, feed_id);
//! ```

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use zeroize::Zeroize;

const FEED_ID_PREFIX: &str = "@";
const FEED_ID_SUFFIX: &str = ".ed25519";

/// Decoded form of [`ssb_common::MAIN_NETWORK_KEY`].
const MAIN_NETWORK_KEY: [u8; 32] = [
    0xd4, 0xa1, 0xcb, 0x88, 0xa6, 0x6f, 0x02, 0xf8, 0xdb, 0x63, 0x5c, 0xe2, 0x64, 0x41, 0xcc, 0x5d,
    0xac, 0x1b, 0x08, 0x42, 0x0c, 0xea, 0xac, 0x23, 0x08, 0x39, 0xb7, 0x55, 0x84, 0x5a, 0x9f, 0xfb,
];

/// Textual identity of a peer: `@<base64>.ed25519`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeedId(String);

impl FeedId {
    /// Create a feed id from raw public key bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self(format!(
            "{FEED_ID_PREFIX}{}{FEED_ID_SUFFIX}",
            STANDARD.encode(bytes)
        ))
    }

    /// Parse a feed id.
    ///
    /// Accepts the full `@….ed25519` form as well as the bare base64 key.
    pub fn parse(s: &str) -> Result<Self> {
        let bytes = decode_public_key(s)?;
        Ok(Self::from_bytes(&bytes))
    }

    /// Get the raw public key bytes.
    pub fn to_bytes(&self) -> Result<[u8; 32]> {
        decode_public_key(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FeedId({})", self.0)
    }
}

fn decode_public_key(s: &str) -> Result<[u8; 32]> {
    let s = s.trim();
    let encoded = s.strip_prefix(FEED_ID_PREFIX).unwrap_or(s);
    let encoded = encoded.strip_suffix(FEED_ID_SUFFIX).unwrap_or(encoded);

    let bytes = STANDARD
        .decode(encoded)
        .context("invalid base64 encoding")?;

    bytes.try_into().map_err(|b: Vec<u8>| {
        anyhow::anyhow!("invalid public key length: expected 32 bytes, got {}", b.len())
    })
}

/// 32-byte network identifier shared by every peer of one network.
///
/// Used as the HMAC key that proves network membership during the first two
/// handshake messages, and mixed into every derived key.
#[derive(Clone, PartialEq, Eq, Zeroize)]
pub struct NetworkKey([u8; 32]);

impl NetworkKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The main Scuttlebutt network.
    pub fn main() -> Self {
        Self(MAIN_NETWORK_KEY)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for NetworkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NetworkKey({})", STANDARD.encode(self.0))
    }
}

/// Ed25519 identity keypair.
///
/// The signing key is zeroized on drop by `ed25519-dalek`.
pub struct IdentityKeypair {
    signing_key: SigningKey,
}

impl IdentityKeypair {
    /// Generate a new random keypair using the OS CSPRNG.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Create from a 32-byte seed.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(bytes);
        Self { signing_key }
    }

    pub fn feed_id(&self) -> FeedId {
        FeedId::from_bytes(self.signing_key.verifying_key().as_bytes())
    }

    pub fn public(&self) -> PublicIdentity {
        PublicIdentity {
            verifying_key: self.signing_key.verifying_key(),
        }
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        *self.signing_key.verifying_key().as_bytes()
    }

    /// Get the seed bytes.
    ///
    /// # Security
    /// Handle with care! These bytes can recreate the identity.
    pub fn private_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Verify a signature against this identity's public key.
    pub fn verify(&self, message: &[u8], signature: &[u8; 64]) -> bool {
        self.public().verify(message, signature)
    }

    /// Save keypair to files.
    ///
    /// Seed is saved with restricted permissions (0600 on Unix).
    pub fn save(&self, private_path: impl AsRef<Path>, public_path: impl AsRef<Path>) -> Result<()> {
        let (private_path, public_path) = (private_path.as_ref(), public_path.as_ref());
        let mut private_bytes = self.private_key_bytes();
        let written = fs::write(private_path, private_bytes);
        private_bytes.zeroize();
        written.with_context(|| format!("failed to write {}", private_path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(private_path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(private_path, perms)?;
        }

        fs::write(public_path, self.public_key_bytes())
            .with_context(|| format!("failed to write {}", public_path.display()))?;

        Ok(())
    }

    /// Load keypair from a seed file.
    pub fn load(private_path: impl AsRef<Path>) -> Result<Self> {
        let private_path = private_path.as_ref();
        let mut bytes = fs::read(private_path)
            .with_context(|| format!("failed to read private key {}", private_path.display()))?;

        if bytes.len() != 32 {
            bytes.zeroize();
            anyhow::bail!("invalid private key length: expected 32 bytes");
        }

        let mut key_bytes = [0u8; 32];
        key_bytes.copy_from_slice(&bytes);
        bytes.zeroize();

        let keypair = Self::from_bytes(&key_bytes);
        key_bytes.zeroize();

        Ok(keypair)
    }

    /// Load only the public key (for verification).
    pub fn load_public(public_path: impl AsRef<Path>) -> Result<PublicIdentity> {
        let public_path = public_path.as_ref();
        let bytes = fs::read(public_path)
            .with_context(|| format!("failed to read public key {}", public_path.display()))?;

        let key_bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("invalid public key length: expected 32 bytes"))?;

        PublicIdentity::from_bytes(&key_bytes)
    }
}

impl fmt::Debug for IdentityKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityKeypair({})", self.feed_id())
    }
}

/// Public identity (verifying key only).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicIdentity {
    verifying_key: VerifyingKey,
}

impl PublicIdentity {
    /// Create from raw public key bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let verifying_key = VerifyingKey::from_bytes(bytes).context("invalid public key")?;
        Ok(Self { verifying_key })
    }

    /// Parse a feed id or bare base64 key.
    pub fn parse(s: &str) -> Result<Self> {
        Self::from_bytes(&decode_public_key(s)?)
    }

    pub fn feed_id(&self) -> FeedId {
        FeedId::from_bytes(self.verifying_key.as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.verifying_key.as_bytes()
    }

    pub(crate) fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    /// Verify a signature.
    pub fn verify(&self, message: &[u8], signature: &[u8; 64]) -> bool {
        let sig = Signature::from_bytes(signature);
        self.verifying_key.verify(message, &sig).is_ok()
    }
}

impl fmt::Debug for PublicIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicIdentity({})", self.feed_id())
    }
}
