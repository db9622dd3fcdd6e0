//! Secure channel for Scuttlebutt peers.
//!
//! This crate provides:
//! - Ed25519 identities, feed ids and network keys
//! - The four-message secret handshake, client and server side
//! - Per-direction session keys and nonce counters
//! - Box-stream encrypted framing over any tokio byte stream
//!
//! # Design
//!
//! The handshake authenticates both peers with their long-term Ed25519 keys,
//! proves that both belong to the same network (a shared 32-byte key), and
//! agrees fresh keys from ephemeral X25519 exchanges, so a later key leak
//! does not expose recorded sessions.
//!
//! The transport is assumed reliable and ordered (TCP). Nonces are implicit
//! counters; a lost or reordered box breaks the stream for good.

#![forbid(unsafe_code)]

pub mod box_stream;
pub mod handshake;
pub mod identity;
pub mod primitives;
pub mod session;

pub use box_stream::{BoxReader, BoxStreamError, BoxWriter, MAX_MESSAGE_LEN};
pub use handshake::{
    client_handshake, server_handshake, ClientHandshake, HandshakeConfig, HandshakeError,
    HandshakeOutcome, ServerHandshake,
};
pub use identity::{FeedId, IdentityKeypair, NetworkKey, PublicIdentity};
pub use session::{Nonce, SessionContext};
