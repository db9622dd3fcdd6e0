//! Per-direction session state produced by the handshake.
//!
//! Each direction of a connection gets its own key and its own nonce
//! counter. The counter is a 24-byte big-endian integer; the box-stream
//! advances it by one for every header and every body it seals or opens, so
//! sender and receiver stay in lock-step as long as no message is lost.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::primitives::{KEY_LEN, NONCE_LEN};

/// 24-byte big-endian message counter.
#[derive(Clone, Copy, PartialEq, Eq, Zeroize)]
pub struct Nonce([u8; NONCE_LEN]);

impl Nonce {
    pub fn from_bytes(bytes: [u8; NONCE_LEN]) -> Self {
        Self(bytes)
    }

    /// Nonce from the leading bytes of a handshake authentication tag.
    pub(crate) fn from_prefix(bytes: &[u8]) -> Self {
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&bytes[..NONCE_LEN]);
        Self(nonce)
    }

    pub fn as_bytes(&self) -> &[u8; NONCE_LEN] {
        &self.0
    }

    /// Add one, carrying towards the most significant byte.
    ///
    /// Wraps to zero after 2^192 - 1, which a connection never reaches.
    pub(crate) fn increment(&mut self) {
        for byte in self.0.iter_mut().rev() {
            let (next, overflow) = byte.overflowing_add(1);
            *byte = next;
            if !overflow {
                break;
            }
        }
    }

    /// The value after [`Nonce::increment`], leaving `self` untouched.
    pub(crate) fn successor(&self) -> Self {
        let mut next = *self;
        next.increment();
        next
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Nonce(")?;
        for byte in &self.0[NONCE_LEN - 8..] {
            write!(f, "{byte:02x}")?;
        }
        f.write_str("…)")
    }
}

/// Symmetric key plus nonce counter for one direction of a connection.
///
/// Owned by exactly one box writer or box reader; only the owner advances
/// the nonce.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionContext {
    key: [u8; KEY_LEN],
    nonce: Nonce,
}

impl SessionContext {
    pub fn new(key: [u8; KEY_LEN], nonce: Nonce) -> Self {
        Self { key, nonce }
    }

    pub fn key(&self) -> &[u8; KEY_LEN] {
        &self.key
    }

    pub fn nonce(&self) -> &Nonce {
        &self.nonce
    }

    pub(crate) fn advance(&mut self) {
        self.nonce.increment();
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("key", &"<redacted>")
            .field("nonce", &self.nonce)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_carries() {
        let mut bytes = [0u8; NONCE_LEN];
        bytes[22] = 0x01;
        bytes[23] = 0xff;
        let mut nonce = Nonce::from_bytes(bytes);
        nonce.increment();

        let mut expected = [0u8; NONCE_LEN];
        expected[22] = 0x02;
        assert_eq!(nonce.as_bytes(), &expected);
    }

    #[test]
    fn test_increment_wraps() {
        let mut nonce = Nonce::from_bytes([0xff; NONCE_LEN]);
        nonce.increment();
        assert_eq!(nonce.as_bytes(), &[0u8; NONCE_LEN]);
    }

    #[test]
    fn test_successor_leaves_original() {
        let nonce = Nonce::from_bytes([0u8; NONCE_LEN]);
        let next = nonce.successor();
        assert_eq!(nonce.as_bytes()[23], 0);
        assert_eq!(next.as_bytes()[23], 1);
    }

    #[test]
    fn test_debug_redacts_key() {
        let ctx = SessionContext::new([0x42; KEY_LEN], Nonce::from_bytes([0u8; NONCE_LEN]));
        assert!(!format!("{ctx:?}").contains("42"));
    }
}
