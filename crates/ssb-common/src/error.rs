//! Common error types.

use std::fmt;

use thiserror::Error;

/// Result type alias using the shared error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification shared by every protocol layer.
///
/// Handshake, box-stream and RPC errors each report one of these through
/// their `kind()` accessor so callers can decide what a failure means for the
/// connection without matching on every layer's variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Transport connect/send/receive failure, including short reads and timeouts.
    Network,
    /// Tag, signature or symmetric decryption failure.
    Crypto,
    /// Malformed frame, unexpected end of stream mid-frame, unknown body type.
    Protocol,
}

impl ErrorKind {
    /// Whether an error of this kind leaves the connection unusable.
    ///
    /// Protocol errors are scoped to a single frame; the other kinds are not.
    pub fn is_fatal(self) -> bool {
        !matches!(self, ErrorKind::Protocol)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Network => "network",
            ErrorKind::Crypto => "crypto",
            ErrorKind::Protocol => "protocol",
        };
        f.write_str(name)
    }
}

/// Error type for configuration and local key material handling.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file, network, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed key material
    #[error("key error: {0}")]
    Key(String),
}

impl Error {
    /// Create a serialization error from any displayable type.
    pub fn serialization(msg: impl fmt::Display) -> Self {
        Self::Serialization(msg.to_string())
    }

    /// Create a config error from any displayable type.
    pub fn config(msg: impl fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }

    /// Create a key error from any displayable type.
    pub fn key(msg: impl fmt::Display) -> Self {
        Self::Key(msg.to_string())
    }
}
