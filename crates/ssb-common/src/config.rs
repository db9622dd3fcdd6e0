//! Peer configuration.
//!
//! Configuration is read from an optional TOML file; the `ssb` binary then
//! overrides individual fields from command-line arguments and `SSB_*`
//! environment variables.
//!
//! ```toml
//! network_key = "1KHLiKZvAvjbY1ziZEHMXawbCEIM6qwjCDm3VYRan/s="
//! connect_timeout_secs = 10
//! handshake_timeout_secs = 10
//! identity = "/home/me/.ssb/secret"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};

/// Network identifier of the main Scuttlebutt network.
pub const MAIN_NETWORK_KEY: &str = "1KHLiKZvAvjbY1ziZEHMXawbCEIM6qwjCDm3VYRan/s=";

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// Settings shared by every connection a peer makes or accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Base64 network identifier (32 bytes once decoded).
    pub network_key: String,

    /// Upper bound on TCP connect.
    pub connect_timeout_secs: u64,

    /// Upper bound on the whole four-message handshake.
    pub handshake_timeout_secs: u64,

    /// Path of the local identity seed file.
    pub identity: Option<PathBuf>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            network_key: MAIN_NETWORK_KEY.to_string(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            handshake_timeout_secs: DEFAULT_HANDSHAKE_TIMEOUT_SECS,
            identity: None,
        }
    }
}

impl PeerConfig {
    /// Loads configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("loading configuration from {}", path.display());

        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(Error::serialization)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.network_key_bytes()?;
        if self.connect_timeout_secs == 0 {
            return Err(Error::config("connect_timeout_secs must be non-zero"));
        }
        if self.handshake_timeout_secs == 0 {
            return Err(Error::config("handshake_timeout_secs must be non-zero"));
        }
        Ok(())
    }

    /// Decoded network identifier.
    pub fn network_key_bytes(&self) -> Result<[u8; 32]> {
        decode_key32(&self.network_key)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

/// Decodes standard base64 into exactly 32 bytes.
pub fn decode_key32(encoded: &str) -> Result<[u8; 32]> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::key(format!("invalid base64: {e}")))?;

    bytes
        .try_into()
        .map_err(|b: Vec<u8>| Error::key(format!("expected 32 bytes, got {}", b.len())))
}
