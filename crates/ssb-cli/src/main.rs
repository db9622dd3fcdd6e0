//! ssb CLI: identity keys, client sessions and a minimal RPC server.

#![forbid(unsafe_code)]

mod client;
mod server;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ssb_common::PeerConfig;
use ssb_crypto::handshake::HandshakeConfig;
use ssb_crypto::identity::{FeedId, IdentityKeypair, NetworkKey, PublicIdentity};
use tracing::warn;

#[derive(Parser, Debug)]
#[command(name = "ssb")]
#[command(about = "Scuttlebutt secret-handshake peer tools")]
struct Args {
    #[command(flatten)]
    peer: PeerArgs,

    #[command(subcommand)]
    command: Command,
}

/// Settings shared by `connect` and `serve`. Each one overrides the
/// matching field of the config file.
#[derive(clap::Args, Debug, Default)]
struct PeerArgs {
    /// TOML configuration file
    #[arg(long, global = true, env = "SSB_CONFIG")]
    config: Option<PathBuf>,

    /// Network key (base64, 32 bytes)
    #[arg(long, global = true, env = "SSB_NETWORK_KEY")]
    network_key: Option<String>,

    /// Identity seed file written by `keygen`
    #[arg(long, global = true, env = "SSB_IDENTITY")]
    identity: Option<PathBuf>,

    /// TCP connect timeout in seconds
    #[arg(long, global = true, env = "SSB_CONNECT_TIMEOUT")]
    connect_timeout: Option<u64>,

    /// Handshake timeout in seconds
    #[arg(long, global = true, env = "SSB_HANDSHAKE_TIMEOUT")]
    handshake_timeout: Option<u64>,
}

impl PeerArgs {
    fn resolve(&self) -> Result<PeerConfig> {
        let mut config = match &self.config {
            Some(path) => PeerConfig::load(path)?,
            None => PeerConfig::default(),
        };

        if let Some(key) = &self.network_key {
            config.network_key = key.clone();
        }
        if let Some(path) = &self.identity {
            config.identity = Some(path.clone());
        }
        if let Some(secs) = self.connect_timeout {
            config.connect_timeout_secs = secs;
        }
        if let Some(secs) = self.handshake_timeout {
            config.handshake_timeout_secs = secs;
        }

        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a new Ed25519 identity keypair
    Keygen {
        /// Output file path (without extension)
        #[arg(short, long, default_value = "ssb")]
        output: String,
    },

    /// Show the feed id of a public key file
    ShowId {
        /// Public key file path
        #[arg(short, long)]
        key: PathBuf,
    },

    /// Connect to a peer and follow its feed
    Connect {
        /// Peer address (host:port)
        #[arg(short, long)]
        addr: String,

        /// Peer's public key (feed id or bare base64)
        #[arg(short, long)]
        remote_key: String,
    },

    /// Accept handshakes and answer RPC requests
    Serve {
        /// Listen address
        #[arg(short, long, default_value = "127.0.0.1:8008")]
        listen: String,

        /// Only accept these clients (feed ids); repeatable
        #[arg(long = "allow")]
        allow: Vec<String>,
    },

    /// Show version information
    Version,
}

/// Everything a session needs, resolved from config, flags and environment.
pub(crate) struct Peer {
    pub identity: IdentityKeypair,
    pub network_key: NetworkKey,
    pub config: PeerConfig,
}

impl Peer {
    fn from_config(config: PeerConfig) -> Result<Self> {
        let network_key = NetworkKey::from_bytes(config.network_key_bytes()?);
        let identity = match &config.identity {
            Some(path) => IdentityKeypair::load(path)?,
            None => {
                let identity = IdentityKeypair::generate();
                warn!("no identity configured, using throwaway {}", identity.feed_id());
                identity
            }
        };
        Ok(Self {
            identity,
            network_key,
            config,
        })
    }

    pub fn handshake_config(&self) -> HandshakeConfig {
        HandshakeConfig::default().with_timeout(self.config.handshake_timeout())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    ssb_common::init_tracing();

    let args = Args::parse();

    match args.command {
        Command::Keygen { output } => {
            println!("Generating Ed25519 keypair...");

            let keypair = IdentityKeypair::generate();
            let private_path = format!("{output}.key");
            let public_path = format!("{output}.pub");
            keypair.save(&private_path, &public_path)?;

            println!("Private key: {private_path}");
            println!("Public key:  {public_path}");
            println!("Feed ID:     {}", keypair.feed_id());
        }
        Command::ShowId { key } => {
            let public = IdentityKeypair::load_public(&key)?;
            println!("{}", public.feed_id());
        }
        Command::Connect { addr, remote_key } => {
            let remote = PublicIdentity::parse(&remote_key)
                .with_context(|| format!("invalid remote key {remote_key}"))?;
            let peer = Peer::from_config(args.peer.resolve()?)?;
            client::run(&peer, &addr, remote).await?;
        }
        Command::Serve { listen, allow } => {
            let peer = Peer::from_config(args.peer.resolve()?)?;
            let mut handshake = peer.handshake_config();
            for id in &allow {
                let id = FeedId::parse(id).with_context(|| format!("invalid --allow {id}"))?;
                handshake = handshake.allow_client(id);
            }
            server::run(peer, &listen, handshake).await?;
        }
        Command::Version => {
            println!("ssb {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
