//! Secret handshake: mutual authentication and session key agreement.
//!
//! Four fixed-size messages over a reliable ordered transport. The client
//! must already know the server's long-term public key; the server learns the
//! client's during the exchange.
//!
//! ```text
//! Client                                          Server
//!   |  hmac_N(a_pk) ‖ a_pk                   64 B    |  client hello
//!   |----------------------------------------------->|
//!   |  hmac_N(b_pk) ‖ b_pk                   64 B    |  server hello
//!   |<-----------------------------------------------|
//!   |  box[N‖ab‖aB](sig_A ‖ A_pk)           112 B    |  client auth
//!   |----------------------------------------------->|
//!   |  box[N‖ab‖aB‖Ab](sig_B)                80 B    |  server accept
//!   |<-----------------------------------------------|
//! ```
//!
//! Lowercase keys are ephemeral X25519 keys, uppercase are long-term Ed25519
//! identities (converted to X25519 for key agreement). In code the three
//! shared secrets are named after what they combine: `ee` = ab, `es` = aB,
//! `se` = Ab.
//!
//! Both directions get their own key and starting nonce:
//!
//! ```text
//! H2        = sha256(sha256(N ‖ ab ‖ aB ‖ Ab))
//! key(→ X)  = sha256(H2 ‖ X_pk)
//! nonce(→X) = first 24 bytes of X's hello hmac
//! ```
//!
//! [`ClientHandshake`] and [`ServerHandshake`] hold the per-message logic
//! without doing I/O; [`client_handshake`] and [`server_handshake`] drive
//! them over a tokio stream.

use std::collections::HashSet;
use std::io;
use std::time::Duration;

use rand::rngs::OsRng;
use ssb_common::ErrorKind;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::box_stream::{BoxReader, BoxWriter};
use crate::identity::{FeedId, IdentityKeypair, NetworkKey, PublicIdentity};
use crate::primitives::{
    auth, auth_verify, curve_public, curve_secret, open, seal, sha256, AUTH_TAG_LEN, NONCE_LEN,
};
use crate::session::{Nonce, SessionContext};

pub const CLIENT_HELLO_LEN: usize = 64;
pub const SERVER_HELLO_LEN: usize = 64;
pub const CLIENT_AUTH_LEN: usize = 112;
pub const SERVER_ACCEPT_LEN: usize = 80;

const SIGNATURE_LEN: usize = 64;
const PUBLIC_KEY_LEN: usize = 32;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Handshake boxes use a fixed nonce; each key is used exactly once.
const ZERO_NONCE: [u8; NONCE_LEN] = [0; NONCE_LEN];

/// Handshake errors.
///
/// Every failure is terminal for the connection attempt.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    #[error("handshake timed out")]
    Timeout,

    #[error("hello failed network authentication")]
    InvalidHello,

    #[error("key agreement produced a non-contributory secret")]
    WeakKeyAgreement,

    #[error("failed to seal handshake message")]
    Seal,

    #[error("client authentication could not be opened")]
    InvalidClientAuth,

    #[error("client signature does not verify")]
    InvalidClientSignature,

    #[error("client {0} is not authorized")]
    Unauthorized(FeedId),

    #[error("server accept could not be opened")]
    InvalidServerAccept,

    #[error("server signature does not verify")]
    InvalidServerSignature,

    #[error("handshake step out of order: {0}")]
    OutOfOrder(&'static str),
}

impl HandshakeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HandshakeError::Io(_) | HandshakeError::Timeout => ErrorKind::Network,
            HandshakeError::OutOfOrder(_) => ErrorKind::Protocol,
            _ => ErrorKind::Crypto,
        }
    }
}

/// Options for driving a handshake over a transport.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Bound on the whole exchange, all four messages included.
    pub timeout: Duration,

    /// Server side only: accept just these clients. `None` accepts any
    /// client that proves its identity.
    pub allowed_clients: Option<HashSet<FeedId>>,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            allowed_clients: None,
        }
    }
}

impl HandshakeConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn allow_client(mut self, client: FeedId) -> Self {
        self.allowed_clients
            .get_or_insert_with(HashSet::new)
            .insert(client);
        self
    }

    fn is_allowed(&self, client: &FeedId) -> bool {
        self.allowed_clients
            .as_ref()
            .map_or(true, |allowed| allowed.contains(client))
    }
}

/// Result of a successful handshake.
#[derive(Debug)]
pub struct HandshakeOutcome {
    /// Long-term identity of the peer.
    pub remote: PublicIdentity,
    /// Context for encrypting towards the peer.
    pub outbound: SessionContext,
    /// Context for decrypting what the peer sends.
    pub inbound: SessionContext,
}

impl HandshakeOutcome {
    /// Wrap the two transport halves in an encrypted duplex channel.
    pub fn into_box_stream<R, W>(self, reader: R, writer: W) -> (BoxReader<R>, BoxWriter<W>) {
        (
            BoxReader::new(reader, self.inbound),
            BoxWriter::new(writer, self.outbound),
        )
    }
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct SharedSecrets {
    ee: [u8; 32],
    es: [u8; 32],
    se: Option<[u8; 32]>,
}

impl SharedSecrets {
    /// Key of the client auth box.
    fn auth_key(&self, network_key: &NetworkKey) -> [u8; 32] {
        sha256(&[network_key.as_bytes(), &self.ee, &self.es])
    }

    /// Key of the server accept box; also the root of the session keys.
    fn accept_key(&self, network_key: &NetworkKey) -> Result<[u8; 32], HandshakeError> {
        let se = self
            .se
            .as_ref()
            .ok_or(HandshakeError::OutOfOrder("se not yet agreed"))?;
        Ok(sha256(&[network_key.as_bytes(), &self.ee, &self.es, se]))
    }

    fn ee_hash(&self) -> [u8; 32] {
        sha256(&[&self.ee])
    }
}

fn agree(secret: &StaticSecret, public: &PublicKey) -> Result<[u8; 32], HandshakeError> {
    let shared = secret.diffie_hellman(public);
    if !shared.was_contributory() {
        return Err(HandshakeError::WeakKeyAgreement);
    }
    Ok(shared.to_bytes())
}

fn hello_message(network_key: &NetworkKey, ephemeral: &PublicKey) -> [u8; 64] {
    let tag = auth(network_key.as_bytes(), ephemeral.as_bytes());
    let mut msg = [0u8; 64];
    msg[..AUTH_TAG_LEN].copy_from_slice(&tag);
    msg[AUTH_TAG_LEN..].copy_from_slice(ephemeral.as_bytes());
    msg
}

/// Verify a hello and return the sender's (ephemeral key, hmac).
fn read_hello(
    network_key: &NetworkKey,
    msg: &[u8; 64],
) -> Result<(PublicKey, [u8; AUTH_TAG_LEN]), HandshakeError> {
    let mut tag = [0u8; AUTH_TAG_LEN];
    tag.copy_from_slice(&msg[..AUTH_TAG_LEN]);
    let mut key = [0u8; PUBLIC_KEY_LEN];
    key.copy_from_slice(&msg[AUTH_TAG_LEN..]);

    if !auth_verify(network_key.as_bytes(), &key, &tag) {
        return Err(HandshakeError::InvalidHello);
    }
    Ok((PublicKey::from(key), tag))
}

fn derive_sessions(
    root: &[u8; 32],
    local_pk: &[u8; 32],
    remote_pk: &[u8; 32],
    local_hello_tag: &[u8; AUTH_TAG_LEN],
    remote_hello_tag: &[u8; AUTH_TAG_LEN],
) -> (SessionContext, SessionContext) {
    let mut h2 = sha256(&[root]);
    let outbound = SessionContext::new(
        sha256(&[&h2, remote_pk]),
        Nonce::from_prefix(remote_hello_tag),
    );
    let inbound = SessionContext::new(
        sha256(&[&h2, local_pk]),
        Nonce::from_prefix(local_hello_tag),
    );
    h2.zeroize();
    (outbound, inbound)
}

/// Client side of the handshake.
pub struct ClientHandshake<'a> {
    identity: &'a IdentityKeypair,
    network_key: &'a NetworkKey,
    server: PublicIdentity,
    ephemeral: StaticSecret,
    hello: [u8; CLIENT_HELLO_LEN],
    server_hello_tag: Option<[u8; AUTH_TAG_LEN]>,
    server_ephemeral: Option<PublicKey>,
    secrets: Option<SharedSecrets>,
    signature: Option<[u8; SIGNATURE_LEN]>,
}

impl<'a> ClientHandshake<'a> {
    /// Start a handshake with a fresh ephemeral key.
    pub fn new(
        identity: &'a IdentityKeypair,
        network_key: &'a NetworkKey,
        server: PublicIdentity,
    ) -> Self {
        Self::with_ephemeral(identity, network_key, server, StaticSecret::random_from_rng(OsRng))
    }

    pub(crate) fn with_ephemeral(
        identity: &'a IdentityKeypair,
        network_key: &'a NetworkKey,
        server: PublicIdentity,
        ephemeral: StaticSecret,
    ) -> Self {
        let hello = hello_message(network_key, &PublicKey::from(&ephemeral));
        Self {
            identity,
            network_key,
            server,
            ephemeral,
            hello,
            server_hello_tag: None,
            server_ephemeral: None,
            secrets: None,
            signature: None,
        }
    }

    /// Message 1: `hmac_N(a_pk) ‖ a_pk`.
    pub fn hello(&self) -> [u8; CLIENT_HELLO_LEN] {
        self.hello
    }

    /// Message 2: check the server is on our network and agree `ab`, `aB`.
    pub fn read_server_hello(&mut self, msg: &[u8; SERVER_HELLO_LEN]) -> Result<(), HandshakeError> {
        let (server_ephemeral, tag) = read_hello(self.network_key, msg)?;

        let ee = agree(&self.ephemeral, &server_ephemeral)?;
        let es = agree(&self.ephemeral, &curve_public(self.server.verifying_key()))?;

        self.server_ephemeral = Some(server_ephemeral);
        self.server_hello_tag = Some(tag);
        self.secrets = Some(SharedSecrets { ee, es, se: None });
        Ok(())
    }

    /// Message 3: prove our identity to the server.
    pub fn client_auth(&mut self) -> Result<[u8; CLIENT_AUTH_LEN], HandshakeError> {
        let secrets = self
            .secrets
            .as_ref()
            .ok_or(HandshakeError::OutOfOrder("client auth before server hello"))?;

        let signed = [
            self.network_key.as_bytes().as_slice(),
            self.server.as_bytes(),
            &secrets.ee_hash(),
        ]
        .concat();
        let signature = self.identity.sign(&signed);

        let mut plaintext = [0u8; SIGNATURE_LEN + PUBLIC_KEY_LEN];
        plaintext[..SIGNATURE_LEN].copy_from_slice(&signature);
        plaintext[SIGNATURE_LEN..].copy_from_slice(&self.identity.public_key_bytes());

        let mut key = secrets.auth_key(self.network_key);
        let sealed = seal(&key, &ZERO_NONCE, &plaintext);
        key.zeroize();

        let msg = sealed
            .map_err(|_| HandshakeError::Seal)?
            .try_into()
            .map_err(|_| HandshakeError::Seal)?;
        self.signature = Some(signature);
        Ok(msg)
    }

    /// Message 4: check the server's signature and derive the session keys.
    pub fn read_server_accept(
        mut self,
        msg: &[u8; SERVER_ACCEPT_LEN],
    ) -> Result<HandshakeOutcome, HandshakeError> {
        let (Some(server_ephemeral), Some(server_tag), Some(signature)) =
            (self.server_ephemeral, self.server_hello_tag, self.signature)
        else {
            return Err(HandshakeError::OutOfOrder("server accept before client auth"));
        };
        let secrets = self
            .secrets
            .as_mut()
            .ok_or(HandshakeError::OutOfOrder("server accept before server hello"))?;

        secrets.se = Some(agree(
            &curve_secret(self.identity.signing_key()),
            &server_ephemeral,
        )?);

        let mut root = secrets.accept_key(self.network_key)?;
        let opened = open(&root, &ZERO_NONCE, msg)
            .ok()
            .and_then(|plaintext| <[u8; SIGNATURE_LEN]>::try_from(plaintext).ok());
        let Some(server_signature) = opened else {
            root.zeroize();
            return Err(HandshakeError::InvalidServerAccept);
        };

        let local_pk = self.identity.public_key_bytes();
        let signed = [
            self.network_key.as_bytes().as_slice(),
            &signature,
            &local_pk,
            &secrets.ee_hash(),
        ]
        .concat();
        if !self.server.verify(&signed, &server_signature) {
            root.zeroize();
            return Err(HandshakeError::InvalidServerSignature);
        }

        let (outbound, inbound) = derive_sessions(
            &root,
            &local_pk,
            self.server.as_bytes(),
            &hello_tag(&self.hello),
            &server_tag,
        );
        root.zeroize();

        Ok(HandshakeOutcome {
            remote: self.server,
            outbound,
            inbound,
        })
    }
}

/// Server side of the handshake.
pub struct ServerHandshake<'a> {
    identity: &'a IdentityKeypair,
    network_key: &'a NetworkKey,
    ephemeral: StaticSecret,
    hello: [u8; SERVER_HELLO_LEN],
    client_hello_tag: Option<[u8; AUTH_TAG_LEN]>,
    secrets: Option<SharedSecrets>,
    client: Option<(PublicIdentity, [u8; SIGNATURE_LEN])>,
}

impl<'a> ServerHandshake<'a> {
    pub fn new(identity: &'a IdentityKeypair, network_key: &'a NetworkKey) -> Self {
        Self::with_ephemeral(identity, network_key, StaticSecret::random_from_rng(OsRng))
    }

    pub(crate) fn with_ephemeral(
        identity: &'a IdentityKeypair,
        network_key: &'a NetworkKey,
        ephemeral: StaticSecret,
    ) -> Self {
        let hello = hello_message(network_key, &PublicKey::from(&ephemeral));
        Self {
            identity,
            network_key,
            ephemeral,
            hello,
            client_hello_tag: None,
            secrets: None,
            client: None,
        }
    }

    /// Message 1: check the client is on our network and agree `ab`, `aB`.
    pub fn read_client_hello(&mut self, msg: &[u8; CLIENT_HELLO_LEN]) -> Result<(), HandshakeError> {
        let (client_ephemeral, tag) = read_hello(self.network_key, msg)?;

        let ee = agree(&self.ephemeral, &client_ephemeral)?;
        let es = agree(&curve_secret(self.identity.signing_key()), &client_ephemeral)?;

        self.client_hello_tag = Some(tag);
        self.secrets = Some(SharedSecrets { ee, es, se: None });
        Ok(())
    }

    /// Message 2: `hmac_N(b_pk) ‖ b_pk`.
    pub fn hello(&self) -> [u8; SERVER_HELLO_LEN] {
        self.hello
    }

    /// Message 3: open the client's proof and return who it is.
    pub fn read_client_auth(
        &mut self,
        msg: &[u8; CLIENT_AUTH_LEN],
    ) -> Result<PublicIdentity, HandshakeError> {
        let secrets = self
            .secrets
            .as_mut()
            .ok_or(HandshakeError::OutOfOrder("client auth before client hello"))?;

        let mut key = secrets.auth_key(self.network_key);
        let opened = open(&key, &ZERO_NONCE, msg);
        key.zeroize();
        let plaintext = opened.map_err(|_| HandshakeError::InvalidClientAuth)?;
        if plaintext.len() != SIGNATURE_LEN + PUBLIC_KEY_LEN {
            return Err(HandshakeError::InvalidClientAuth);
        }

        let mut signature = [0u8; SIGNATURE_LEN];
        signature.copy_from_slice(&plaintext[..SIGNATURE_LEN]);
        let mut client_pk = [0u8; PUBLIC_KEY_LEN];
        client_pk.copy_from_slice(&plaintext[SIGNATURE_LEN..]);
        let client =
            PublicIdentity::from_bytes(&client_pk).map_err(|_| HandshakeError::InvalidClientAuth)?;

        let signed = [
            self.network_key.as_bytes().as_slice(),
            &self.identity.public_key_bytes(),
            &secrets.ee_hash(),
        ]
        .concat();
        if !client.verify(&signed, &signature) {
            return Err(HandshakeError::InvalidClientSignature);
        }

        secrets.se = Some(agree(&self.ephemeral, &curve_public(client.verifying_key()))?);
        self.client = Some((client, signature));
        Ok(client)
    }

    /// Message 4: countersign and derive the session keys.
    pub fn accept(
        self,
    ) -> Result<([u8; SERVER_ACCEPT_LEN], HandshakeOutcome), HandshakeError> {
        let (Some((client, client_signature)), Some(client_tag), Some(secrets)) =
            (self.client, self.client_hello_tag, self.secrets.as_ref())
        else {
            return Err(HandshakeError::OutOfOrder("accept before client auth"));
        };

        let signed = [
            self.network_key.as_bytes().as_slice(),
            &client_signature,
            client.as_bytes(),
            &secrets.ee_hash(),
        ]
        .concat();
        let signature = self.identity.sign(&signed);

        let mut root = secrets.accept_key(self.network_key)?;
        let sealed = seal(&root, &ZERO_NONCE, &signature)
            .map_err(|_| HandshakeError::Seal)
            .and_then(|sealed| sealed.try_into().map_err(|_| HandshakeError::Seal));
        let msg: [u8; SERVER_ACCEPT_LEN] = match sealed {
            Ok(msg) => msg,
            Err(e) => {
                root.zeroize();
                return Err(e);
            }
        };

        let (outbound, inbound) = derive_sessions(
            &root,
            &self.identity.public_key_bytes(),
            client.as_bytes(),
            &hello_tag(&self.hello),
            &client_tag,
        );
        root.zeroize();

        Ok((
            msg,
            HandshakeOutcome {
                remote: client,
                outbound,
                inbound,
            },
        ))
    }
}

fn hello_tag(hello: &[u8; 64]) -> [u8; AUTH_TAG_LEN] {
    let mut tag = [0u8; AUTH_TAG_LEN];
    tag.copy_from_slice(&hello[..AUTH_TAG_LEN]);
    tag
}

async fn send<S: AsyncWrite + Unpin>(stream: &mut S, msg: &[u8]) -> io::Result<()> {
    stream.write_all(msg).await?;
    stream.flush().await
}

/// Run the client side of the handshake over `stream`.
pub async fn client_handshake<S>(
    stream: &mut S,
    identity: &IdentityKeypair,
    network_key: &NetworkKey,
    server: PublicIdentity,
    config: &HandshakeConfig,
) -> Result<HandshakeOutcome, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let exchange = async {
        let mut handshake = ClientHandshake::new(identity, network_key, server);

        send(stream, &handshake.hello()).await?;
        debug!("sent client hello");

        let mut server_hello = [0u8; SERVER_HELLO_LEN];
        stream.read_exact(&mut server_hello).await?;
        handshake.read_server_hello(&server_hello)?;
        debug!("server hello verified");

        send(stream, &handshake.client_auth()?).await?;
        debug!("sent client auth");

        let mut accept = [0u8; SERVER_ACCEPT_LEN];
        stream.read_exact(&mut accept).await?;
        let outcome = handshake.read_server_accept(&accept)?;
        debug!(server = %outcome.remote.feed_id(), "handshake complete");
        Ok::<_, HandshakeError>(outcome)
    };

    tokio::time::timeout(config.timeout, exchange)
        .await
        .map_err(|_| HandshakeError::Timeout)?
}

/// Run the server side of the handshake over `stream`.
pub async fn server_handshake<S>(
    stream: &mut S,
    identity: &IdentityKeypair,
    network_key: &NetworkKey,
    config: &HandshakeConfig,
) -> Result<HandshakeOutcome, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let exchange = async {
        let mut handshake = ServerHandshake::new(identity, network_key);

        let mut client_hello = [0u8; CLIENT_HELLO_LEN];
        stream.read_exact(&mut client_hello).await?;
        handshake.read_client_hello(&client_hello)?;
        debug!("client hello verified");

        send(stream, &handshake.hello()).await?;

        let mut client_auth = [0u8; CLIENT_AUTH_LEN];
        stream.read_exact(&mut client_auth).await?;
        let client = handshake.read_client_auth(&client_auth)?;
        let client_id = client.feed_id();
        if !config.is_allowed(&client_id) {
            return Err(HandshakeError::Unauthorized(client_id));
        }
        debug!(client = %client_id, "client authenticated");

        let (accept, outcome) = handshake.accept()?;
        send(stream, &accept).await?;
        Ok::<_, HandshakeError>(outcome)
    };

    tokio::time::timeout(config.timeout, exchange)
        .await
        .map_err(|_| HandshakeError::Timeout)?
}
