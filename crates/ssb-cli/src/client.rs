//! `ssb connect`: follow a peer's feed over a client session.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use ssb_crypto::handshake::client_handshake;
use ssb_crypto::identity::{FeedId, PublicIdentity};
use ssb_rpc::{rpc_channel, Packet, RequestNumbers, RpcError, RpcReceiver, RpcSender};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::Peer;

pub async fn run(peer: &Peer, addr: &str, remote: PublicIdentity) -> Result<()> {
    info!("Connecting to {}...", addr);
    let mut stream = timeout(peer.config.connect_timeout(), TcpStream::connect(addr))
        .await
        .with_context(|| format!("connect to {addr} timed out"))?
        .with_context(|| format!("failed to connect to {addr}"))?;

    let outcome = client_handshake(
        &mut stream,
        &peer.identity,
        &peer.network_key,
        remote,
        &peer.handshake_config(),
    )
    .await
    .context("handshake failed")?;
    info!("Connected to {}", outcome.remote.feed_id());

    let (read_half, write_half) = stream.into_split();
    let (receiver, sender) = rpc_channel(outcome, read_half, write_half);
    let mut session = Session::new(sender.clone(), remote.feed_id());

    tokio::select! {
        result = session.follow(receiver) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, saying goodbye");
            sender.close().await?;
            Ok(())
        }
    }
}

/// Client side of one RPC session.
struct Session<W> {
    sender: RpcSender<W>,
    remote: FeedId,
    numbers: RequestNumbers,
}

impl<W: AsyncWrite + Unpin> Session<W> {
    fn new(sender: RpcSender<W>, remote: FeedId) -> Self {
        Self {
            sender,
            remote,
            numbers: RequestNumbers::new(),
        }
    }

    /// Handle packets until the peer says goodbye.
    async fn follow<R: AsyncRead + Unpin>(&mut self, mut receiver: RpcReceiver<R>) -> Result<()> {
        loop {
            match receiver.recv().await {
                Ok(packet) => self.handle(packet).await?,
                Err(RpcError::Closed) => {
                    info!("Peer closed the session");
                    self.sender.close().await?;
                    return Ok(());
                }
                Err(e) if !e.is_fatal() => warn!("Dropping malformed frame: {}", e),
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn handle(&mut self, packet: Packet) -> Result<()> {
        if packet.is_request() && packet.method().as_deref() == Some("blobs.createWants") {
            // Nothing wanted; then ask for the peer's feed.
            self.sender
                .send(&Packet::response_to(&packet, json!({})))
                .await?;

            let history = Packet::stream_request(
                self.numbers.next_number(),
                json!({
                    "name": ["createHistoryStream"],
                    "type": "source",
                    "args": [{ "id": self.remote.as_str() }],
                }),
            )?;
            self.sender.send(&history).await?;
            debug!("Requested history of {}", self.remote);
            return Ok(());
        }

        match packet.body.as_json().and_then(post_text) {
            Some(text) => println!("{text}"),
            None => debug!(number = packet.number, end = packet.end, "unhandled packet"),
        }
        Ok(())
    }
}

/// Text of a post, whether or not the message is wrapped with its key.
fn post_text(message: &Value) -> Option<&str> {
    message
        .pointer("/value/content/text")
        .or_else(|| message.pointer("/content/text"))
        .and_then(Value::as_str)
}
