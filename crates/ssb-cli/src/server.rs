//! `ssb serve`: accept handshakes and answer every request as unsupported.

use std::sync::Arc;

use anyhow::{Context, Result};
use ssb_crypto::handshake::{server_handshake, HandshakeConfig};
use ssb_crypto::identity::{IdentityKeypair, NetworkKey};
use ssb_rpc::{rpc_channel, Packet, RpcError, RpcReceiver, RpcSender};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::Peer;

pub async fn run(peer: Peer, listen: &str, handshake: HandshakeConfig) -> Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;
    info!(
        "Listening on {} as {}",
        listener.local_addr()?,
        peer.identity.feed_id()
    );

    let identity = Arc::new(peer.identity);
    let network_key = peer.network_key;
    let handshake = Arc::new(handshake);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, addr) = accepted?;
                let identity = Arc::clone(&identity);
                let network_key = network_key.clone();
                let handshake = Arc::clone(&handshake);
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, &identity, &network_key, &handshake).await {
                        warn!("Connection from {} failed: {:#}", addr, e);
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                return Ok(());
            }
        }
    }
}

async fn serve_connection<S>(
    mut stream: S,
    identity: &IdentityKeypair,
    network_key: &NetworkKey,
    handshake: &HandshakeConfig,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let outcome = server_handshake(&mut stream, identity, network_key, handshake)
        .await
        .context("handshake failed")?;
    let remote = outcome.remote.feed_id();
    info!("Peer {} authenticated", remote);

    let (read_half, write_half) = tokio::io::split(stream);
    let (receiver, sender) = rpc_channel(outcome, read_half, write_half);
    answer_requests(receiver, sender).await?;

    info!("Peer {} disconnected", remote);
    Ok(())
}

async fn answer_requests<R, W>(mut receiver: RpcReceiver<R>, sender: RpcSender<W>) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let packet = match receiver.recv().await {
            Ok(packet) => packet,
            Err(RpcError::Closed) => {
                sender.close().await?;
                return Ok(());
            }
            Err(e) if !e.is_fatal() => {
                warn!("Dropping malformed frame: {}", e);
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            number = packet.number,
            stream = packet.stream,
            end = packet.end,
            method = packet.method().as_deref().unwrap_or("-"),
            "received packet"
        );

        if packet.is_request() && !packet.end {
            let reply = if packet.stream {
                Packet::end_of_stream(-packet.number)
            } else {
                Packet::error_response(&packet, "Error", "method not supported")
            };
            sender.send(&reply).await?;
        }
    }
}
