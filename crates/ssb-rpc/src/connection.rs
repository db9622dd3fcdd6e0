//! RPC endpoints over the two halves of a box-stream.

use std::sync::Arc;

use ssb_crypto::{BoxReader, BoxWriter, HandshakeOutcome};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::codec::{encode, Decoder, DecoderLimits};
use crate::packet::Packet;
use crate::{FrameError, RpcError};

/// Sending half. Clones share one box writer; the lock is held across the
/// whole seal-and-write so frames never interleave and nonces stay ordered.
#[derive(Debug)]
pub struct RpcSender<W> {
    writer: Arc<Mutex<BoxWriter<W>>>,
}

impl<W> Clone for RpcSender<W> {
    fn clone(&self) -> Self {
        Self {
            writer: Arc::clone(&self.writer),
        }
    }
}

impl<W: AsyncWrite + Unpin> RpcSender<W> {
    pub fn new(writer: BoxWriter<W>) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    pub async fn send(&self, packet: &Packet) -> Result<(), RpcError> {
        let frame = encode(packet)?;
        let mut writer = self.writer.lock().await;
        writer.send(&frame).await?;
        trace!(
            number = packet.number,
            stream = packet.stream,
            end = packet.end,
            len = frame.len(),
            "sent packet"
        );
        Ok(())
    }

    /// Send the box-stream goodbye. Later sends from any clone fail.
    pub async fn close(&self) -> Result<(), RpcError> {
        self.writer.lock().await.close().await?;
        Ok(())
    }
}

/// Receiving half.
#[derive(Debug)]
pub struct RpcReceiver<R> {
    reader: BoxReader<R>,
    decoder: Decoder,
}

impl<R: AsyncRead + Unpin> RpcReceiver<R> {
    pub fn new(reader: BoxReader<R>) -> Self {
        Self::with_limits(reader, DecoderLimits::default())
    }

    pub fn with_limits(reader: BoxReader<R>, limits: DecoderLimits) -> Self {
        Self {
            reader,
            decoder: Decoder::with_limits(limits),
        }
    }

    /// Next packet from the peer.
    ///
    /// Buffered frames are returned before reading another box. A frame
    /// whose body fails to decode comes back as [`RpcError::Frame`] and the
    /// receiver stays usable; check [`RpcError::is_fatal`]. After the peer's
    /// goodbye this returns [`RpcError::Closed`].
    pub async fn recv(&mut self) -> Result<Packet, RpcError> {
        loop {
            if let Some(result) = self.decoder.next_packet() {
                return result.map_err(RpcError::from);
            }
            if self.decoder.is_poisoned() {
                return Err(FrameError::Poisoned.into());
            }

            match self.reader.recv().await? {
                Some(plaintext) => self.decoder.push(&plaintext),
                None if self.decoder.is_idle() => {
                    debug!("peer closed rpc stream");
                    return Err(RpcError::Closed);
                }
                None => return Err(RpcError::UnexpectedEof),
            }
        }
    }
}

/// RPC endpoints for a finished handshake over the given transport halves.
pub fn rpc_channel<R, W>(
    outcome: HandshakeOutcome,
    reader: R,
    writer: W,
) -> (RpcReceiver<R>, RpcSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (reader, writer) = outcome.into_box_stream(reader, writer);
    (RpcReceiver::new(reader), RpcSender::new(writer))
}
