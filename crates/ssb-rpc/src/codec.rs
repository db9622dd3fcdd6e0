//! Frame encoding and the incremental decoder.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use ssb_crypto::MAX_MESSAGE_LEN;
use tracing::trace;

use crate::packet::{Body, BodyType, Flags, Packet};
use crate::{FrameError, RpcError};

/// Size of the frame header: flags, body length, request number.
pub const HEADER_LEN: usize = 9;

/// Largest body [`encode`] accepts: header and body must fit in one box.
pub const MAX_ENCODED_BODY_LEN: usize = MAX_MESSAGE_LEN - HEADER_LEN;

/// Default cap on a declared body length when decoding. Peers may spread a
/// frame over many boxes, so this is well above [`MAX_ENCODED_BODY_LEN`].
pub const DEFAULT_MAX_BODY_LEN: usize = 8 * 1024 * 1024;

/// Serialize a packet into one frame.
///
/// Fails rather than split when the frame would not fit in a single box.
pub fn encode(packet: &Packet) -> Result<Bytes, RpcError> {
    let body = packet.body.to_bytes()?;
    let total = HEADER_LEN + body.len();
    if total > MAX_MESSAGE_LEN {
        return Err(RpcError::MessageTooLarge(total));
    }
    // Fits in u32 because it fits in a box.
    let body_len = body.len() as u32;

    let mut buf = BytesMut::with_capacity(total);
    buf.put_u8(packet.flags().bits() | packet.body.body_type().bits());
    buf.put_u32(body_len);
    buf.put_i32(packet.number);
    buf.put_slice(&body);
    Ok(buf.freeze())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderLimits {
    /// Declared body lengths above this poison the decoder.
    pub max_body_len: usize,
}

impl Default for DecoderLimits {
    fn default() -> Self {
        Self {
            max_body_len: DEFAULT_MAX_BODY_LEN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrameHeader {
    flags: Flags,
    type_bits: u8,
    body_len: usize,
    number: i32,
}

impl FrameHeader {
    fn parse(mut buf: &[u8]) -> Self {
        let first = buf.get_u8();
        let body_len = buf.get_u32() as usize;
        let number = buf.get_i32();
        Self {
            flags: Flags::from_bits_truncate(first),
            type_bits: first,
            body_len,
            number,
        }
    }

    fn into_packet(self, body: Bytes) -> Result<Packet, FrameError> {
        let body_type = BodyType::from_bits(self.type_bits)?;
        Ok(Packet {
            stream: self.flags.contains(Flags::STREAM),
            end: self.flags.contains(Flags::END),
            number: self.number,
            body: Body::decode(body_type, body)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    AwaitingHeader,
    AwaitingBody(FrameHeader),
    Poisoned,
}

/// Incremental frame parser.
///
/// Feed it whatever each box read produced with [`Decoder::push`] and drain
/// complete packets with [`Decoder::next_packet`]. Frames may straddle reads
/// and a read may carry several frames.
#[derive(Debug)]
pub struct Decoder {
    buffer: BytesMut,
    state: DecodeState,
    limits: DecoderLimits,
}

impl Decoder {
    pub fn new() -> Self {
        Self::with_limits(DecoderLimits::default())
    }

    pub fn with_limits(limits: DecoderLimits) -> Self {
        Self {
            buffer: BytesMut::new(),
            state: DecodeState::AwaitingHeader,
            limits,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        if self.state != DecodeState::Poisoned {
            self.buffer.extend_from_slice(data);
        }
    }

    /// Next complete packet, or `None` until more bytes arrive.
    ///
    /// A body that fails to decode is returned as an error for that frame
    /// only; the following frames are still delivered. An oversized length
    /// is reported once and poisons the decoder, after which this always
    /// returns `None`.
    pub fn next_packet(&mut self) -> Option<Result<Packet, FrameError>> {
        loop {
            match self.state {
                DecodeState::Poisoned => return None,
                DecodeState::AwaitingHeader => {
                    if self.buffer.len() < HEADER_LEN {
                        return None;
                    }
                    let header = FrameHeader::parse(&self.buffer[..HEADER_LEN]);
                    if header.body_len > self.limits.max_body_len {
                        self.state = DecodeState::Poisoned;
                        self.buffer.clear();
                        return Some(Err(FrameError::BodyTooLarge {
                            declared: header.body_len,
                            limit: self.limits.max_body_len,
                        }));
                    }
                    self.buffer.advance(HEADER_LEN);
                    self.state = DecodeState::AwaitingBody(header);
                }
                DecodeState::AwaitingBody(header) => {
                    if self.buffer.len() < header.body_len {
                        return None;
                    }
                    let body = self.buffer.split_to(header.body_len).freeze();
                    self.state = DecodeState::AwaitingHeader;
                    trace!(number = header.number, len = header.body_len, "decoded frame");
                    return Some(header.into_packet(body));
                }
            }
        }
    }

    /// True when no partial frame is buffered.
    pub fn is_idle(&self) -> bool {
        self.state == DecodeState::AwaitingHeader && self.buffer.is_empty()
    }

    pub fn is_poisoned(&self) -> bool {
        self.state == DecodeState::Poisoned
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
