//! Multiplexed RPC framing carried inside a box-stream.
//!
//! This crate provides:
//! - The packet model: flags, request number and a typed body
//! - `encode` and an incremental `Decoder` for the 9-byte-header wire format
//! - `RpcSender` / `RpcReceiver` over the encrypted box-stream halves
//! - Request number allocation and request/response correlation
//!
//! # Wire format
//!
//! ```text
//! +-------+------------------+------------------+----------------+
//! | flags | body length      | request number   | body           |
//! | 1 B   | u32 big-endian   | i32 big-endian   | length bytes   |
//! +-------+------------------+------------------+----------------+
//!
//! flags: 0000 S E TT   S = stream, E = end/error, TT = body type
//!                      (0 binary, 1 UTF-8 text, 2 JSON)
//! ```
//!
//! Requests carry a positive number; the matching responses carry its
//! negation. Frames are never split: one frame must fit in one box.

#![forbid(unsafe_code)]

pub mod codec;
pub mod connection;
pub mod packet;
pub mod request;

pub use codec::{encode, Decoder, DecoderLimits, HEADER_LEN};
pub use connection::{rpc_channel, RpcReceiver, RpcSender};
pub use packet::{Body, BodyType, Flags, Packet};
pub use request::{is_response_to, RequestNumbers};

use ssb_common::ErrorKind;
use ssb_crypto::BoxStreamError;

/// Errors decoding a single frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("unknown body type: {0}")]
    UnknownBodyType(u8),
    #[error("text body is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("JSON body does not parse: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("declared body length {declared} exceeds limit {limit}")]
    BodyTooLarge { declared: usize, limit: usize },
    #[error("decoder stopped after an earlier framing error")]
    Poisoned,
}

impl FrameError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Protocol
    }

    /// Whether the decoder lost its place in the byte stream.
    ///
    /// Body decode errors leave the decoder at the next header; these do not.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FrameError::BodyTooLarge { .. } | FrameError::Poisoned)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("box stream: {0}")]
    Box(#[from] BoxStreamError),
    #[error("frame: {0}")]
    Frame(#[from] FrameError),
    #[error("failed to serialize JSON body: {0}")]
    Encode(serde_json::Error),
    #[error("frame of {0} bytes does not fit in one box")]
    MessageTooLarge(usize),
    #[error("invalid request number: {0}")]
    InvalidRequestNumber(i32),
    #[error("peer closed the stream")]
    Closed,
    #[error("stream ended in the middle of a frame")]
    UnexpectedEof,
}

impl RpcError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RpcError::Box(e) => e.kind(),
            RpcError::Frame(e) => e.kind(),
            RpcError::Closed => ErrorKind::Network,
            RpcError::Encode(_)
            | RpcError::MessageTooLarge(_)
            | RpcError::InvalidRequestNumber(_)
            | RpcError::UnexpectedEof => ErrorKind::Protocol,
        }
    }

    /// Whether the connection can no longer be used after this error.
    pub fn is_fatal(&self) -> bool {
        match self {
            RpcError::Box(BoxStreamError::MessageTooLarge(_)) => false,
            RpcError::Box(_) | RpcError::Closed | RpcError::UnexpectedEof => true,
            RpcError::Frame(e) => e.is_fatal(),
            RpcError::Encode(_) | RpcError::MessageTooLarge(_) | RpcError::InvalidRequestNumber(_) => {
                false
            }
        }
    }
}
